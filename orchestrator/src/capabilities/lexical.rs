// Offline, deterministic grading and refinement based on term coverage.
// Used when no language model is configured.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{GradingCapability, Judgement, RefinementCapability};
use crate::error::CapabilityError;
use crate::models::{GroundingVerdict, NormalizedCandidate, Query, RelevanceVerdict, Weakness};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "be", "best", "can", "covers", "do", "for", "find", "good", "i", "in", "is",
    "looking", "me", "my", "need", "of", "on", "or", "some", "that", "the", "to", "tool",
    "tools", "use", "using", "want", "what", "which", "with", "work", "works",
];

const DOMAIN_TERMS: &[&str] = &["bioinformatics", "genomics", "proteomics", "biology"];

const RELEVANT_COVERAGE: f64 = 0.5;
const GROUNDED_COVERAGE: f64 = 0.6;

#[derive(Debug, Clone, Default)]
pub struct LexicalCapability;

impl LexicalCapability {
    pub fn new() -> Self {
        Self
    }
}

/// Lowercased content words, in first-seen order, without duplicates.
pub fn significant_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn coverage(terms: &[String], haystack: &HashSet<String>) -> (usize, f64) {
    let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
    (matched, matched as f64 / terms.len() as f64)
}

fn broaden(text: &str) -> Option<String> {
    let terms = significant_terms(text);
    let stripped = terms.join(" ");
    if !stripped.is_empty() && stripped != text.to_lowercase() {
        return Some(stripped);
    }
    if !terms.iter().any(|t| DOMAIN_TERMS.contains(&t.as_str())) && !terms.is_empty() {
        return Some(format!("{} bioinformatics", stripped));
    }
    if terms.len() > 2 {
        return Some(terms[..terms.len() - 1].join(" "));
    }
    None
}

fn narrow(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if !lower.contains("software") {
        Some(format!("{} software package", text))
    } else if !lower.contains("command-line") {
        Some(format!("{} command-line", text))
    } else {
        None
    }
}

#[async_trait]
impl GradingCapability for LexicalCapability {
    async fn classify(
        &self,
        query: &Query,
        candidate: &NormalizedCandidate,
    ) -> Result<Judgement<RelevanceVerdict>, CapabilityError> {
        let wanted = significant_terms(&query.text);
        if wanted.is_empty() {
            return Err(CapabilityError::Ambiguous(
                "query has no significant terms".into(),
            ));
        }
        let haystack: HashSet<String> = significant_terms(&format!(
            "{} {} {}",
            candidate.name, candidate.description, candidate.content
        ))
        .into_iter()
        .collect();

        let (matched, ratio) = coverage(&wanted, &haystack);
        let rationale = format!("matched {} of {} query terms", matched, wanted.len());
        if ratio >= RELEVANT_COVERAGE {
            let covered: Vec<&str> = wanted
                .iter()
                .filter(|t| haystack.contains(*t))
                .map(String::as_str)
                .collect();
            let claim = format!("{} covers {}", candidate.name, covered.join(" "));
            return Ok(Judgement::new(RelevanceVerdict::Relevant, rationale).with_claim(claim));
        }
        let verdict = if matched == 0 {
            RelevanceVerdict::NotRelevant
        } else {
            RelevanceVerdict::Uncertain
        };
        Ok(Judgement::new(verdict, rationale))
    }

    async fn check_grounding(
        &self,
        candidate: &NormalizedCandidate,
        claim: &str,
    ) -> Result<Judgement<GroundingVerdict>, CapabilityError> {
        let claimed = significant_terms(claim);
        if claimed.is_empty() {
            return Ok(Judgement::new(
                GroundingVerdict::NotApplicable,
                "no checkable claim",
            ));
        }
        let evidence: HashSet<String> =
            significant_terms(&format!("{} {}", candidate.name, candidate.content))
                .into_iter()
                .collect();
        if evidence.is_empty() {
            return Ok(Judgement::new(
                GroundingVerdict::Unsupported,
                "no retrieved content to support the claim",
            ));
        }

        let (matched, ratio) = coverage(&claimed, &evidence);
        let verdict = if ratio >= GROUNDED_COVERAGE {
            GroundingVerdict::Grounded
        } else {
            GroundingVerdict::Unsupported
        };
        Ok(Judgement::new(
            verdict,
            format!("{} of {} claim terms found in retrieved content", matched, claimed.len()),
        ))
    }
}

#[async_trait]
impl RefinementCapability for LexicalCapability {
    async fn refine(&self, query: &Query, weaknesses: &[Weakness]) -> Result<String, CapabilityError> {
        let feedback = weaknesses.iter().find_map(|w| match w {
            Weakness::UserFeedback { text } if !text.trim().is_empty() => Some(text.trim()),
            _ => None,
        });
        if let Some(feedback) = feedback {
            return Ok(format!("{} {}", query.text, feedback));
        }

        let refined = if weaknesses.iter().any(Weakness::wants_broader) {
            broaden(&query.text)
        } else {
            narrow(&query.text)
        };
        refined.ok_or_else(|| {
            CapabilityError::Unavailable("no further lexical refinement for this query".into())
        })
    }
}
