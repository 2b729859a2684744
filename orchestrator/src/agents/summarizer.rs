// Summarizer Agent: turns the accepted ranking into a narrative answer

use async_trait::async_trait;

use crate::models::{FinalAnswer, RelevanceVerdict, TerminationReason};

#[async_trait]
pub trait ResponseSynthesizer: Send + Sync {
    async fn synthesize(&self, answer: &FinalAnswer) -> String;
}

/// Deterministic narrative built from counts and loop outcome.
#[derive(Debug, Clone, Default)]
pub struct TemplateSynthesizer;

fn origin_label(origin: &str) -> &'static str {
    match origin {
        "local_store" => "database tools",
        "web_search" | "tavily_search" => "web tools",
        "europe_pmc" | "pubmed" => "scientific papers",
        "smithery" => "registry tools",
        _ => "other results",
    }
}

#[async_trait]
impl ResponseSynthesizer for TemplateSynthesizer {
    async fn synthesize(&self, answer: &FinalAnswer) -> String {
        let relevant = answer
            .results
            .iter()
            .filter(|r| r.grade.relevance == RelevanceVerdict::Relevant)
            .count();
        let mut text = format!(
            "I've analyzed your query about '{}' and found {} relevant tools and resources across different categories. ",
            answer.original_query, relevant
        );
        let weaker = answer.results.len() - relevant;
        if weaker > 0 {
            text.push_str(&format!(
                "{} further matches are listed with lower confidence. ",
                weaker
            ));
        }

        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for result in &answer.results {
            let label = result
                .candidate
                .origins
                .first()
                .map(|o| origin_label(o))
                .unwrap_or("other results");
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label, 1)),
            }
        }
        if !counts.is_empty() {
            let parts: Vec<String> = counts.iter().map(|(l, n)| format!("{} {}", n, l)).collect();
            text.push_str(&format!("The results include {}. ", parts.join(", ")));
        }

        if answer.final_query != answer.original_query {
            text.push_str(&format!(
                "I refined your query to '{}' to get better results. ",
                answer.final_query
            ));
        }
        if answer.round_count > 1 {
            text.push_str(&format!(
                "I performed {} rounds of refinement to ensure quality. ",
                answer.round_count
            ));
        }
        if !answer.excluded.is_empty() {
            text.push_str(&format!(
                "I withheld {} results whose descriptions were not supported by retrieved content. ",
                answer.excluded.len()
            ));
        }
        let verified = answer.results.iter().filter(|r| r.verified).count();
        if verified > 0 {
            text.push_str(&format!(
                "{} recommendations are verified as relevant and grounded in reliable sources. ",
                verified
            ));
        }
        if answer.termination_reason != TerminationReason::Accepted && !answer.results.is_empty() {
            text.push_str("These are the best results found, though they did not reach the quality target. ");
        }

        if answer.results.is_empty() {
            text.push_str("I couldn't find specific tools for this query.");
        } else {
            text.push_str("Below you'll find specific recommendations for your research needs.");
        }
        text
    }
}
