// Quality Grader: relevance and grounding verdicts for every candidate

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::capabilities::GradingCapability;
use crate::models::{
    Grade, GroundingVerdict, NormalizedCandidate, Query, QualitySignal, RelevanceVerdict, Warning,
};

#[derive(Debug, Default)]
pub struct GradingOutcome {
    /// One grade per candidate, in candidate order.
    pub grades: Vec<Grade>,
    pub warnings: Vec<Warning>,
}

pub struct QualityGrader {
    capability: Arc<dyn GradingCapability>,
    concurrency: usize,
}

impl QualityGrader {
    pub fn new(capability: Arc<dyn GradingCapability>, concurrency: usize) -> Self {
        Self {
            capability,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Grades every candidate. Capability failures degrade to `Uncertain`
    /// plus a warning; they never abort the round.
    pub async fn grade(&self, query: &Query, candidates: &[NormalizedCandidate]) -> GradingOutcome {
        let graded: Vec<(Grade, Vec<String>)> = stream::iter(candidates.to_vec())
            .map(|candidate| grade_one(self.capability.clone(), query.clone(), candidate))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut outcome = GradingOutcome::default();
        for (grade, problems) in graded {
            outcome
                .warnings
                .extend(problems.into_iter().map(|m| Warning::round(query.round, m)));
            outcome.grades.push(grade);
        }
        outcome
    }
}

async fn grade_one(
    capability: Arc<dyn GradingCapability>,
    query: Query,
    candidate: NormalizedCandidate,
) -> (Grade, Vec<String>) {
    let mut problems = Vec::new();

    let (relevance, mut rationale, claim) = match capability.classify(&query, &candidate).await {
        Ok(j) => (j.verdict, j.rationale, j.claim),
        Err(e) => {
            warn!(tool = %candidate.name, error = %e, "Relevance grading failed");
            problems.push(format!("could not grade '{}': {}", candidate.name, e));
            (RelevanceVerdict::Uncertain, "grading unavailable".to_string(), None)
        }
    };

    let grounding = match claim {
        Some(claim) if relevance == RelevanceVerdict::Relevant => {
            match capability.check_grounding(&candidate, &claim).await {
                Ok(j) => {
                    if !j.rationale.is_empty() {
                        rationale = format!("{}; {}", rationale, j.rationale);
                    }
                    j.verdict
                }
                Err(e) => {
                    warn!(tool = %candidate.name, error = %e, "Grounding check failed");
                    problems.push(format!("could not check grounding of '{}': {}", candidate.name, e));
                    return (
                        Grade {
                            key: candidate.key,
                            relevance: RelevanceVerdict::Uncertain,
                            grounding: GroundingVerdict::NotApplicable,
                            rationale,
                        },
                        problems,
                    );
                }
            }
        }
        _ => GroundingVerdict::NotApplicable,
    };

    debug!(tool = %candidate.name, ?relevance, ?grounding, "Candidate graded");
    (
        Grade {
            key: candidate.key,
            relevance,
            grounding,
            rationale,
        },
        problems,
    )
}

/// Fraction of the top `top_k` candidates (by rank) that are verified.
/// Zero when there is nothing to consider.
pub fn assess(candidates: &[NormalizedCandidate], grades: &[Grade], top_k: usize) -> QualitySignal {
    let mut top: Vec<&NormalizedCandidate> = candidates.iter().collect();
    top.sort_by_key(|c| c.rank);
    top.truncate(top_k);

    let considered = top.len();
    let verified = top
        .iter()
        .filter(|c| grades.iter().any(|g| g.key == c.key && g.is_verified()))
        .count();
    let score = if considered == 0 {
        0.0
    } else {
        verified as f64 / considered as f64
    };
    QualitySignal {
        verified,
        considered,
        score,
    }
}
