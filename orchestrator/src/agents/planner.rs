// Planner Agent: produces the initial query and refines it between rounds

use std::sync::Arc;

use tracing::{info, warn};

use crate::capabilities::RefinementCapability;
use crate::error::RefinementStalled;
use crate::models::{Query, RoundState, Weakness};

pub struct QueryPlanner {
    capability: Arc<dyn RefinementCapability>,
}

/// What a round did badly, most severe first.
pub fn diagnose(round: &RoundState) -> Vec<Weakness> {
    let mut weaknesses = Vec::new();
    if !round.failures.is_empty() {
        weaknesses.push(Weakness::SourcesFailed {
            count: round.failures.len(),
        });
    }
    if round.candidates.is_empty() {
        weaknesses.push(Weakness::NoCandidates);
        return weaknesses;
    }
    if round.relevant_count() == 0 {
        weaknesses.push(Weakness::NoRelevantHits);
    } else if round.quality.verified == 0 {
        weaknesses.push(Weakness::NoGroundedHits);
    } else if round.quality.verified < round.quality.considered {
        weaknesses.push(Weakness::LowPrecision {
            verified: round.quality.verified,
            considered: round.quality.considered,
        });
    }
    weaknesses
}

/// Trims, drops wrapping quotes and collapses whitespace in a model-written query.
fn clean(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl QueryPlanner {
    pub fn new(capability: Arc<dyn RefinementCapability>) -> Self {
        Self { capability }
    }

    pub fn initial(&self, text: &str) -> Query {
        Query::initial(text)
    }

    /// Rewrites the latest round's query. Stalls when the capability fails or
    /// proposes a query already tried in `history`.
    pub async fn refine(&self, history: &[RoundState]) -> Result<Query, RefinementStalled> {
        let latest = history
            .last()
            .ok_or_else(|| RefinementStalled("no round to refine".into()))?;
        let weaknesses = diagnose(latest);

        let proposed = self
            .capability
            .refine(&latest.query, &weaknesses)
            .await
            .map_err(|e| RefinementStalled(e.to_string()))?;
        let proposed = clean(&proposed);

        if proposed.is_empty() {
            return Err(RefinementStalled("empty query proposed".into()));
        }
        if history.iter().any(|r| r.query.same_text(&proposed)) {
            return Err(RefinementStalled(format!(
                "'{}' was already tried",
                proposed
            )));
        }

        info!(
            from = %latest.query.text,
            to = %proposed,
            weaknesses = weaknesses.len(),
            "Query refined"
        );
        Ok(Query::refined_from(&latest.query, proposed))
    }

    /// Folds a user's follow-up into the original query, falling back to
    /// plain concatenation when the capability cannot help.
    pub async fn merge_follow_up(&self, original: &str, follow_up: &str) -> String {
        let query = Query::initial(original);
        let feedback = [Weakness::UserFeedback {
            text: follow_up.trim().to_string(),
        }];
        match self.capability.refine(&query, &feedback).await {
            Ok(merged) if !clean(&merged).is_empty() => clean(&merged),
            Ok(_) => clean(&format!("{} {}", original, follow_up)),
            Err(e) => {
                warn!(error = %e, "Follow-up merge failed, concatenating");
                clean(&format!("{} {}", original, follow_up))
            }
        }
    }
}
