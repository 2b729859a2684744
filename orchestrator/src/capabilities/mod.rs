// Grading and refinement capabilities consumed by the grader and the planner.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::models::{GroundingVerdict, NormalizedCandidate, Query, RelevanceVerdict, Weakness};

pub mod lexical;
pub mod llm;

pub use lexical::LexicalCapability;
pub use llm::LlmCapability;

#[derive(Debug, Clone, PartialEq)]
pub struct Judgement<V> {
    pub verdict: V,
    pub rationale: String,
    /// Generated statement about what the candidate does for the query.
    /// Checked for grounding against the retrieved content.
    pub claim: Option<String>,
}

impl<V> Judgement<V> {
    pub fn new(verdict: V, rationale: impl Into<String>) -> Self {
        Self {
            verdict,
            rationale: rationale.into(),
            claim: None,
        }
    }

    pub fn with_claim(mut self, claim: impl Into<String>) -> Self {
        let claim = claim.into();
        self.claim = Some(claim.trim().to_string()).filter(|c| !c.is_empty());
        self
    }
}

#[async_trait]
pub trait GradingCapability: Send + Sync {
    /// Does the candidate plausibly satisfy the query's intent? A relevant
    /// verdict should carry a claim saying what the tool does for the query.
    async fn classify(
        &self,
        query: &Query,
        candidate: &NormalizedCandidate,
    ) -> Result<Judgement<RelevanceVerdict>, CapabilityError>;

    /// Is `claim` traceable to the candidate's retrieved content?
    async fn check_grounding(
        &self,
        candidate: &NormalizedCandidate,
        claim: &str,
    ) -> Result<Judgement<GroundingVerdict>, CapabilityError>;
}

#[async_trait]
pub trait RefinementCapability: Send + Sync {
    async fn refine(&self, query: &Query, weaknesses: &[Weakness]) -> Result<String, CapabilityError>;
}
