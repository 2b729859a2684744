use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowercases and collapses internal whitespace so that "  BLAST+ " and
/// "blast+" resolve to the same key.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub round: u32,
    /// Round index of the query this one was refined from.
    pub parent: Option<u32>,
}

impl Query {
    pub fn initial(text: &str) -> Self {
        Self {
            text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            round: 0,
            parent: None,
        }
    }

    pub fn refined_from(parent: &Query, text: String) -> Self {
        Self {
            text,
            round: parent.round + 1,
            parent: Some(parent.round),
        }
    }

    pub fn same_text(&self, other: &str) -> bool {
        normalize_text(&self.text) == normalize_text(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LocalStore,
    WebSearch,
    Literature,
    ToolRegistry,
}

/// How a source's native score should be read before normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// Higher is better.
    Similarity,
    /// Lower is better (vector distances, result positions).
    Distance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub key: String,
    pub name: String,
    /// Short text presented to the user.
    pub description: String,
    /// Retrieved evidence that generated claims must be traceable to.
    pub content: String,
    pub raw_score: f64,
    pub origin: String,
    pub url: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Candidate {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        raw_score: f64,
        origin: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        Self {
            key: normalize_text(&name),
            content: description.clone(),
            name: name.trim().to_string(),
            description,
            raw_score,
            origin: origin.into(),
            url: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url.filter(|u| !u.is_empty());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_well_formed(&self) -> bool {
        !self.key.is_empty() && self.raw_score.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCandidate {
    pub key: String,
    pub name: String,
    pub description: String,
    pub content: String,
    pub url: Option<String>,
    /// Every origin that surfaced this tool, highest priority first.
    pub origins: Vec<String>,
    pub raw_score: f64,
    /// Cross-source comparable score in [0, 1].
    pub score: f64,
    /// 1-based position in the aggregated ranking.
    pub rank: usize,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceVerdict {
    Relevant,
    NotRelevant,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingVerdict {
    Grounded,
    Unsupported,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub key: String,
    pub relevance: RelevanceVerdict,
    pub grounding: GroundingVerdict,
    pub rationale: String,
}

impl Grade {
    pub fn is_verified(&self) -> bool {
        self.relevance == RelevanceVerdict::Relevant
            && self.grounding == GroundingVerdict::Grounded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub origin: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySignal {
    /// Relevant and grounded candidates among the top-K.
    pub verified: usize,
    pub considered: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundState {
    pub index: u32,
    pub query: Query,
    pub candidates: Vec<NormalizedCandidate>,
    pub grades: Vec<Grade>,
    pub quality: QualitySignal,
    pub failures: Vec<SourceFailure>,
    /// Sources that answered (possibly with zero candidates).
    pub sources_responded: usize,
}

impl RoundState {
    pub fn grade_for(&self, key: &str) -> Option<&Grade> {
        self.grades.iter().find(|g| g.key == key)
    }

    pub fn relevant_count(&self) -> usize {
        self.grades
            .iter()
            .filter(|g| g.relevance == RelevanceVerdict::Relevant)
            .count()
    }
}

/// What went wrong in a round, handed to the refinement capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Weakness {
    NoCandidates,
    SourcesFailed { count: usize },
    NoRelevantHits,
    NoGroundedHits,
    LowPrecision { verified: usize, considered: usize },
    UserFeedback { text: String },
}

impl Weakness {
    /// True when the cure is a broader query rather than a narrower one.
    pub fn wants_broader(&self) -> bool {
        matches!(
            self,
            Weakness::NoCandidates | Weakness::SourcesFailed { .. } | Weakness::NoRelevantHits
        )
    }
}

impl fmt::Display for Weakness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weakness::NoCandidates => write!(f, "no candidates were retrieved (query too narrow)"),
            Weakness::SourcesFailed { count } => write!(f, "{} knowledge sources failed", count),
            Weakness::NoRelevantHits => {
                write!(f, "no retrieved tool matched the intent (query off-target)")
            }
            Weakness::NoGroundedHits => {
                write!(f, "relevant tools could not be grounded in retrieved content")
            }
            Weakness::LowPrecision { verified, considered } => write!(
                f,
                "only {} of the top {} results were verified (query too broad)",
                verified, considered
            ),
            Weakness::UserFeedback { text } => write!(f, "user feedback: {}", text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Accepted,
    Exhausted,
    RefinementExhausted,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Accepted => "accepted",
            TerminationReason::Exhausted => "exhausted",
            TerminationReason::RefinementExhausted => "refinement_exhausted",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub round: u32,
    pub origin: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn source(round: u32, failure: &SourceFailure) -> Self {
        Self {
            round,
            origin: Some(failure.origin.clone()),
            message: failure.reason.clone(),
        }
    }

    pub fn round(round: u32, message: impl Into<String>) -> Self {
        Self {
            round,
            origin: None,
            message: message.into(),
        }
    }
}

/// A candidate as presented in the final answer, with its grade attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub position: usize,
    pub verified: bool,
    pub candidate: NormalizedCandidate,
    pub grade: Grade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub original_query: String,
    pub final_query: String,
    pub results: Vec<RankedResult>,
    /// Keys of candidates withheld because their claims were unsupported.
    pub excluded: Vec<String>,
    pub warnings: Vec<Warning>,
    pub termination_reason: TerminationReason,
    pub round_count: usize,
    pub accepted_round: u32,
    pub quality: QualitySignal,
    pub history: Vec<RoundState>,
    pub summary: String,
}

impl FinalAnswer {
    pub fn accepted(&self) -> Option<&RoundState> {
        self.history.get(self.accepted_round as usize)
    }
}

// API Request/Response models
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: Option<usize>,
    pub max_rounds: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FollowUpRequest {
    pub original_query: String,
    pub follow_up_question: String,
    pub max_results: Option<usize>,
    pub max_rounds: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SourceSummary {
    pub origin: String,
    pub results: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub request_id: Uuid,
    pub query: String,
    pub final_query: String,
    pub summary: String,
    pub results: Vec<RankedResult>,
    pub sources: Vec<SourceSummary>,
    pub warnings: Vec<Warning>,
    pub termination_reason: TerminationReason,
    pub round_count: usize,
    pub quality: QualitySignal,
    pub search_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl SearchResponse {
    pub fn from_answer(
        request_id: Uuid,
        query: &str,
        answer: FinalAnswer,
        search_time_ms: u64,
    ) -> Self {
        let mut sources: Vec<SourceSummary> = Vec::new();
        for result in &answer.results {
            for origin in &result.candidate.origins {
                match sources.iter_mut().find(|s| &s.origin == origin) {
                    Some(summary) => summary.results += 1,
                    None => sources.push(SourceSummary {
                        origin: origin.clone(),
                        results: 1,
                    }),
                }
            }
        }

        Self {
            request_id,
            query: query.to_string(),
            final_query: answer.final_query,
            summary: answer.summary,
            results: answer.results,
            sources,
            warnings: answer.warnings,
            termination_reason: answer.termination_reason,
            round_count: answer.round_count,
            quality: answer.quality,
            search_time_ms,
            completed_at: Utc::now(),
        }
    }
}
