//! Scripted stand-ins for knowledge sources and capabilities.
//!
//! Every fake answers from a lookup table keyed by normalised text, so a
//! test fully determines what each round sees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::agents::controller::{IterationController, LoopSettings};
use crate::agents::dispatcher::SourceDispatcher;
use crate::agents::summarizer::TemplateSynthesizer;
use crate::capabilities::{GradingCapability, Judgement, RefinementCapability};
use crate::error::{CapabilityError, SourceError};
use crate::models::{
    normalize_text, Candidate, GroundingVerdict, NormalizedCandidate, Query, RelevanceVerdict,
    ScoreScale, SourceKind, Weakness,
};
use crate::sources::{SharedSource, SourceClient};

#[derive(Debug, Clone)]
pub enum Reply {
    Tools(Vec<(String, f64)>),
    Fail(String),
    Hang,
}

pub struct ScriptedSource {
    origin: String,
    kind: SourceKind,
    scale: ScoreScale,
    by_query: HashMap<String, Reply>,
    fallback: Reply,
    calls: AtomicUsize,
}

fn tools(list: &[(&str, f64)]) -> Reply {
    Reply::Tools(list.iter().map(|(n, s)| (n.to_string(), *s)).collect())
}

impl ScriptedSource {
    pub fn new(origin: &str, kind: SourceKind) -> Self {
        Self {
            origin: origin.to_string(),
            kind,
            scale: ScoreScale::Similarity,
            by_query: HashMap::new(),
            fallback: Reply::Tools(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_scale(mut self, scale: ScoreScale) -> Self {
        self.scale = scale;
        self
    }

    /// Answer for any query without a specific script.
    pub fn answering(mut self, list: &[(&str, f64)]) -> Self {
        self.fallback = tools(list);
        self
    }

    pub fn on(mut self, query: &str, list: &[(&str, f64)]) -> Self {
        self.by_query.insert(normalize_text(query), tools(list));
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.fallback = Reply::Fail(reason.to_string());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.fallback = Reply::Hang;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn score_scale(&self) -> ScoreScale {
        self.scale
    }

    async fn query(&self, text: &str, _limit: usize) -> Result<Vec<Candidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .by_query
            .get(&normalize_text(text))
            .unwrap_or(&self.fallback)
            .clone();
        match reply {
            Reply::Tools(list) => Ok(list
                .into_iter()
                .map(|(name, score)| {
                    let description = format!("{} for {}", name, text);
                    Candidate::new(name, description, score, "unstamped")
                })
                .collect()),
            Reply::Fail(reason) => Err(SourceError::Status {
                status: 503,
                body: reason,
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Grades candidates by key. `None` in the relevance table makes `classify` fail.
/// The candidate's description stands in for the generated claim.
pub struct ScriptedGrader {
    relevance: HashMap<String, Option<RelevanceVerdict>>,
    grounding: HashMap<String, Option<GroundingVerdict>>,
    default_relevance: RelevanceVerdict,
    default_grounding: GroundingVerdict,
    pub classify_calls: AtomicUsize,
    pub grounding_calls: AtomicUsize,
}

impl Default for ScriptedGrader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGrader {
    pub fn new() -> Self {
        Self {
            relevance: HashMap::new(),
            grounding: HashMap::new(),
            default_relevance: RelevanceVerdict::Relevant,
            default_grounding: GroundingVerdict::Grounded,
            classify_calls: AtomicUsize::new(0),
            grounding_calls: AtomicUsize::new(0),
        }
    }

    pub fn by_default(mut self, verdict: RelevanceVerdict) -> Self {
        self.default_relevance = verdict;
        self
    }

    pub fn relevance(mut self, name: &str, verdict: RelevanceVerdict) -> Self {
        self.relevance.insert(normalize_text(name), Some(verdict));
        self
    }

    pub fn grounding(mut self, name: &str, verdict: GroundingVerdict) -> Self {
        self.grounding.insert(normalize_text(name), Some(verdict));
        self
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.relevance.insert(normalize_text(name), None);
        self
    }

    pub fn failing_grounding_on(mut self, name: &str) -> Self {
        self.grounding.insert(normalize_text(name), None);
        self
    }
}

#[async_trait]
impl GradingCapability for ScriptedGrader {
    async fn classify(
        &self,
        _query: &Query,
        candidate: &NormalizedCandidate,
    ) -> Result<Judgement<RelevanceVerdict>, CapabilityError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        let judgement = match self.relevance.get(&candidate.key) {
            Some(Some(verdict)) => Judgement::new(*verdict, "scripted"),
            Some(None) => return Err(CapabilityError::Unavailable("scripted outage".into())),
            None => Judgement::new(self.default_relevance, "default"),
        };
        Ok(judgement.with_claim(candidate.description.clone()))
    }

    async fn check_grounding(
        &self,
        candidate: &NormalizedCandidate,
        _claim: &str,
    ) -> Result<Judgement<GroundingVerdict>, CapabilityError> {
        self.grounding_calls.fetch_add(1, Ordering::SeqCst);
        match self.grounding.get(&candidate.key) {
            Some(Some(verdict)) => Ok(Judgement::new(*verdict, "scripted")),
            Some(None) => Err(CapabilityError::Malformed("scripted garbage".into())),
            None => Ok(Judgement::new(self.default_grounding, "default")),
        }
    }
}

/// Rewrites queries from a table; unknown queries make the capability fail.
#[derive(Default)]
pub struct ScriptedRefiner {
    rewrites: HashMap<String, String>,
    pub seen: Mutex<Vec<Vec<Weakness>>>,
}

impl ScriptedRefiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rewrite(mut self, from: &str, to: &str) -> Self {
        self.rewrites.insert(normalize_text(from), to.to_string());
        self
    }

    pub fn last_weaknesses(&self) -> Vec<Weakness> {
        self.seen
            .lock()
            .map(|seen| seen.last().cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RefinementCapability for ScriptedRefiner {
    async fn refine(&self, query: &Query, weaknesses: &[Weakness]) -> Result<String, CapabilityError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(weaknesses.to_vec());
        }
        self.rewrites
            .get(&normalize_text(&query.text))
            .cloned()
            .ok_or_else(|| CapabilityError::Unavailable(format!("no rewrite for '{}'", query.text)))
    }
}

pub fn shared(source: ScriptedSource) -> SharedSource {
    Arc::new(source)
}

pub fn controller(
    sources: Vec<SharedSource>,
    grader: ScriptedGrader,
    refiner: ScriptedRefiner,
    settings: LoopSettings,
) -> IterationController {
    match IterationController::new(
        sources,
        SourceDispatcher::new(Duration::from_millis(200)),
        Arc::new(grader),
        Arc::new(refiner),
        Arc::new(TemplateSynthesizer),
        settings,
    ) {
        Ok(controller) => controller,
        Err(e) => panic!("test controller must build: {e}"),
    }
}
