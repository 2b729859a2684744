// Iteration Controller: drives search, grading and refinement rounds to a final answer

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use super::aggregator::ResultAggregator;
use super::dispatcher::SourceDispatcher;
use super::grader::{assess, QualityGrader};
use super::planner::QueryPlanner;
use super::summarizer::ResponseSynthesizer;
use crate::capabilities::{GradingCapability, RefinementCapability};
use crate::error::DiscoveryError;
use crate::metrics::Metrics;
use crate::models::{
    FinalAnswer, Grade, GroundingVerdict, NormalizedCandidate, Query, RankedResult,
    RelevanceVerdict, RoundState, SourceFailure, TerminationReason, Warning,
};
use crate::sources::SharedSource;

const DEFAULT_GRADING_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub max_rounds: u32,
    pub max_results_per_round: usize,
    pub acceptance_threshold: f64,
    /// How many top-ranked candidates feed the quality signal.
    pub top_k: usize,
    /// Wall-clock limit for one discovery; no further round starts once spent.
    pub discovery_budget: Option<Duration>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_results_per_round: 10,
            acceptance_threshold: 0.6,
            top_k: 5,
            discovery_budget: None,
        }
    }
}

impl LoopSettings {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.max_rounds == 0 {
            return Err(DiscoveryError::InvalidMaxRounds);
        }
        if self.max_results_per_round == 0 {
            return Err(DiscoveryError::InvalidMaxResults);
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(DiscoveryError::InvalidThreshold(self.acceptance_threshold));
        }
        if self.top_k == 0 {
            return Err(DiscoveryError::InvalidTopK);
        }
        if self.discovery_budget == Some(Duration::ZERO) {
            return Err(DiscoveryError::InvalidTimeout);
        }
        Ok(())
    }
}

/// A round between dispatch and grading.
struct SearchedRound {
    query: Query,
    candidates: Vec<NormalizedCandidate>,
    failures: Vec<SourceFailure>,
    responded: usize,
}

enum Phase {
    Start,
    Searching(Query),
    Grading(SearchedRound),
    Deciding(RoundState),
    Refining,
    Done(TerminationReason),
}

pub struct IterationController {
    sources: Vec<SharedSource>,
    dispatcher: SourceDispatcher,
    aggregator: ResultAggregator,
    grader: QualityGrader,
    planner: QueryPlanner,
    synthesizer: Arc<dyn ResponseSynthesizer>,
    settings: LoopSettings,
    metrics: Option<Metrics>,
}

impl IterationController {
    pub fn new(
        sources: Vec<SharedSource>,
        dispatcher: SourceDispatcher,
        grading: Arc<dyn GradingCapability>,
        refinement: Arc<dyn RefinementCapability>,
        synthesizer: Arc<dyn ResponseSynthesizer>,
        settings: LoopSettings,
    ) -> Result<Self, DiscoveryError> {
        if sources.is_empty() {
            return Err(DiscoveryError::NoSources);
        }
        settings.validate()?;

        Ok(Self {
            aggregator: ResultAggregator::for_sources(&sources),
            sources,
            dispatcher,
            grader: QualityGrader::new(grading, DEFAULT_GRADING_CONCURRENCY),
            planner: QueryPlanner::new(refinement),
            synthesizer,
            settings,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_grading_concurrency(mut self, concurrency: usize) -> Self {
        self.grader = self.grader.with_concurrency(concurrency);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn source_origins(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.origin().to_string()).collect()
    }

    /// Runs rounds until the answer is accepted, the round or time budget is
    /// spent, or the planner stalls. Requested limits are capped by the
    /// configured ones. Only pre-flight problems are errors.
    #[instrument(skip(self))]
    pub async fn discover(
        &self,
        text: &str,
        max_rounds: u32,
        max_results: usize,
    ) -> Result<FinalAnswer, DiscoveryError> {
        if text.trim().is_empty() {
            return Err(DiscoveryError::EmptyQuery);
        }
        if max_rounds == 0 {
            return Err(DiscoveryError::InvalidMaxRounds);
        }
        if max_results == 0 {
            return Err(DiscoveryError::InvalidMaxResults);
        }
        let max_rounds = max_rounds.min(self.settings.max_rounds);
        let max_results = max_results.min(self.settings.max_results_per_round);
        let started = Instant::now();

        let mut history: Vec<RoundState> = Vec::new();
        let mut warnings: Vec<Warning> = Vec::new();
        let mut phase = Phase::Start;

        let reason = loop {
            phase = match phase {
                Phase::Start => Phase::Searching(self.planner.initial(text)),

                Phase::Searching(query) => {
                    Phase::Grading(self.search(query, max_results, &mut warnings).await)
                }

                Phase::Grading(searched) => {
                    let graded = self.grader.grade(&searched.query, &searched.candidates).await;
                    warnings.extend(graded.warnings);
                    let quality = assess(&searched.candidates, &graded.grades, self.settings.top_k);
                    Phase::Deciding(RoundState {
                        index: searched.query.round,
                        query: searched.query,
                        candidates: searched.candidates,
                        grades: graded.grades,
                        quality,
                        failures: searched.failures,
                        sources_responded: searched.responded,
                    })
                }

                Phase::Deciding(round) => {
                    let decision = self.decide(&round, max_rounds).or_else(|| {
                        let budget = self.settings.discovery_budget?;
                        if started.elapsed() < budget {
                            return None;
                        }
                        warn!(
                            round = round.index,
                            budget_ms = budget.as_millis() as u64,
                            "Discovery budget spent"
                        );
                        warnings.push(Warning::round(
                            round.index,
                            format!("discovery budget of {}ms spent", budget.as_millis()),
                        ));
                        Some(TerminationReason::Exhausted)
                    });
                    info!(
                        round = round.index,
                        quality = round.quality.score,
                        verified = round.quality.verified,
                        considered = round.quality.considered,
                        "Round graded"
                    );
                    history.push(round);
                    match decision {
                        Some(reason) => Phase::Done(reason),
                        None => Phase::Refining,
                    }
                }

                Phase::Refining => match self.planner.refine(&history).await {
                    Ok(next) => Phase::Searching(next),
                    Err(stalled) => {
                        let round = history.last().map(|r| r.index).unwrap_or_default();
                        warn!(round, reason = %stalled, "Refinement stalled");
                        warnings.push(Warning::round(round, stalled.to_string()));
                        Phase::Done(TerminationReason::RefinementExhausted)
                    }
                },

                Phase::Done(reason) => break reason,
            };
        };

        let chosen = match reason {
            TerminationReason::Accepted => history.len().saturating_sub(1),
            _ => best_round(&history),
        };
        let (results, excluded, final_query, quality) = match history.get(chosen) {
            Some(round) => {
                let (results, excluded) = present(round);
                (results, excluded, round.query.text.clone(), round.quality)
            }
            None => (Vec::new(), Vec::new(), text.to_string(), Default::default()),
        };

        let mut answer = FinalAnswer {
            original_query: history
                .first()
                .map(|r| r.query.text.clone())
                .unwrap_or_else(|| text.to_string()),
            final_query,
            results,
            excluded,
            warnings,
            termination_reason: reason,
            round_count: history.len(),
            accepted_round: chosen as u32,
            quality,
            history,
            summary: String::new(),
        };
        answer.summary = self.synthesizer.synthesize(&answer).await;

        if let Some(metrics) = &self.metrics {
            metrics.terminations.with_label_values(&[reason.as_str()]).inc();
        }
        info!(
            reason = %reason,
            rounds = answer.round_count,
            results = answer.results.len(),
            warnings = answer.warnings.len(),
            "Discovery finished"
        );
        Ok(answer)
    }

    async fn search(&self, query: Query, max_results: usize, warnings: &mut Vec<Warning>) -> SearchedRound {
        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(&query, &self.sources, max_results).await;

        if let Some(metrics) = &self.metrics {
            metrics.rounds.inc();
            metrics.dispatch_seconds.observe(started.elapsed().as_secs_f64());
            for failure in &outcome.failures {
                metrics.source_failures.with_label_values(&[failure.origin.as_str()]).inc();
            }
        }
        warnings.extend(outcome.failures.iter().map(|f| Warning::source(query.round, f)));

        SearchedRound {
            candidates: self.aggregator.aggregate(outcome.candidates, max_results),
            failures: outcome.failures,
            responded: outcome.responded.len(),
            query,
        }
    }

    fn decide(&self, round: &RoundState, max_rounds: u32) -> Option<TerminationReason> {
        if round.quality.considered > 0 && round.quality.score >= self.settings.acceptance_threshold {
            return Some(TerminationReason::Accepted);
        }
        if round.index + 1 >= max_rounds {
            return Some(TerminationReason::Exhausted);
        }
        if round.candidates.is_empty() && round.sources_responded == 0 {
            // Every source failed: a different query will not bring them back.
            return Some(TerminationReason::Exhausted);
        }
        None
    }
}

fn presented_count(round: &RoundState) -> usize {
    round
        .grades
        .iter()
        .filter(|g| g.grounding != GroundingVerdict::Unsupported)
        .count()
}

/// Highest quality, then most verified, then most presentable, then earliest.
fn best_round(history: &[RoundState]) -> usize {
    let mut best = 0;
    for (i, round) in history.iter().enumerate().skip(1) {
        let current = &history[best];
        let better = round.quality.score > current.quality.score
            || (round.quality.score == current.quality.score
                && (round.quality.verified, presented_count(round))
                    > (current.quality.verified, presented_count(current)));
        if better {
            best = i;
        }
    }
    best
}

fn tier(grade: &Grade) -> u8 {
    if grade.is_verified() {
        return 0;
    }
    match grade.relevance {
        RelevanceVerdict::Relevant => 1,
        RelevanceVerdict::Uncertain => 2,
        RelevanceVerdict::NotRelevant => 3,
    }
}

/// Orders a round's candidates for presentation and withholds unsupported claims.
fn present(round: &RoundState) -> (Vec<RankedResult>, Vec<String>) {
    let mut excluded = Vec::new();
    let mut kept: Vec<(u8, &NormalizedCandidate, Grade)> = Vec::new();

    let mut by_rank: Vec<&NormalizedCandidate> = round.candidates.iter().collect();
    by_rank.sort_by_key(|c| c.rank);
    for candidate in by_rank {
        let grade = round.grade_for(&candidate.key).cloned().unwrap_or_else(|| Grade {
            key: candidate.key.clone(),
            relevance: RelevanceVerdict::Uncertain,
            grounding: GroundingVerdict::NotApplicable,
            rationale: "not graded".into(),
        });
        if grade.grounding == GroundingVerdict::Unsupported {
            excluded.push(candidate.key.clone());
            continue;
        }
        kept.push((tier(&grade), candidate, grade));
    }
    kept.sort_by_key(|(t, _, _)| *t);

    let results = kept
        .into_iter()
        .enumerate()
        .map(|(i, (_, candidate, grade))| RankedResult {
            position: i + 1,
            verified: grade.is_verified(),
            candidate: candidate.clone(),
            grade,
        })
        .collect();
    (results, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScoreScale, SourceKind, Weakness};
    use crate::testing::{controller, shared, ScriptedGrader, ScriptedRefiner, ScriptedSource};
    use prometheus::Registry;

    fn local(list: &[(&str, f64)]) -> SharedSource {
        shared(ScriptedSource::new("local_store", SourceKind::LocalStore).answering(list))
    }

    #[tokio::test]
    async fn scenario_a_accepts_first_round() {
        let c = controller(
            vec![local(&[("BWA", 0.9), ("Bowtie2", 0.8), ("STAR", 0.7)])],
            ScriptedGrader::new(),
            ScriptedRefiner::new(),
            LoopSettings::default(),
        );

        let answer = c.discover("read aligner", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Accepted);
        assert_eq!(answer.round_count, 1);
        assert_eq!(answer.results.len(), 3);
        assert!(answer.results.iter().all(|r| r.verified));
        assert!(answer.warnings.is_empty());
        assert_eq!(answer.quality.score, 1.0);
        assert!(answer.summary.contains("found 3 relevant tools"));
    }

    #[tokio::test]
    async fn scenario_b_all_sources_failing_is_exhausted_immediately() {
        let sources = vec![
            shared(ScriptedSource::new("web_search", SourceKind::WebSearch).failing("HTTP 500")),
            shared(ScriptedSource::new("pubmed", SourceKind::Literature).failing("HTTP 429")),
            shared(ScriptedSource::new("smithery", SourceKind::ToolRegistry).hanging()),
        ];
        let c = controller(
            sources,
            ScriptedGrader::new(),
            ScriptedRefiner::new().rewrite("aligner", "sequence aligner"),
            LoopSettings::default(),
        );

        let answer = c.discover("aligner", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Exhausted);
        assert_eq!(answer.round_count, 1);
        assert!(answer.results.is_empty());
        assert_eq!(answer.warnings.len(), 3);
        let origins: Vec<_> = answer.warnings.iter().filter_map(|w| w.origin.as_deref()).collect();
        assert_eq!(origins, vec!["web_search", "pubmed", "smithery"]);
    }

    #[tokio::test]
    async fn scenario_c_refinement_reaches_threshold() {
        let source = ScriptedSource::new("local_store", SourceKind::LocalStore)
            .on("ML for bio", &[("scikit-learn", 0.9), ("pandas", 0.8)])
            .on("machine learning bioinformatics", &[("DeepVariant", 0.9), ("scikit-learn", 0.8)]);
        let refiner = Arc::new(ScriptedRefiner::new().rewrite("ML for bio", "machine learning bioinformatics"));
        let registry = Registry::new();
        let c = IterationController::new(
            vec![shared(source)],
            SourceDispatcher::new(std::time::Duration::from_millis(200)),
            Arc::new(ScriptedGrader::new().relevance("pandas", RelevanceVerdict::NotRelevant)),
            refiner.clone(),
            Arc::new(crate::agents::summarizer::TemplateSynthesizer),
            LoopSettings::default(),
        )
        .unwrap()
        .with_metrics(Metrics::new(&registry).unwrap());

        let answer = c.discover("ML for bio", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Accepted);
        assert_eq!(answer.round_count, 2);
        assert_eq!(answer.accepted_round, 1);
        assert_eq!(answer.accepted().map(|r| r.quality.score), Some(1.0));
        assert_ne!(answer.history[0].query.text, answer.history[1].query.text);
        assert_eq!(answer.history[1].query.parent, Some(0));
        assert_eq!(answer.final_query, "machine learning bioinformatics");
        assert_eq!(
            refiner.last_weaknesses(),
            vec![Weakness::LowPrecision { verified: 1, considered: 2 }]
        );

        let (body, _) = crate::metrics::render(&registry).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("discovery_rounds_total 2"));
    }

    #[tokio::test]
    async fn scenario_d_single_round_returns_best_available() {
        let c = controller(
            vec![local(&[("FastQC", 0.9), ("MultiQC", 0.8)])],
            ScriptedGrader::new().by_default(RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new(),
            LoopSettings::default(),
        );

        let answer = c.discover("protein docking", 1, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Exhausted);
        assert_eq!(answer.round_count, 1);
        assert_eq!(answer.results.len(), 2);
        assert!(answer.results.iter().all(|r| !r.verified));
    }

    #[tokio::test]
    async fn never_runs_more_than_max_rounds() {
        let source = ScriptedSource::new("local_store", SourceKind::LocalStore).answering(&[("x", 0.5)]);
        let source = Arc::new(source);
        let c = controller(
            vec![source.clone() as SharedSource],
            ScriptedGrader::new().by_default(RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new().rewrite("a", "b").rewrite("b", "c").rewrite("c", "d"),
            LoopSettings::default(),
        );

        let answer = c.discover("a", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Exhausted);
        assert_eq!(answer.round_count, 3);
        assert_eq!(source.calls(), 3);
        let indices: Vec<u32> = answer.history.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn exhaustion_keeps_the_best_round() {
        let source = ScriptedSource::new("local_store", SourceKind::LocalStore)
            .on("a", &[("good", 0.9), ("bad", 0.8)])
            .on("b", &[("bad", 0.9)]);
        let c = controller(
            vec![shared(source)],
            ScriptedGrader::new().relevance("bad", RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new().rewrite("a", "b"),
            LoopSettings::default(),
        );

        let answer = c.discover("a", 2, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Exhausted);
        assert_eq!(answer.round_count, 2);
        assert_eq!(answer.accepted_round, 0);
        assert_eq!(answer.final_query, "a");
        assert_eq!(answer.results[0].candidate.name, "good");
    }

    #[tokio::test]
    async fn unsupported_candidates_are_withheld() {
        let c = controller(
            vec![local(&[("BWA", 0.9), ("Hallucinated", 0.8)])],
            ScriptedGrader::new().grounding("Hallucinated", GroundingVerdict::Unsupported),
            ScriptedRefiner::new(),
            LoopSettings {
                acceptance_threshold: 0.5,
                ..LoopSettings::default()
            },
        );

        let answer = c.discover("aligner", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Accepted);
        assert_eq!(answer.excluded, vec!["hallucinated"]);
        assert_eq!(answer.results.len(), 1);
        assert!(answer.results.iter().all(|r| r.grade.grounding != GroundingVerdict::Unsupported));
    }

    #[tokio::test]
    async fn presentation_orders_by_verdict_tier_then_rank() {
        let c = controller(
            vec![local(&[("A", 0.9), ("B", 0.8), ("C", 0.7)])],
            ScriptedGrader::new()
                .relevance("A", RelevanceVerdict::Uncertain)
                .relevance("C", RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new(),
            LoopSettings::default(),
        );

        let answer = c.discover("q", 1, 10).await.unwrap();

        let order: Vec<(&str, usize)> = answer
            .results
            .iter()
            .map(|r| (r.candidate.name.as_str(), r.position))
            .collect();
        assert_eq!(order, vec![("B", 1), ("A", 2), ("C", 3)]);
    }

    #[tokio::test]
    async fn empty_round_is_refined_as_too_narrow() {
        let source = ScriptedSource::new("local_store", SourceKind::LocalStore)
            .on("very specific thing", &[])
            .on("specific thing", &[("Tool", 0.5)]);
        let refiner = Arc::new(ScriptedRefiner::new().rewrite("very specific thing", "specific thing"));
        let c = IterationController::new(
            vec![shared(source)],
            SourceDispatcher::new(std::time::Duration::from_millis(200)),
            Arc::new(ScriptedGrader::new()),
            refiner.clone(),
            Arc::new(crate::agents::summarizer::TemplateSynthesizer),
            LoopSettings::default(),
        )
        .unwrap();

        let answer = c.discover("very specific thing", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Accepted);
        assert_eq!(answer.round_count, 2);
        assert_eq!(refiner.last_weaknesses(), vec![Weakness::NoCandidates]);
    }

    #[tokio::test]
    async fn stalled_refinement_terminates_early() {
        let c = controller(
            vec![local(&[("x", 0.5)])],
            ScriptedGrader::new().by_default(RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new(),
            LoopSettings::default(),
        );

        let answer = c.discover("a", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::RefinementExhausted);
        assert_eq!(answer.round_count, 1);
        assert!(answer.warnings.iter().any(|w| w.message.contains("refinement stalled")));
    }

    #[tokio::test]
    async fn repeated_query_terminates_early() {
        let c = controller(
            vec![local(&[("x", 0.5)])],
            ScriptedGrader::new().by_default(RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new().rewrite("a", "b").rewrite("b", "a"),
            LoopSettings {
                max_rounds: 5,
                ..LoopSettings::default()
            },
        );

        let answer = c.discover("a", 5, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::RefinementExhausted);
        assert_eq!(answer.round_count, 2);
    }

    #[tokio::test]
    async fn grading_failures_become_warnings() {
        let c = controller(
            vec![local(&[("ok", 0.9), ("flaky", 0.8)])],
            ScriptedGrader::new().failing_on("flaky"),
            ScriptedRefiner::new(),
            LoopSettings {
                acceptance_threshold: 0.5,
                ..LoopSettings::default()
            },
        );

        let answer = c.discover("q", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Accepted);
        let flaky = answer.results.iter().find(|r| r.candidate.key == "flaky").unwrap();
        assert_eq!(flaky.grade.relevance, RelevanceVerdict::Uncertain);
        assert!(answer.warnings.iter().any(|w| w.message.contains("flaky")));
    }

    #[tokio::test]
    async fn discover_is_deterministic() {
        let c = controller(
            vec![
                shared(
                    ScriptedSource::new("local_store", SourceKind::LocalStore)
                        .with_scale(ScoreScale::Distance)
                        .answering(&[("A", 0.1), ("B", 0.5)]),
                ),
                shared(ScriptedSource::new("web_search", SourceKind::WebSearch).answering(&[("b", 30.0), ("C", 10.0)])),
            ],
            ScriptedGrader::new().relevance("C", RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new().rewrite("q", "q2"),
            LoopSettings::default(),
        );

        let first = c.discover("q", 3, 10).await.unwrap();
        let second = c.discover("q", 3, 10).await.unwrap();
        assert_eq!(first, second);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn discover_future_is_send() {
        let c = controller(
            vec![local(&[("BWA", 0.9)])],
            ScriptedGrader::new(),
            ScriptedRefiner::new(),
            LoopSettings::default(),
        );
        let future = c.discover("aligner", 1, 10);
        assert_send(&future);
    }

    #[tokio::test]
    async fn spent_budget_stops_before_refining() {
        let sources = vec![
            local(&[("x", 0.5)]),
            shared(ScriptedSource::new("pubmed", SourceKind::Literature).hanging()),
        ];
        let refiner = ScriptedRefiner::new().rewrite("a", "b").rewrite("b", "c");
        let c = controller(
            sources,
            ScriptedGrader::new().by_default(RelevanceVerdict::NotRelevant),
            refiner,
            LoopSettings {
                discovery_budget: Some(Duration::from_millis(50)),
                ..LoopSettings::default()
            },
        );

        let answer = c.discover("a", 3, 10).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Exhausted);
        assert_eq!(answer.round_count, 1);
        assert!(answer.warnings.iter().any(|w| w.message.contains("discovery budget")));
    }

    #[tokio::test]
    async fn requested_limits_are_capped_by_settings() {
        let c = controller(
            vec![local(&[("A", 0.9), ("B", 0.8), ("C", 0.7), ("D", 0.6)])],
            ScriptedGrader::new().by_default(RelevanceVerdict::NotRelevant),
            ScriptedRefiner::new().rewrite("q0", "q1").rewrite("q1", "q2").rewrite("q2", "q3"),
            LoopSettings {
                max_rounds: 2,
                max_results_per_round: 3,
                ..LoopSettings::default()
            },
        );

        let answer = c.discover("q0", 20, 1000).await.unwrap();

        assert_eq!(answer.termination_reason, TerminationReason::Exhausted);
        assert_eq!(answer.round_count, 2);
        assert!(answer.history.iter().all(|r| r.candidates.len() <= 3));
    }

    #[test]
    fn invalid_settings_fail_fast() {
        let bad = |settings: LoopSettings| {
            IterationController::new(
                vec![local(&[])],
                SourceDispatcher::new(std::time::Duration::from_millis(10)),
                Arc::new(ScriptedGrader::new()),
                Arc::new(ScriptedRefiner::new()),
                Arc::new(crate::agents::summarizer::TemplateSynthesizer),
                settings,
            )
            .err()
        };
        assert_eq!(
            bad(LoopSettings { max_rounds: 0, ..LoopSettings::default() }),
            Some(DiscoveryError::InvalidMaxRounds)
        );
        assert_eq!(
            bad(LoopSettings { acceptance_threshold: 1.5, ..LoopSettings::default() }),
            Some(DiscoveryError::InvalidThreshold(1.5))
        );
        assert_eq!(
            bad(LoopSettings { top_k: 0, ..LoopSettings::default() }),
            Some(DiscoveryError::InvalidTopK)
        );
        assert_eq!(
            bad(LoopSettings {
                discovery_budget: Some(Duration::ZERO),
                ..LoopSettings::default()
            }),
            Some(DiscoveryError::InvalidTimeout)
        );

        let no_sources = IterationController::new(
            Vec::new(),
            SourceDispatcher::new(std::time::Duration::from_millis(10)),
            Arc::new(ScriptedGrader::new()),
            Arc::new(ScriptedRefiner::new()),
            Arc::new(crate::agents::summarizer::TemplateSynthesizer),
            LoopSettings::default(),
        );
        assert_eq!(no_sources.err(), Some(DiscoveryError::NoSources));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_round() {
        let source = Arc::new(ScriptedSource::new("local_store", SourceKind::LocalStore));
        let c = controller(
            vec![source.clone() as SharedSource],
            ScriptedGrader::new(),
            ScriptedRefiner::new(),
            LoopSettings::default(),
        );

        assert_eq!(c.discover("   ", 3, 10).await.err(), Some(DiscoveryError::EmptyQuery));
        assert_eq!(c.discover("q", 0, 10).await.err(), Some(DiscoveryError::InvalidMaxRounds));
        assert_eq!(c.discover("q", 3, 0).await.err(), Some(DiscoveryError::InvalidMaxResults));
        assert_eq!(source.calls(), 0);
    }
}
