// Result Aggregator: merges per-source candidates into one ranked list

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::models::{Candidate, NormalizedCandidate, ScoreScale, SourceKind};
use crate::sources::SharedSource;

/// How one origin's scores are read and where it sits in tie-breaks.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    pub origin: String,
    pub kind: SourceKind,
    pub scale: ScoreScale,
}

pub struct ResultAggregator {
    /// Ordered by priority: local stores first, then registration order.
    policies: Vec<OriginPolicy>,
}

struct Merged {
    best: Candidate,
    best_score: f64,
    best_priority: usize,
    raw_score: f64,
    origins: Vec<(usize, String)>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl ResultAggregator {
    pub fn new(policies: Vec<OriginPolicy>) -> Self {
        let mut policies = policies;
        // Stable: registration order survives among equal kinds.
        policies.sort_by_key(|p| p.kind != SourceKind::LocalStore);
        Self { policies }
    }

    pub fn for_sources(sources: &[SharedSource]) -> Self {
        Self::new(
            sources
                .iter()
                .map(|s| OriginPolicy {
                    origin: s.origin().to_string(),
                    kind: s.kind(),
                    scale: s.score_scale(),
                })
                .collect(),
        )
    }

    fn priority(&self, origin: &str) -> usize {
        self.policies
            .iter()
            .position(|p| p.origin == origin)
            .unwrap_or(self.policies.len())
    }

    fn scale(&self, origin: &str) -> ScoreScale {
        self.policies
            .iter()
            .find(|p| p.origin == origin)
            .map(|p| p.scale)
            .unwrap_or(ScoreScale::Similarity)
    }

    /// Scores in [0, 1], one per candidate, computed within each origin.
    fn normalized_scores(&self, candidates: &[Candidate]) -> Vec<f64> {
        let mut ranges: HashMap<&str, (f64, f64)> = HashMap::new();
        let oriented: Vec<f64> = candidates
            .iter()
            .map(|c| {
                let value = match self.scale(&c.origin) {
                    ScoreScale::Similarity => c.raw_score,
                    ScoreScale::Distance => 1.0 - c.raw_score,
                };
                let range = ranges.entry(c.origin.as_str()).or_insert((value, value));
                range.0 = range.0.min(value);
                range.1 = range.1.max(value);
                value
            })
            .collect();

        candidates
            .iter()
            .zip(oriented)
            .map(|(c, value)| {
                let (min, max) = ranges[c.origin.as_str()];
                if max - min > f64::EPSILON {
                    (value - min) / (max - min)
                } else {
                    value.clamp(0.0, 1.0)
                }
            })
            .collect()
    }

    /// Deduplicates by key, normalises scores per origin and assigns 1-based ranks.
    pub fn aggregate(&self, candidates: Vec<Candidate>, max_results: usize) -> Vec<NormalizedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let scores = self.normalized_scores(&candidates);

        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, Merged> = HashMap::new();
        for (candidate, score) in candidates.into_iter().zip(scores) {
            let priority = self.priority(&candidate.origin);
            match merged.get_mut(&candidate.key) {
                Some(entry) => {
                    entry.raw_score = entry.raw_score.max(candidate.raw_score);
                    if !entry.origins.iter().any(|(_, o)| o == &candidate.origin) {
                        entry.origins.push((priority, candidate.origin.clone()));
                    }
                    for (k, v) in &candidate.metadata {
                        entry.metadata.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    let better = score > entry.best_score
                        || (score == entry.best_score && priority < entry.best_priority);
                    if better {
                        entry.best_score = score;
                        entry.best_priority = priority;
                        entry.best = candidate;
                    }
                }
                None => {
                    order.push(candidate.key.clone());
                    merged.insert(
                        candidate.key.clone(),
                        Merged {
                            raw_score: candidate.raw_score,
                            origins: vec![(priority, candidate.origin.clone())],
                            metadata: candidate.metadata.clone(),
                            best_score: score,
                            best_priority: priority,
                            best: candidate,
                        },
                    );
                }
            }
        }

        let mut ranked: Vec<(usize, NormalizedCandidate)> = order
            .into_iter()
            .filter_map(|key| merged.remove(&key))
            .map(|mut m| {
                m.origins.sort_by_key(|(p, _)| *p);
                let top_priority = m.origins.first().map(|(p, _)| *p).unwrap_or(usize::MAX);
                (
                    top_priority,
                    NormalizedCandidate {
                        key: m.best.key,
                        name: m.best.name,
                        description: m.best.description,
                        content: m.best.content,
                        url: m.best.url,
                        origins: m.origins.into_iter().map(|(_, o)| o).collect(),
                        raw_score: m.raw_score,
                        score: m.best_score,
                        rank: 0,
                        metadata: m.metadata,
                    },
                )
            })
            .collect();

        ranked.sort_by(|(pa, a), (pb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(pa.cmp(pb))
        });
        ranked.truncate(max_results);

        let results: Vec<NormalizedCandidate> = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (_, mut c))| {
                c.rank = i + 1;
                c
            })
            .collect();

        debug!(unique = results.len(), "Candidates aggregated");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(origin: &str, kind: SourceKind, scale: ScoreScale) -> OriginPolicy {
        OriginPolicy {
            origin: origin.into(),
            kind,
            scale,
        }
    }

    fn aggregator() -> ResultAggregator {
        ResultAggregator::new(vec![
            policy("web_search", SourceKind::WebSearch, ScoreScale::Similarity),
            policy("local_store", SourceKind::LocalStore, ScoreScale::Distance),
            policy("smithery", SourceKind::ToolRegistry, ScoreScale::Similarity),
        ])
    }

    fn c(name: &str, score: f64, origin: &str) -> Candidate {
        Candidate::new(name, format!("{} from {}", name, origin), score, origin)
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(aggregator().aggregate(Vec::new(), 10).is_empty());
    }

    #[test]
    fn same_tool_from_two_origins_merges() {
        let out = aggregator().aggregate(
            vec![
                c("BWA", 0.9, "web_search"),
                c("Bowtie2", 0.5, "web_search"),
                c("bwa", 0.1, "local_store"),
                c("STAR", 0.6, "local_store"),
            ],
            10,
        );

        let keys: Vec<&str> = out.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys.iter().filter(|k| **k == "bwa").count(), 1);
        let bwa = out.iter().find(|n| n.key == "bwa").unwrap();
        assert_eq!(bwa.origins, vec!["local_store", "web_search"]);
        assert_eq!(bwa.raw_score, 0.9);
        assert_eq!(bwa.score, 1.0);
        // Equal scores: the local store copy supplies the representative fields.
        assert_eq!(bwa.description, "bwa from local_store");
    }

    #[test]
    fn distance_scores_are_inverted_per_origin() {
        let out = aggregator().aggregate(
            vec![c("near", 0.1, "local_store"), c("far", 0.7, "local_store")],
            10,
        );
        assert_eq!(out[0].name, "near");
        assert_eq!(out[0].score, 1.0);
        assert_eq!(out[1].score, 0.0);
    }

    #[test]
    fn incomparable_scales_are_normalised_before_ranking() {
        // web_search scores in the hundreds must not drown the local store.
        let out = aggregator().aggregate(
            vec![
                c("A", 300.0, "web_search"),
                c("B", 100.0, "web_search"),
                c("C", 0.05, "local_store"),
                c("D", 0.5, "local_store"),
            ],
            10,
        );
        let order: Vec<&str> = out.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "D", "B"]);
        assert!(out.iter().all(|n| (0.0..=1.0).contains(&n.score)));
    }

    #[test]
    fn single_result_origin_keeps_its_clamped_score() {
        let out = aggregator().aggregate(vec![c("solo", 0.7, "smithery")], 10);
        assert_eq!(out[0].score, 0.7);

        let out = aggregator().aggregate(vec![c("solo", 4.0, "smithery")], 10);
        assert_eq!(out[0].score, 1.0);
    }

    #[test]
    fn ties_break_by_origin_priority_and_ranks_are_contiguous() {
        let out = aggregator().aggregate(
            vec![
                c("web", 0.8, "web_search"),
                c("other", 0.2, "web_search"),
                c("local", 0.3, "local_store"),
                c("far", 0.9, "local_store"),
            ],
            10,
        );
        assert_eq!(out[0].name, "local");
        assert_eq!(out[1].name, "web");
        let ranks: Vec<usize> = out.iter().map(|n| n.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn output_is_truncated_to_max_results() {
        let input = (0..20).map(|i| c(&format!("tool{}", i), i as f64, "web_search")).collect();
        let out = aggregator().aggregate(input, 5);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].name, "tool19");
    }

    #[test]
    fn aggregation_is_deterministic() {
        let input = || {
            vec![
                c("x", 0.5, "web_search"),
                c("y", 0.5, "smithery"),
                c("z", 0.5, "local_store"),
            ]
        };
        assert_eq!(aggregator().aggregate(input(), 10), aggregator().aggregate(input(), 10));
    }
}
