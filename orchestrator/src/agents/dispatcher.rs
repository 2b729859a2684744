// Source Dispatcher: fans a query out to every registered knowledge source

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::error::SourceError;
use crate::models::{Candidate, Query, SourceFailure};
use crate::sources::SharedSource;

/// Slack added to the summed per-source latencies before the round deadline fires.
const ROUND_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Candidates in source registration order.
    pub candidates: Vec<Candidate>,
    pub failures: Vec<SourceFailure>,
    /// Origins that answered, including those with zero candidates.
    pub responded: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SourceDispatcher {
    per_source_timeout: Duration,
    round_timeout: Option<Duration>,
}

impl SourceDispatcher {
    pub fn new(per_source_timeout: Duration) -> Self {
        Self {
            per_source_timeout,
            round_timeout: None,
        }
    }

    pub fn with_round_timeout(mut self, round_timeout: Duration) -> Self {
        self.round_timeout = Some(round_timeout);
        self
    }

    fn round_deadline(&self, source_count: usize) -> Duration {
        self.round_timeout.unwrap_or_else(|| {
            self.per_source_timeout
                .saturating_mul(source_count.max(1) as u32)
                .saturating_add(ROUND_GRACE)
        })
    }

    /// Queries every source concurrently. Never fails: each source ends up
    /// either in `responded` or in `failures`, and every spawned task is
    /// joined or aborted before returning.
    #[instrument(skip_all, fields(round = query.round, sources = sources.len()))]
    pub async fn dispatch(&self, query: &Query, sources: &[SharedSource], limit: usize) -> DispatchOutcome {
        let mut tasks = JoinSet::new();
        for (index, source) in sources.iter().enumerate() {
            let source = Arc::clone(source);
            let text = query.text.clone();
            let per_source = self.per_source_timeout;
            tasks.spawn(async move {
                let result = match timeout(per_source, source.query(&text, limit)).await {
                    Ok(Ok(candidates)) => validate(source.origin(), candidates, limit),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SourceError::Timeout(per_source)),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<Vec<Candidate>, SourceError>>> =
            sources.iter().map(|_| None).collect();
        let deadline = Instant::now() + self.round_deadline(sources.len());
        let mut round_expired = false;

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, result)))) => slots[index] = Some(result),
                Ok(Some(Err(join_err))) => warn!(error = %join_err, "Source task did not complete"),
                Ok(None) => break,
                Err(_) => {
                    warn!("Round deadline reached, cancelling pending source calls");
                    round_expired = true;
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next().await {
                        if let Ok((index, result)) = joined {
                            slots[index] = Some(result);
                        }
                    }
                    break;
                }
            }
        }

        let mut outcome = DispatchOutcome::default();
        for (source, slot) in sources.iter().zip(slots) {
            let origin = source.origin().to_string();
            let result = slot.unwrap_or_else(|| {
                Err(if round_expired {
                    SourceError::RoundTimeout
                } else {
                    SourceError::Aborted("task panicked".into())
                })
            });
            match result {
                Ok(candidates) => {
                    debug!(origin = %origin, candidates = candidates.len(), "Source answered");
                    outcome.candidates.extend(candidates);
                    outcome.responded.push(origin);
                }
                Err(e) => {
                    warn!(origin = %origin, reason = %e, "Source failed");
                    outcome.failures.push(SourceFailure {
                        origin,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            candidates = outcome.candidates.len(),
            responded = outcome.responded.len(),
            failed = outcome.failures.len(),
            "Dispatch complete"
        );
        outcome
    }
}

/// Rejects the whole response if any record lacks an identity or a usable score.
fn validate(origin: &str, mut candidates: Vec<Candidate>, limit: usize) -> Result<Vec<Candidate>, SourceError> {
    if let Some(position) = candidates.iter().position(|c| !c.is_well_formed()) {
        return Err(SourceError::Malformed(format!(
            "record {} has no name or a non-finite score",
            position
        )));
    }
    candidates.truncate(limit);
    for candidate in &mut candidates {
        candidate.origin = origin.to_string();
    }
    Ok(candidates)
}
