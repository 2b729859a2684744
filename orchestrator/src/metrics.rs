use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Discovery-loop counters, registered on a caller-owned registry.
#[derive(Clone)]
pub struct Metrics {
    pub rounds: IntCounter,
    pub terminations: IntCounterVec,
    pub source_failures: IntCounterVec,
    pub dispatch_seconds: Histogram,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let rounds = IntCounter::new("discovery_rounds_total", "Search rounds executed")?;
        let terminations = IntCounterVec::new(
            Opts::new("discovery_terminations_total", "Discoveries finished, by reason"),
            &["reason"],
        )?;
        let source_failures = IntCounterVec::new(
            Opts::new("discovery_source_failures_total", "Failed knowledge source calls"),
            &["origin"],
        )?;
        let dispatch_seconds = Histogram::with_opts(HistogramOpts::new(
            "discovery_dispatch_seconds",
            "Wall-clock time of one source fan-out",
        ))?;

        registry.register(Box::new(rounds.clone()))?;
        registry.register(Box::new(terminations.clone()))?;
        registry.register(Box::new(source_failures.clone()))?;
        registry.register(Box::new(dispatch_seconds.clone()))?;

        Ok(Self {
            rounds,
            terminations,
            source_failures,
            dispatch_seconds,
        })
    }
}

/// Text exposition of everything in `registry`.
pub fn render(registry: &Registry) -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
