use std::time::Duration;

use anyhow::Result;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;

use crate::agents::controller::LoopSettings;
use crate::agents::dispatcher::SourceDispatcher;
use crate::error::DiscoveryError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub log_level: String,

    // Iteration policy
    pub max_rounds: u32,
    pub acceptance_threshold: f64,
    pub quality_top_k: usize,
    pub max_results_per_round: usize,
    pub source_timeout_ms: u64,
    pub round_timeout_ms: Option<u64>,
    pub grading_concurrency: usize,
    pub discovery_budget_ms: u64,

    // Knowledge sources
    pub vector_db_service_url: Option<String>,
    pub exa_api_key: Option<String>,
    pub exa_search_url: String,
    pub tavily_api_key: Option<String>,
    pub tavily_search_url: String,
    pub europe_pmc_url: String,
    pub pubmed_eutils_url: String,
    pub pubmed_enabled: bool,
    pub smithery_api_key: Option<String>,
    pub smithery_registry_url: String,

    // Grading / refinement model
    pub llm_endpoint: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(config::Config::builder()
        .set_default("port", 8080)?
        .set_default("log_level", "info")?
        .set_default("max_rounds", 3)?
        .set_default("acceptance_threshold", 0.6)?
        .set_default("quality_top_k", 5)?
        .set_default("max_results_per_round", 10)?
        .set_default("source_timeout_ms", 10_000)?
        .set_default("grading_concurrency", 4)?
        .set_default("discovery_budget_ms", 30_000)?
        .set_default("exa_search_url", "https://api.exa.ai/search")?
        .set_default("tavily_search_url", "https://api.tavily.com/search")?
        .set_default(
            "europe_pmc_url",
            "https://www.ebi.ac.uk/europepmc/webservices/rest",
        )?
        .set_default(
            "pubmed_eutils_url",
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils",
        )?
        .set_default("pubmed_enabled", true)?
        .set_default("smithery_registry_url", "https://registry.smithery.ai")?
        .set_default("llm_endpoint", "https://api.openai.com/v1")?
        .set_default("llm_model", "gpt-4o-mini")?)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let builder = defaults()?.add_source(config::Environment::default().try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_rounds: self.max_rounds,
            max_results_per_round: self.max_results_per_round,
            acceptance_threshold: self.acceptance_threshold,
            top_k: self.quality_top_k,
            discovery_budget: Some(Duration::from_millis(self.discovery_budget_ms)),
        }
    }

    pub fn dispatcher(&self) -> SourceDispatcher {
        let dispatcher = SourceDispatcher::new(Duration::from_millis(self.source_timeout_ms));
        match self.round_timeout_ms {
            Some(ms) => dispatcher.with_round_timeout(Duration::from_millis(ms)),
            None => dispatcher,
        }
    }

    /// Fails fast on settings that would make every discovery invalid.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.source_timeout_ms == 0 || self.round_timeout_ms == Some(0) {
            return Err(DiscoveryError::InvalidTimeout);
        }
        self.loop_settings().validate()
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        // Defaults only: environment variables of the test process are ignored.
        match defaults().and_then(Self::from_builder) {
            Ok(config) => config,
            Err(e) => panic!("default configuration must load: {e}"),
        }
    }
}
