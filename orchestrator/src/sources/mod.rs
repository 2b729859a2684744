// Knowledge sources: one SourceClient variant per external system.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::error::SourceError;
use crate::models::{Candidate, ScoreScale, SourceKind};

pub mod europe_pmc;
pub mod exa;
pub mod pubmed;
pub mod smithery;
pub mod tavily;
pub mod vector_store;

pub use europe_pmc::EuropePmcSource;
pub use exa::ExaSearchSource;
pub use pubmed::PubMedSource;
pub use smithery::SmitheryRegistrySource;
pub use tavily::TavilySearchSource;
pub use vector_store::VectorStoreSource;

/// A knowledge source queried by the dispatcher.
///
/// Implementations return `Ok(vec![])` for an ordinary "no results" answer and
/// reserve `Err` for transport, status and parse failures.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Origin tag stamped on every candidate this source produces.
    fn origin(&self) -> &str;

    fn kind(&self) -> SourceKind;

    fn score_scale(&self) -> ScoreScale {
        ScoreScale::Similarity
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Candidate>, SourceError>;
}

pub type SharedSource = Arc<dyn SourceClient>;

/// Builds the source registry from configuration. Sources whose settings are
/// missing are skipped; the local store is registered first.
pub fn from_config(config: &Config, http: reqwest::Client) -> Vec<SharedSource> {
    let mut sources: Vec<SharedSource> = Vec::new();

    if let Some(url) = &config.vector_db_service_url {
        sources.push(Arc::new(VectorStoreSource::new(http.clone(), url.clone())));
    }
    match &config.exa_api_key {
        Some(key) => sources.push(Arc::new(ExaSearchSource::new(
            http.clone(),
            config.exa_search_url.clone(),
            key.clone(),
        ))),
        None => info!("EXA_API_KEY not configured, web search disabled"),
    }
    match &config.tavily_api_key {
        Some(key) => sources.push(Arc::new(TavilySearchSource::new(
            http.clone(),
            config.tavily_search_url.clone(),
            key.clone(),
        ))),
        None => info!("TAVILY_API_KEY not configured, Tavily web search disabled"),
    }
    sources.push(Arc::new(EuropePmcSource::new(
        http.clone(),
        config.europe_pmc_url.clone(),
    )));
    if config.pubmed_enabled {
        sources.push(Arc::new(PubMedSource::new(
            http.clone(),
            config.pubmed_eutils_url.clone(),
        )));
    }
    match &config.smithery_api_key {
        Some(key) => sources.push(Arc::new(SmitheryRegistrySource::new(
            http,
            config.smithery_registry_url.clone(),
            key.clone(),
        ))),
        None => info!("SMITHERY_API_KEY not configured, tool registry disabled"),
    }

    sources
}

pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(SourceError::Status {
            status: status.as_u16(),
            body: truncate(&body, 200),
        })
    }
}

/// Host part of a result URL, lowercased.
pub(crate) fn domain_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed.host_str().map(str::to_string)
}

/// Cuts `text` to at most `max_chars` characters, marking the cut with "...".
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
