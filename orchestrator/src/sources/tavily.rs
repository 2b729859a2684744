// Web search via the Tavily search API, restricted to bioinformatics domains.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{domain_of, ensure_success, truncate, SourceClient};
use crate::error::SourceError;
use crate::models::{Candidate, SourceKind};

pub const ORIGIN: &str = "tavily_search";

const INCLUDE_DOMAINS: &[&str] = &[
    "github.com",
    "bioconductor.org",
    "biopython.org",
    "bioinformatics.org",
    "ncbi.nlm.nih.gov",
    "pubmed.ncbi.nlm.nih.gov",
];

pub struct TavilySearchSource {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    published_date: Option<String>,
}

impl TavilySearchSource {
    pub fn new(http: reqwest::Client, url: String, api_key: String) -> Self {
        Self { http, url, api_key }
    }
}

fn parse_results(body: serde_json::Value) -> Result<Vec<Candidate>, SourceError> {
    let response: TavilyResponse = serde_json::from_value(body)?;
    let candidates = response
        .results
        .into_iter()
        .filter_map(|result| {
            let title = result.title.filter(|t| !t.trim().is_empty())?;
            let domain = result.url.as_deref().and_then(domain_of);
            let mut candidate =
                Candidate::new(title, truncate(&result.content, 200), result.score, ORIGIN)
                    .with_content(result.content)
                    .with_url(result.url);
            if let Some(domain) = domain {
                candidate = candidate.with_meta("domain", domain);
            }
            if let Some(date) = result.published_date.filter(|d| !d.is_empty()) {
                candidate = candidate.with_meta("published_date", date);
            }
            Some(candidate)
        })
        .collect();
    Ok(candidates)
}

#[async_trait]
impl SourceClient for TavilySearchSource {
    fn origin(&self) -> &str {
        ORIGIN
    }

    fn kind(&self) -> SourceKind {
        SourceKind::WebSearch
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        let enriched = format!("{} bioinformatics tools software", text);
        debug!(origin = ORIGIN, query = %enriched, "Querying Tavily");

        let payload = json!({
            "query": enriched,
            "search_depth": "basic",
            "include_answer": false,
            "include_images": false,
            "include_raw_content": false,
            "max_results": limit,
            "include_domains": INCLUDE_DOMAINS,
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let body: serde_json::Value = ensure_success(response).await?.json().await?;
        parse_results(body)
    }
}
