// Web search over bioinformatics-focused domains via the Exa neural search API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{domain_of, ensure_success, truncate, SourceClient};
use crate::error::SourceError;
use crate::models::{Candidate, SourceKind};

pub const ORIGIN: &str = "web_search";

const BIO_TERMS: &[&str] = &[
    "bioinformatics",
    "computational biology",
    "genomics",
    "proteomics",
];

const INCLUDE_DOMAINS: &[&str] = &[
    "bioconductor.org",
    "biopython.org",
    "bioinformatics.org",
    "ncbi.nlm.nih.gov",
    "github.com",
];

pub struct ExaSearchSource {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
struct ExaResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: f64,
}

impl ExaSearchSource {
    pub fn new(http: reqwest::Client, url: String, api_key: String) -> Self {
        Self { http, url, api_key }
    }
}

/// Adds bioinformatics context unless the query already carries it.
pub fn enrich_query(query: &str) -> String {
    let lower = query.to_lowercase();
    if BIO_TERMS.iter().any(|term| lower.contains(term)) {
        query.to_string()
    } else {
        format!("{} bioinformatics computational biology tools", query)
    }
}

fn parse_results(body: serde_json::Value) -> Result<Vec<Candidate>, SourceError> {
    let response: ExaResponse = serde_json::from_value(body)?;
    let candidates = response
        .results
        .into_iter()
        .filter_map(|result| {
            let title = result.title.filter(|t| !t.trim().is_empty())?;
            let domain = result.url.as_deref().and_then(domain_of);
            let mut candidate = Candidate::new(title, truncate(&result.text, 200), result.score, ORIGIN)
                .with_content(result.text)
                .with_url(result.url);
            if let Some(domain) = domain {
                candidate = candidate.with_meta("domain", domain);
            }
            Some(candidate)
        })
        .collect();
    Ok(candidates)
}

#[async_trait]
impl SourceClient for ExaSearchSource {
    fn origin(&self) -> &str {
        ORIGIN
    }

    fn kind(&self) -> SourceKind {
        SourceKind::WebSearch
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        let enriched = enrich_query(text);
        debug!(origin = ORIGIN, query = %enriched, "Querying web search");

        let payload = json!({
            "query": enriched,
            "num_results": limit,
            "include_domains": INCLUDE_DOMAINS,
            "use_autoprompt": true,
            "type": "neural",
            "contents": { "text": true },
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
