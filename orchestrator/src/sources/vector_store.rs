// Local similarity store: the vector DB service fronting the curated tool corpus.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ensure_success, truncate, SourceClient};
use crate::error::SourceError;
use crate::models::{Candidate, ScoreScale, SourceKind};

pub const ORIGIN: &str = "local_store";

pub struct VectorStoreSource {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    content: String,
    distance: f64,
    #[serde(default)]
    source: Option<String>,
}

impl VectorStoreSource {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

fn parse_hits(body: serde_json::Value) -> Result<Vec<Candidate>, SourceError> {
    let response: SearchResponse = serde_json::from_value(body)?;
    let candidates = response
        .results
        .into_iter()
        .filter_map(|hit| {
            let name = hit.name.filter(|n| !n.trim().is_empty())?;
            let mut candidate = Candidate::new(name, truncate(&hit.content, 200), hit.distance, ORIGIN)
                .with_content(hit.content);
            if let Some(category) = hit.category {
                candidate = candidate.with_meta("category", category);
            }
            if let Some(collection) = hit.source {
                candidate = candidate.with_meta("collection", collection);
            }
            Some(candidate)
        })
        .collect();
    Ok(candidates)
}

#[async_trait]
impl SourceClient for VectorStoreSource {
    fn origin(&self) -> &str {
        ORIGIN
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LocalStore
    }

    fn score_scale(&self) -> ScoreScale {
        ScoreScale::Distance
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        debug!(origin = ORIGIN, query = text, "Querying vector store");
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .json(&json!({ "query": text, "top_k": limit }))
            .send()
            .await?;
        let body: serde_json::Value = ensure_success(response).await?.json().await?;
        parse_hits(body)
    }
}
