// Protocol-based tool registry: MCP servers listed on the Smithery registry.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ensure_success, truncate, SourceClient};
use crate::error::SourceError;
use crate::models::{Candidate, ScoreScale, SourceKind};

pub const ORIGIN: &str = "smithery";

pub struct SmitheryRegistrySource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    #[serde(default)]
    servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Server {
    #[serde(default)]
    qualified_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    use_count: Option<u64>,
    #[serde(default)]
    homepage: Option<String>,
}

impl SmitheryRegistrySource {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }
}

fn parse_servers(body: serde_json::Value) -> Result<Vec<Candidate>, SourceError> {
    let response: RegistryResponse = serde_json::from_value(body)?;
    let mut candidates = Vec::new();
    for server in response.servers {
        let name = server
            .display_name
            .clone()
            .or_else(|| server.qualified_name.clone())
            .filter(|n| !n.trim().is_empty());
        let Some(name) = name else {
            continue;
        };
        let position = candidates.len() as f64;
        let mut candidate = Candidate::new(name, truncate(&server.description, 200), position, ORIGIN)
            .with_content(server.description)
            .with_url(server.homepage)
            .with_meta("use_count", server.use_count.unwrap_or(0));
        if let Some(qualified) = server.qualified_name {
            candidate = candidate.with_meta("qualified_name", qualified);
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}

#[async_trait]
impl SourceClient for SmitheryRegistrySource {
    fn origin(&self) -> &str {
        ORIGIN
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ToolRegistry
    }

    fn score_scale(&self) -> ScoreScale {
        ScoreScale::Distance
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        debug!(origin = ORIGIN, query = text, "Querying tool registry");
        let url = format!("{}/servers", self.base_url.trim_end_matches('/'));
        let page_size = limit.to_string();
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .query(&[("q", text), ("pageSize", page_size.as_str())])
            .send()
            .await?;
        let body: serde_json::Value = ensure_success(response).await?.json().await?;
        parse_servers(body)
    }
}
