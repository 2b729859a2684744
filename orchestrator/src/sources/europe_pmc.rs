// Literature search over Europe PMC (PubMed, bioRxiv, medRxiv, Agricola).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ensure_success, truncate, SourceClient};
use crate::error::SourceError;
use crate::models::{Candidate, ScoreScale, SourceKind};

pub const ORIGIN: &str = "europe_pmc";

const MAX_PAGE_SIZE: usize = 25;

pub struct EuropePmcSource {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    result_list: ResultList,
}

#[derive(Debug, Default, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    abstract_text: String,
    #[serde(default)]
    pmid: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    first_publication_date: Option<String>,
    #[serde(default)]
    cited_by_count: Option<u64>,
    #[serde(default)]
    is_open_access: Option<String>,
}

impl EuropePmcSource {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

fn paper_url(paper: &Paper) -> Option<String> {
    if let Some(pmid) = &paper.pmid {
        Some(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid))
    } else {
        paper.doi.as_ref().map(|doi| format!("https://doi.org/{}", doi))
    }
}

fn parse_papers(body: serde_json::Value) -> Result<Vec<Candidate>, SourceError> {
    let response: SearchResponse = serde_json::from_value(body)?;
    let mut candidates = Vec::new();
    for paper in response.result_list.result {
        let Some(title) = paper.title.clone().filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        // Europe PMC returns results ordered by relevance; the position is the score.
        let position = candidates.len() as f64;
        let mut candidate = Candidate::new(title, truncate(&paper.abstract_text, 200), position, ORIGIN)
            .with_content(paper.abstract_text.clone())
            .with_url(paper_url(&paper))
            .with_meta("citations", paper.cited_by_count.unwrap_or(0))
            .with_meta("open_access", paper.is_open_access.as_deref() == Some("Y"));
        if let Some(date) = paper.first_publication_date {
            candidate = candidate.with_meta("published", date);
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}

#[async_trait]
impl SourceClient for EuropePmcSource {
    fn origin(&self) -> &str {
        ORIGIN
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Literature
    }

    fn score_scale(&self) -> ScoreScale {
        ScoreScale::Distance
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        debug!(origin = ORIGIN, query = text, "Querying Europe PMC");
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let page_size = limit.min(MAX_PAGE_SIZE).to_string();
        let response = self
            .http
            .get(url)
            .query(&[
                ("query", text),
                ("pageSize", page_size.as_str()),
                ("format", "json"),
                ("resultType", "core"),
            ])
            .send()
            .await?;
        let body: serde_json::Value = ensure_success(response).await?.json().await?;
        parse_papers(body)
    }
}
