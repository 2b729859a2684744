// PubMed via NCBI E-utilities: esearch for PMIDs, then esummary for titles.

use std::collections::HashMap;
use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tracing::debug;

use super::{ensure_success, SourceClient};
use crate::error::SourceError;
use crate::models::{Candidate, ScoreScale, SourceKind};

pub const ORIGIN: &str = "pubmed";

const TOOL_NAME: &str = "tool_discovery";
const METHOD_TERMS: &[&str] = &["algorithm", "method", "analysis", "software", "tool"];

pub struct PubMedSource {
    http: reqwest::Client,
    base_url: String,
    // NCBI asks unauthenticated clients to stay under 3 requests per second.
    limiter: DefaultDirectRateLimiter,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    esearchresult: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    #[serde(default)]
    result: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    fulljournalname: Option<String>,
    #[serde(default)]
    pubdate: Option<String>,
    #[serde(default)]
    elocationid: Option<String>,
}

impl PubMedSource {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        let per_second = NonZeroU32::MIN.saturating_add(2);
        Self {
            http,
            base_url,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    async fn get_json(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, SourceError> {
        self.limiter.until_ready().await;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let response = self.http.get(url).query(params).send().await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

/// Steers literature search towards methods papers unless the query already does.
pub fn enrich_query(query: &str) -> String {
    let lower = query.to_lowercase();
    if METHOD_TERMS.iter().any(|term| lower.contains(term)) {
        query.to_string()
    } else {
        format!("{} computational methods algorithms", query)
    }
}

fn parse_ids(body: serde_json::Value) -> Result<Vec<String>, SourceError> {
    let envelope: SearchEnvelope = serde_json::from_value(body)?;
    Ok(envelope.esearchresult.idlist)
}

fn parse_summaries(ids: &[String], body: serde_json::Value) -> Result<Vec<Candidate>, SourceError> {
    let mut envelope: SummaryEnvelope = serde_json::from_value(body)?;
    let mut candidates = Vec::new();
    for pmid in ids {
        let Some(raw) = envelope.result.remove(pmid) else {
            continue;
        };
        let summary: Summary = serde_json::from_value(raw)?;
        let Some(title) = summary.title.filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        let journal = summary.fulljournalname.unwrap_or_default();
        let pubdate = summary.pubdate.unwrap_or_default();
        let description = match (journal.is_empty(), pubdate.is_empty()) {
            (false, false) => format!("{} ({})", journal, pubdate),
            (false, true) => journal.clone(),
            _ => String::new(),
        };
        let position = candidates.len() as f64;
        let mut candidate = Candidate::new(title.clone(), description.clone(), position, ORIGIN)
            .with_content(format!("{} {}", title, description).trim().to_string())
            .with_url(Some(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid)))
            .with_meta("pmid", pmid.as_str());
        if let Some(doi) = summary.elocationid.filter(|d| d.starts_with("doi:")) {
            candidate = candidate.with_meta("doi", doi.trim_start_matches("doi:").trim());
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}

#[async_trait]
impl SourceClient for PubMedSource {
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
        let term = enrich_query(text);
        debug!(origin = ORIGIN, query = %term, "Querying PubMed");
        let retmax = limit.to_string();

        let search = self
            .get_json(
                "esearch.fcgi",
                &[
                    ("db", "pubmed"),
                    ("term", term.as_str()),
                    ("retmax", retmax.as_str()),
                    ("retmode", "json"),
                    ("sort", "relevance"),
                    ("tool", TOOL_NAME),
                ],
            )
            .await?;
        let ids = parse_ids(search)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids.join(",");
        let summaries = self
            .get_json(
                "esummary.fcgi",
                &[
                    ("db", "pubmed"),
                    ("id", joined.as_str()),
                    ("retmode", "json"),
                    ("tool", TOOL_NAME),
                ],
            )
            .await?;
        parse_summaries(&ids, summaries)
    }
}
