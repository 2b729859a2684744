// LLM-backed grading and refinement over an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{GradingCapability, Judgement, RefinementCapability};
use crate::error::CapabilityError;
use crate::models::{GroundingVerdict, NormalizedCandidate, Query, RelevanceVerdict, Weakness};

const RELEVANCE_PROMPT: &str = "You are a bioinformatics expert grading tool relevance. \
    Decide whether the tool plausibly satisfies the intent of the user's query. \
    Sharing vocabulary with the query is not enough: the tool must do what the user needs. \
    When the tool is relevant, also state in one sentence what it does that addresses the query. \
    Answer with a JSON object {\"verdict\": \"yes\" | \"no\" | \"unsure\", \"reasoning\": \"...\", \"claim\": \"...\"}.";

const GROUNDING_PROMPT: &str = "You are a bioinformatics expert checking recommendations for hallucinations. \
    Decide whether every statement in the claim is supported by the retrieved content. \
    Answer with a JSON object {\"grounded\": \"yes\" | \"no\", \"reasoning\": \"...\"}.";

const REFINEMENT_PROMPT: &str = "You are a bioinformatics expert improving search queries for tool discovery. \
    Use the weaknesses of the previous round: if results were missing or off-target make the query broader, \
    if results were too broad make it more specific, and fold in any user feedback. \
    Never return the query unchanged. \
    Answer with a JSON object {\"improved_query\": \"...\", \"reasoning\": \"...\"}.";

const MAX_CONTEXT_CHARS: usize = 1500;

pub struct LlmCapability {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RelevanceAnswer {
    verdict: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    claim: String,
}

#[derive(Debug, Deserialize)]
struct GroundingAnswer {
    grounded: String,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RefinementAnswer {
    improved_query: String,
    #[serde(default)]
    reasoning: String,
}

impl LlmCapability {
    pub fn new(http: reqwest::Client, endpoint: String, api_key: Option<String>, model: String) -> Self {
        Self {
            http,
            endpoint,
            api_key,
            model,
        }
    }

    async fn complete<T: DeserializeOwned>(&self, system: &str, user: String) -> Result<T, CapabilityError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "max_tokens": 500,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let mut request = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CapabilityError::Malformed("completion has no choices".into()))?;
        parse_json_block(&content)
    }
}

/// Extracts the outermost JSON object from a model reply that may wrap it in prose or fences.
pub fn parse_json_block<T: DeserializeOwned>(reply: &str) -> Result<T, CapabilityError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if end > start => &reply[start..=end],
        _ => return Err(CapabilityError::Malformed(format!("no JSON object in reply: {}", clip(reply)))),
    };
    serde_json::from_str(object).map_err(|e| CapabilityError::Malformed(e.to_string()))
}

fn clip(text: &str) -> String {
    text.chars().take(200).collect()
}

fn context(text: &str) -> String {
    text.chars().take(MAX_CONTEXT_CHARS).collect()
}

fn relevance_verdict(answer: &str) -> Result<RelevanceVerdict, CapabilityError> {
    match answer.trim().to_lowercase().as_str() {
        "yes" | "relevant" => Ok(RelevanceVerdict::Relevant),
        "no" | "not_relevant" => Ok(RelevanceVerdict::NotRelevant),
        "unsure" | "uncertain" => Ok(RelevanceVerdict::Uncertain),
        other => Err(CapabilityError::Ambiguous(format!("relevance verdict '{}'", other))),
    }
}

fn grounding_verdict(answer: &str) -> Result<GroundingVerdict, CapabilityError> {
    match answer.trim().to_lowercase().as_str() {
        "yes" | "grounded" => Ok(GroundingVerdict::Grounded),
        "no" | "unsupported" => Ok(GroundingVerdict::Unsupported),
        other => Err(CapabilityError::Ambiguous(format!("grounding verdict '{}'", other))),
    }
}

fn relevance_request(query: &Query, candidate: &NormalizedCandidate) -> String {
    let category = candidate
        .metadata
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown");
    format!(
        "Query: {}\n\nTool: {}\nCategory: {}\nFound via: {}\nDescription: {}",
        query.text,
        candidate.name,
        category,
        candidate.origins.join(", "),
        context(&candidate.description),
    )
}

fn refinement_request(query: &Query, weaknesses: &[Weakness]) -> String {
    let mut request = format!("Original Query: {}\n\nWeaknesses of the previous round:", query.text);
    if weaknesses.is_empty() {
        request.push_str("\n- none recorded");
    }
    for weakness in weaknesses {
        request.push_str(&format!("\n- {}", weakness));
    }
    request.push_str("\n\nProvide an improved query for bioinformatics tool discovery.");
    request
}

#[async_trait]
impl GradingCapability for LlmCapability {
    async fn classify(
        &self,
        query: &Query,
        candidate: &NormalizedCandidate,
    ) -> Result<Judgement<RelevanceVerdict>, CapabilityError> {
        let answer: RelevanceAnswer = self
            .complete(RELEVANCE_PROMPT, relevance_request(query, candidate))
            .await?;
        debug!(tool = %candidate.name, verdict = %answer.verdict, "Relevance graded");
        Ok(Judgement::new(relevance_verdict(&answer.verdict)?, answer.reasoning)
            .with_claim(answer.claim))
    }

    async fn check_grounding(
        &self,
        candidate: &NormalizedCandidate,
        claim: &str,
    ) -> Result<Judgement<GroundingVerdict>, CapabilityError> {
        let user = format!(
            "Tool: {}\n\nRetrieved content:\n{}\n\nClaim:\n{}",
            candidate.name,
            context(&candidate.content),
            context(claim),
        );
        let answer: GroundingAnswer = self.complete(GROUNDING_PROMPT, user).await?;
        debug!(tool = %candidate.name, grounded = %answer.grounded, "Grounding checked");
        Ok(Judgement::new(grounding_verdict(&answer.grounded)?, answer.reasoning))
    }
}

#[async_trait]
impl RefinementCapability for LlmCapability {
    async fn refine(&self, query: &Query, weaknesses: &[Weakness]) -> Result<String, CapabilityError> {
        let answer: RefinementAnswer = self
            .complete(REFINEMENT_PROMPT, refinement_request(query, weaknesses))
            .await?;
        debug!(
            original = %query.text,
            improved = %answer.improved_query,
            reasoning = %answer.reasoning,
            "Query transformed"
        );
        Ok(answer.improved_query)
    }
}
