use std::time::Duration;

use thiserror::Error;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

/// Per-source failure. Always recoverable: recorded as a warning, never raised.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("round deadline reached before the source answered")]
    RoundTimeout,

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("source task aborted: {0}")]
    Aborted(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Malformed(err.to_string())
    }
}

/// Failure of a grading or refinement capability.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("ambiguous response: {0}")]
    Ambiguous(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

/// Pre-flight configuration errors. These are the only hard failures a
/// caller of `discover` can see.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("no knowledge sources registered")]
    NoSources,

    #[error("max_rounds must be at least 1")]
    InvalidMaxRounds,

    #[error("max_results_per_round must be at least 1")]
    InvalidMaxResults,

    #[error("acceptance threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("quality top_k must be at least 1")]
    InvalidTopK,

    #[error("per-source timeout must be greater than zero")]
    InvalidTimeout,

    #[error("query text is empty")]
    EmptyQuery,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("refinement stalled: {0}")]
pub struct RefinementStalled(pub String);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid discovery request: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl Reject for ApiError {}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let (code, message, details) = if let Some(api_err) = err.find::<ApiError>() {
        (StatusCode::BAD_REQUEST, "Bad request", api_err.to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "Bad request", body_err.to_string())
    } else {
        return Err(err);
    };

    let json = warp::reply::json(&serde_json::json!({
        "error": message,
        "details": details,
    }));

    Ok(warp::reply::with_status(json, code))
}
