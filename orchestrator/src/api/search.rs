use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use uuid::Uuid;
use warp::{Rejection, Reply};

use crate::agents::controller::IterationController;
use crate::error::ApiError;
use crate::models::{FollowUpRequest, SearchRequest, SearchResponse};

pub async fn handle_search(
    request: SearchRequest,
    controller: Arc<IterationController>,
) -> Result<impl Reply, Rejection> {
    let request_id = Uuid::new_v4();
    info!("Processing search [{}]: {}", request_id, request.query);
    let started = Instant::now();

    let settings = controller.settings();
    let answer = controller
        .discover(
            &request.query,
            request.max_rounds.unwrap_or(settings.max_rounds),
            request.max_results.unwrap_or(settings.max_results_per_round),
        )
        .await
        .map_err(|e| warp::reject::custom(ApiError::from(e)))?;

    let elapsed = started.elapsed().as_millis() as u64;
    Ok(warp::reply::json(&SearchResponse::from_answer(
        request_id,
        &request.query,
        answer,
        elapsed,
    )))
}

pub async fn handle_followup(
    request: FollowUpRequest,
    controller: Arc<IterationController>,
) -> Result<impl Reply, Rejection> {
    let request_id = Uuid::new_v4();
    if request.follow_up_question.trim().is_empty() {
        return Err(warp::reject::custom(ApiError::BadRequest(
            "follow_up_question is empty".into(),
        )));
    }
    let started = Instant::now();

    let improved = controller
        .planner()
        .merge_follow_up(&request.original_query, &request.follow_up_question)
        .await;
    info!(
        "Processing follow-up [{}]: '{}' -> '{}'",
        request_id, request.original_query, improved
    );

    let settings = controller.settings();
    let mut answer = controller
        .discover(
            &improved,
            request.max_rounds.unwrap_or(settings.max_rounds),
            request.max_results.unwrap_or(settings.max_results_per_round),
        )
        .await
        .map_err(|e| warp::reject::custom(ApiError::from(e)))?;
    answer.summary = format!(
        "**Follow-up Response:** Based on your feedback about '{}', I've refined the search to better address your needs.\n\n{}",
        request.follow_up_question.trim(),
        answer.summary
    );

    let elapsed = started.elapsed().as_millis() as u64;
    Ok(warp::reply::json(&SearchResponse::from_answer(
        request_id,
        &improved,
        answer,
        elapsed,
    )))
}
