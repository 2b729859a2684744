use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::{Filter, Reply};

use agents::controller::IterationController;
use agents::summarizer::TemplateSynthesizer;
use capabilities::{GradingCapability, LexicalCapability, LlmCapability, RefinementCapability};

mod agents;
mod api;
mod capabilities;
mod config;
mod error;
mod metrics;
mod middleware;
mod models;
mod sources;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Starting Tool Discovery Orchestrator");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.source_timeout_ms))
        .build()?;

    let sources = sources::from_config(&config, http.clone());
    info!(count = sources.len(), "Knowledge sources registered");

    let (grading, refinement): (Arc<dyn GradingCapability>, Arc<dyn RefinementCapability>) =
        match &config.llm_api_key {
            Some(key) => {
                let llm = Arc::new(LlmCapability::new(
                    http,
                    config.llm_endpoint.clone(),
                    Some(key.clone()),
                    config.llm_model.clone(),
                ));
                info!(model = %config.llm_model, "Using language model for grading and refinement");
                (
                    llm.clone() as Arc<dyn GradingCapability>,
                    llm as Arc<dyn RefinementCapability>,
                )
            }
            None => {
                info!("LLM_API_KEY not configured, using lexical grading and refinement");
                let lexical = Arc::new(LexicalCapability::new());
                (
                    lexical.clone() as Arc<dyn GradingCapability>,
                    lexical as Arc<dyn RefinementCapability>,
                )
            }
        };

    let registry = Registry::new();
    let metrics = metrics::Metrics::new(&registry)?;

    let controller = IterationController::new(
        sources,
        config.dispatcher(),
        grading,
        refinement,
        Arc::new(TemplateSynthesizer),
        config.loop_settings(),
    )?
    .with_grading_concurrency(config.grading_concurrency)
    .with_metrics(metrics);
    let controller = Arc::new(controller);

    // Build API routes
    let api_routes = api::routes(controller.clone())
        .recover(error::handle_rejection)
        .with(warp::log("api"))
        .with(middleware::cors());

    // Health check route
    let origins = controller.source_origins();
    let health = warp::path("health").and(warp::get()).map(move || {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "sources": origins,
        }))
    });

    // Metrics route
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .map(move || match metrics::render(&registry) {
            Ok((buffer, content_type)) => {
                warp::reply::with_header(buffer, "Content-Type", content_type).into_response()
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                    .into_response()
            }
        });

    let routes = health.or(metrics_route).or(api_routes);

    // Start server
    let addr = ([0, 0, 0, 0], config.port);
    info!("Server listening on {}", addr.1);

    warp::serve(routes).run(addr).await;

    Ok(())
}
