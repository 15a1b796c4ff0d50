use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::data::{Algorithm, HistoricalRecord, Order, ScheduleOutcome};
use crate::knowledge::KnowledgeBase;
use crate::scheduler::scheduler_for;

pub const ADDR_ENV: &str = "PLANNER_ADDR";
const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Request body for `/v1/schedule/solve`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    pub orders: Vec<Order>,
    #[serde(default)]
    pub history: Vec<HistoricalRecord>,
    /// Overrides the configured algorithm for this request.
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
}

pub fn solve(request: SolveRequest, config: &SchedulerConfig) -> ScheduleOutcome {
    let mut config = config.clone();
    if let Some(algorithm) = request.algorithm {
        config.algorithm = algorithm;
    }
    let knowledge = KnowledgeBase::train(&request.history);
    if knowledge.is_empty() {
        warn!("No usable history; batches run at default speeds");
    }
    scheduler_for(&config).schedule(&request.orders, &knowledge)
}

async fn solve_handler(
    State(config): State<Arc<SchedulerConfig>>,
    Json(request): Json<SolveRequest>,
) -> Result<Json<ScheduleOutcome>, (StatusCode, String)> {
    if request.orders.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No orders supplied".to_string()));
    }
    info!(
        "Received {} orders and {} history records",
        request.orders.len(),
        request.history.len()
    );

    // solving is CPU-bound; keep it off the async workers
    match tokio::task::spawn_blocking(move || solve(request, &config)).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            error!("Scheduling task failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn health_handler() -> &'static str {
    "Scheduler is running"
}

pub fn router(config: Arc<SchedulerConfig>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/v1/schedule/solve", post(solve_handler))
        .with_state(config)
}

pub async fn run_server(config: SchedulerConfig) -> anyhow::Result<()> {
    let addr = std::env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let app = router(Arc::new(config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
