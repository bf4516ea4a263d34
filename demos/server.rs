//! REST API server example for the recalculating ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `GET /transactions?page=1&limit=20` - List transactions
//! - `GET /transactions/{id}` - Get a transaction
//! - `PATCH /transactions/{id}` - Change a transaction's price, returns the recalculation job id
//! - `GET /transactions/jobs` - List recalculation jobs
//! - `GET /transactions/jobs/{id}` - Get a job's status
//! - `POST /transactions/jobs/{id}/retry` - Retry a failed job
//!
//! ## Example Usage
//!
//! ```bash
//! # Edit transaction 4
//! curl -X PATCH http://localhost:3000/transactions/4 \
//!   -H "Content-Type: application/json" \
//!   -d '{"price": 500}'
//!
//! # Poll the job
//! curl http://localhost:3000/transactions/jobs/1
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use ledger_recalc::{
    Job, JobId, LedgerConfig, LedgerError, LedgerService, LedgerStore, MemoryStore, Transaction,
    TransactionId, parse_price,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

// === Request/Response DTOs ===

/// Request body for editing a transaction. Accepts `{"price": 500}` or
/// `{"price": "500.00"}`.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub price: serde_json::Value,
}

impl UpdateRequest {
    fn price_text(&self) -> String {
        match &self.price {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub total: usize,
    pub per_page: usize,
    pub current_page: usize,
    pub last_page: usize,
}

#[derive(Debug, Serialize)]
pub struct TransactionPage {
    pub data: Vec<Transaction>,
    pub meta: PageMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub message: String,
    pub transaction: Transaction,
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: Job,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LedgerService>,
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::TransactionNotFound(_) => (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND"),
            LedgerError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            LedgerError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
            LedgerError::QueueUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE"),
            LedgerError::Propagation { .. } | LedgerError::BalanceOverflow(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PROPAGATION_ERROR")
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// GET /transactions - Paginated transaction list.
async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<TransactionPage> {
    let all = state.service.transactions();
    let per_page = query.limit.unwrap_or(20).max(1);
    let current_page = query.page.unwrap_or(1).max(1);
    let total = all.len();

    let data = all
        .into_iter()
        .skip((current_page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();

    Json(TransactionPage {
        data,
        meta: PageMeta {
            total,
            per_page,
            current_page,
            last_page: total.div_ceil(per_page).max(1),
        },
    })
}

/// GET /transactions/{id} - Get a transaction.
async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.service.transaction(TransactionId(id))?))
}

/// PATCH /transactions/{id} - Edit the price and enqueue the recalculation.
async fn update_transaction(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, AppError> {
    let price = parse_price(&request.price_text())?;
    let outcome = state.service.edit_price(TransactionId(id), price)?;

    Ok(Json(UpdateResponse {
        message: "Transaction updated successfully".to_string(),
        transaction: outcome.transaction,
        job_id: outcome.job_id,
    }))
}

/// GET /transactions/jobs - List jobs.
async fn list_jobs(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.service.jobs(),
    })
}

/// GET /transactions/jobs/{id} - Job status.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobResponse>, AppError> {
    Ok(Json(JobResponse {
        job: state.service.job(JobId(id))?,
    }))
}

/// POST /transactions/jobs/{id}/retry - Retry a failed job.
async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<JobResponse>), AppError> {
    let job = state.service.retry(JobId(id))?;
    Ok((StatusCode::ACCEPTED, Json(JobResponse { job })))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/transactions", get(list_transactions))
        .route("/transactions/jobs", get(list_jobs))
        .route("/transactions/jobs/{id}", get(get_job))
        .route("/transactions/jobs/{id}/retry", post(retry_job))
        .route(
            "/transactions/{id}",
            get(get_transaction).patch(update_transaction),
        )
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let ledger = Arc::new(LedgerStore::sample(10, Arc::new(MemoryStore::new())));
    let service = LedgerService::start(LedgerConfig::default(), ledger).unwrap();
    let state = AppState {
        service: Arc::new(service),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    info!("Ledger API server running on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}
