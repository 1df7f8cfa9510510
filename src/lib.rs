pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod mailchimp;
pub mod middleware;
pub mod models;
pub mod processor;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod worker;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::ApiError;
use crate::lock::PgLeaseLock;
use crate::mailchimp::MailchimpClient;
use crate::processor::BatchProcessor;
use crate::scheduler::{Job, TokioScheduler};
use crate::state::SharedState;
use crate::store::PgQueueStore;

const MAX_BODY_SIZE: usize = 64 * 1024;

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes(state.clone()))
        .route("/health", axum::routing::get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

/// Wire the processor against PostgreSQL and the Mailchimp API. The returned
/// receiver carries scheduled jobs to the worker.
pub fn build_processor(
    pool: PgPool,
    config: &Config,
) -> Result<(Arc<BatchProcessor>, mpsc::UnboundedReceiver<Job>), ApiError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let api = MailchimpClient::new(&config.mailchimp, config.queue.request_timeout)?;
    let (scheduler, jobs) = TokioScheduler::new();

    let processor = BatchProcessor::new(
        Arc::new(PgQueueStore::new(pool.clone(), clock.clone())),
        Arc::new(api),
        Arc::new(scheduler),
        Arc::new(PgLeaseLock::new(pool, clock.clone())),
        clock,
        config.queue.clone(),
    );

    Ok((Arc::new(processor), jobs))
}

async fn health() -> &'static str {
    "ok"
}
