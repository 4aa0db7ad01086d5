//! API module for the Stepwise server
//!
//! This module contains the routes and handlers of the HTTP control surface.

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub mod errors;
pub mod health;
pub mod instances;

use crate::server::StepwiseServer;
use errors::ApiError;

/// Build the router for API endpoints
pub fn build_router(server: Arc<StepwiseServer>) -> Router {
    Router::new()
        // Instance creation
        .route("/workflows/:workflow/instances", post(instances::create_instance))
        .route(
            "/workflows/:workflow/instances/batch",
            post(instances::create_batch),
        )
        // Instance queries and events
        .route("/instances", get(instances::list_instances))
        .route("/instances/:id", get(instances::get_instance))
        .route("/instances/:id/events", post(instances::send_event))
        // Health check
        .route("/health", get(health::health_check))
        .fallback(route_not_found)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(server)
}

async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
