//! Instance endpoints
//!
//! Thin adapters from HTTP onto [`WorkflowRuntime`](stepwise_core::WorkflowRuntime).
//! Bodies are parsed by hand so malformed JSON still gets the standard
//! error shape.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use stepwise_core::{CreateRequest, Payload};

use crate::api::errors::ApiError;
use crate::server::StepwiseServer;

/// Body of a batch create
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BatchRequest {
    /// `count` instances with generated ids
    Count { count: usize },
    /// Explicit list of instances
    Instances { instances: Vec<CreateRequest> },
}

/// Body of an event delivery
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRequest {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub payload: Payload,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

/// `POST /workflows/:workflow/instances`
pub async fn create_instance(
    State(server): State<Arc<StepwiseServer>>,
    Path(workflow): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: CreateRequest = parse_optional_body(&body)?;
    let created = server
        .runtime()
        .create(&workflow, request.id.as_deref(), request.params)
        .await?;

    let status = if created.created {
        info!(instance_id = %created.id, workflow = %workflow, "Instance created");
        StatusCode::CREATED
    } else {
        debug!(instance_id = %created.id, "Instance already exists");
        StatusCode::OK
    };
    Ok((status, Json(created)))
}

/// `POST /workflows/:workflow/instances/batch`
pub async fn create_batch(
    State(server): State<Arc<StepwiseServer>>,
    Path(workflow): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ids = match parse_body::<BatchRequest>(&body)? {
        BatchRequest::Count { count } => server.runtime().create_count(&workflow, count).await?,
        BatchRequest::Instances { instances } => {
            server.runtime().create_batch(&workflow, instances).await?
        }
    };
    info!(workflow = %workflow, count = ids.len(), "Batch created");
    Ok((StatusCode::CREATED, Json(ids)))
}

/// `GET /instances`
pub async fn list_instances(
    State(server): State<Arc<StepwiseServer>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(server.runtime().list_instances().await?))
}

/// `GET /instances/:id`
pub async fn get_instance(
    State(server): State<Arc<StepwiseServer>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(server.runtime().status(&id).await?))
}

/// `POST /instances/:id/events`
pub async fn send_event(
    State(server): State<Arc<StepwiseServer>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let event: EventRequest = parse_body(&body)?;
    if event.event_type.trim().is_empty() {
        return Err(ApiError::BadRequest("Event type must not be empty".to_string()));
    }

    let outcome = server
        .runtime()
        .send_event(&id, &event.event_type, event.payload)
        .await?;
    debug!(instance_id = %id, event_type = %event.event_type, ?outcome, "Event accepted");
    Ok(Json(json!({ "outcome": outcome })))
}
