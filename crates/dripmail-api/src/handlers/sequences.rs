//! Sequence handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use dripmail_storage::models::{CreateSequence, Sequence, SequenceChange, SequenceWithSteps};
use dripmail_common::Error;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{api_error, not_found, validation_failed, ApiError};
use crate::state::AppState;

/// Sequence list response
#[derive(Debug, Serialize)]
pub struct SequenceListResponse {
    pub data: Vec<Sequence>,
}

fn in_use(id: Uuid) -> ApiError {
    api_error(Error::Conflict(format!(
        "Sequence {} is used by a campaign and cannot be changed",
        id
    )))
}

/// List sequences
///
/// GET /api/v1/sequences
pub async fn list_sequences(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SequenceListResponse>, ApiError> {
    let data = state.repos.sequences.list().await.map_err(api_error)?;
    Ok(Json(SequenceListResponse { data }))
}

/// Create a sequence
///
/// POST /api/v1/sequences
pub async fn create_sequence(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateSequence>,
) -> Result<(StatusCode, Json<SequenceWithSteps>), ApiError> {
    let violations = input.validate();
    if !violations.is_empty() {
        return Err(validation_failed(violations));
    }

    let created = state.repos.sequences.create(input).await.map_err(api_error)?;

    info!(
        sequence_id = %created.sequence.id,
        steps = created.steps.len(),
        "Sequence created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// Get a sequence with its steps
///
/// GET /api/v1/sequences/:sequence_id
pub async fn get_sequence(
    State(state): State<Arc<AppState>>,
    Path(sequence_id): Path<Uuid>,
) -> Result<Json<SequenceWithSteps>, ApiError> {
    state
        .repos
        .sequences
        .get(sequence_id)
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("Sequence {}", sequence_id)))
}

/// Replace a sequence's name and steps
///
/// PUT /api/v1/sequences/:sequence_id
pub async fn replace_sequence(
    State(state): State<Arc<AppState>>,
    Path(sequence_id): Path<Uuid>,
    Json(input): Json<CreateSequence>,
) -> Result<Json<SequenceWithSteps>, ApiError> {
    let violations = input.validate();
    if !violations.is_empty() {
        return Err(validation_failed(violations));
    }

    match state
        .repos
        .sequences
        .replace(sequence_id, input)
        .await
        .map_err(api_error)?
    {
        SequenceChange::Applied(sequence) => {
            info!(sequence_id = %sequence_id, "Sequence replaced");
            Ok(Json(sequence))
        }
        SequenceChange::NotFound => Err(not_found(format!("Sequence {}", sequence_id))),
        SequenceChange::InUse => Err(in_use(sequence_id)),
    }
}

/// Delete a sequence
///
/// DELETE /api/v1/sequences/:sequence_id
pub async fn delete_sequence(
    State(state): State<Arc<AppState>>,
    Path(sequence_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state
        .repos
        .sequences
        .delete(sequence_id)
        .await
        .map_err(api_error)?
    {
        SequenceChange::Applied(()) => {
            info!(sequence_id = %sequence_id, "Sequence deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        SequenceChange::NotFound => Err(not_found(format!("Sequence {}", sequence_id))),
        SequenceChange::InUse => Err(in_use(sequence_id)),
    }
}
