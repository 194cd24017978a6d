use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde_json::Value;

use crate::errors::{SyncError, SyncResult};
use crate::server::app::AppState;
use crate::sync::protocol::{
    CollectionRequest, CreateNewIssueRequest, CreateRequest, DeleteRequest, MutationReceipt,
    UpdateRequest,
};

type Body = Result<Json<Value>, JsonRejection>;

fn json_body(body: Body) -> SyncResult<Value> {
    body.map(|Json(value)| value)
        .map_err(|e| SyncError::Validation(e.body_text()))
}

pub async fn create(
    State(state): State<AppState>,
    body: Body,
) -> SyncResult<Json<MutationReceipt>> {
    let request = CreateRequest::from_json(json_body(body)?)?;
    Ok(Json(state.mutations().create(request).await?))
}

pub async fn update(
    State(state): State<AppState>,
    body: Body,
) -> SyncResult<Json<MutationReceipt>> {
    let request = UpdateRequest::from_json(json_body(body)?)?;
    Ok(Json(state.mutations().update(request).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    body: Body,
) -> SyncResult<Json<MutationReceipt>> {
    let request = DeleteRequest::from_json(json_body(body)?)?;
    Ok(Json(state.mutations().delete(request).await?))
}

pub async fn create_new_issue(
    State(state): State<AppState>,
    body: Body,
) -> SyncResult<Json<MutationReceipt>> {
    let request: CreateNewIssueRequest = serde_json::from_value(json_body(body)?)
        .map_err(|e| SyncError::Validation(e.to_string()))?;
    Ok(Json(state.mutations().create_new_issue(request).await?))
}
