use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Json,
};
use serde::Deserialize;

use crate::errors::{SyncError, SyncResult};
use crate::server::app::AppState;
use crate::sync::protocol::PullResponse;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullParams {
    pub workspace_id: String,
    pub cursor: Option<String>,
}

pub async fn pull(
    State(state): State<AppState>,
    params: Result<Query<PullParams>, QueryRejection>,
) -> SyncResult<Json<PullResponse>> {
    let Query(params) = params.map_err(|e| SyncError::Validation(e.body_text()))?;
    if params.workspace_id.trim().is_empty() {
        return Err(SyncError::Validation("workspaceId cannot be empty".to_string()));
    }

    let response = state
        .pulls()
        .pull(&params.workspace_id, params.cursor.as_deref())
        .await?;

    Ok(Json(response))
}
