use crate::server::SharedState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::instrument;

#[instrument(skip(state, body))]
pub async fn predict(
    State(state): State<SharedState>,
    Path(endpoint): Path<String>,
    body: Bytes,
) -> Response {
    let Some(model) = state.models.get(&endpoint) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no model bound to endpoint `{endpoint}`")})),
        )
            .into_response();
    };

    match model.handle_request(&body).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            tracing::error!("request to `{}` failed: {}", endpoint, err);
            err.into_response()
        }
    }
}
