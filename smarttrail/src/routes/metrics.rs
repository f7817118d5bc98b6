use crate::server::SharedState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

pub async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
