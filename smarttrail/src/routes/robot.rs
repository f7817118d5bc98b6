use super::ApiError;
use crate::{
    robot::{command_label, RobotState},
    server::SharedState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    action: Option<Value>,
}

#[derive(Serialize)]
pub struct ControlResponse {
    status: &'static str,
    robot_state: RobotState,
}

#[instrument(skip(state, payload))]
pub async fn control(
    State(state): State<SharedState>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, ApiError> {
    state.metrics.record_request("/api/control");
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!("Rejected control payload: {}", rejection.body_text());
        ApiError::InvalidPayload(rejection.body_text())
    })?;

    let action = request.action.as_ref();
    let robot_state = state.robot.apply(action);
    state.metrics.record_command(command_label(action));

    Ok(Json(ControlResponse {
        status: "success",
        robot_state,
    }))
}

pub async fn status(State(state): State<SharedState>) -> Json<RobotState> {
    state.metrics.record_request("/api/status");
    let robot_state = state.robot.poll_status();
    state.metrics.record_battery(robot_state.battery);
    Json(robot_state)
}
