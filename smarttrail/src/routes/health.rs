use crate::{robot::RobotState, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    robot_state: RobotState,
    camera_available: bool,
    detector_available: bool,
}

pub async fn healthcheck(State(state): State<SharedState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        robot_state: state.robot.snapshot(),
        camera_available: state.camera.is_available().await,
        detector_available: state.camera.detector_state().await.is_available(),
    })
}
