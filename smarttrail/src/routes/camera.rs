use crate::server::SharedState;
use axum::{body::Bytes, extract::State, response::Json};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

#[derive(Serialize)]
pub struct CameraResponse {
    status: &'static str,
    running: bool,
}

/// Camera switches accept any body: a missing or malformed one counts as `{}`.
fn lenient_object(body: &Bytes) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// JSON truthiness: empty, zero, false and null values are off.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Turns the camera on or off. `{"on": false}` enables privacy mode; a missing
/// flag turns the camera on.
#[instrument(skip(state, body))]
pub async fn camera_control(State(state): State<SharedState>, body: Bytes) -> Json<CameraResponse> {
    state.metrics.record_request("/api/camera_control");
    let running = lenient_object(&body).get("on").is_none_or(is_truthy);
    state.camera.set_running(running);

    Json(CameraResponse {
        status: "updated",
        running,
    })
}

/// Sets the camera state from `{"run": ...}`, or flips it when the flag is
/// absent.
#[instrument(skip(state, body))]
pub async fn toggle_camera(State(state): State<SharedState>, body: Bytes) -> Json<CameraResponse> {
    state.metrics.record_request("/api/toggle_camera");
    let running = match lenient_object(&body).get("run") {
        Some(run) => is_truthy(run),
        None => !state.camera.is_running(),
    };
    state.camera.set_running(running);

    Json(CameraResponse {
        status: "success",
        running,
    })
}
