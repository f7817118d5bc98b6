mod camera;
mod error;
mod health;
mod metrics;
mod pages;
mod robot;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use error::ApiError;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(pages::index))
        .route("/rent", get(pages::rent))
        .route("/activate", get(pages::activate))
        .route("/dashboard", get(pages::dashboard))
        .route("/end_ride", get(pages::end_ride))
        .route("/video_feed", get(video_feed::video_feed))
        .route("/api/control", post(robot::control))
        .route("/api/status", get(robot::status))
        .route("/api/camera_control", post(camera::camera_control))
        .route("/api/toggle_camera", post(camera::toggle_camera))
        .route("/api/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        camera::Camera,
        config::{CameraConfig, NavigationConfig, RobotConfig},
        robot::Robot,
        server::{build_router, SharedState},
        stream::VideoStream,
        telemetry::Metrics,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    pub fn test_state() -> SharedState {
        let camera = Arc::new(Camera::with_capture(
            None,
            &CameraConfig::default(),
            &NavigationConfig::default(),
        ));
        let metrics = Arc::new(Metrics::new().unwrap());
        SharedState {
            video_stream: VideoStream::new(camera.clone(), metrics.clone(), 10),
            camera,
            robot: Arc::new(Robot::new(&RobotConfig::default())),
            metrics,
        }
    }

    pub fn test_router(state: &SharedState) -> Router {
        build_router(state.clone())
    }

    pub async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}
