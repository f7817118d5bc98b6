//! Checks that the camera and the detection service are reachable before a
//! ride, using the same configuration as the server.

use smarttrail::{
    camera::{Camera, CameraError},
    config,
    prediction::PredictionService,
};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("info"))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match config::get_configuration() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut healthy = true;

    tracing::info!("Testing camera {} access...", config.camera.device_index);
    let camera = Camera::new(&config.camera, &config.navigation);
    match camera.capture_frame().await {
        Ok(frame) => {
            tracing::info!("Frame captured, size {}x{}", frame.width(), frame.height());
        }
        Err(CameraError::NotAccessible) => {
            healthy = false;
            tracing::error!("Could not open camera");
            tracing::error!("Check that no other application uses it, that camera permissions are granted and that a camera is connected");
        }
        Err(e) => {
            healthy = false;
            tracing::error!("Camera opened but no frame could be read: {}", e);
        }
    }

    tracing::info!(
        "Testing detection service at {}...",
        config.prediction_service.get_address()
    );
    match PredictionService::new(&config.prediction_service, &config.navigation).await {
        Ok(_) => tracing::info!("Detection service reachable, model loaded"),
        Err(e) => {
            healthy = false;
            tracing::error!("Detection service unavailable: {}", e);
        }
    }

    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
