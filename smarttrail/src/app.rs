use crate::camera::Camera;
use crate::config::Config;
use crate::prediction::{PredictionPoller, PredictionService};
use crate::robot::Robot;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast, task::JoinHandle, time::timeout};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let camera = Arc::new(Camera::new(&config.camera, &config.navigation));
    let robot = Arc::new(Robot::new(&config.robot));
    let metrics = Arc::new(Metrics::new()?);

    let (shutdown_tx, _) = broadcast::channel(1);

    // Without the detection service the feed is still served, un-annotated.
    let poller_handle =
        match PredictionService::new(&config.prediction_service, &config.navigation).await {
            Ok(service) => {
                let poller = PredictionPoller::new(
                    camera.clone(),
                    Arc::new(service),
                    metrics.clone(),
                    &config.prediction_polling,
                );
                Some(poller.run(shutdown_tx.subscribe()))
            }
            Err(e) => {
                tracing::error!(
                    "Failed to initialize prediction service, detection disabled: {:?}",
                    e
                );
                None
            }
        };

    let state = SharedState::new(camera, robot, metrics, &config);
    let server = HttpServer::new(state, &config).await?;
    let server_handle = server.run(shutdown_tx.subscribe())?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    if let Some(handle) = poller_handle {
        join_poller(handle, SHUTDOWN_GRACE).await;
    }
    match timeout(SHUTDOWN_GRACE, server_handle).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!("Open video feeds did not close in time, exiting anyway"),
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum PollerExit {
    Stopped,
    Failed,
    TimedOut,
}

async fn join_poller(handle: JoinHandle<()>, grace: Duration) -> PollerExit {
    match timeout(grace, handle).await {
        Ok(Ok(())) => PollerExit::Stopped,
        Ok(Err(e)) => {
            tracing::error!("Prediction poller failed: {}", e);
            PollerExit::Failed
        }
        Err(_) => {
            tracing::warn!("Prediction poller did not stop in time, exiting anyway");
            PollerExit::TimedOut
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
