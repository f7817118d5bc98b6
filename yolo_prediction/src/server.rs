use crate::{
    config::Config,
    inference_service::InferenceService,
    model_service::ModelService,
    ort_service::OrtModelService,
    state::{ServiceState, State},
};
use std::net::SocketAddr;
use tokio::signal;
use tonic::transport::server::Router;
use tonic::transport::Server;
use yolo_proto::yolo_service_server::YoloServiceServer;

pub struct GrpcServer {
    router: Router,
    addr: SocketAddr,
}

impl GrpcServer {
    pub async fn new<M: ModelService, S: State>(
        model_service: M,
        service_state: S,
        addr: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let addr = addr.parse()?;
        let inference_service = InferenceService::new(model_service, service_state);

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<YoloServiceServer<InferenceService<M, S>>>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(yolo_proto::FILE_DESCRIPTOR_SET)
            .build_v1alpha()?;

        let router = Server::builder()
            .add_service(health_service)
            .add_service(YoloServiceServer::new(inference_service))
            .add_service(reflection_service);

        Ok(Self { router, addr })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        tracing::info!("Inference service listening on {}", self.addr);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        self.router.serve_with_shutdown(self.addr, shutdown).await?;
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let ort_model_service = OrtModelService::new(&config.model).inspect_err(|e| {
        tracing::error!("Failed to instantiate ort model service: {}", e);
    })?;
    let service_state = ServiceState::new(&config.labels)?;

    let grpc_server =
        GrpcServer::new(ort_model_service, service_state, &config.server.get_address()).await?;

    grpc_server.run().await
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
