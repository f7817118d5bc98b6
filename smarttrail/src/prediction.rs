use crate::camera::{Camera, CameraError};
use crate::config::{NavigationConfig, PredictionPollingConfig, PredictionServiceConfig};
use crate::cv_utils::CvUtilsError;
use crate::detection::{Categorizer, Color, Detection, DetectorState};
use crate::telemetry::Metrics;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    time::{sleep, timeout, Duration},
};
use tonic::{
    async_trait,
    transport::{Channel, Error},
    Request, Status,
};
use tracing::instrument;
use yolo_proto::{
    yolo_service_client::YoloServiceClient, BoundingBox, ColorLabel, Empty, ImageFrame,
};

#[derive(Error, Debug)]
pub enum PredictionServiceError {
    #[error("Failed to connect to gRPC server: {0}")]
    ConnectionFailed(#[from] Error),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
    #[error("gRPC request failed: {0}")]
    GrpcRequestFailed(#[from] Status),
    #[error("Cv utils error: {0}")]
    OpenCvUtilsError(#[from] CvUtilsError),
    #[error("Camera error: {0}")]
    PredictionCameraError(#[from] CameraError),
    #[error("Prediction timed out after {0} ms")]
    Timeout(u64),
}

/// Turns an encoded frame into labelled detections.
#[async_trait]
pub trait Predictor: Send + Sync + 'static {
    async fn predict(&self, image_data: Vec<u8>) -> Result<Vec<Detection>, PredictionServiceError>;
}

pub struct PredictionService {
    client: Mutex<YoloServiceClient<Channel>>,
    class_labels: Vec<ColorLabel>,
    categorizer: Categorizer,
    min_confidence: f32,
}

impl PredictionService {
    pub async fn new(
        prediction_config: &PredictionServiceConfig,
        navigation_config: &NavigationConfig,
    ) -> Result<Self, PredictionServiceError> {
        let mut client = Self::get_client(prediction_config.get_address()).await?;

        let labels = client
            .get_yolo_class_labels(Request::new(Empty {}))
            .await?
            .into_inner();
        tracing::info!("Received {} class labels", labels.class_labels.len());

        Ok(Self {
            client: Mutex::new(client),
            class_labels: labels.class_labels,
            categorizer: Categorizer::new(&navigation_config.obstacle_labels),
            min_confidence: prediction_config.min_confidence,
        })
    }

    async fn get_client(
        address: String,
    ) -> Result<YoloServiceClient<Channel>, PredictionServiceError> {
        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        let max_retries = 10;
        let mut retry_count = 0;

        while retry_count < max_retries {
            match timeout(
                Duration::from_secs(1),
                YoloServiceClient::connect(address.clone()),
            )
            .await
            {
                Ok(Ok(client)) => return Ok(client),
                Ok(Err(e)) => {
                    tracing::error!("Failed to connect to gRPC server: {:?}", e);
                }
                Err(_) => {
                    tracing::error!("Connection timeout");
                }
            }

            retry_count += 1;
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            sleep(retry_delay.mul_f32(jitter)).await;
            retry_delay = (retry_delay * 2).min(max_retry_delay);
        }

        Err(PredictionServiceError::MaxRetriesExceeded)
    }
}

#[async_trait]
impl Predictor for PredictionService {
    #[instrument(skip(self, image_data))]
    async fn predict(&self, image_data: Vec<u8>) -> Result<Vec<Detection>, PredictionServiceError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        let request = Request::new(ImageFrame {
            image_data,
            timestamp,
        });

        let response = {
            let mut client = self.client.lock().await;
            client.predict(request).await?
        };

        Ok(label_detections(
            response.into_inner().detections,
            &self.class_labels,
            &self.categorizer,
            self.min_confidence,
        ))
    }
}

fn label_detections(
    detections: Vec<BoundingBox>,
    class_labels: &[ColorLabel],
    categorizer: &Categorizer,
    min_confidence: f32,
) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|bbox| bbox.confidence >= min_confidence)
        .map(|bbox| {
            let color_label = usize::try_from(bbox.class_id)
                .ok()
                .and_then(|id| class_labels.get(id));

            let (class_label, label_color) = match color_label {
                Some(color_label) => (
                    color_label.label.clone(),
                    Some(Color::bgr(
                        color_label.blue.min(255) as u8,
                        color_label.green.min(255) as u8,
                        color_label.red.min(255) as u8,
                    )),
                ),
                None => (format!("Unknown class {}", bbox.class_id), None),
            };

            let category = categorizer.categorize(&class_label);
            Detection {
                x1: bbox.x1,
                y1: bbox.y1,
                x2: bbox.x2,
                y2: bbox.y2,
                color: categorizer.color_for(category, label_color),
                category,
                class_label,
                confidence: bbox.confidence,
            }
        })
        .collect()
}

pub struct PredictionPoller<P> {
    camera: Arc<Camera>,
    predictor: Arc<P>,
    metrics: Arc<Metrics>,
    poll_interval_ms: u64,
    request_timeout: Duration,
    max_retries: u64,
    initial_delay: u64,
    backoff_factor: u32,
    max_consecutive_failures: u64,
}

impl<P: Predictor> PredictionPoller<P> {
    pub fn new(
        camera: Arc<Camera>,
        predictor: Arc<P>,
        metrics: Arc<Metrics>,
        prediction_polling_config: &PredictionPollingConfig,
    ) -> Self {
        Self {
            camera,
            predictor,
            metrics,
            poll_interval_ms: prediction_polling_config.get_prediction_delay_ms(),
            request_timeout: Duration::from_millis(prediction_polling_config.request_timeout),
            max_retries: prediction_polling_config.max_retries,
            initial_delay: prediction_polling_config.initial_delay,
            backoff_factor: prediction_polling_config.backoff_factor,
            max_consecutive_failures: prediction_polling_config.max_consecutive_failures,
        }
    }

    pub fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut consecutive_failures = 0;

            self.camera.set_detector_state(DetectorState::Ready(vec![])).await;

            loop {
                let succeeded = tokio::select! {
                    succeeded = self.poll_with_retries() => succeeded,
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Prediction polling received shutdown signal");
                        break;
                    }
                };

                if succeeded {
                    consecutive_failures = 0;
                } else {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.max_consecutive_failures {
                        tracing::error!("Persistent failure detected. Exiting polling loop");
                        self.camera.set_detector_state(DetectorState::Unavailable).await;
                        break;
                    }
                }

                tokio::select! {
                    _ = sleep(Duration::from_millis(self.poll_interval_ms)) => {},
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Prediction polling received shutdown signal");
                        break;
                    }
                }
            }
            tracing::info!("Prediction polling stopped");
        })
    }

    /// One poll interval. Returns `false` once every retry failed, leaving
    /// `DetectorState::Failed` with the last error behind.
    async fn poll_with_retries(&self) -> bool {
        let err = match self.poll_and_predict().await {
            Ok(()) => return true,
            Err(err) => err,
        };
        tracing::error!("Error during polling: {:?}", err);

        let mut retry_delay = Duration::from_millis(self.initial_delay);
        let mut last_error = err.to_string();
        for retry_count in 0..self.max_retries {
            tracing::warn!(
                "Retrying poll (attempt {}/{})",
                retry_count + 1,
                self.max_retries
            );
            sleep(retry_delay).await;

            match self.poll_and_predict().await {
                Ok(()) => {
                    tracing::info!("Retry successful");
                    return true;
                }
                Err(retry_err) => {
                    tracing::error!("Retry failed: {:?}", retry_err);
                    last_error = retry_err.to_string();
                    retry_delay *= self.backoff_factor;
                }
            }
        }

        tracing::error!("Max number of retries reached, skipping current poll interval");
        self.camera
            .set_detector_state(DetectorState::Failed(last_error))
            .await;
        false
    }

    async fn poll_and_predict(&self) -> Result<(), PredictionServiceError> {
        if !self.camera.is_running() {
            self.camera.set_detector_state(DetectorState::Ready(vec![])).await;
            return Ok(());
        }

        let frame = match self.camera.capture_frame().await {
            Ok(frame) => frame,
            // Nothing to look at; the feed already shows why.
            Err(CameraError::PrivacyMode | CameraError::NotAccessible | CameraError::NoSignal) => {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };

        let image_data = frame.to_jpg()?;

        let started = Instant::now();
        let detections = timeout(self.request_timeout, self.predictor.predict(image_data))
            .await
            .map_err(|_| PredictionServiceError::Timeout(self.request_timeout.as_millis() as u64))??;
        self.metrics
            .record_prediction_duration(started.elapsed().as_millis() as u64, "poller");

        tracing::debug!("Poll produced {} detections", detections.len());
        self.camera
            .set_detector_state(DetectorState::Ready(detections))
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::test_support::StillFrame;
    use crate::config::{CameraConfig, NavigationConfig};
    use crate::detection::{DetectionCategory, DEFAULT_COLOR, OBSTACLE_COLOR, PERSON_COLOR};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Outcome {
        Detect(Vec<Detection>),
        Fail,
        Hang,
    }

    struct ScriptedPredictor {
        calls: AtomicUsize,
        outcome: Outcome,
    }

    #[async_trait]
    impl Predictor for ScriptedPredictor {
        async fn predict(
            &self,
            _image_data: Vec<u8>,
        ) -> Result<Vec<Detection>, PredictionServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Detect(detections) => Ok(detections.clone()),
                Outcome::Fail => Err(PredictionServiceError::MaxRetriesExceeded),
                Outcome::Hang => std::future::pending().await,
            }
        }
    }

    fn polling_config(
        max_consecutive_failures: u64,
        request_timeout: u64,
    ) -> PredictionPollingConfig {
        PredictionPollingConfig {
            prediction_fps: 100,
            max_retries: 2,
            initial_delay: 1,
            backoff_factor: 2,
            max_consecutive_failures,
            request_timeout,
        }
    }

    fn poller(
        outcome: Outcome,
        config: &PredictionPollingConfig,
    ) -> (
        PredictionPoller<ScriptedPredictor>,
        Arc<Camera>,
        Arc<ScriptedPredictor>,
    ) {
        let camera = Arc::new(Camera::with_capture(
            Some(Box::new(StillFrame::black(640, 480))),
            &CameraConfig::default(),
            &NavigationConfig::default(),
        ));
        let predictor = Arc::new(ScriptedPredictor {
            calls: AtomicUsize::new(0),
            outcome,
        });
        let metrics = Arc::new(Metrics::new().unwrap());
        let poller = PredictionPoller::new(camera.clone(), predictor.clone(), metrics, config);
        (poller, camera, predictor)
    }

    fn person() -> Detection {
        Detection {
            x1: 10.0,
            y1: 20.0,
            x2: 110.0,
            y2: 220.0,
            class_label: "person".to_string(),
            confidence: 0.9,
            category: DetectionCategory::Person,
            color: PERSON_COLOR,
        }
    }

    fn bbox(class_id: i32, confidence: f32) -> BoundingBox {
        BoundingBox {
            class_id,
            confidence,
            x1: 1.0,
            y1: 2.0,
            x2: 3.0,
            y2: 4.0,
        }
    }

    fn labels() -> Vec<ColorLabel> {
        ["person", "chair", "kite"]
            .into_iter()
            .map(|label| ColorLabel {
                label: label.to_string(),
                red: 10,
                green: 20,
                blue: 30,
            })
            .collect()
    }

    #[test]
    fn test_label_detections() {
        let categorizer = Categorizer::new(["chair"]);
        let detections = label_detections(
            vec![bbox(0, 0.9), bbox(1, 0.8), bbox(2, 0.7), bbox(7, 0.6)],
            &labels(),
            &categorizer,
            0.4,
        );

        assert_eq!(detections.len(), 4);
        assert_eq!(detections[0].category, DetectionCategory::Person);
        assert_eq!(detections[0].color, PERSON_COLOR);
        assert_eq!(detections[1].category, DetectionCategory::Obstacle);
        assert_eq!(detections[1].color, OBSTACLE_COLOR);
        assert_eq!(detections[2].class_label, "kite");
        assert_eq!(detections[2].color, Color::bgr(30, 20, 10));
        assert_eq!(detections[3].class_label, "Unknown class 7");
        assert_eq!(detections[3].color, DEFAULT_COLOR);
    }

    #[test]
    fn test_label_detections_filters_low_confidence() {
        let categorizer = Categorizer::new(Vec::<String>::new());
        let detections = label_detections(
            vec![bbox(0, 0.39), bbox(0, 0.4), bbox(-1, 0.95)],
            &labels(),
            &categorizer,
            0.4,
        );

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence, 0.4);
        assert_eq!(detections[1].class_label, "Unknown class -1");
    }

    #[tokio::test]
    async fn test_successful_poll_publishes_detections() {
        let (poller, camera, predictor) =
            poller(Outcome::Detect(vec![person()]), &polling_config(3, 1000));

        assert!(poller.poll_with_retries().await);
        assert_eq!(
            camera.detector_state().await,
            DetectorState::Ready(vec![person()])
        );
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_detector_failed() {
        let (poller, camera, predictor) = poller(Outcome::Fail, &polling_config(3, 1000));

        assert!(!poller.poll_with_retries().await);
        assert_eq!(
            camera.detector_state().await,
            DetectorState::Failed("Maximum connection retries exceeded.".to_string())
        );
        // First attempt plus two retries.
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stalled_prediction_times_out() {
        let (poller, camera, _) = poller(Outcome::Hang, &polling_config(3, 20));

        let finished = timeout(Duration::from_secs(5), poller.poll_with_retries()).await;

        assert_eq!(finished.ok(), Some(false));
        assert_eq!(
            camera.detector_state().await,
            DetectorState::Failed("Prediction timed out after 20 ms".to_string())
        );
    }

    #[tokio::test]
    async fn test_privacy_mode_clears_stale_detections() {
        let (poller, camera, predictor) =
            poller(Outcome::Detect(vec![person()]), &polling_config(3, 1000));
        camera
            .set_detector_state(DetectorState::Ready(vec![person()]))
            .await;
        camera.set_running(false);

        assert!(poller.poll_with_retries().await);
        assert_eq!(camera.detector_state().await, DetectorState::Ready(vec![]));
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_persistent_failure_stops_polling() {
        let (poller, camera, predictor) = poller(Outcome::Fail, &polling_config(2, 1000));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = poller.run(shutdown_tx.subscribe());
        let joined = timeout(Duration::from_secs(5), handle).await;

        assert!(matches!(joined, Ok(Ok(()))));
        assert_eq!(camera.detector_state().await, DetectorState::Unavailable);
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_prediction() {
        let (poller, _, predictor) = poller(Outcome::Hang, &polling_config(2, 60_000));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = poller.run(shutdown_tx.subscribe());
        while predictor.calls.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(()).unwrap();

        let joined = timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
