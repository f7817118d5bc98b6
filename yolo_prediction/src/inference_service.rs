use crate::{model_service::ModelService, state::State};
use std::sync::Arc;
use tonic::{async_trait, Request, Response, Status};
use tracing::instrument;
use yolo_proto::{
    yolo_service_server::YoloService, Empty, ImageFrame, PredictionBatch, YoloClassLabels,
};

pub struct InferenceService<M: ModelService, S: State> {
    model_service: Arc<M>,
    service_state: Arc<S>,
}

impl<M: ModelService, S: State> InferenceService<M, S> {
    pub fn new(model_service: M, state: S) -> Self {
        Self {
            model_service: Arc::new(model_service),
            service_state: Arc::new(state),
        }
    }
}

#[async_trait]
impl<M: ModelService, S: State> YoloService for InferenceService<M, S> {
    #[instrument(skip(self, request))]
    async fn predict(
        &self,
        request: Request<ImageFrame>,
    ) -> Result<Response<PredictionBatch>, Status> {
        let image_frame = request.into_inner();
        if image_frame.image_data.is_empty() {
            return Err(Status::invalid_argument("empty image"));
        }

        let batch = self.model_service.predict(image_frame).await?;

        tracing::debug!("Returning {} detections", batch.detections.len());
        for (i, detection) in batch.detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                detection.confidence,
                detection.x1,
                detection.y1,
                detection.x2,
                detection.y2
            );
        }

        Ok(Response::new(batch))
    }

    async fn get_yolo_class_labels(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<YoloClassLabels>, Status> {
        let response = YoloClassLabels {
            class_labels: self.service_state.get_labels().clone(),
        };

        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelsConfig;
    use std::path::PathBuf;

    use yolo_proto::{BoundingBox, ColorLabel};

    struct MockModelService {}

    #[async_trait]
    impl ModelService for MockModelService {
        async fn predict(&self, frame: ImageFrame) -> Result<PredictionBatch, Status> {
            let detections = vec![
                BoundingBox {
                    class_id: 0,
                    confidence: 0.95,
                    x1: 10.0,
                    y1: 20.0,
                    x2: 100.0,
                    y2: 150.0,
                },
                BoundingBox {
                    class_id: 56,
                    confidence: 0.88,
                    x1: 200.0,
                    y1: 50.0,
                    x2: 300.0,
                    y2: 200.0,
                },
            ];

            Ok(PredictionBatch {
                detections,
                timestamp: frame.timestamp,
            })
        }
    }

    struct MockState {
        class_labels: Vec<ColorLabel>,
    }

    impl State for MockState {
        fn new(_labels_cfg: &LabelsConfig) -> Result<Self, String> {
            Ok(MockState {
                class_labels: ["person", "bicycle", "chair"]
                    .into_iter()
                    .map(|label| ColorLabel {
                        label: label.to_string(),
                        red: 255,
                        green: 0,
                        blue: 0,
                    })
                    .collect(),
            })
        }

        fn get_labels(&self) -> &Vec<ColorLabel> {
            &self.class_labels
        }
    }

    fn inference_service() -> InferenceService<MockModelService, MockState> {
        let labels_config = LabelsConfig {
            labels_file: "dummy_labels.txt".to_string(),
            labels_dir: PathBuf::from("./dummy_labels_dir"),
        };
        let state = MockState::new(&labels_config).unwrap();
        InferenceService::new(MockModelService {}, state)
    }

    #[tokio::test]
    async fn test_predict() -> Result<(), Box<dyn std::error::Error>> {
        let image_frame = ImageFrame {
            image_data: vec![0; 100],
            timestamp: 12345,
        };

        let response = inference_service()
            .predict(Request::new(image_frame))
            .await?;

        let batch = response.into_inner();
        assert_eq!(batch.timestamp, 12345);
        assert_eq!(batch.detections.len(), 2);
        assert_eq!(batch.detections[0].class_id, 0);
        assert_eq!(batch.detections[1].class_id, 56);

        Ok(())
    }

    #[tokio::test]
    async fn test_predict_rejects_empty_frame() {
        let image_frame = ImageFrame {
            image_data: vec![],
            timestamp: 0,
        };

        let status = inference_service()
            .predict(Request::new(image_frame))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_get_yolo_class_labels() -> Result<(), Box<dyn std::error::Error>> {
        let response = inference_service()
            .get_yolo_class_labels(Request::new(Empty {}))
            .await?;

        let labels = response.into_inner().class_labels;
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[2].label, "chair");

        Ok(())
    }
}
