use crate::{
    config::{ModelConfig, Validatable},
    model_service::ModelService,
};
use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix4};
use ort::{
    execution_providers::TensorRTExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use tonic::{async_trait, Status};
use yolo_proto::{BoundingBox, ImageFrame, PredictionBatch};

const INPUT_SIZE: u32 = 640;

fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn iou(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

fn transform_image_frame(image_frame: &ImageFrame) -> Result<(Array<f32, Ix4>, u32, u32), String> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(&image_frame.image_data))
        .with_guessed_format()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let (img_width, img_height) = original_img.dimensions();
    let img = original_img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in img.pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b, _] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_height, img_width))
}

/// Decodes a YOLOv8 `[1, 4 + classes, candidates]` output into boxes in the
/// pixel space of the original image. Rows are `cx, cy, w, h` followed by one
/// score per class.
fn decode_output(
    output: ArrayViewD<f32>,
    img_width: u32,
    img_height: u32,
    min_probability: f32,
) -> Result<Vec<BoundingBox>, String> {
    if output.ndim() != 3 || output.shape()[1] <= 4 {
        return Err(format!("unexpected output shape {:?}", output.shape()));
    }

    let x_scale = img_width as f32 / INPUT_SIZE as f32;
    let y_scale = img_height as f32 / INPUT_SIZE as f32;

    let candidates = output.index_axis(Axis(0), 0);
    let mut boxes = Vec::new();

    for column in candidates.axis_iter(Axis(1)) {
        let candidate: Vec<f32> = column.iter().copied().collect();
        let Some((class_id, prob)) = candidate
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|best, next| if next.1 > best.1 { next } else { best })
        else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let xc = candidate[0] * x_scale;
        let yc = candidate[1] * y_scale;
        let w = candidate[2] * x_scale;
        let h = candidate[3] * y_scale;

        boxes.push(BoundingBox {
            class_id: class_id as i32,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    Ok(boxes)
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        let overlaps = kept.iter().any(|best| {
            best.class_id == candidate.class_id && iou(best, &candidate) >= iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
    iou_threshold: f32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances.max(1);
        let model_path = model_config.get_path();

        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_execution_providers([TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .build()])?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_path
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, Status> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| Status::internal(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| Status::internal(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| Status::internal(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| Status::internal(format!("failed to extract tensor: {}", e)))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| Status::internal(format!("invalid tensor shape: {}", e)))
    }

    fn predict_blocking(&self, frame: &ImageFrame) -> Result<PredictionBatch, Status> {
        let (input, img_height, img_width) = transform_image_frame(frame).map_err(|err| {
            Status::invalid_argument(format!("Image transformation error: {}", err))
        })?;

        let outputs = self.run_inference(&input)?;
        let boxes = decode_output(outputs.view(), img_width, img_height, self.min_probability)
            .map_err(Status::internal)?;

        Ok(PredictionBatch {
            detections: non_max_suppression(boxes, self.iou_threshold),
            timestamp: frame.timestamp,
        })
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, frame: ImageFrame) -> Result<PredictionBatch, Status> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.predict_blocking(&frame))
            .await
            .map_err(|e| Status::internal(format!("inference task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use ndarray::{Array3, IxDyn};
    use std::io::Cursor;

    fn bbox(class_id: i32, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox {
            class_id,
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn test_transform_image_frame() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 50, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();

        let image_frame = ImageFrame {
            image_data,
            timestamp: 0,
        };

        let (input, img_height, img_width) = transform_image_frame(&image_frame).unwrap();

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 50);
        assert_eq!(input[[0, 0, 320, 320]], 1.0);
        assert_eq!(input[[0, 1, 320, 320]], 0.0);
    }

    #[test]
    fn test_transform_image_frame_rejects_garbage() {
        let image_frame = ImageFrame {
            image_data: vec![0; 100],
            timestamp: 0,
        };
        assert!(transform_image_frame(&image_frame).is_err());
    }

    #[test]
    fn test_decode_output_scales_and_filters() {
        // Two classes, three candidates laid out column-wise.
        let mut output = Array3::<f32>::zeros((1, 6, 3));
        for (row, values) in [
            [320., 100., 0.],
            [320., 100., 0.],
            [64., 20., 0.],
            [128., 40., 0.],
            [0.9, 0.1, 0.0],
            [0.05, 0.3, 0.0],
        ]
        .iter()
        .enumerate()
        {
            for (col, value) in values.iter().enumerate() {
                output[[0, row, col]] = *value;
            }
        }

        let boxes = decode_output(output.into_dyn().view(), 1280, 320, 0.4).unwrap();

        assert_eq!(boxes.len(), 1);
        let first = &boxes[0];
        assert_eq!(first.class_id, 0);
        assert_eq!(first.confidence, 0.9);
        assert_eq!(first.x1, 640. - 64.);
        assert_eq!(first.x2, 640. + 64.);
        assert_eq!(first.y1, 160. - 32.);
        assert_eq!(first.y2, 160. + 32.);
    }

    #[test]
    fn test_decode_output_rejects_bad_shape() {
        let output = ArrayD::<f32>::zeros(IxDyn(&[1, 4]));
        assert!(decode_output(output.view(), 640, 640, 0.4).is_err());
    }

    #[test]
    fn test_non_max_suppression_is_per_class() {
        let boxes = vec![
            bbox(0, 0.6, 12., 12., 110., 110.),
            bbox(0, 0.9, 10., 10., 110., 110.),
            bbox(1, 0.8, 10., 10., 110., 110.),
            bbox(0, 0.7, 300., 300., 350., 350.),
        ];

        let kept = non_max_suppression(boxes, 0.7);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
        assert_eq!(kept[2].x1, 300.);
    }

    #[test]
    fn test_iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0, 1., 0., 0., 10., 10.);
        let b = bbox(0, 1., 20., 20., 30., 30.);
        assert_eq!(iou(&a, &b), 0.);
    }
}
