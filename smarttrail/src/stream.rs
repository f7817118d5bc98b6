use crate::camera::{Camera, CameraError};
use crate::telemetry::Metrics;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tracing::instrument;

pub const FRAME_BOUNDARY: &str = "frame";
const FPS_REPORT_EVERY: u32 = 30;

#[derive(Clone)]
pub struct VideoStream {
    pub camera: Arc<Camera>,
    pub metrics: Arc<Metrics>,
    pub video_stream_delay: u64,
}

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

pub fn multipart_part(frame: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        frame.len()
    );
    let mut body = part_header.into_bytes();
    body.extend_from_slice(frame);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}

impl VideoStream {
    pub fn new(camera: Arc<Camera>, metrics: Arc<Metrics>, video_stream_delay: u64) -> Self {
        Self {
            camera,
            metrics,
            video_stream_delay,
        }
    }

    /// Endless `multipart/x-mixed-replace` body, one JPEG part per tick.
    /// A camera error ends this client's stream.
    #[instrument(skip(self))]
    pub fn generate_stream(self) -> impl Stream<Item = Result<Bytes, VideoStreamError>> {
        let mut ticker = interval(Duration::from_millis(self.video_stream_delay.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let camera = self.camera;
        let metrics = self.metrics;
        let mut window_start = Instant::now();
        let mut frames_in_window = 0u32;

        IntervalStream::new(ticker)
            .then(move |_| {
                let camera = camera.clone();
                async move { camera.get_frame().await }
            })
            .map(move |frame| match frame {
                Ok(frame) => {
                    frames_in_window += 1;
                    if frames_in_window == FPS_REPORT_EVERY {
                        let elapsed = window_start.elapsed().as_secs_f64();
                        if elapsed > 0.0 {
                            metrics.record_stream_fps(frames_in_window as f64 / elapsed);
                        }
                        frames_in_window = 0;
                        window_start = Instant::now();
                    }
                    Ok(multipart_part(&frame))
                }
                Err(e) => {
                    tracing::error!("Error getting frame: {:?}", e);
                    Err(VideoStreamError::from(e))
                }
            })
            .take_while(|part| futures::future::ready(part.is_ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);

        let expected: &[u8] =
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\xFF\xD8\xFF\xD9\r\n";
        assert_eq!(&part[..], expected);
    }
}
