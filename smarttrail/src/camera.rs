use crate::config::{CameraConfig, NavigationConfig};
use crate::cv_utils::{CvImage, CvUtilsError};
use crate::detection::DetectorState;
use crate::navigation;
use opencv::{core::Mat, prelude::*, videoio};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

const PRIVACY_MODE: &str = "PRIVACY MODE ON";
const NOT_ACCESSIBLE: &str = "Camera Not Accessible";
const NO_SIGNAL: &str = "No Camera Signal";
const MAX_ERROR_CHARS: usize = 30;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Camera is in privacy mode")]
    PrivacyMode,
    #[error("Camera is not accessible")]
    NotAccessible,
    #[error("No camera signal")]
    NoSignal,
    #[error("Image processing failed: {0}")]
    CvUtils(#[from] CvUtilsError),
}

/// Something frames can be read from; a `VideoCapture` outside of tests.
pub trait FrameSource: Send {
    fn is_open(&self) -> bool;
    /// Reads the next frame into `frame`, `false` when none was grabbed.
    fn read_into(&mut self, frame: &mut Mat) -> opencv::Result<bool>;
}

impl FrameSource for videoio::VideoCapture {
    fn is_open(&self) -> bool {
        VideoCaptureTraitConst::is_opened(self).unwrap_or(false)
    }

    fn read_into(&mut self, frame: &mut Mat) -> opencv::Result<bool> {
        VideoCaptureTrait::read(self, frame)
    }
}

pub struct Camera {
    capture: Mutex<Option<Box<dyn FrameSource>>>,
    running: AtomicBool,
    detector_state: Mutex<DetectorState>,
    config: CameraConfig,
    navigation: NavigationConfig,
}

impl Camera {
    /// Opens the configured device. A missing or busy camera is not fatal:
    /// the feed then shows a placeholder frame instead.
    pub fn new(config: &CameraConfig, navigation: &NavigationConfig) -> Self {
        let capture = match open_capture(config.device_index) {
            Ok(capture) => Some(Box::new(capture) as Box<dyn FrameSource>),
            Err(e) => {
                tracing::warn!("Camera {} unavailable: {}", config.device_index, e);
                None
            }
        };
        Self::with_capture(capture, config, navigation)
    }

    pub fn with_capture(
        capture: Option<Box<dyn FrameSource>>,
        config: &CameraConfig,
        navigation: &NavigationConfig,
    ) -> Self {
        Self {
            capture: Mutex::new(capture),
            running: AtomicBool::new(true),
            detector_state: Mutex::new(DetectorState::Unavailable),
            config: config.clone(),
            navigation: navigation.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        tracing::info!("Camera running set to {}", running);
    }

    pub async fn is_available(&self) -> bool {
        let capture = self.capture.lock().await;
        capture
            .as_ref()
            .is_some_and(|cap| cap.is_open())
    }

    pub async fn set_detector_state(&self, state: DetectorState) {
        *self.detector_state.lock().await = state;
    }

    pub async fn detector_state(&self) -> DetectorState {
        self.detector_state.lock().await.clone()
    }

    /// Reads one frame at the configured stream resolution.
    pub async fn capture_frame(&self) -> Result<CvImage, CameraError> {
        if !self.is_running() {
            return Err(CameraError::PrivacyMode);
        }

        let mut capture = self.capture.lock().await;
        let cam = match capture.as_mut() {
            Some(cam) if cam.is_open() => cam,
            _ => return Err(CameraError::NotAccessible),
        };

        let mut frame = Mat::default();
        let grabbed = cam
            .read_into(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        drop(capture);

        if !grabbed || frame.empty() {
            return Err(CameraError::NoSignal);
        }

        Ok(CvImage::from_mat(frame).resized(self.config.frame_width, self.config.frame_height)?)
    }

    /// JPEG for the live feed: the annotated camera picture, or a placeholder
    /// explaining why there is none.
    pub async fn get_frame(&self) -> Result<Vec<u8>, CameraError> {
        let mut image = match self.capture_frame().await {
            Ok(image) => image,
            Err(CameraError::CvUtils(e)) => return Err(CameraError::CvUtils(e)),
            Err(e) => return self.placeholder(&e),
        };

        let state = self.detector_state().await;
        self.overlay(&mut image, &state)?;

        Ok(image.to_jpg()?)
    }

    fn overlay(&self, image: &mut CvImage, state: &DetectorState) -> Result<(), CvUtilsError> {
        if let Some((text, scale)) = status_banner(state) {
            image.banner(&text, scale)?;
        } else if let DetectorState::Ready(detections) = state {
            let guidance =
                navigation::plan(detections, image.width(), image.height(), &self.navigation);
            image.annotate(detections)?.draw_guidance(&guidance)?;
        }
        Ok(())
    }

    fn placeholder(&self, reason: &CameraError) -> Result<Vec<u8>, CameraError> {
        let message = match reason {
            CameraError::PrivacyMode => PRIVACY_MODE,
            CameraError::NotAccessible | CameraError::OpenCameraFailed(_) => NOT_ACCESSIBLE,
            _ => {
                tracing::debug!("Serving placeholder frame: {}", reason);
                NO_SIGNAL
            }
        };
        let image =
            CvImage::placeholder(self.config.frame_width, self.config.frame_height, message)?;
        Ok(image.to_jpg()?)
    }
}

/// Text shown in place of detections, if the detector has nothing to draw.
fn status_banner(state: &DetectorState) -> Option<(String, f64)> {
    match state {
        DetectorState::Unavailable => Some(("YOLO MODEL UNAVAILABLE".to_string(), 0.6)),
        DetectorState::Failed(message) => Some((
            format!(
                "Detection Error: {}",
                truncate_chars(message, MAX_ERROR_CHARS)
            ),
            0.6,
        )),
        DetectorState::Ready(detections) if detections.is_empty() => {
            Some(("SEARCHING FOR USER...".to_string(), 0.8))
        }
        DetectorState::Ready(_) => None,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn open_capture(device_index: i32) -> Result<videoio::VideoCapture, CameraError> {
    let capture = videoio::VideoCapture::new(device_index, videoio::CAP_ANY)
        .map_err(CameraError::OpenCameraFailed)?;
    if !capture.is_opened().map_err(CameraError::OpenCameraFailed)? {
        return Err(CameraError::NotAccessible);
    }
    Ok(capture)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::FrameSource;
    use opencv::{
        core::{self, Mat, Scalar},
        prelude::*,
    };

    /// Serves the same black frame forever.
    pub struct StillFrame(pub Mat);

    impl StillFrame {
        pub fn black(width: i32, height: i32) -> Self {
            let mat =
                Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, Scalar::all(0.0))
                    .unwrap();
            Self(mat)
        }
    }

    impl FrameSource for StillFrame {
        fn is_open(&self) -> bool {
            true
        }

        fn read_into(&mut self, frame: &mut Mat) -> opencv::Result<bool> {
            *frame = self.0.try_clone()?;
            Ok(true)
        }
    }
}
