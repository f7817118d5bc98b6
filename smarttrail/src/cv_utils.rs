use crate::detection::{Color, Detection};
use crate::navigation::{Guidance, PixelBox};
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

const PLACEHOLDER_BACKGROUND: Color = Color::bgr(20, 20, 20);
const PLACEHOLDER_TEXT: Color = Color::bgr(200, 200, 200);
const GUIDANCE_COLOR: Color = Color::bgr(0, 255, 255);
const WARNING_COLOR: Color = Color::bgr(0, 0, 255);
const TARGET_COLOR: Color = Color::bgr(0, 255, 0);

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

fn scalar(color: Color) -> Scalar {
    Scalar::new(color.blue as f64, color.green as f64, color.red as f64, 0.0)
}

pub struct CvImage {
    pub mat: Mat,
}

impl CvImage {
    pub fn from_mat(mat: Mat) -> Self {
        Self { mat }
    }

    /// Dark frame with a centred-ish status message, served whenever there is
    /// no live picture to show.
    pub fn placeholder(width: i32, height: i32, message: &str) -> Result<Self, CvUtilsError> {
        let mat = Mat::new_rows_cols_with_default(
            height,
            width,
            core::CV_8UC3,
            scalar(PLACEHOLDER_BACKGROUND),
        )?;
        let mut image = Self { mat };
        image.put_text(
            message,
            Point::new(width * 9 / 32, height / 2),
            0.8,
            PLACEHOLDER_TEXT,
            2,
        )?;
        Ok(image)
    }

    pub fn resized(&self, width: i32, height: i32) -> Result<Self, CvUtilsError> {
        let mut mat = Mat::default();
        imgproc::resize(
            &self.mat,
            &mut mat,
            Size::new(width, height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        Ok(Self { mat })
    }

    pub fn width(&self) -> i32 {
        self.mat.cols()
    }

    pub fn height(&self) -> i32 {
        self.mat.rows()
    }

    pub fn to_jpg(&self) -> Result<Vec<u8>, CvUtilsError> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", &self.mat, &mut buf, &Vector::new())
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        Ok(buf.into())
    }

    pub fn put_text(
        &mut self,
        text: &str,
        origin: Point,
        scale: f64,
        color: Color,
        thickness: i32,
    ) -> Result<&mut Self, CvUtilsError> {
        imgproc::put_text(
            &mut self.mat,
            text,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            scale,
            scalar(color),
            thickness,
            imgproc::LINE_AA,
            false,
        )?;
        Ok(self)
    }

    /// Red status line in the top-left corner.
    pub fn banner(&mut self, text: &str, scale: f64) -> Result<&mut Self, CvUtilsError> {
        self.put_text(text, Point::new(50, 50), scale, WARNING_COLOR, 2)
    }

    fn rectangle(
        &mut self,
        bbox: PixelBox,
        color: Color,
        thickness: i32,
    ) -> Result<&mut Self, CvUtilsError> {
        imgproc::rectangle(
            &mut self.mat,
            Rect::new(bbox.x1, bbox.y1, bbox.x2 - bbox.x1, bbox.y2 - bbox.y1),
            scalar(color),
            thickness,
            imgproc::LINE_8,
            0,
        )?;
        Ok(self)
    }

    pub fn annotate(&mut self, detections: &[Detection]) -> Result<&mut Self, CvUtilsError> {
        for detection in detections {
            let bbox = PixelBox::from_detection(detection);
            self.rectangle(bbox, detection.color, 1)?;
            self.put_text(
                &detection.caption(),
                Point::new(bbox.x1, (bbox.y1 - 5).max(20)),
                0.5,
                detection.color,
                1,
            )?;
        }
        Ok(self)
    }

    pub fn draw_guidance(&mut self, guidance: &Guidance) -> Result<&mut Self, CvUtilsError> {
        if let Some(target) = &guidance.target {
            self.rectangle(target.bbox, TARGET_COLOR, 3)?;

            imgproc::arrowed_line(
                &mut self.mat,
                Point::new(target.arrow_from.0, target.arrow_from.1),
                Point::new(target.arrow_to.0, target.arrow_to.1),
                scalar(GUIDANCE_COLOR),
                4,
                imgproc::LINE_8,
                0,
                0.3,
            )?;

            self.put_text(
                &format!("STEERING: {}", target.steering.as_str()),
                Point::new(50, 50),
                0.8,
                GUIDANCE_COLOR,
                2,
            )?;
        }

        if let Some(avoidance) = &guidance.avoidance {
            self.put_text(
                avoidance.message(),
                Point::new(50, 110),
                0.7,
                GUIDANCE_COLOR,
                2,
            )?;
        }
        Ok(self)
    }
}
