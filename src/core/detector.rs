use crate::common::config::LivenessConfig;
use crate::common::{IdCaptureError, Result};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Fraction of the frame covered by this box, clamped to [0, 1].
    pub fn area_ratio(&self, frame_width: u32, frame_height: u32) -> f32 {
        let frame_area = frame_width as f32 * frame_height as f32;
        if frame_area <= 0.0 {
            return 0.0;
        }
        (self.area() / frame_area).min(1.0)
    }
}

/// Face-presence capability. Only the liveness hint depends on it.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>>;
}

/// YOLO-style ONNX face detector.
pub struct OnnxFaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
}

impl OnnxFaceDetector {
    pub fn new(config: &LivenessConfig, model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(IdCaptureError::Model(format!(
                "Detector model not found at: {:?}", model_path
            )));
        }

        let environment = Arc::new(
            Environment::builder()
                .with_name("liveness_detector")
                .build()
                .map_err(|e| IdCaptureError::Model(format!("Failed to create environment: {}", e)))?,
        );

        let mut session_builder = SessionBuilder::new(&environment)?;

        let opt_level = match config.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };
        session_builder = session_builder.with_optimization_level(opt_level)?;

        let session = session_builder.with_model_from_file(model_path)?;
        tracing::info!("Loaded face model from {:?}", model_path);

        Ok(Self {
            session,
            _environment: environment,
            input_width: config.input_width,
            input_height: config.input_height,
            confidence_threshold: config.detection_confidence,
        })
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let raw = gray.as_raw();
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for y in 0..height {
            let row_offset = y * width;
            for x in 0..width {
                let pixel_value = raw[row_offset + x] as f32 * norm_factor;
                array[[0, 0, y, x]] = pixel_value;
                array[[0, 1, y, x]] = pixel_value;
                array[[0, 2, y, x]] = pixel_value;
            }
        }

        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<FaceBox>> {
        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };

        let extracted = first.try_extract::<f32>()?;
        let output = extracted.view().to_owned();
        let shape = output.shape().to_vec();
        let values = output
            .as_slice()
            .ok_or_else(|| IdCaptureError::Model("Detector output is not contiguous".into()))?;

        // [1, N, 5+] standard or [1, 5+, N] transposed
        let (num_predictions, prediction_length, is_transposed) = match shape.as_slice() {
            [_, a, b, ..] if b > a && *a <= 10 => (*b, *a, true),
            [_, a, b, ..] => (*a, *b, false),
            [a, b] => (*a, *b, false),
            _ => {
                tracing::warn!("Unexpected detector output shape: {:?}", shape);
                return Ok(Vec::new());
            }
        };
        if prediction_length < 4 {
            return Ok(Vec::new());
        }

        let field = |i: usize, k: usize| -> f32 {
            if is_transposed {
                values[k * num_predictions + i]
            } else {
                values[i * prediction_length + k]
            }
        };

        let max_x = self.input_width as f32;
        let max_y = self.input_height as f32;
        let mut faces = Vec::new();

        for i in 0..num_predictions {
            let (cx, cy, w, h) = (field(i, 0), field(i, 1), field(i, 2), field(i, 3));
            let confidence = if prediction_length > 4 { field(i, 4) } else { 0.0 };
            if confidence <= 0.001 {
                continue;
            }

            // normalized outputs are scaled up to model pixels
            let scale = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 { 1.0 } else { max_x };
            let (cx, cy, w, h) = (cx * scale, cy * scale, w * scale, h * scale);

            let x1 = (cx - w / 2.0).max(0.0);
            let y1 = (cy - h / 2.0).max(0.0);
            let x2 = (cx + w / 2.0).min(max_x);
            let y2 = (cy + h / 2.0).min(max_y);

            if x2 - x1 > 10.0 && y2 - y1 > 10.0 {
                faces.push(FaceBox { x1, y1, x2, y2, confidence });
            }
        }

        let mut faces = apply_nms(faces, 0.45);
        faces.retain(|face| face.confidence >= self.confidence_threshold);
        faces.truncate(5);
        Ok(faces)
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.input_width && image.height() == self.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut faces = self.parse_detections(&outputs)?;

        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

/// Greedy non-maximum suppression; result is sorted by confidence.
pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn calculate_iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = box1.area() + box2.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
