use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{IdCaptureError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub compressor: CompressorConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompressorConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_initial_quality")]
    pub initial_quality: f32,
    #[serde(default = "default_min_quality")]
    pub min_quality: f32,
    #[serde(default = "default_quality_step")]
    pub quality_step: f32,
    #[serde(default = "default_min_scale")]
    pub min_scale: f32,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    #[serde(default = "default_preview_size")]
    pub preview_size: u32,
}

fn default_max_bytes() -> usize { 500 * 1024 }
fn default_max_dimension() -> u32 { 1280 }
fn default_initial_quality() -> f32 { 0.82 }
fn default_min_quality() -> f32 { 0.4 }
fn default_quality_step() -> f32 { 0.08 }
fn default_min_scale() -> f32 { 0.5 }
fn default_scale_factor() -> f32 { 0.85 }
fn default_preview_size() -> u32 { 160 }

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_dimension: default_max_dimension(),
            initial_quality: default_initial_quality(),
            min_quality: default_min_quality(),
            quality_step: default_quality_step(),
            min_scale: default_min_scale(),
            scale_factor: default_scale_factor(),
            preview_size: default_preview_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LivenessConfig {
    /// ONNX face model. When unset or missing the liveness hint is inert.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    #[serde(default = "default_min_face_area_ratio")]
    pub min_face_area_ratio: f32,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_input_size() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_min_face_area_ratio() -> f32 { 0.08 }
fn default_frame_interval() -> u64 { 100 }
fn default_optimization_level() -> u32 { 3 }

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_width: default_input_size(),
            input_height: default_input_size(),
            detection_confidence: default_detection_confidence(),
            min_face_area_ratio: default_min_face_area_ratio(),
            frame_interval_ms: default_frame_interval(),
            max_duration_secs: None,
            optimization_level: default_optimization_level(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_camera_width() -> u32 { 1280 }
fn default_camera_height() -> u32 { 720 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the data directory chosen by dev mode / system paths.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/idcapture.toml";
        Self::load_from_path(&PathBuf::from(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IdCaptureError::Config(format!(
                "Config file not found: {}. Please create it from the example.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| IdCaptureError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.compressor;
        if c.max_bytes == 0 {
            return Err(IdCaptureError::Config("Byte budget must be greater than 0".into()));
        }
        if c.max_dimension == 0 || c.max_dimension > 8192 {
            return Err(IdCaptureError::Config(format!(
                "Max dimension must be between 1 and 8192, got {}", c.max_dimension
            )));
        }
        if c.preview_size == 0 || c.preview_size > c.max_dimension {
            return Err(IdCaptureError::Config(format!(
                "Preview size must be between 1 and max_dimension ({}), got {}",
                c.max_dimension, c.preview_size
            )));
        }
        for (name, value) in [
            ("initial_quality", c.initial_quality),
            ("min_quality", c.min_quality),
            ("min_scale", c.min_scale),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(IdCaptureError::Config(format!(
                    "{} must be in (0.0, 1.0], got {}", name, value
                )));
            }
        }
        if c.min_quality > c.initial_quality {
            return Err(IdCaptureError::Config(format!(
                "min_quality {} exceeds initial_quality {}", c.min_quality, c.initial_quality
            )));
        }
        if c.quality_step <= 0.0 || c.quality_step >= 1.0 {
            return Err(IdCaptureError::Config(format!(
                "quality_step must be in (0.0, 1.0), got {}", c.quality_step
            )));
        }
        if c.scale_factor <= 0.0 || c.scale_factor >= 1.0 {
            return Err(IdCaptureError::Config(format!(
                "scale_factor must be in (0.0, 1.0), got {}", c.scale_factor
            )));
        }

        let l = &self.liveness;
        if l.min_face_area_ratio < 0.0 || l.min_face_area_ratio > 1.0 {
            return Err(IdCaptureError::Config(format!(
                "Face area ratio must be between 0.0 and 1.0, got {}", l.min_face_area_ratio
            )));
        }
        if l.detection_confidence < 0.0 || l.detection_confidence > 1.0 {
            return Err(IdCaptureError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}", l.detection_confidence
            )));
        }
        if l.input_width == 0 || l.input_width > 4096 || l.input_height == 0 || l.input_height > 4096 {
            return Err(IdCaptureError::Config(format!(
                "Detector input must be between 1 and 4096, got {}x{}",
                l.input_width, l.input_height
            )));
        }
        if l.frame_interval_ms == 0 {
            return Err(IdCaptureError::Config("Frame interval must be at least 1 ms".into()));
        }

        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(IdCaptureError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(IdCaptureError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        Ok(())
    }
}
