pub mod v4l2;

pub use v4l2::V4lCamera;

use crate::common::{IdCaptureError, Result};
use image::DynamicImage;
use std::sync::{Arc, Mutex};

/// An open frame stream. Closing happens on drop.
pub trait VideoStream: Send {
    fn next_frame(&mut self) -> Result<DynamicImage>;
}

/// Something that can hand out a video stream, e.g. a camera device.
pub trait VideoSource: Send + Sync {
    /// Fails with `CaptureDeviceDenied` when the host refuses access.
    fn open(&self) -> Result<Box<dyn VideoStream>>;
}

/// Stream shared between photo capture and the liveness loop.
pub type SharedStream = Arc<Mutex<Box<dyn VideoStream>>>;

pub fn shared(stream: Box<dyn VideoStream>) -> SharedStream {
    Arc::new(Mutex::new(stream))
}

/// Camera held for the duration of one capture step.
pub struct CameraLease {
    stream: SharedStream,
}

impl CameraLease {
    pub async fn acquire(source: Arc<dyn VideoSource>) -> Result<Self> {
        let stream = tokio::task::spawn_blocking(move || source.open())
            .await
            .map_err(|e| IdCaptureError::Camera(format!("Camera task failed: {}", e)))??;
        tracing::debug!("Camera acquired");
        Ok(Self { stream: shared(stream) })
    }

    pub fn stream(&self) -> SharedStream {
        self.stream.clone()
    }

    pub async fn capture(&self) -> Result<DynamicImage> {
        let stream = self.stream.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = stream
                .lock()
                .map_err(|_| IdCaptureError::Camera("Camera stream poisoned".into()))?;
            guard.next_frame()
        })
        .await
        .map_err(|e| IdCaptureError::Camera(format!("Camera task failed: {}", e)))?
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        tracing::debug!("Camera released");
    }
}
