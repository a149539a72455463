//! Advisory "is a face in frame" hint for the selfie step.
//!
//! Hosts without a face model get [`NullLivenessDetector`]; the choice is made
//! once by [`select_liveness_detector`]. The hint never gates capture.

use crate::camera::SharedStream;
use crate::common::config::LivenessConfig;
use crate::common::{resolve_model_path, IdCaptureError};
use crate::core::detector::{FaceBox, FaceDetector, OnnxFaceDetector};
use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessHint {
    Ready,
    Positioning,
    MoveCloser,
}

impl LivenessHint {
    pub fn message(&self) -> &'static str {
        match self {
            LivenessHint::Ready => "Ready - take the photo",
            LivenessHint::Positioning => "Position your face in the frame",
            LivenessHint::MoveCloser => "Move closer to the camera",
        }
    }
}

pub trait LivenessDetector: Send + Sync {
    /// Whether a per-frame loop is worth running at all.
    fn is_active(&self) -> bool;

    fn assess(&self, frame: &DynamicImage) -> LivenessHint;
}

/// Inert default: no loop, static "ready" hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLivenessDetector;

impl LivenessDetector for NullLivenessDetector {
    fn is_active(&self) -> bool {
        false
    }

    fn assess(&self, _frame: &DynamicImage) -> LivenessHint {
        LivenessHint::Ready
    }
}

pub struct FaceLivenessDetector<D: FaceDetector> {
    detector: D,
    min_face_area_ratio: f32,
}

impl<D: FaceDetector> FaceLivenessDetector<D> {
    pub fn new(detector: D, min_face_area_ratio: f32) -> Self {
        Self { detector, min_face_area_ratio }
    }
}

impl<D: FaceDetector> LivenessDetector for FaceLivenessDetector<D> {
    fn is_active(&self) -> bool {
        true
    }

    fn assess(&self, frame: &DynamicImage) -> LivenessHint {
        let faces = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!("Face detection failed, treating as positioning: {}", e);
                return LivenessHint::Positioning;
            }
        };

        classify(&faces, frame.width(), frame.height(), self.min_face_area_ratio)
    }
}

/// Largest face decides: none → Positioning, too small → MoveCloser.
pub fn classify(faces: &[FaceBox], frame_width: u32, frame_height: u32, min_area_ratio: f32) -> LivenessHint {
    let largest = faces
        .iter()
        .map(|f| f.area_ratio(frame_width, frame_height))
        .fold(None, |acc: Option<f32>, r| Some(acc.map_or(r, |a| a.max(r))));

    match largest {
        None => LivenessHint::Positioning,
        Some(ratio) if ratio < min_area_ratio => LivenessHint::MoveCloser,
        Some(_) => LivenessHint::Ready,
    }
}

/// Picks the liveness implementation for this host.
pub fn select_liveness_detector(config: &LivenessConfig, dev_mode: bool) -> Arc<dyn LivenessDetector> {
    let Some(model_path) = config.model_path.as_ref() else {
        tracing::info!("No face model configured, liveness hint disabled");
        return Arc::new(NullLivenessDetector);
    };

    let resolved = resolve_model_path(model_path, dev_mode);
    match OnnxFaceDetector::new(config, &resolved) {
        Ok(detector) => Arc::new(FaceLivenessDetector::new(detector, config.min_face_area_ratio)),
        Err(e) => {
            tracing::warn!("Face detection unavailable, liveness hint disabled: {}", e);
            Arc::new(NullLivenessDetector)
        }
    }
}

/// Background per-frame loop for the selfie step. Dropping it cancels the loop.
pub struct LivenessMonitor {
    hint: watch::Receiver<LivenessHint>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    /// Static hint, no task. Used when the detector is inert.
    pub fn idle() -> Self {
        let (_tx, rx) = watch::channel(LivenessHint::Ready);
        Self { hint: rx, cancel: CancellationToken::new(), task: None }
    }

    pub fn start(
        detector: Arc<dyn LivenessDetector>,
        stream: SharedStream,
        frame_interval: Duration,
        max_duration: Option<Duration>,
    ) -> Self {
        if !detector.is_active() {
            return Self::idle();
        }

        let (tx, rx) = watch::channel(LivenessHint::Positioning);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Some(limit) = max_duration {
                    if started.elapsed() >= limit {
                        tracing::debug!("Liveness loop reached its {:?} limit", limit);
                        break;
                    }
                }

                let detector = detector.clone();
                let stream = stream.clone();
                let assessed = tokio::task::spawn_blocking(move || {
                    let frame = {
                        let mut guard = stream
                            .lock()
                            .map_err(|_| IdCaptureError::Camera("Camera stream poisoned".into()))?;
                        guard.next_frame()?
                    };
                    Ok::<_, IdCaptureError>(detector.assess(&frame))
                })
                .await;

                let hint = match assessed {
                    Ok(Ok(hint)) => hint,
                    Ok(Err(e)) => {
                        tracing::debug!("Liveness frame unavailable: {}", e);
                        LivenessHint::Positioning
                    }
                    Err(e) => {
                        tracing::debug!("Liveness task failed: {}", e);
                        LivenessHint::Positioning
                    }
                };

                if tx.send(hint).is_err() {
                    break;
                }
            }
        });

        Self { hint: rx, cancel, task: Some(task) }
    }

    pub fn current(&self) -> LivenessHint {
        *self.hint.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LivenessHint> {
        self.hint.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
