//! Subject-scoped controller tying the resolver, the capture state machine,
//! the compressor, the liveness monitor and the orchestrator together.

use crate::camera::{CameraLease, VideoSource};
use crate::common::{IdCaptureError, Result, ValidationIssue};
use crate::core::compressor::{compress_async, compress_frame_async, CompressionSettings};
use crate::core::events::{EventBus, PipelineEvent};
use crate::core::liveness::{LivenessDetector, LivenessHint, LivenessMonitor};
use crate::core::resolver::{resolve, ResolvedView};
use crate::core::session::{CaptureSession, CapturedImage, Consent, DocumentType, SubjectId};
use crate::core::state_machine::{CaptureStateMachine, CaptureStep};
use crate::core::submission::{SubmissionOrchestrator, SubmissionReceipt};
use crate::storage::{AssetStore, VerificationBackend};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators and tuning shared by every flow in the process.
#[derive(Clone)]
pub struct FlowServices {
    pub backend: Arc<dyn VerificationBackend>,
    pub store: Arc<dyn AssetStore>,
    /// `None` when photos only come from files.
    pub camera: Option<Arc<dyn VideoSource>>,
    pub liveness: Arc<dyn LivenessDetector>,
    pub compression: CompressionSettings,
    pub liveness_interval: Duration,
    pub liveness_max_duration: Option<Duration>,
    pub events: EventBus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraState {
    NotNeeded,
    Ready,
    /// Access refused; the subject can grant it and call `retry_camera`.
    Denied(String),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: CaptureStep,
    pub camera: CameraState,
}

pub struct VerificationFlow {
    subject: SubjectId,
    services: FlowServices,
    orchestrator: SubmissionOrchestrator,
    view: Option<ResolvedView>,
    machine: Option<CaptureStateMachine>,
    camera: Option<CameraLease>,
    camera_state: CameraState,
    liveness: Option<LivenessMonitor>,
}

impl VerificationFlow {
    pub fn new(subject: SubjectId, services: FlowServices) -> Self {
        let orchestrator = SubmissionOrchestrator::new(services.store.clone(), services.backend.clone());
        Self {
            subject,
            services,
            orchestrator,
            view: None,
            machine: None,
            camera: None,
            camera_state: CameraState::NotNeeded,
            liveness: None,
        }
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Last resolved view; `None` before `enter`.
    pub fn view(&self) -> Option<&ResolvedView> {
        self.view.as_ref()
    }

    pub fn step(&self) -> Option<CaptureStep> {
        self.machine.as_ref().map(|m| m.step())
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.machine.as_ref().and_then(|m| m.session())
    }

    pub fn camera_state(&self) -> &CameraState {
        &self.camera_state
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    pub fn submit_enabled(&self) -> bool {
        self.machine.as_ref().map_or(false, |m| m.submit_enabled())
    }

    /// Entry guard: queries status and opens a capture session only when the
    /// resolver says so. Forcing past reviewer feedback clears the stored
    /// comment before the session opens.
    pub async fn enter(&mut self, force_resubmit: bool) -> Result<ResolvedView> {
        let mut report = self.services.backend.status(&self.subject).await?;
        let unforced = resolve(report.status, report.comment.as_deref(), false);
        if force_resubmit && matches!(unforced, ResolvedView::NeedsResubmission(_)) {
            self.services.backend.request_resubmit(&self.subject).await?;
            tracing::info!("Cleared review feedback for {} before a forced capture", self.subject);
            report = self.services.backend.status(&self.subject).await?;
        }
        let view = resolve(report.status, report.comment.as_deref(), force_resubmit);
        tracing::info!("Subject {} status {} -> {:?}", self.subject, report.status, view);

        if view.starts_capture() {
            self.start_session().await;
        } else {
            self.discard_session().await;
        }
        self.view = Some(view.clone());
        Ok(view)
    }

    /// The "Resubmit" action: clear the reviewer comment, re-query, and open
    /// a fresh session at `Intro`. Only acts on the needs-resubmission view;
    /// any other status just resolves as usual.
    pub async fn resubmit(&mut self) -> Result<ResolvedView> {
        let report = self.services.backend.status(&self.subject).await?;
        let view = resolve(report.status, report.comment.as_deref(), false);
        if matches!(view, ResolvedView::NeedsResubmission(_)) {
            self.services.backend.request_resubmit(&self.subject).await?;
            tracing::info!("Resubmission requested for {}", self.subject);
        }
        self.enter(false).await
    }

    /// Drops the session without submitting.
    pub async fn cancel(&mut self) {
        self.discard_session().await;
    }

    async fn start_session(&mut self) {
        self.discard_session().await;
        self.machine = Some(CaptureStateMachine::new());
        self.camera_state = CameraState::NotNeeded;
    }

    async fn discard_session(&mut self) {
        self.release_camera().await;
        if let Some(machine) = self.machine.take() {
            if machine.session().is_some() {
                self.services
                    .events
                    .emit_lossy(PipelineEvent::SessionDiscarded { subject: self.subject.clone() });
            }
        }
    }

    fn machine(&self) -> Result<&CaptureStateMachine> {
        self.machine
            .as_ref()
            .ok_or(IdCaptureError::ValidationFailure(ValidationIssue::NoActiveSession))
    }

    fn machine_mut(&mut self) -> Result<&mut CaptureStateMachine> {
        self.machine
            .as_mut()
            .ok_or(IdCaptureError::ValidationFailure(ValidationIssue::NoActiveSession))
    }

    pub fn set_legal_name(&mut self, name: &str) -> Result<()> {
        self.machine_mut()?.set_legal_name(name)
    }

    pub fn set_country(&mut self, country: &str) -> Result<()> {
        self.machine_mut()?.set_country(country)
    }

    pub fn set_document_type(&mut self, document_type: DocumentType) -> Result<()> {
        self.machine_mut()?.set_document_type(document_type)
    }

    pub fn set_consent(&mut self, consent: Consent, given: bool) -> Result<()> {
        self.machine_mut()?.set_consent(consent, given)
    }

    pub async fn next(&mut self) -> Result<StepOutcome> {
        let from = self.machine()?.step();
        let to = self.machine_mut()?.next()?;
        Ok(self.enter_step(from, to).await)
    }

    pub async fn back(&mut self) -> Result<StepOutcome> {
        let from = self.machine()?.step();
        let to = self.machine_mut()?.back()?;
        Ok(self.enter_step(from, to).await)
    }

    pub async fn retry_camera(&mut self) -> Result<CameraState> {
        let step = self.machine()?.step();
        if !step.uses_camera() {
            return Err(ValidationIssue::CameraNotReady.into());
        }
        self.release_camera().await;
        self.acquire_camera(step).await;
        Ok(self.camera_state.clone())
    }

    async fn enter_step(&mut self, from: CaptureStep, to: CaptureStep) -> StepOutcome {
        self.services.events.emit_lossy(PipelineEvent::StepChanged {
            subject: self.subject.clone(),
            from,
            to,
        });

        self.release_camera().await;
        if to.uses_camera() {
            self.acquire_camera(to).await;
        }

        StepOutcome { step: to, camera: self.camera_state.clone() }
    }

    async fn acquire_camera(&mut self, step: CaptureStep) {
        let Some(source) = self.services.camera.clone() else {
            self.camera_state = CameraState::Unavailable("No camera configured".into());
            return;
        };

        match CameraLease::acquire(source).await {
            Ok(lease) => {
                if step == CaptureStep::SelfieCapture {
                    self.liveness = Some(LivenessMonitor::start(
                        self.services.liveness.clone(),
                        lease.stream(),
                        self.services.liveness_interval,
                        self.services.liveness_max_duration,
                    ));
                }
                self.camera = Some(lease);
                self.camera_state = CameraState::Ready;
            }
            Err(IdCaptureError::CaptureDeviceDenied(reason)) => {
                tracing::warn!("Camera access denied: {}", reason);
                self.camera_state = CameraState::Denied(reason);
            }
            Err(e) => {
                tracing::warn!("Camera unavailable: {}", e);
                self.camera_state = CameraState::Unavailable(e.to_string());
            }
        }
    }

    async fn release_camera(&mut self) {
        if let Some(monitor) = self.liveness.take() {
            monitor.stop().await;
        }
        self.camera = None;
        self.camera_state = CameraState::NotNeeded;
    }

    /// Current advisory hint. Static "ready" when no loop is running.
    pub fn liveness_hint(&self) -> LivenessHint {
        self.liveness
            .as_ref()
            .map_or(LivenessHint::Ready, |monitor| monitor.current())
    }

    /// A live frame for on-screen preview; nothing is stored.
    pub async fn preview_frame(&self) -> Result<DynamicImage> {
        let lease = self
            .camera
            .as_ref()
            .ok_or(IdCaptureError::ValidationFailure(ValidationIssue::CameraNotReady))?;
        lease.capture().await
    }

    fn photo_step(&self) -> Result<CaptureStep> {
        let step = self.machine()?.step();
        if !step.uses_camera() {
            return Err(ValidationIssue::WrongStep { expected: CaptureStep::DocumentCapture, actual: step }.into());
        }
        Ok(step)
    }

    fn attach(&mut self, step: CaptureStep, image: CapturedImage) -> Result<CapturedImage> {
        let machine = self.machine_mut()?;
        match step {
            CaptureStep::DocumentCapture => machine.attach_document(image.clone())?,
            _ => machine.attach_selfie(image.clone())?,
        }
        Ok(image)
    }

    /// Takes a frame from the leased camera, compresses it and stores it in
    /// the session for the current capture step.
    pub async fn capture_photo(&mut self) -> Result<CapturedImage> {
        let step = self.photo_step()?;
        let lease = self
            .camera
            .as_ref()
            .ok_or(IdCaptureError::ValidationFailure(ValidationIssue::CameraNotReady))?;

        let frame = lease.capture().await?;
        let compressed = compress_frame_async(frame, self.services.compression.clone()).await?;
        tracing::info!("Captured {:?} photo ({} bytes)", step, compressed.len());
        self.attach(step, compressed.into())
    }

    /// Same as `capture_photo` but from already encoded image bytes.
    pub async fn attach_photo(&mut self, raw: Vec<u8>) -> Result<CapturedImage> {
        let step = self.photo_step()?;
        let compressed = compress_async(raw, self.services.compression.clone()).await?;
        tracing::info!("Imported {:?} photo ({} bytes)", step, compressed.len());
        self.attach(step, compressed.into())
    }

    /// Runs the upload/finalize protocol. On failure the flow is back at
    /// `Review` with the captured photos intact.
    pub async fn submit(&mut self) -> Result<SubmissionReceipt> {
        let payload = self.machine_mut()?.begin_submission()?;
        self.services.events.emit_lossy(PipelineEvent::StepChanged {
            subject: self.subject.clone(),
            from: CaptureStep::Review,
            to: CaptureStep::Submitting,
        });

        let result = self.orchestrator.submit(&self.subject, &payload).await;
        drop(payload);

        let succeeded = result.is_ok();
        let step = self.machine_mut()?.finish_submission(succeeded)?;
        self.services.events.emit_lossy(PipelineEvent::StepChanged {
            subject: self.subject.clone(),
            from: CaptureStep::Submitting,
            to: step,
        });

        match result {
            Ok(receipt) => {
                self.view = Some(ResolvedView::PendingReview);
                self.services.events.emit_lossy(PipelineEvent::VerificationSubmitted {
                    subject: self.subject.clone(),
                    attempt: receipt.attempt,
                    submitted_at: receipt.submission.submitted_at,
                });
                Ok(receipt)
            }
            Err(e) => {
                self.services.events.emit_lossy(PipelineEvent::SubmissionFailed {
                    subject: self.subject.clone(),
                    message: e.user_message(),
                });
                Err(e)
            }
        }
    }
}
