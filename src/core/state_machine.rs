//! Five-step capture flow as an explicit finite-state machine.
//!
//! Every legal move is listed in [`TRANSITIONS`] together with the guard that
//! must hold on the [`CaptureSession`]. Anything not in the table is rejected.

use crate::common::{IdCaptureError, Result, ValidationIssue};
use crate::core::session::{CaptureSession, CapturedImage, Consent, DocumentType};
use crate::core::submission::SubmissionPayload;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStep {
    Intro,
    Details,
    DocumentCapture,
    SelfieCapture,
    Review,
    Submitting,
    Submitted,
}

impl CaptureStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureStep::Submitted)
    }

    /// Steps that hold the camera while active.
    pub fn uses_camera(&self) -> bool {
        matches!(self, CaptureStep::DocumentCapture | CaptureStep::SelfieCapture)
    }

    fn accepts_edits(&self) -> bool {
        !matches!(self, CaptureStep::Submitting | CaptureStep::Submitted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Forward,
    Back,
    /// Driven by the orchestrator's result, not by the subject.
    Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    DetailsComplete,
    DocumentCaptured,
    SelfieCaptured,
    ReadyToSubmit,
}

struct Transition {
    from: CaptureStep,
    to: CaptureStep,
    kind: TransitionKind,
    guard: Guard,
}

const fn edge(from: CaptureStep, to: CaptureStep, kind: TransitionKind, guard: Guard) -> Transition {
    Transition { from, to, kind, guard }
}

use CaptureStep::*;
use TransitionKind::*;

const TRANSITIONS: &[Transition] = &[
    edge(Intro, Details, Forward, Guard::Always),
    edge(Details, DocumentCapture, Forward, Guard::DetailsComplete),
    edge(DocumentCapture, SelfieCapture, Forward, Guard::DocumentCaptured),
    edge(SelfieCapture, Review, Forward, Guard::SelfieCaptured),
    edge(Review, Submitting, Forward, Guard::ReadyToSubmit),
    edge(Submitting, Submitted, Outcome, Guard::Always),
    edge(Submitting, Review, Outcome, Guard::Always),
    edge(Details, Intro, Back, Guard::Always),
    edge(DocumentCapture, Details, Back, Guard::Always),
    edge(SelfieCapture, DocumentCapture, Back, Guard::Always),
    edge(Review, SelfieCapture, Back, Guard::Always),
];

fn check_guard(guard: Guard, session: &CaptureSession) -> std::result::Result<(), ValidationIssue> {
    match guard {
        Guard::Always => Ok(()),
        Guard::DetailsComplete => session.check_details(),
        Guard::DocumentCaptured => session
            .document_image
            .as_ref()
            .map(|_| ())
            .ok_or(ValidationIssue::DocumentImageMissing),
        Guard::SelfieCaptured => session
            .selfie_image
            .as_ref()
            .map(|_| ())
            .ok_or(ValidationIssue::SelfieImageMissing),
        Guard::ReadyToSubmit => session.check_ready_to_submit(),
    }
}

#[derive(Debug)]
pub struct CaptureStateMachine {
    step: CaptureStep,
    session: Option<CaptureSession>,
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStateMachine {
    /// Fresh session at `Intro`.
    pub fn new() -> Self {
        Self { step: Intro, session: Some(CaptureSession::new()) }
    }

    pub fn step(&self) -> CaptureStep {
        self.step
    }

    /// `None` once the submission has been accepted.
    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    fn session_for_edit(&mut self) -> Result<&mut CaptureSession> {
        if !self.step.accepts_edits() {
            return Err(ValidationIssue::InvalidTransition { from: self.step, to: self.step }.into());
        }
        self.session
            .as_mut()
            .ok_or(IdCaptureError::ValidationFailure(ValidationIssue::NoActiveSession))
    }

    fn transition(&mut self, to: CaptureStep, kind: TransitionKind) -> Result<CaptureStep> {
        let from = self.step;
        let edge = TRANSITIONS
            .iter()
            .find(|t| t.from == from && t.to == to && t.kind == kind)
            .ok_or(ValidationIssue::InvalidTransition { from, to })?;

        let session = self.session.as_ref().ok_or(ValidationIssue::NoActiveSession)?;
        check_guard(edge.guard, session)?;

        self.step = to;
        tracing::debug!("Capture step {:?} -> {:?}", from, to);
        Ok(to)
    }

    fn target(&self, kind: TransitionKind) -> Result<CaptureStep> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == self.step && t.kind == kind)
            .map(|t| t.to)
            .ok_or_else(|| ValidationIssue::InvalidTransition { from: self.step, to: self.step }.into())
    }

    /// Subject-initiated forward move. `Review -> Submitting` goes through
    /// [`begin_submission`](Self::begin_submission) instead.
    pub fn next(&mut self) -> Result<CaptureStep> {
        let to = self.target(Forward)?;
        if to == Submitting {
            return Err(ValidationIssue::InvalidTransition { from: self.step, to }.into());
        }
        self.transition(to, Forward)
    }

    /// Steps back without discarding anything captured so far.
    pub fn back(&mut self) -> Result<CaptureStep> {
        let to = self.target(Back)?;
        self.transition(to, Back)
    }

    /// Whether `Review -> Submitting` would currently pass its guard.
    pub fn submit_enabled(&self) -> bool {
        self.step == Review
            && self
                .session
                .as_ref()
                .map_or(false, |s| s.check_ready_to_submit().is_ok())
    }

    pub fn set_legal_name(&mut self, name: &str) -> Result<()> {
        self.session_for_edit()?.legal_name = name.to_string();
        Ok(())
    }

    pub fn set_country(&mut self, country: &str) -> Result<()> {
        self.session_for_edit()?.country = country.trim().to_string();
        Ok(())
    }

    pub fn set_document_type(&mut self, document_type: DocumentType) -> Result<()> {
        self.session_for_edit()?.document_type = Some(document_type);
        Ok(())
    }

    pub fn set_consent(&mut self, consent: Consent, given: bool) -> Result<()> {
        self.session_for_edit()?.consents.set(consent, given);
        Ok(())
    }

    /// Replaces any earlier document photo. Only valid in `DocumentCapture`.
    pub fn attach_document(&mut self, image: CapturedImage) -> Result<()> {
        self.require_step(DocumentCapture)?;
        self.session_for_edit()?.document_image = Some(image);
        Ok(())
    }

    /// Replaces any earlier selfie. Only valid in `SelfieCapture`.
    pub fn attach_selfie(&mut self, image: CapturedImage) -> Result<()> {
        self.require_step(SelfieCapture)?;
        self.session_for_edit()?.selfie_image = Some(image);
        Ok(())
    }

    fn require_step(&self, expected: CaptureStep) -> Result<()> {
        if self.step != expected {
            return Err(ValidationIssue::WrongStep { expected, actual: self.step }.into());
        }
        Ok(())
    }

    /// `Review -> Submitting`; hands out what the orchestrator uploads.
    pub fn begin_submission(&mut self) -> Result<SubmissionPayload> {
        self.transition(Submitting, Forward)?;
        let session = self.session.as_ref().ok_or(ValidationIssue::NoActiveSession)?;
        Ok(SubmissionPayload::from_session(session)?)
    }

    /// Applies the orchestrator's verdict. Success ends the session.
    pub fn finish_submission(&mut self, succeeded: bool) -> Result<CaptureStep> {
        if succeeded {
            self.transition(Submitted, Outcome)?;
            self.session = None;
        } else {
            self.transition(Review, Outcome)?;
        }
        Ok(self.step)
    }
}
