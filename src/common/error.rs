use crate::core::session::Consent;
use crate::core::state_machine::CaptureStep;
use crate::storage::AssetKind;
use std::fmt;
use thiserror::Error;

/// Local guard failures. These block a step transition before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    LegalNameIncomplete,
    CountryMissing,
    DocumentTypeMissing,
    DocumentImageMissing,
    SelfieImageMissing,
    ConsentMissing(Consent),
    WrongStep { expected: CaptureStep, actual: CaptureStep },
    InvalidTransition { from: CaptureStep, to: CaptureStep },
    NoActiveSession,
    CameraNotReady,
    SubmissionInProgress,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::LegalNameIncomplete => {
                write!(f, "Enter your full legal name (first and last name)")
            }
            ValidationIssue::CountryMissing => write!(f, "Select the issuing country"),
            ValidationIssue::DocumentTypeMissing => write!(f, "Select a document type"),
            ValidationIssue::DocumentImageMissing => write!(f, "Capture a photo of your document"),
            ValidationIssue::SelfieImageMissing => write!(f, "Take a selfie"),
            ValidationIssue::ConsentMissing(consent) => {
                write!(f, "Confirm: {}", consent.description())
            }
            ValidationIssue::WrongStep { expected, actual } => {
                write!(f, "Action only allowed in step {:?} (currently {:?})", expected, actual)
            }
            ValidationIssue::InvalidTransition { from, to } => {
                write!(f, "Cannot move from {:?} to {:?}", from, to)
            }
            ValidationIssue::NoActiveSession => write!(f, "No capture session is active"),
            ValidationIssue::CameraNotReady => write!(f, "Camera is not available in this step"),
            ValidationIssue::SubmissionInProgress => write!(f, "A submission is already in progress"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IdCaptureError {
    #[error("Camera access denied: {0}")]
    CaptureDeviceDenied(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Image encoding failed: {0}")]
    EncodingFailure(String),

    #[error("Upload of {kind} image failed: {reason}")]
    UploadFailure { kind: AssetKind, reason: String },

    #[error("Finalize failed: {0}")]
    FinalizeFailure(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(ValidationIssue),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<ValidationIssue> for IdCaptureError {
    fn from(issue: ValidationIssue) -> Self {
        IdCaptureError::ValidationFailure(issue)
    }
}

impl IdCaptureError {
    /// Every failure in the capture pipeline leaves the subject able to resume.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, IdCaptureError::Config(_) | IdCaptureError::Model(_))
    }

    /// Text shown to the subject. Infrastructure detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            IdCaptureError::CaptureDeviceDenied(_) => {
                "Camera access was denied. Allow camera access and try again.".to_string()
            }
            IdCaptureError::Camera(_) => {
                "The camera is not available right now. Try again.".to_string()
            }
            IdCaptureError::EncodingFailure(_) | IdCaptureError::Image(_) => {
                "That photo could not be processed. Please retake it.".to_string()
            }
            IdCaptureError::UploadFailure { kind, .. } => format!(
                "Uploading your {} photo failed. Your photos are kept, please submit again.",
                kind
            ),
            IdCaptureError::FinalizeFailure(_) => {
                "We could not record your submission. Your photos are kept, please submit again."
                    .to_string()
            }
            IdCaptureError::ValidationFailure(issue) => issue.to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IdCaptureError>;
