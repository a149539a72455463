// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, IdCaptureError, Result, ValidationIssue};
pub use core::{
    CaptureStateMachine, CaptureStep, CompressionSettings, DocumentType, FlowServices,
    ResolvedView, SubjectId, SubmissionOrchestrator, VerificationFlow, VerificationStatus,
};
pub use camera::{V4lCamera, VideoSource, VideoStream};
pub use storage::{AssetStore, FsAssetStore, LocalRegistry, VerificationBackend};
