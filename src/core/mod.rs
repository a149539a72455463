pub mod compressor;
pub mod detector;
pub mod events;
pub mod flow;
pub mod liveness;
pub mod resolver;
pub mod session;
pub mod state_machine;
pub mod submission;

pub use compressor::{compress, compress_frame, CompressedImage, CompressionSettings};
pub use detector::{FaceBox, FaceDetector, OnnxFaceDetector};
pub use events::{EventBus, PipelineEvent};
pub use flow::{CameraState, FlowServices, StepOutcome, VerificationFlow};
pub use liveness::{
    select_liveness_detector, FaceLivenessDetector, LivenessDetector, LivenessHint,
    LivenessMonitor, NullLivenessDetector,
};
pub use resolver::{resolve, ResolvedView, VerificationStatus};
pub use session::{CaptureSession, CapturedImage, Consent, Consents, DocumentType, SubjectId};
pub use state_machine::{CaptureStateMachine, CaptureStep};
pub use submission::{AttemptId, CompensationList, SubmissionOrchestrator, SubmissionPayload, SubmissionReceipt};
