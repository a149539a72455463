//! Upload/finalize protocol with compensating rollback.
//!
//! One attempt = document upload, selfie upload, finalize, in that order.
//! Every side effect that succeeds pushes an undo action onto a
//! [`CompensationList`]; if a later step fails the list is unwound (newest
//! first) before the error is returned, so an aborted attempt leaves no
//! stored assets behind.

use crate::common::{IdCaptureError, Result, ValidationIssue};
use crate::core::session::{CaptureSession, DocumentType, SubjectId};
use crate::storage::{
    AssetKind, AssetPath, AssetStore, FinalizeRequest, StoredAsset, VerificationBackend,
    VerificationSubmission,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fresh per attempt; never reused after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Everything the orchestrator needs, detached from the session so the
/// session can stay untouched while the attempt runs.
#[derive(Debug, Clone)]
pub struct SubmissionPayload {
    pub document_type: DocumentType,
    pub country: String,
    pub legal_name: String,
    pub document: Arc<[u8]>,
    pub selfie: Arc<[u8]>,
}

impl SubmissionPayload {
    pub fn from_session(session: &CaptureSession) -> std::result::Result<Self, ValidationIssue> {
        session.check_ready_to_submit()?;

        let document_type = session.document_type.ok_or(ValidationIssue::DocumentTypeMissing)?;
        let document = session
            .document_image
            .as_ref()
            .ok_or(ValidationIssue::DocumentImageMissing)?;
        let selfie = session
            .selfie_image
            .as_ref()
            .ok_or(ValidationIssue::SelfieImageMissing)?;

        Ok(Self {
            document_type,
            country: session.country.trim().to_string(),
            legal_name: session.legal_name.split_whitespace().collect::<Vec<_>>().join(" "),
            document: document.bytes.clone(),
            selfie: selfie.bytes.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub attempt: AttemptId,
    pub document: StoredAsset,
    pub selfie: StoredAsset,
    pub submission: VerificationSubmission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    DeleteAsset(AssetPath),
}

/// Undo log for one attempt.
#[derive(Debug, Default)]
pub struct CompensationList {
    actions: Vec<UndoAction>,
}

impl CompensationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Runs every undo action, newest first. Failures are logged and
    /// swallowed; the caller still surfaces its original error.
    pub async fn unwind(self, store: &dyn AssetStore) {
        for action in self.actions.into_iter().rev() {
            match action {
                UndoAction::DeleteAsset(path) => {
                    match store.delete(std::slice::from_ref(&path)).await {
                        Ok(()) => tracing::info!("Compensation: deleted orphaned asset {}", path),
                        Err(e) => tracing::warn!("Compensation: failed to delete {}: {}", path, e),
                    }
                }
            }
        }
    }

    /// The attempt succeeded; nothing to undo.
    pub fn commit(self) {}
}

pub struct SubmissionOrchestrator {
    store: Arc<dyn AssetStore>,
    backend: Arc<dyn VerificationBackend>,
    in_flight: Mutex<()>,
}

impl SubmissionOrchestrator {
    pub fn new(store: Arc<dyn AssetStore>, backend: Arc<dyn VerificationBackend>) -> Self {
        Self { store, backend, in_flight: Mutex::new(()) }
    }

    pub fn backend(&self) -> &Arc<dyn VerificationBackend> {
        &self.backend
    }

    /// Runs one attempt. On error every asset this attempt stored has already
    /// been deleted (best effort) and the payload can be resubmitted as-is.
    pub async fn submit(&self, subject: &SubjectId, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ValidationIssue::SubmissionInProgress)?;

        let attempt = AttemptId::new();
        tracing::info!("Starting submission attempt {} for {}", attempt, subject);

        let mut compensation = CompensationList::new();
        match self.run_attempt(subject, attempt, payload, &mut compensation).await {
            Ok(receipt) => {
                compensation.commit();
                tracing::info!("Submission attempt {} finalized", attempt);
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!(
                    "Submission attempt {} failed ({}); compensating {} step(s)",
                    attempt, e, compensation.len()
                );
                compensation.unwind(self.store.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn run_attempt(
        &self,
        subject: &SubjectId,
        attempt: AttemptId,
        payload: &SubmissionPayload,
        compensation: &mut CompensationList,
    ) -> Result<SubmissionReceipt> {
        let document_path = AssetPath::for_attempt(subject, AssetKind::Document, &attempt, &payload.document);
        let document = self.upload(&document_path, AssetKind::Document, &payload.document).await?;
        compensation.push(UndoAction::DeleteAsset(document_path.clone()));

        let selfie_path = AssetPath::for_attempt(subject, AssetKind::Selfie, &attempt, &payload.selfie);
        let selfie = self.upload(&selfie_path, AssetKind::Selfie, &payload.selfie).await?;
        compensation.push(UndoAction::DeleteAsset(selfie_path.clone()));

        let request = FinalizeRequest {
            subject: subject.clone(),
            document_type: payload.document_type,
            document_path,
            selfie_path,
            country: payload.country.clone(),
            legal_name: payload.legal_name.clone(),
        };
        let submission = self.backend.finalize(request).await.map_err(|e| match e {
            IdCaptureError::FinalizeFailure(_) => e,
            other => IdCaptureError::FinalizeFailure(other.to_string()),
        })?;

        Ok(SubmissionReceipt { attempt, document, selfie, submission })
    }

    async fn upload(&self, path: &AssetPath, kind: AssetKind, bytes: &[u8]) -> Result<StoredAsset> {
        let stored = self.store.put(path, bytes).await.map_err(|e| match e {
            IdCaptureError::UploadFailure { .. } => e,
            other => IdCaptureError::UploadFailure { kind, reason: other.to_string() },
        })?;
        tracing::debug!("Uploaded {} image to {} ({} bytes)", kind, path, bytes.len());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{CapturedImage, Consents};
    use image::{DynamicImage, ImageBuffer, Luma};

    fn captured(byte: u8) -> CapturedImage {
        CapturedImage {
            bytes: Arc::from(vec![byte; 8].into_boxed_slice()),
            preview: Arc::new(DynamicImage::ImageLuma8(ImageBuffer::from_pixel(2, 2, Luma([byte])))),
            width: 2,
            height: 2,
        }
    }

    #[test]
    fn attempt_ids_are_unique() {
        assert_ne!(AttemptId::new(), AttemptId::new());
        assert_eq!(AttemptId::new().to_string().len(), 32);
    }

    #[test]
    fn payload_requires_ready_session() {
        let mut session = CaptureSession {
            legal_name: "  Ada   Lovelace ".into(),
            country: "GB ".into(),
            document_type: Some(DocumentType::Passport),
            document_image: Some(captured(1)),
            selfie_image: Some(captured(2)),
            consents: Consents::all_given(),
        };

        let payload = SubmissionPayload::from_session(&session).unwrap();
        assert_eq!(payload.legal_name, "Ada Lovelace");
        assert_eq!(payload.country, "GB");
        assert_eq!(&payload.selfie[..], &[2u8; 8]);

        session.consents.images_clear = false;
        assert!(matches!(
            SubmissionPayload::from_session(&session),
            Err(ValidationIssue::ConsentMissing(_))
        ));
    }

    #[test]
    fn empty_compensation_list() {
        let list = CompensationList::new();
        assert!(list.is_empty());
        list.commit();
    }
}
