use crate::common::{IdCaptureError, Result};
use crate::core::resolver::VerificationStatus;
use crate::core::session::{DocumentType, SubjectId};
use crate::storage::AssetPath;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

const STORAGE_VERSION: u32 = 1;

/// Authoritative submission record, owned by the verification backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSubmission {
    pub version: u32,
    pub subject_id: SubjectId,
    pub document_type: DocumentType,
    pub country: String,
    pub legal_name: String,
    pub document_asset: AssetPath,
    pub selfie_asset: AssetPath,
    pub status: VerificationStatus,
    pub review_comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: VerificationStatus,
    pub comment: Option<String>,
}

impl StatusReport {
    pub fn not_submitted() -> Self {
        Self { status: VerificationStatus::NotSubmitted, comment: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeRequest {
    pub subject: SubjectId,
    pub document_type: DocumentType,
    pub document_path: AssetPath,
    pub selfie_path: AssetPath,
    pub country: String,
    pub legal_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewVerdict {
    Verified,
    Unverified,
}

/// Server side of the pipeline: status queries, the atomic finalize and the
/// resubmit request.
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    async fn status(&self, subject: &SubjectId) -> Result<StatusReport>;

    /// Atomically records the submission; on success status is `Pending` and
    /// any review comment is cleared.
    async fn finalize(&self, request: FinalizeRequest) -> Result<VerificationSubmission>;

    /// Clears the stored review comment so a fresh capture may start.
    async fn request_resubmit(&self, subject: &SubjectId) -> Result<()>;
}

/// File-backed backend: one bincode record per subject.
pub struct LocalRegistry {
    data_dir: PathBuf,
}

impl LocalRegistry {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        tracing::debug!("LocalRegistry using {:?}", data_dir);
        Ok(Self { data_dir })
    }

    fn record_file(&self, subject: &SubjectId) -> PathBuf {
        self.data_dir.join(format!("{}.bincode", subject))
    }

    pub async fn get_submission(&self, subject: &SubjectId) -> Result<Option<VerificationSubmission>> {
        let file = self.record_file(subject);
        if !fs::try_exists(&file).await? {
            return Ok(None);
        }

        let data = fs::read(&file).await?;
        let mut record: VerificationSubmission = bincode::deserialize(&data)
            .map_err(|e| IdCaptureError::Backend(format!("Failed to deserialize: {}", e)))?;

        if record.version < STORAGE_VERSION {
            record.version = STORAGE_VERSION;
        }

        Ok(Some(record))
    }

    async fn save_submission(&self, record: &VerificationSubmission) -> Result<()> {
        let file = self.record_file(&record.subject_id);
        let encoded = bincode::serialize(record)
            .map_err(|e| IdCaptureError::Backend(format!("Failed to serialize: {}", e)))?;

        // write-then-rename keeps the record whole if we die mid-write
        let tmp = file.with_extension("bincode.partial");
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, &file).await?;
        Ok(())
    }

    /// Stand-in for the external reviewer.
    pub async fn record_review(
        &self,
        subject: &SubjectId,
        verdict: ReviewVerdict,
        comment: Option<String>,
    ) -> Result<VerificationSubmission> {
        let mut record = self
            .get_submission(subject)
            .await?
            .ok_or_else(|| IdCaptureError::Backend(format!("No submission for {}", subject)))?;

        record.status = match verdict {
            ReviewVerdict::Verified => VerificationStatus::Verified,
            ReviewVerdict::Unverified => VerificationStatus::Unverified,
        };
        record.review_comment = comment.filter(|c| !c.trim().is_empty());
        self.save_submission(&record).await?;

        tracing::info!("Review recorded for {}: {:?}", subject, record.status);
        Ok(record)
    }
}

#[async_trait]
impl VerificationBackend for LocalRegistry {
    async fn status(&self, subject: &SubjectId) -> Result<StatusReport> {
        Ok(match self.get_submission(subject).await? {
            Some(record) => StatusReport {
                status: record.status,
                comment: record.review_comment,
            },
            None => StatusReport::not_submitted(),
        })
    }

    async fn finalize(&self, request: FinalizeRequest) -> Result<VerificationSubmission> {
        let record = VerificationSubmission {
            version: STORAGE_VERSION,
            subject_id: request.subject,
            document_type: request.document_type,
            country: request.country,
            legal_name: request.legal_name,
            document_asset: request.document_path,
            selfie_asset: request.selfie_path,
            status: VerificationStatus::Pending,
            review_comment: None,
            submitted_at: Utc::now(),
        };

        self.save_submission(&record)
            .await
            .map_err(|e| IdCaptureError::FinalizeFailure(e.to_string()))?;

        tracing::info!("Submission recorded for {}", record.subject_id);
        Ok(record)
    }

    async fn request_resubmit(&self, subject: &SubjectId) -> Result<()> {
        if let Some(mut record) = self.get_submission(subject).await? {
            record.review_comment = None;
            self.save_submission(&record).await?;
            tracing::info!("Review comment cleared for {}", subject);
        }
        Ok(())
    }
}
