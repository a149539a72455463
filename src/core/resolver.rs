use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NotSubmitted,
    Pending,
    Verified,
    Unverified,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationStatus::NotSubmitted => "not_submitted",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Unverified => "unverified",
        })
    }
}

/// Top-level view for the subject, and the only input to the capture entry guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", content = "comment", rename_all = "snake_case")]
pub enum ResolvedView {
    Verified,
    PendingReview,
    NeedsResubmission(String),
    CaptureFlow,
}

impl ResolvedView {
    pub fn starts_capture(&self) -> bool {
        matches!(self, ResolvedView::CaptureFlow)
    }
}

/// Pure mapping from server state to view.
///
/// A verified subject never re-enters capture. A pending submission or a
/// rejection with reviewer feedback only opens capture when `force_resubmit`
/// is set.
pub fn resolve(status: VerificationStatus, comment: Option<&str>, force_resubmit: bool) -> ResolvedView {
    let comment = comment.map(str::trim).filter(|c| !c.is_empty());

    match (status, comment) {
        (VerificationStatus::Verified, _) => ResolvedView::Verified,
        (VerificationStatus::Pending, _) if !force_resubmit => ResolvedView::PendingReview,
        (VerificationStatus::Unverified, Some(comment)) if !force_resubmit => {
            ResolvedView::NeedsResubmission(comment.to_string())
        }
        _ => ResolvedView::CaptureFlow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use VerificationStatus::*;

    #[test]
    fn verified_always_wins() {
        for force in [false, true] {
            for comment in [None, Some("looks good"), Some("")] {
                assert_eq!(resolve(Verified, comment, force), ResolvedView::Verified);
            }
        }
    }

    #[test]
    fn pending_only_opens_capture_when_forced() {
        assert_eq!(resolve(Pending, None, false), ResolvedView::PendingReview);
        assert_eq!(resolve(Pending, None, true), ResolvedView::CaptureFlow);
    }

    #[test]
    fn rejection_with_comment_needs_explicit_resubmit() {
        assert_eq!(
            resolve(Unverified, Some("blurry photo"), false),
            ResolvedView::NeedsResubmission("blurry photo".into())
        );
        assert_eq!(resolve(Unverified, Some("blurry photo"), true), ResolvedView::CaptureFlow);
    }

    #[test]
    fn blank_comment_counts_as_none() {
        assert_eq!(resolve(Unverified, Some("   "), false), ResolvedView::CaptureFlow);
        assert_eq!(resolve(Unverified, None, false), ResolvedView::CaptureFlow);
    }

    #[test]
    fn fresh_subject_goes_to_capture() {
        assert_eq!(resolve(NotSubmitted, None, false), ResolvedView::CaptureFlow);
        assert!(resolve(NotSubmitted, None, false).starts_capture());
    }
}
