mod common;

use common::{png, services, subject, MockAssetStore, MockBackend, MockCamera};
use idcapture::common::{IdCaptureError, ValidationIssue};
use idcapture::core::{
    CameraState, CaptureStep, Consent, DocumentType, LivenessHint, PipelineEvent, ResolvedView,
    VerificationFlow, VerificationStatus,
};
use idcapture::storage::AssetKind;
use std::sync::atomic::Ordering;
use std::sync::Arc;

async fn fill_details(flow: &mut VerificationFlow) {
    assert_eq!(flow.next().await.unwrap().step, CaptureStep::Details);
    flow.set_legal_name("Kate Sheppard").unwrap();
    flow.set_country("NZ").unwrap();
    flow.set_document_type(DocumentType::IdCard).unwrap();
}

/// Intro through Review with file-supplied photos and every consent given.
async fn walk_to_review(flow: &mut VerificationFlow) {
    assert_eq!(flow.enter(false).await.unwrap(), ResolvedView::CaptureFlow);
    assert_eq!(flow.step(), Some(CaptureStep::Intro));
    fill_details(flow).await;

    assert_eq!(flow.next().await.unwrap().step, CaptureStep::DocumentCapture);
    flow.attach_photo(png(64, 48, 1)).await.unwrap();
    assert_eq!(flow.next().await.unwrap().step, CaptureStep::SelfieCapture);
    flow.attach_photo(png(48, 64, 2)).await.unwrap();
    assert_eq!(flow.next().await.unwrap().step, CaptureStep::Review);

    for consent in Consent::ALL {
        flow.set_consent(consent, true).unwrap();
    }
}

#[tokio::test]
async fn first_time_subject_submits_and_goes_pending() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let mut flow = VerificationFlow::new(subject("kate"), services(store.clone(), backend.clone(), None));
    let mut events = flow.events().subscribe();

    walk_to_review(&mut flow).await;
    assert!(flow.submit_enabled());

    let receipt = flow.submit().await.unwrap();

    assert_eq!(flow.step(), Some(CaptureStep::Submitted));
    assert!(flow.session().is_none());
    assert_eq!(flow.view(), Some(&ResolvedView::PendingReview));
    assert_eq!(backend.current().status, VerificationStatus::Pending);
    assert_eq!(store.stored_paths().len(), 2);
    // photos already within budget are stored as supplied, so the key says png
    assert!(store.stored_paths().iter().all(|p| p.ends_with(".png")));
    assert_eq!(receipt.submission.legal_name, "Kate Sheppard");

    let mut submitted = 0;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::VerificationSubmitted { attempt, .. } = event {
            assert_eq!(attempt, receipt.attempt);
            submitted += 1;
        }
    }
    assert_eq!(submitted, 1);

    // re-entering now lands on the pending view without a session
    assert_eq!(flow.enter(false).await.unwrap(), ResolvedView::PendingReview);
    assert_eq!(flow.step(), None);
}

#[tokio::test]
async fn rejected_subject_resubmits_from_fresh_intro() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::with_status(VerificationStatus::Unverified, Some("blurry photo")));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend.clone(), None));

    let view = flow.enter(false).await.unwrap();
    assert_eq!(view, ResolvedView::NeedsResubmission("blurry photo".into()));
    assert_eq!(flow.step(), None);

    let view = flow.resubmit().await.unwrap();
    assert_eq!(view, ResolvedView::CaptureFlow);
    assert_eq!(backend.resubmit_requests.load(Ordering::SeqCst), 1);
    assert_eq!(backend.current().comment, None);
    assert_eq!(flow.step(), Some(CaptureStep::Intro));

    let session = flow.session().unwrap();
    assert!(session.legal_name.is_empty());
    assert!(session.document_image.is_none());
}

#[tokio::test]
async fn forced_entry_past_feedback_clears_comment_first() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::with_status(VerificationStatus::Unverified, Some("blurry photo")));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend.clone(), None));

    assert_eq!(flow.enter(true).await.unwrap(), ResolvedView::CaptureFlow);
    assert_eq!(flow.step(), Some(CaptureStep::Intro));
    assert_eq!(backend.current().comment, None);
    assert_eq!(backend.resubmit_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resubmit_without_feedback_changes_nothing() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::with_status(VerificationStatus::Pending, None));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend.clone(), None));

    assert_eq!(flow.resubmit().await.unwrap(), ResolvedView::PendingReview);
    assert_eq!(flow.step(), None);
    assert_eq!(backend.resubmit_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn forcing_past_pending_leaves_backend_untouched() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::with_status(VerificationStatus::Pending, None));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend.clone(), None));

    assert_eq!(flow.enter(true).await.unwrap(), ResolvedView::CaptureFlow);
    assert_eq!(backend.resubmit_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_selfie_upload_returns_to_review_with_photos_kept() {
    let store = Arc::new(MockAssetStore::failing_on(AssetKind::Selfie));
    let backend = Arc::new(MockBackend::default());
    let mut flow = VerificationFlow::new(subject("kate"), services(store.clone(), backend.clone(), None));

    walk_to_review(&mut flow).await;
    let err = flow.submit().await.unwrap_err();

    assert!(matches!(err, IdCaptureError::UploadFailure { kind: AssetKind::Selfie, .. }));
    assert!(err.is_recoverable());
    assert_eq!(flow.step(), Some(CaptureStep::Review));
    let session = flow.session().unwrap();
    assert!(session.document_image.is_some());
    assert!(session.selfie_image.is_some());
    assert!(flow.submit_enabled());

    let deleted = store.deleted();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].starts_with("kate/document/"));
    assert!(store.stored_paths().is_empty());
    assert_eq!(backend.current().status, VerificationStatus::NotSubmitted);

    // manual retry once the network is back
    store.heal();
    flow.submit().await.unwrap();
    assert_eq!(flow.step(), Some(CaptureStep::Submitted));
    assert_eq!(store.stored_paths().len(), 2);
}

#[tokio::test]
async fn image_bytes_are_released_after_success() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, None));

    walk_to_review(&mut flow).await;
    let session = flow.session().unwrap();
    let document = Arc::downgrade(&session.document_image.as_ref().unwrap().bytes);
    let selfie = Arc::downgrade(&session.selfie_image.as_ref().unwrap().bytes);

    flow.submit().await.unwrap();

    assert!(document.upgrade().is_none());
    assert!(selfie.upgrade().is_none());
}

#[tokio::test]
async fn verified_subject_never_enters_capture() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::with_status(VerificationStatus::Verified, Some("old note")));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, None));

    assert_eq!(flow.enter(false).await.unwrap(), ResolvedView::Verified);
    assert_eq!(flow.enter(true).await.unwrap(), ResolvedView::Verified);
    assert_eq!(flow.step(), None);

    let err = flow.next().await.unwrap_err();
    assert!(matches!(err, IdCaptureError::ValidationFailure(ValidationIssue::NoActiveSession)));
}

#[tokio::test]
async fn pending_subject_only_captures_when_forced() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::with_status(VerificationStatus::Pending, None));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, None));

    assert_eq!(flow.enter(false).await.unwrap(), ResolvedView::PendingReview);
    assert_eq!(flow.step(), None);
    assert_eq!(flow.enter(true).await.unwrap(), ResolvedView::CaptureFlow);
    assert_eq!(flow.step(), Some(CaptureStep::Intro));
}

#[tokio::test]
async fn incomplete_details_block_document_step() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, None));

    flow.enter(false).await.unwrap();
    flow.next().await.unwrap();
    flow.set_legal_name("Kate").unwrap();
    flow.set_country("NZ").unwrap();
    flow.set_document_type(DocumentType::Passport).unwrap();

    let err = flow.next().await.unwrap_err();
    assert!(matches!(err, IdCaptureError::ValidationFailure(ValidationIssue::LegalNameIncomplete)));
    assert_eq!(flow.step(), Some(CaptureStep::Details));
}

#[tokio::test]
async fn back_navigation_keeps_captured_photos() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, None));

    walk_to_review(&mut flow).await;
    assert_eq!(flow.back().await.unwrap().step, CaptureStep::SelfieCapture);
    assert_eq!(flow.back().await.unwrap().step, CaptureStep::DocumentCapture);

    let session = flow.session().unwrap();
    assert!(session.document_image.is_some());
    assert!(session.selfie_image.is_some());
    assert!(!flow.submit_enabled());

    flow.next().await.unwrap();
    flow.next().await.unwrap();
    assert!(flow.submit_enabled());
}

#[tokio::test]
async fn missing_consent_disables_submit() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let mut flow = VerificationFlow::new(subject("kate"), services(store.clone(), backend, None));

    walk_to_review(&mut flow).await;
    flow.set_consent(Consent::CornersVisible, false).unwrap();
    assert!(!flow.submit_enabled());

    let err = flow.submit().await.unwrap_err();
    assert!(matches!(
        err,
        IdCaptureError::ValidationFailure(ValidationIssue::ConsentMissing(Consent::CornersVisible))
    ));
    assert_eq!(flow.step(), Some(CaptureStep::Review));
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn camera_denial_is_recoverable() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let camera = Arc::new(MockCamera::new(true));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, Some(camera.clone())));

    flow.enter(false).await.unwrap();
    fill_details(&mut flow).await;

    let outcome = flow.next().await.unwrap();
    assert_eq!(outcome.step, CaptureStep::DocumentCapture);
    assert!(matches!(outcome.camera, CameraState::Denied(_)));
    assert!(flow.capture_photo().await.is_err());

    camera.denied.store(false, Ordering::SeqCst);
    assert_eq!(flow.retry_camera().await.unwrap(), CameraState::Ready);
    assert_eq!(camera.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn camera_photos_and_static_liveness_hint() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let camera = Arc::new(MockCamera::new(false));
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, Some(camera.clone())));

    flow.enter(false).await.unwrap();
    fill_details(&mut flow).await;

    assert_eq!(flow.next().await.unwrap().camera, CameraState::Ready);
    let document = flow.capture_photo().await.unwrap();
    assert_eq!((document.width, document.height), (64, 48));
    assert_eq!(&document.bytes[..2], &[0xFF, 0xD8]);

    let outcome = flow.next().await.unwrap();
    assert_eq!(outcome.step, CaptureStep::SelfieCapture);
    assert_eq!(outcome.camera, CameraState::Ready);
    assert_eq!(flow.liveness_hint(), LivenessHint::Ready);
    flow.preview_frame().await.unwrap();
    flow.capture_photo().await.unwrap();

    let outcome = flow.next().await.unwrap();
    assert_eq!(outcome.camera, CameraState::NotNeeded);
    assert!(flow.preview_frame().await.is_err());
    // one lease per capture step
    assert_eq!(camera.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn photos_only_attach_on_capture_steps() {
    let store = Arc::new(MockAssetStore::default());
    let backend = Arc::new(MockBackend::default());
    let mut flow = VerificationFlow::new(subject("kate"), services(store, backend, None));

    flow.enter(false).await.unwrap();
    let err = flow.attach_photo(png(8, 8, 0)).await.unwrap_err();
    assert!(matches!(err, IdCaptureError::ValidationFailure(ValidationIssue::WrongStep { .. })));

    fill_details(&mut flow).await;
    flow.next().await.unwrap();
    let err = flow.attach_photo(b"not an image".to_vec()).await.unwrap_err();
    assert!(matches!(err, IdCaptureError::EncodingFailure(_)));
    assert!(flow.session().unwrap().document_image.is_none());
}
