#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use idcapture::camera::{VideoSource, VideoStream};
use idcapture::common::{IdCaptureError, Result};
use idcapture::core::{
    CompressionSettings, EventBus, FlowServices, NullLivenessDetector, SubjectId,
    VerificationStatus,
};
use idcapture::storage::{
    AssetKind, AssetPath, AssetStore, FinalizeRequest, StatusReport, StoredAsset,
    VerificationBackend, VerificationSubmission,
};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory asset store that can be told to reject one kind of upload.
#[derive(Default)]
pub struct MockAssetStore {
    pub assets: Mutex<HashMap<String, Vec<u8>>>,
    pub puts: AtomicUsize,
    pub deletes: Mutex<Vec<String>>,
    pub fail_put: Mutex<Option<AssetKind>>,
    pub fail_delete: AtomicBool,
}

impl MockAssetStore {
    pub fn failing_on(kind: AssetKind) -> Self {
        let store = Self::default();
        *store.fail_put.lock().unwrap() = Some(kind);
        store
    }

    pub fn heal(&self) {
        *self.fail_put.lock().unwrap() = None;
    }

    pub fn stored_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.assets.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetStore for MockAssetStore {
    async fn put(&self, path: &AssetPath, bytes: &[u8]) -> Result<StoredAsset> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        if let Some(kind) = *self.fail_put.lock().unwrap() {
            if path.as_str().contains(&format!("/{}/", kind.as_str())) {
                return Err(IdCaptureError::Storage("simulated network error".into()));
            }
        }

        self.assets
            .lock()
            .unwrap()
            .insert(path.as_str().to_string(), bytes.to_vec());
        Ok(StoredAsset::describe(path.clone(), bytes))
    }

    async fn delete(&self, paths: &[AssetPath]) -> Result<()> {
        for path in paths {
            self.deletes.lock().unwrap().push(path.as_str().to_string());
        }
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(IdCaptureError::Storage("simulated delete failure".into()));
        }
        let mut assets = self.assets.lock().unwrap();
        for path in paths {
            assets.remove(path.as_str());
        }
        Ok(())
    }
}

/// In-memory backend with a scripted status and a finalize kill switch.
pub struct MockBackend {
    pub report: Mutex<StatusReport>,
    pub fail_finalize: AtomicBool,
    pub finalized: Mutex<Vec<FinalizeRequest>>,
    pub resubmit_requests: AtomicUsize,
}

impl MockBackend {
    pub fn with_status(status: VerificationStatus, comment: Option<&str>) -> Self {
        Self {
            report: Mutex::new(StatusReport { status, comment: comment.map(str::to_string) }),
            fail_finalize: AtomicBool::new(false),
            finalized: Mutex::new(Vec::new()),
            resubmit_requests: AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> StatusReport {
        self.report.lock().unwrap().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_status(VerificationStatus::NotSubmitted, None)
    }
}

#[async_trait]
impl VerificationBackend for MockBackend {
    async fn status(&self, _subject: &SubjectId) -> Result<StatusReport> {
        Ok(self.current())
    }

    async fn finalize(&self, request: FinalizeRequest) -> Result<VerificationSubmission> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(IdCaptureError::Backend("simulated finalize error".into()));
        }

        let submission = VerificationSubmission {
            version: 1,
            subject_id: request.subject.clone(),
            document_type: request.document_type,
            country: request.country.clone(),
            legal_name: request.legal_name.clone(),
            document_asset: request.document_path.clone(),
            selfie_asset: request.selfie_path.clone(),
            status: VerificationStatus::Pending,
            review_comment: None,
            submitted_at: Utc::now(),
        };
        *self.report.lock().unwrap() = StatusReport { status: VerificationStatus::Pending, comment: None };
        self.finalized.lock().unwrap().push(request);
        Ok(submission)
    }

    async fn request_resubmit(&self, _subject: &SubjectId) -> Result<()> {
        self.resubmit_requests.fetch_add(1, Ordering::SeqCst);
        self.report.lock().unwrap().comment = None;
        Ok(())
    }
}

/// Camera stand-in: either hands out a stream of grey frames or refuses.
pub struct MockCamera {
    pub denied: AtomicBool,
    pub opens: AtomicUsize,
}

impl MockCamera {
    pub fn new(denied: bool) -> Self {
        Self { denied: AtomicBool::new(denied), opens: AtomicUsize::new(0) }
    }
}

struct GreyStream;

impl VideoStream for GreyStream {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 48, Rgb([128, 128, 128]))))
    }
}

impl VideoSource for MockCamera {
    fn open(&self) -> Result<Box<dyn VideoStream>> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(IdCaptureError::CaptureDeviceDenied("permission denied".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(GreyStream))
    }
}

pub fn services(
    store: Arc<MockAssetStore>,
    backend: Arc<MockBackend>,
    camera: Option<Arc<MockCamera>>,
) -> FlowServices {
    FlowServices {
        backend,
        store,
        camera: camera.map(|c| c as Arc<dyn VideoSource>),
        liveness: Arc::new(NullLivenessDetector),
        compression: CompressionSettings::default(),
        liveness_interval: Duration::from_millis(10),
        liveness_max_duration: None,
        events: EventBus::default(),
    }
}

pub fn subject(id: &str) -> SubjectId {
    SubjectId::new(id).unwrap()
}

/// Small PNG with a gradient, well inside the default byte budget.
pub fn png(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x as u8).wrapping_add(seed), (y as u8).wrapping_mul(3), seed])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}
