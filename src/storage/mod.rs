pub mod asset_store;
pub mod registry;

pub use asset_store::{AssetKind, AssetPath, AssetStore, FsAssetStore, StoredAsset};
pub use registry::{
    FinalizeRequest, LocalRegistry, ReviewVerdict, StatusReport, VerificationBackend,
    VerificationSubmission,
};
