use std::path::PathBuf;
use std::fs;
use crate::common::error::{IdCaptureError, Result};
use directories::ProjectDirs;

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(base_dir.join("assets"))?;
            fs::create_dir_all(base_dir.join("registry"))?;
            fs::create_dir_all(base_dir.join("captures"))?;

            tracing::info!(
                "Development mode enabled - data will be saved to: {}",
                base_dir.display()
            );
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Root under which assets and submission records live.
    pub fn data_root(&self) -> Result<PathBuf> {
        if self.enabled {
            return Ok(self.base_dir.clone());
        }

        let dirs = ProjectDirs::from("com", "idcapture", "IdCapture")
            .ok_or_else(|| IdCaptureError::Storage("Failed to get project dirs".into()))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn assets_dir(&self) -> Result<PathBuf> {
        Ok(self.data_root()?.join("assets"))
    }

    pub fn registry_dir(&self) -> Result<PathBuf> {
        Ok(self.data_root()?.join("registry"))
    }

    pub fn get_capture_path(&self, prefix: &str) -> Result<PathBuf> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        if self.enabled {
            Ok(self.base_dir.join("captures").join(format!("{}_{}.jpg", prefix, timestamp)))
        } else {
            Ok(PathBuf::from(format!("{}_{}.jpg", prefix, timestamp)))
        }
    }
}
