use std::path::{Path, PathBuf};

// System-wide locations used by packaged installs; dev mode bypasses these.

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/idcapture/idcapture.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/idcapture/models")
}

/// Relative model paths are taken from the working directory in dev mode and
/// from the system models directory otherwise.
pub fn resolve_model_path(path: &Path, dev_mode: bool) -> PathBuf {
    if path.is_relative() && !dev_mode {
        system_models_dir().join(path)
    } else {
        path.to_path_buf()
    }
}
