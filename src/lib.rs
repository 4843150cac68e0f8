pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod transport;

pub use crate::core::{ScanReport, SyncConfig, SyncEngine, SyncLoop};
pub use error::SyncError;
pub use transport::{create_transport, Transport, TransportConfig, TransportKind};

// 平台配置目录（避免额外引入 dirs 依赖）
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }

    /// remotesync 的默认配置目录
    pub fn app_config_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join("remotesync"))
            .unwrap_or_else(|| PathBuf::from(".remotesync"))
    }
}
