//! 应用配置模块
//!
//! 所有配置都保存在配置目录下的 `config.json` 中，每个模块占一个字段。

use crate::core::engine::MAX_RETRY_DELAY_MS;
use crate::core::{ChangeDetection, SyncConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.json";

/// 上传重试次数上限
pub const MAX_UPLOAD_RETRIES: u32 = 10;

/// 读取 `config.json` 中的某个字段，文件不存在或格式错误时返回 None
pub(crate) fn load_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join(CONFIG_FILE)).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    serde_json::from_value(config.get(key)?.clone()).ok()
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 两次扫描之间的间隔（毫秒）
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// 变化检测策略
    #[serde(default)]
    pub change_detection: ChangeDetection,
    /// 上传失败后的重试次数
    #[serde(default = "default_upload_retries")]
    pub upload_retries: u32,
    /// 重试基础延迟（毫秒），每次重试翻倍
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_upload_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            change_detection: ChangeDetection::default(),
            upload_retries: default_upload_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载同步配置
    pub fn load(config_dir: &Path) -> Self {
        let mut settings: Self = load_section(config_dir, "sync").unwrap_or_default();
        settings.upload_retries = settings.upload_retries.min(MAX_UPLOAD_RETRIES);
        settings.retry_base_delay_ms = settings.retry_base_delay_ms.min(MAX_RETRY_DELAY_MS);
        settings
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn engine_config(&self) -> SyncConfig {
        SyncConfig {
            change_detection: self.change_detection,
            max_retries: self.upload_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
        }
    }
}
