//! 同步核心的错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 传输层错误（由各个 Transport 实现的 anyhow 错误转换而来）
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 扫描到的文件不在被扫描的根目录之下（内部逻辑错误或符号链接逃逸）
    #[error("文件 {path:?} 不在根目录 {root:?} 之下")]
    OutsideRoot { root: PathBuf, path: PathBuf },

    /// 文件名不是合法的 UTF-8，无法生成远程路径
    #[error("文件名不是有效的 UTF-8: {path:?}")]
    NonUtf8Path { path: PathBuf },

    /// 根目录本身无法遍历
    #[error("无法遍历目录 {root:?}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 上传在重试后仍然失败
    #[error("上传 {local:?} -> {remote} 失败 (尝试 {attempts} 次): {source}")]
    Upload {
        local: PathBuf,
        remote: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("操作已取消")]
    Cancelled,

    #[error("后台任务失败: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
