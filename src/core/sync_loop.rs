//! 定时驱动同步引擎
//!
//! 每次扫描完成后固定等待一段时间再开始下一次，直到收到取消信号或扫描出错。
//! 无论以何种方式退出，传输会话都会被关闭。

use crate::core::engine::SyncEngine;
use crate::error::{Result, SyncError};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 默认扫描间隔
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// 监控循环结束时的汇总
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSummary {
    pub scans: u64,
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
}

pub struct SyncLoop {
    engine: SyncEngine,
    local_root: PathBuf,
    remote_root: String,
    interval: Duration,
    cancel: CancellationToken,
}

impl SyncLoop {
    pub fn new(
        engine: SyncEngine,
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            engine: engine.with_cancel(cancel.clone()),
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            interval: DEFAULT_INTERVAL,
            cancel,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 获取取消信号（例如交给 Ctrl-C 处理）
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行直到取消或出错，退出前总是关闭传输会话
    pub async fn run(mut self) -> Result<LoopSummary> {
        let mut summary = LoopSummary::default();
        let result = self.run_scans(&mut summary).await;

        let transport = self.engine.transport().clone();
        if let Err(e) = transport.close().await {
            warn!("关闭传输会话失败 ({}): {:#}", transport.name(), e);
        }

        result.map(|()| summary)
    }

    async fn run_scans(&mut self, summary: &mut LoopSummary) -> Result<()> {
        let _stopped = scopeguard::guard(self.local_root.clone(), |root| {
            info!("停止监控 {:?}", root);
        });

        info!("开始监控 \"{}\" 的变化...", self.local_root.display());

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            match self.engine.scan(&self.local_root, &self.remote_root).await {
                Ok(report) => {
                    summary.scans += 1;
                    summary.files_uploaded += u64::from(report.files_uploaded);
                    summary.bytes_uploaded += report.bytes_uploaded;
                }
                Err(SyncError::Cancelled) => {
                    debug!("扫描被取消");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
