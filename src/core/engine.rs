use crate::core::file_state::{ChangeDetection, FileRecord, FileRegistry, Observation};
use crate::core::path::{absolutize, remote_path_for};
use crate::core::scanner::walk_files_async;
use crate::error::{Result, SyncError};
use crate::transport::Transport;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单次重试等待的上限（毫秒）
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// 第 `attempt` 次重试前的等待时间：`base * 2^attempt`，不超过 [`MAX_RETRY_DELAY_MS`]
pub fn retry_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS)
}

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 变化检测策略
    pub change_detection: ChangeDetection,
    /// 同一版本上传失败后的最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            change_detection: ChangeDetection::Mtime,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// 单次扫描报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub first_scan: bool,
    pub files_seen: u32,
    pub files_registered: u32,
    pub files_uploaded: u32,
    pub files_skipped: u32,
    pub bytes_uploaded: u64,
    /// 本次扫描上传的远程路径（按上传顺序，可重复）
    pub uploaded: Vec<String>,
    pub started_at: i64,
    pub duration_ms: u64,
}

/// 同步引擎
///
/// 持有文件注册表和首次扫描标志；扫描严格串行，上传逐个进行。
pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    registry: FileRegistry,
    first_scan: bool,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, SyncConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        Self {
            transport,
            config,
            registry: FileRegistry::new(),
            first_scan: true,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用外部的取消信号
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn is_first_scan(&self) -> bool {
        self.first_scan
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// 扫描本地目录，上传新增或修改过的文件
    ///
    /// 首次扫描只登记文件，不上传。
    pub async fn scan(&mut self, local_root: &Path, remote_root: &str) -> Result<ScanReport> {
        let started = Instant::now();
        let mut report = ScanReport {
            first_scan: self.first_scan,
            started_at: chrono::Utc::now().timestamp(),
            ..Default::default()
        };

        self.check_cancelled()?;

        let root = absolutize(local_root)?;
        let files = walk_files_async(&root).await?;
        report.files_seen = files.len() as u32;
        debug!("扫描 {:?}: 发现 {} 个文件", root, files.len());

        for file in files {
            self.check_cancelled()?;

            if file.to_str().is_none() {
                warn!("文件名不是有效的 UTF-8，跳过: {:?}", file);
                report.files_skipped += 1;
                continue;
            }

            if self.registry.contains(&file) {
                self.drain_changes(&root, remote_root, &file, &mut report)
                    .await?;
            } else {
                self.register_new(&root, remote_root, file, &mut report)
                    .await?;
            }
        }

        if self.first_scan {
            info!("首次扫描完成，已登记 {} 个文件", self.registry.len());
            self.first_scan = false;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.files_uploaded > 0 {
            info!(
                "扫描完成: 上传 {} 个文件 ({} 字节), 耗时 {}ms",
                report.files_uploaded, report.bytes_uploaded, report.duration_ms
            );
        }
        Ok(report)
    }

    /// 读取文件状态；内容哈希模式需要读完整个文件，放到阻塞线程池执行
    async fn read_observation(&self, file: &Path) -> Result<io::Result<Observation>> {
        let detection = self.config.change_detection;
        match detection {
            ChangeDetection::Mtime => Ok(Observation::read(file, detection)),
            ChangeDetection::ContentHash => {
                let path = file.to_path_buf();
                Ok(tokio::task::spawn_blocking(move || Observation::read(&path, detection)).await?)
            }
        }
    }

    /// 反复检查并上传，直到文件不再变化（文件可能正在被写入）
    async fn drain_changes(
        &mut self,
        root: &Path,
        remote_root: &str,
        file: &Path,
        report: &mut ScanReport,
    ) -> Result<()> {
        loop {
            self.check_cancelled()?;

            let observation = match self.read_observation(file).await? {
                Ok(observation) => observation,
                Err(e) => {
                    warn!("无法读取文件状态，跳过: {:?}: {}", file, e);
                    report.files_skipped += 1;
                    return Ok(());
                }
            };
            let Some(record) = self.registry.get_mut(file) else {
                return Ok(());
            };
            if !record.apply(observation) {
                return Ok(());
            }
            let size = record.size();

            if let Err(e) = self.upload(root, remote_root, file, size, report).await {
                if let Some(record) = self.registry.get_mut(file) {
                    record.mark_pending();
                }
                return Err(e);
            }
        }
    }

    /// 登记新文件；非首次扫描时立即上传一次
    async fn register_new(
        &mut self,
        root: &Path,
        remote_root: &str,
        file: PathBuf,
        report: &mut ScanReport,
    ) -> Result<()> {
        let record = match self.read_observation(&file).await? {
            Ok(observation) => FileRecord::new(file.clone(), observation),
            Err(e) => {
                // 发现后立即消失或无权限，下次扫描会重新作为新文件处理
                warn!("无法读取新文件，跳过: {:?}: {}", file, e);
                report.files_skipped += 1;
                return Ok(());
            }
        };
        let size = record.size();
        self.registry.insert(record);
        report.files_registered += 1;

        if self.first_scan {
            return Ok(());
        }

        if let Err(e) = self.upload(root, remote_root, &file, size, report).await {
            if let Some(record) = self.registry.get_mut(&file) {
                record.mark_pending();
            }
            return Err(e);
        }
        Ok(())
    }

    /// 计算远程路径并上传（带重试）
    async fn upload(
        &self,
        root: &Path,
        remote_root: &str,
        file: &Path,
        size: u64,
        report: &mut ScanReport,
    ) -> Result<()> {
        let remote_path = remote_path_for(root, remote_root, file)?;

        info!("上传 \"{}\" -> {}", file.display(), remote_path);
        self.upload_with_retry(file, &remote_path).await?;
        info!("完成: {}", remote_path);

        report.files_uploaded += 1;
        report.bytes_uploaded += size;
        report.uploaded.push(remote_path);
        Ok(())
    }

    /// 带重试的上传（指数退避）
    async fn upload_with_retry(&self, file: &Path, remote_path: &str) -> Result<()> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;

        loop {
            match self.transport.upload(file, remote_path).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    let delay = retry_delay_ms(self.config.retry_base_delay_ms, attempt);
                    warn!(
                        "上传失败，{}ms 后重试 ({}/{}): {:#}",
                        delay,
                        attempt + 1,
                        max_retries,
                        e
                    );
                    attempt += 1;

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
                Err(e) => {
                    error!("上传最终失败 (已重试{}次): {:#}", max_retries, e);
                    return Err(SyncError::Upload {
                        local: file.to_path_buf(),
                        remote: remote_path.to_string(),
                        attempts: attempt + 1,
                        source: e.into(),
                    });
                }
            }
        }
    }
}
