//! 文件状态管理 - 用于检测本地文件变化
//!
//! 注册表只存在于内存中，每次进程启动都会重新建立。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// 变化检测策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChangeDetection {
    /// 比较修改时间
    #[default]
    Mtime,
    /// 比较文件内容的 BLAKE3 哈希
    ContentHash,
}

/// 一次读取到的文件状态
///
/// 读取是阻塞操作（内容哈希模式下会读完整个文件），在 async 上下文中应放到阻塞线程池执行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub modified_at: SystemTime,
    pub size: u64,
    pub checksum: Option<String>,
}

impl Observation {
    /// 读取修改时间和大小；内容哈希模式下同时计算哈希
    pub fn read(path: &Path, detection: ChangeDetection) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let checksum = match detection {
            ChangeDetection::Mtime => None,
            ChangeDetection::ContentHash => Some(hash_file(path)?),
        };

        Ok(Self {
            modified_at: metadata.modified()?,
            size: metadata.len(),
            checksum,
        })
    }
}

/// 单个本地文件的状态记录
#[derive(Debug, Clone)]
pub struct FileRecord {
    path: PathBuf,
    modified_at: SystemTime,
    size: u64,
    checksum: Option<String>,
    /// 上一次上传失败，下次检查时视为已变化
    pending: bool,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, observation: Observation) -> Self {
        Self {
            path: path.into(),
            modified_at: observation.modified_at,
            size: observation.size,
            checksum: observation.checksum,
            pending: false,
        }
    }

    /// 读取文件当前的修改时间和大小，创建记录
    pub fn observe(path: impl Into<PathBuf>, detection: ChangeDetection) -> io::Result<Self> {
        let path = path.into();
        let observation = Observation::read(&path, detection)?;
        Ok(Self::new(path, observation))
    }

    /// 重新读取文件状态，与上次记录比较
    ///
    /// 有变化时记录会被更新为新的值并返回 `true`。
    pub fn has_changed(&mut self, detection: ChangeDetection) -> io::Result<bool> {
        let observation = Observation::read(&self.path, detection)?;
        Ok(self.apply(observation))
    }

    /// 与新读取的状态比较，有变化（或上次上传失败）时更新记录并返回 `true`
    ///
    /// 带哈希的状态按大小和内容比较，否则只比较修改时间。
    pub fn apply(&mut self, observation: Observation) -> bool {
        let changed = match observation.checksum.as_deref() {
            None => observation.modified_at != self.modified_at,
            Some(checksum) => {
                observation.size != self.size || self.checksum.as_deref() != Some(checksum)
            }
        };

        if !(changed || self.pending) {
            return false;
        }

        self.modified_at = observation.modified_at;
        self.size = observation.size;
        self.checksum = observation.checksum;
        self.pending = false;
        true
    }

    /// 标记为未同步，下一次 `has_changed` 必定返回 `true`
    pub fn mark_pending(&mut self) {
        self.pending = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified_at(&self) -> SystemTime {
        self.modified_at
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// 本地绝对路径 -> 文件记录
///
/// 只增不减：被删除的文件的记录也会保留。
#[derive(Debug, Default)]
pub struct FileRegistry {
    records: HashMap<PathBuf, FileRecord>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.records.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut FileRecord> {
        self.records.get_mut(path)
    }

    /// 插入新记录，已存在的路径保持原记录不变
    pub fn insert(&mut self, record: FileRecord) -> &mut FileRecord {
        debug!("注册文件: {:?}", record.path());
        self.records
            .entry(record.path().to_path_buf())
            .or_insert(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.records.keys().map(PathBuf::as_path)
    }
}

/// 流式计算文件内容的 BLAKE3 hash
fn hash_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    // 只取前 16 字节（32 个十六进制字符），足够检测变化
    Ok(hasher.finalize().to_hex()[..32].to_string())
}
