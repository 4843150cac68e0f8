use crate::error::{Result, SyncError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// 目录名包含该子串时，整个子树都不参与同步
pub const EXCLUDED_DIR_MARKER: &str = ".svn";

/// 检查目录是否应该被排除（根目录本身从不排除）
fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_string_lossy()
            .contains(EXCLUDED_DIR_MARKER)
}

/// 条目是否为普通文件；指向普通文件的符号链接也算，指向目录的链接不进入
fn is_regular_file(entry: &DirEntry) -> bool {
    if !entry.path_is_symlink() {
        return entry.file_type().is_file();
    }
    match std::fs::metadata(entry.path()) {
        Ok(metadata) => metadata.is_file(),
        Err(e) => {
            debug!("跳过失效的符号链接 {:?}: {}", entry.path(), e);
            false
        }
    }
}

/// 深度优先遍历 `root`，返回所有普通文件的路径（按文件系统枚举顺序）
///
/// 根目录无法读取时返回错误；子目录读取失败只记录警告。
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if is_excluded_dir(entry) {
                debug!("排除目录: {:?}", entry.path());
                return false;
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(SyncError::Walk {
                    root: root.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => {
                warn!("跳过无法读取的条目: {}", e);
                continue;
            }
        };

        if entry.depth() == 0 && !entry.file_type().is_dir() {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{:?} 不是目录", root),
            )));
        }

        if entry.depth() > 0 && is_regular_file(&entry) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// 在阻塞线程池中遍历，避免阻塞 async runtime
pub async fn walk_files_async(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_files(&root)).await?
}
