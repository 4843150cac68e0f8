//! 本地路径到远程路径的转换
//!
//! 远程路径统一使用 `/` 分隔，与本机操作系统无关。

use crate::error::{Result, SyncError};
use std::path::{Component, Path, PathBuf};

/// 将路径转换为绝对路径，并按字面消除 `.` 与 `..`（不解析符号链接）
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// 计算 `path` 相对于 `root` 的路径
///
/// `path` 必须严格位于 `root` 之下，否则返回 [`SyncError::OutsideRoot`]。
pub fn relative_path(root: &Path, path: &Path) -> Result<PathBuf> {
    let root_abs = absolutize(root)?;
    let path_abs = absolutize(path)?;

    match path_abs.strip_prefix(&root_abs) {
        Ok(rel) if !rel.as_os_str().is_empty() => Ok(rel.to_path_buf()),
        _ => Err(SyncError::OutsideRoot {
            root: root_abs,
            path: path_abs,
        }),
    }
}

/// 规范化路径分隔符（统一使用 /）
pub fn to_portable_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// 以 `/` 拼接远程路径，两侧多余的分隔符会被合并为一个
pub fn join_remote(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if base.is_empty() {
        return relative.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), relative)
}

/// 本地文件对应的远程路径
///
/// 相对路径不是合法 UTF-8 时返回 [`SyncError::NonUtf8Path`]，不同的文件名不会被映射到同一个远程路径。
pub fn remote_path_for(local_root: &Path, remote_root: &str, file: &Path) -> Result<String> {
    let rel = relative_path(local_root, file)?;
    let rel = rel.to_str().ok_or_else(|| SyncError::NonUtf8Path {
        path: file.to_path_buf(),
    })?;
    Ok(join_remote(remote_root, &to_portable_path(Path::new(rel))))
}
