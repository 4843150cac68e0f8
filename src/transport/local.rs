use super::Transport;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 把远程路径当作本地路径，镜像到本机的另一个目录
pub struct LocalTransport {
    name: String,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let target = PathBuf::from(remote_path);

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = target.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = target.with_file_name(temp_name);
        fs::copy(local_path, &temp_path).await?;
        fs::rename(&temp_path, &target).await?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
