pub mod ftp;
pub mod local;
pub mod sftp;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use ftp::FtpTransport;
pub use local::LocalTransport;
pub use sftp::SftpTransport;

/// 默认 FTP 端口
pub const FTP_DEFAULT_PORT: u16 = 21;
/// 默认 SSH 端口
pub const SSH_DEFAULT_PORT: u16 = 22;

/// 传输抽象接口：把本地文件完整上传到远程路径
#[async_trait]
pub trait Transport: Send + Sync {
    /// 上传整个文件，远程文件已存在时覆盖
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// 释放底层会话
    async fn close(&self) -> Result<()>;

    /// 获取传输名称（用于日志）
    fn name(&self) -> &str;
}

/// 传输协议
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ftp,
    Sftp,
    Local,
}

impl TransportKind {
    pub fn default_port(&self) -> Option<u16> {
        match self {
            TransportKind::Ftp => Some(FTP_DEFAULT_PORT),
            TransportKind::Sftp => Some(SSH_DEFAULT_PORT),
            TransportKind::Local => None,
        }
    }
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub typ: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
}

impl TransportConfig {
    pub fn new(typ: TransportKind) -> Self {
        Self {
            typ,
            host: None,
            port: None,
            username: None,
            password: None,
            key_file: None,
        }
    }

    fn port_or_default(&self) -> u16 {
        self.port
            .or_else(|| self.typ.default_port())
            .unwrap_or(SSH_DEFAULT_PORT)
    }
}

/// 根据配置创建传输实例
pub async fn create_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>> {
    match config.typ {
        TransportKind::Ftp => {
            let host = config
                .host
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("FTP transport requires host"))?;
            let port = config.port_or_default();
            tracing::info!("连接 FTP 服务器: {}:{}", host, port);
            Ok(Arc::new(
                FtpTransport::connect(
                    host,
                    port,
                    config.username.as_deref().unwrap_or_default(),
                    config.password.as_deref().unwrap_or_default(),
                )
                .await?,
            ) as Arc<dyn Transport>)
        }
        TransportKind::Sftp => {
            let host = config
                .host
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SFTP transport requires host"))?;
            let username = config
                .username
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SFTP transport requires username"))?;
            if config.password.is_none() && config.key_file.is_none() {
                anyhow::bail!("SFTP transport requires password or key file");
            }
            let port = config.port_or_default();
            tracing::info!("连接 SSH 服务器: {}@{}:{}", username, host, port);
            Ok(Arc::new(
                SftpTransport::connect(
                    host,
                    port,
                    username,
                    config.password.clone(),
                    config.key_file.clone(),
                )
                .await?,
            ) as Arc<dyn Transport>)
        }
        TransportKind::Local => {
            tracing::info!("使用本地目录作为远程目标");
            Ok(Arc::new(LocalTransport::new()) as Arc<dyn Transport>)
        }
    }
}
