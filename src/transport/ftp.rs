use super::Transport;
use crate::core::path::join_remote;
use anyhow::{Context, Result};
use async_trait::async_trait;
use opendal::Operator;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use suppaftp::FtpStream;
use tokio::fs;
use tracing::{debug, info};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 基于 opendal 的 FTP 传输（二进制 STOR，覆盖写入）
///
/// 相对的远程路径以登录目录为基准，和直接在 FTP 会话里 `STOR` 的行为一致。
/// `close` 之后 Operator 被释放，连接池随之断开，之后的上传会直接失败。
pub struct FtpTransport {
    operator: Mutex<Option<Operator>>,
    login_dir: String,
    name: String,
}

impl FtpTransport {
    /// 登录服务器读取登录目录，再创建 Operator
    pub async fn connect(host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        let addr = format!("{}:{}", bare_host(host), port);
        let user = login_user(username).to_string();
        let pass = password.to_string();

        let login_dir =
            tokio::task::spawn_blocking(move || query_login_dir(&addr, &user, &pass)).await??;
        info!("FTP 登录目录: {}", login_dir);

        Self::new(host, port, username, password, &login_dir)
    }

    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        login_dir: &str,
    ) -> Result<Self> {
        use opendal::services::Ftp;

        let endpoint = ftp_endpoint(host, port);
        let builder = Ftp::default()
            .endpoint(&endpoint)
            .root("/")
            .user(login_user(username))
            .password(password);

        let operator = Operator::new(builder)?.finish();
        let name = if username.is_empty() {
            endpoint
        } else {
            format!("ftp://{}@{}:{}", username, bare_host(host), port)
        };

        Ok(Self {
            operator: Mutex::new(Some(operator)),
            login_dir: login_dir.to_string(),
            name,
        })
    }

    fn operator(&self) -> Result<Operator> {
        self.operator
            .lock()
            .map_err(|_| anyhow::anyhow!("FTP 会话锁已损坏"))?
            .clone()
            .ok_or_else(|| anyhow::anyhow!("FTP 会话已关闭: {}", self.name))
    }
}

fn bare_host(host: &str) -> &str {
    host.trim_start_matches("ftp://").trim_end_matches('/')
}

fn login_user(username: &str) -> &str {
    if username.is_empty() {
        "anonymous"
    } else {
        username
    }
}

fn ftp_endpoint(host: &str, port: u16) -> String {
    format!("ftp://{}:{}", bare_host(host), port)
}

/// 登录后执行 PWD，得到相对路径的基准目录
fn query_login_dir(addr: &str, username: &str, password: &str) -> Result<String> {
    let sock = addr
        .to_socket_addrs()
        .with_context(|| format!("无法解析地址: {}", addr))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("无法解析地址: {}", addr))?;

    let mut stream = FtpStream::connect_timeout(sock, Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .with_context(|| format!("连接 FTP 服务器 {} 失败", addr))?;
    stream
        .login(username, password)
        .with_context(|| format!("FTP 登录失败: {}", username))?;
    let dir = stream.pwd().context("读取 FTP 登录目录失败")?;
    let _ = stream.quit();
    Ok(dir)
}

/// 以 `/` 开头的路径原样使用，其余的拼接到登录目录下
fn resolve_remote(login_dir: &str, remote_path: &str) -> String {
    if remote_path.starts_with('/') {
        remote_path.to_string()
    } else {
        join_remote(login_dir, remote_path)
    }
}

#[async_trait]
impl Transport for FtpTransport {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let operator = self.operator()?;
        let target = resolve_remote(&self.login_dir, remote_path);

        let data = fs::read(local_path)
            .await
            .with_context(|| format!("读取本地文件失败: {:?}", local_path))?;
        debug!("FTP 写入: {} ({}字节)", target, data.len());

        operator
            .write(&target, data)
            .await
            .with_context(|| format!("FTP 写入失败: {}", target))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let operator = self
            .operator
            .lock()
            .map_err(|_| anyhow::anyhow!("FTP 会话锁已损坏"))?
            .take();
        drop(operator);
        debug!("关闭 FTP 会话: {}", self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
