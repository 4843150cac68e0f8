use super::Transport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 10;
/// 读写超时（秒）
const IO_TIMEOUT_SECS: u64 = 300;

/// 基于 ssh2 的 SFTP 传输
///
/// 一个会话在整个进程生命周期内复用，ssh2 是阻塞 API，所有操作都放到阻塞线程池执行。
pub struct SftpTransport {
    session: Arc<Mutex<Session>>,
    name: String,
}

impl SftpTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: Option<String>,
        key_file: Option<String>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let name = format!("sftp://{}@{}", username, addr);
        let user = username.to_string();

        let session = tokio::task::spawn_blocking(move || {
            open_session(&addr, &user, password.as_deref(), key_file.as_deref())
        })
        .await??;

        info!("SSH 会话已建立: {}", name);
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            name,
        })
    }
}

fn open_session(
    addr: &str,
    username: &str,
    password: Option<&str>,
    key_file: Option<&str>,
) -> Result<Session> {
    let sock = addr
        .to_socket_addrs()
        .with_context(|| format!("无法解析地址: {}", addr))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("无法解析地址: {}", addr))?;
    let tcp = TcpStream::connect_timeout(&sock, Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .with_context(|| format!("TCP 连接到 {} 失败", addr))?;
    tcp.set_read_timeout(Some(Duration::from_secs(IO_TIMEOUT_SECS)))?;
    tcp.set_write_timeout(Some(Duration::from_secs(IO_TIMEOUT_SECS)))?;

    let mut sess = Session::new().context("创建 SSH 会话失败")?;
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .with_context(|| format!("SSH 握手失败: {}", addr))?;

    match (key_file, password) {
        (Some(key), passphrase) => {
            // 同时提供密码时，密码作为私钥口令
            sess.userauth_pubkey_file(username, None, Path::new(key), passphrase)
                .with_context(|| format!("私钥认证失败: {}", key))?;
        }
        (None, Some(password)) => {
            sess.userauth_password(username, password)
                .context("密码认证失败")?;
        }
        (None, None) => anyhow::bail!("缺少密码或私钥"),
    }

    if !sess.authenticated() {
        anyhow::bail!("SSH 认证失败: {}@{}", username, addr);
    }

    Ok(sess)
}

/// 逐级创建远程父目录（已存在的目录跳过）
fn ensure_remote_parents(sftp: &Sftp, remote_path: &str) {
    let Some(parent) = Path::new(remote_path).parent() else {
        return;
    };
    let parent_str = parent.to_string_lossy().replace('\\', "/");

    for dir in parent_prefixes(&parent_str) {
        let dir_path = Path::new(&dir);
        if sftp.stat(dir_path).is_err() {
            debug!("创建远程目录: {}", dir);
            if let Err(e) = sftp.mkdir(dir_path, 0o755) {
                // 目录可能被并发创建，真正的问题会在写文件时暴露
                warn!("创建远程目录失败 {}: {}", dir, e);
            }
        }
    }
}

/// "a/b/c" -> ["a", "a/b", "a/b/c"]，保留开头的 "/"
fn parent_prefixes(parent: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut acc = String::new();
    if parent.starts_with('/') {
        acc.push('/');
    }
    for part in parent.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if !acc.is_empty() && !acc.ends_with('/') {
            acc.push('/');
        }
        acc.push_str(part);
        prefixes.push(acc.clone());
    }
    prefixes
}

fn upload_blocking(session: &Mutex<Session>, local_path: &Path, remote_path: &str) -> Result<u64> {
    let sess = session
        .lock()
        .map_err(|_| anyhow::anyhow!("SSH 会话锁已损坏"))?;
    let sftp = sess.sftp().context("打开 SFTP 通道失败")?;

    ensure_remote_parents(&sftp, remote_path);

    let mut local_file =
        File::open(local_path).with_context(|| format!("读取本地文件失败: {:?}", local_path))?;
    let mut remote_file = sftp
        .create(Path::new(remote_path))
        .with_context(|| format!("创建远程文件失败: {}", remote_path))?;
    let bytes = io::copy(&mut local_file, &mut remote_file)
        .with_context(|| format!("写入远程文件失败: {}", remote_path))?;

    Ok(bytes)
}

#[async_trait]
impl Transport for SftpTransport {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let session = self.session.clone();
        let local: PathBuf = local_path.to_path_buf();
        let remote = remote_path.to_string();

        let bytes =
            tokio::task::spawn_blocking(move || upload_blocking(&session, &local, &remote))
                .await??;
        debug!("SFTP 写入完成: {} ({}字节)", remote_path, bytes);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let sess = session
                .lock()
                .map_err(|_| anyhow::anyhow!("SSH 会话锁已损坏"))?;
            sess.disconnect(None, "remotesync shutting down", None)?;
            Ok(())
        })
        .await??;
        info!("SSH 会话已关闭: {}", self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
