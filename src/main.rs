//! remotesync
//!
//! 监控本地目录，把新增和修改过的文件上传到 FTP/SFTP 服务器上的对应目录。
//!
//! ```text
//! remotesync [--ftp] -h HOST [-P PORT] [-u USER] [-p PASSWORD] [--key KEYFILE] LOCAL REMOTE
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use remotesync_lib::config::SyncSettings;
use remotesync_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use remotesync_lib::{create_transport, SyncEngine, SyncLoop, TransportConfig, TransportKind};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    Ftp,
    Sftp,
    /// 镜像到本机的另一个目录（不需要主机）
    Local,
}

impl From<Protocol> for TransportKind {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Ftp => TransportKind::Ftp,
            Protocol::Sftp => TransportKind::Sftp,
            Protocol::Local => TransportKind::Local,
        }
    }
}

/// Mirror a local folder onto a remote FTP/SFTP folder, uploading changed files.
#[derive(Parser, Debug)]
#[command(name = "remotesync", author, version, about, disable_help_flag = true)]
struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Use FTP instead of SFTP
    #[arg(long, conflicts_with = "protocol")]
    ftp: bool,

    /// Transport protocol (default: sftp)
    #[arg(long, value_enum)]
    protocol: Option<Protocol>,

    /// Remote host name
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Remote port (default: 21 for FTP, 22 for SFTP)
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// User name, prompted when omitted
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Password, prompted when neither password nor key file is given
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Private key file for SSH authentication
    #[arg(long = "key", value_name = "KEYFILE")]
    key_file: Option<String>,

    /// Configuration directory containing config.json and logs/
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Log level override (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Local folder to monitor
    local_folder: PathBuf,

    /// Remote folder that mirrors the local folder
    remote_folder: String,
}

impl Cli {
    fn transport_kind(&self) -> TransportKind {
        match (self.ftp, self.protocol) {
            (true, _) => TransportKind::Ftp,
            (false, Some(p)) => p.into(),
            (false, None) => TransportKind::Sftp,
        }
    }
}

/// 初始化日志系统
fn init_logging(config: &LogConfig, log_dir: &Path) -> Option<WorkerGuard> {
    let mut env_filter =
        EnvFilter::from_default_env().add_directive(config.tracing_level().into());
    if let Ok(directive) = "opendal=warn".parse::<Directive>() {
        env_filter = env_filter.add_directive(directive);
    }

    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    if !config.enabled {
        // 文件日志已禁用，只输出到控制台
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();
        return None;
    }

    match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            let (writer, guard) = tracing_appender::non_blocking(file_writer.make_writer());
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);

            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
            tracing::warn!("无法创建日志文件 {:?}: {}", log_dir, e);
            None
        }
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// 组装传输配置，缺少的用户名和密码交互式输入
fn build_transport_config(cli: &Cli) -> Result<TransportConfig> {
    let kind = cli.transport_kind();
    let mut config = TransportConfig::new(kind);
    if kind == TransportKind::Local {
        return Ok(config);
    }

    let host = cli
        .host
        .clone()
        .ok_or_else(|| anyhow::anyhow!("需要指定主机 (-h HOST)"))?;
    config.host = Some(host);
    config.port = cli.port;
    config.key_file = cli.key_file.clone().filter(|k| !k.trim().is_empty());
    config.password = cli.password.clone().filter(|p| !p.trim().is_empty());

    config.username = match &cli.username {
        Some(u) => Some(u.clone()),
        None => Some(prompt_line("请输入用户名: ")?),
    };

    if config.password.is_none() && config.key_file.is_none() {
        let password = rpassword::prompt_password("请输入密码: ").context("读取密码失败")?;
        config.password = Some(password);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(remotesync_lib::dirs::app_config_dir);
    let _ = std::fs::create_dir_all(&config_dir);

    let mut log_config = LogConfig::load(&config_dir);
    if let Some(level) = &cli.log_level {
        log_config.set_level(level).map_err(anyhow::Error::msg)?;
    }
    let _log_guard = init_logging(&log_config, &get_log_dir(&config_dir));

    let settings = SyncSettings::load(&config_dir);
    let transport_config = build_transport_config(&cli)?;
    let transport = create_transport(&transport_config)
        .await
        .with_context(|| format!("无法连接 {:?} 服务器", transport_config.typ))?;

    let engine = SyncEngine::with_config(transport, settings.engine_config());
    let sync_loop = SyncLoop::new(engine, &cli.local_folder, cli.remote_folder.clone())
        .with_interval(settings.interval());

    let cancel = sync_loop.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到中断信号，正在停止...");
            cancel.cancel();
        }
    });

    let summary = sync_loop.run().await?;
    tracing::info!(
        "监控结束: {}",
        serde_json::to_string(&summary).unwrap_or_default()
    );

    Ok(())
}
