use async_trait::async_trait;
use remotesync_lib::core::path::absolutize;
use remotesync_lib::core::ChangeDetection;
use remotesync_lib::{SyncConfig, SyncEngine, Transport};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// 记录每一次上传调用
#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<(PathBuf, String)>>,
    /// 前 N 次上传时把文件的修改时间再推进一次，模拟上传期间仍在写入
    rewrites_left: AtomicU32,
}

impl RecordingTransport {
    fn rewriting(times: u32) -> Arc<Self> {
        Arc::new(Self {
            rewrites_left: AtomicU32::new(times),
            ..Default::default()
        })
    }

    fn remote_paths(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, remote)| remote.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), remote_path.to_string()));

        let left = self.rewrites_left.load(Ordering::SeqCst);
        if left > 0 {
            self.rewrites_left.store(left - 1, Ordering::SeqCst);
            let current = fs::metadata(local_path)?.modified()?;
            set_mtime_at(local_path, current + Duration::from_secs(10));
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// 上传时删除本地文件，模拟文件在遍历之后、读取状态之前消失
#[derive(Default)]
struct VanishingTransport {
    calls: Mutex<Vec<String>>,
    /// 第一次上传时删除这些文件（正在上传的文件除外）
    others: Mutex<Vec<PathBuf>>,
    /// 上传完成后删除刚上传的文件
    delete_uploaded: AtomicBool,
}

#[async_trait]
impl Transport for VanishingTransport {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(remote_path.to_string());

        let others = std::mem::take(&mut *self.others.lock().unwrap());
        for other in others {
            if other.as_path() != local_path {
                fs::remove_file(&other)?;
            }
        }
        if self.delete_uploaded.load(Ordering::SeqCst) {
            fs::remove_file(local_path)?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "vanishing"
    }
}

fn set_mtime_at(path: &Path, time: SystemTime) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

fn set_mtime(path: &Path, secs: u64) {
    set_mtime_at(path, SystemTime::UNIX_EPOCH + Duration::from_secs(secs));
}

fn write_file(path: &Path, secs: u64) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"data").unwrap();
    set_mtime(path, secs);
}

fn engine_with(transport: Arc<dyn Transport>) -> SyncEngine {
    engine_detecting(transport, ChangeDetection::Mtime)
}

fn engine_detecting(transport: Arc<dyn Transport>, change_detection: ChangeDetection) -> SyncEngine {
    SyncEngine::with_config(
        transport,
        SyncConfig {
            change_detection,
            max_retries: 0,
            retry_base_delay_ms: 1,
        },
    )
}

#[tokio::test]
async fn first_scan_registers_without_uploading() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    write_file(&local.join("a.txt"), 1_000);
    write_file(&local.join("sub/b.txt"), 1_000);

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport.clone());

    let report = engine.scan(&local, "remote").await.unwrap();
    assert!(report.first_scan);
    assert_eq!(report.files_registered, 2);
    assert_eq!(report.files_uploaded, 0);
    assert!(transport.remote_paths().is_empty());
    assert_eq!(engine.registry().len(), 2);
    assert!(!engine.is_first_scan());
}

#[tokio::test]
async fn new_file_after_first_scan_uploads_once() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    fs::create_dir_all(&local).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote/app/").await.unwrap();

    write_file(&local.join("sub/new.txt"), 1_000);
    let report = engine.scan(&local, "remote/app/").await.unwrap();
    assert_eq!(report.uploaded, vec!["remote/app/sub/new.txt"]);

    // 没有变化，不再上传
    let report = engine.scan(&local, "remote/app/").await.unwrap();
    assert_eq!(report.files_uploaded, 0);

    let calls = transport.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, absolutize(&local.join("sub/new.txt")).unwrap());
}

#[tokio::test]
async fn touched_file_uploads_to_translated_path() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    let file = local.join("a/b.txt");
    write_file(&file, 1_000);

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport.clone());

    engine.scan(&local, "remote/").await.unwrap();
    assert!(transport.remote_paths().is_empty());

    engine.scan(&local, "remote/").await.unwrap();
    assert!(transport.remote_paths().is_empty());

    set_mtime(&file, 2_000);
    let report = engine.scan(&local, "remote/").await.unwrap();
    assert_eq!(report.uploaded, vec!["remote/a/b.txt"]);
    assert_eq!(transport.remote_paths(), vec!["remote/a/b.txt"]);

    let record = engine
        .registry()
        .get(&absolutize(&file).unwrap())
        .unwrap();
    assert_eq!(
        record.modified_at(),
        SystemTime::UNIX_EPOCH + Duration::from_secs(2_000)
    );
}

#[tokio::test]
async fn drain_loop_uploads_once_per_observed_change() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    let file = local.join("growing.log");
    write_file(&file, 1_000);

    // 上传期间文件又被修改了 3 次
    let transport = RecordingTransport::rewriting(3);
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote").await.unwrap();

    set_mtime(&file, 2_000);
    let report = engine.scan(&local, "remote").await.unwrap();

    // 1 次外部修改 + 3 次上传期间的修改
    assert_eq!(report.files_uploaded, 4);
    assert_eq!(transport.remote_paths(), vec!["remote/growing.log"; 4]);

    // 已稳定，下一次扫描不再上传
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.files_uploaded, 0);
}

#[tokio::test]
async fn svn_directories_are_never_registered_or_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    write_file(&local.join("keep.txt"), 1_000);
    write_file(&local.join(".svn/entries"), 1_000);
    write_file(&local.join("lib/.svn/text-base/x.svn-base"), 1_000);

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote").await.unwrap();

    // 首次扫描后在 .svn 中新增和修改文件
    write_file(&local.join(".svn/new-file"), 1_000);
    set_mtime(&local.join(".svn/entries"), 2_000);
    write_file(&local.join("lib/ok.txt"), 1_000);
    engine.scan(&local, "remote").await.unwrap();

    assert_eq!(transport.remote_paths(), vec!["remote/lib/ok.txt"]);
    let registered: Vec<_> = engine.registry().paths().collect();
    assert_eq!(registered.len(), 2);
    assert!(registered
        .iter()
        .all(|p| !p.to_string_lossy().contains(".svn")));
}

#[tokio::test]
async fn deleted_file_keeps_record_and_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    let file = local.join("gone.txt");
    write_file(&file, 1_000);

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote").await.unwrap();

    fs::remove_file(&file).unwrap();
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.files_seen, 0);
    assert_eq!(report.files_uploaded, 0);
    assert_eq!(engine.registry().len(), 1);

    // 重新出现的同名文件按修改检测处理
    write_file(&file, 3_000);
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.uploaded, vec!["remote/gone.txt"]);
}

#[tokio::test]
async fn dotted_local_root_is_normalized_before_registering() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    write_file(&local.join("x.txt"), 1_000);

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport);
    // 带 `..` 的路径在登记前会被规范化
    let indirect = local.join("sub").join("..");
    fs::create_dir_all(local.join("sub")).unwrap();
    engine.scan(&indirect, "remote").await.unwrap();

    let expected = absolutize(&local.join("x.txt")).unwrap();
    assert!(engine.registry().contains(&expected));
}

#[tokio::test]
async fn new_file_vanishing_before_stat_is_skipped_then_uploaded_as_new() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    fs::create_dir_all(&local).unwrap();

    let transport = Arc::new(VanishingTransport::default());
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote").await.unwrap();

    let a = absolutize(&local.join("a.txt")).unwrap();
    let b = absolutize(&local.join("b.txt")).unwrap();
    write_file(&a, 1_000);
    write_file(&b, 1_000);
    // 先上传的那个文件会删掉另一个
    *transport.others.lock().unwrap() = vec![a.clone(), b.clone()];

    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.files_registered, 1);
    assert_eq!(report.files_uploaded, 1);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(engine.registry().len(), 1);

    let vanished = if a.exists() { b } else { a };
    assert!(!engine.registry().contains(&vanished));

    // 重新出现后按新文件处理
    write_file(&vanished, 1_000);
    let report = engine.scan(&local, "remote").await.unwrap();
    let name = vanished.file_name().unwrap().to_str().unwrap();
    assert_eq!(report.uploaded, vec![format!("remote/{}", name)]);
    assert_eq!(report.files_registered, 1);
    assert_eq!(engine.registry().len(), 2);
}

#[tokio::test]
async fn record_is_kept_when_file_vanishes_mid_drain() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    let file = local.join("f.txt");
    write_file(&file, 1_000);

    let transport = Arc::new(VanishingTransport::default());
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote").await.unwrap();

    set_mtime(&file, 2_000);
    transport.delete_uploaded.store(true, Ordering::SeqCst);
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.uploaded, vec!["remote/f.txt"]);
    assert_eq!(report.files_skipped, 1);

    let key = absolutize(&file).unwrap();
    let record = engine.registry().get(&key).unwrap();
    assert_eq!(
        record.modified_at(),
        SystemTime::UNIX_EPOCH + Duration::from_secs(2_000)
    );
    assert!(!record.is_pending());

    transport.delete_uploaded.store(false, Ordering::SeqCst);
    write_file(&file, 3_000);
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.uploaded, vec!["remote/f.txt"]);
    assert_eq!(report.files_skipped, 0);
    assert_eq!(engine.registry().len(), 1);
}

#[tokio::test]
async fn content_hash_mode_ignores_touch_and_uploads_edits() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    let file = local.join("doc.txt");
    write_file(&file, 1_000);

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_detecting(transport.clone(), ChangeDetection::ContentHash);
    engine.scan(&local, "remote").await.unwrap();

    set_mtime(&file, 2_000);
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.files_uploaded, 0);

    fs::write(&file, b"edited").unwrap();
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.uploaded, vec!["remote/doc.txt"]);
    assert_eq!(report.bytes_uploaded, 6);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_file_is_synced() {
    use std::os::unix::fs::symlink;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    fs::create_dir_all(&local).unwrap();
    let real = dir.path().join("outside/real.txt");
    write_file(&real, 1_000);

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote").await.unwrap();

    symlink(&real, local.join("link.txt")).unwrap();
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.files_seen, 1);
    assert_eq!(report.uploaded, vec!["remote/link.txt"]);

    // 修改链接目标也会被检测到
    set_mtime(&real, 2_000);
    let report = engine.scan(&local, "remote").await.unwrap();
    assert_eq!(report.uploaded, vec!["remote/link.txt"]);
}

#[cfg(unix)]
#[tokio::test]
async fn non_utf8_file_names_are_skipped() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    fs::create_dir_all(&local).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let mut engine = engine_with(transport.clone());
    engine.scan(&local, "remote").await.unwrap();

    write_file(&local.join("ok.txt"), 1_000);
    write_file(&local.join(OsStr::from_bytes(b"bad\xff.txt")), 1_000);
    let report = engine.scan(&local, "remote").await.unwrap();

    assert_eq!(report.uploaded, vec!["remote/ok.txt"]);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(engine.registry().len(), 1);
}
