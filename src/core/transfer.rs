//! 传输执行器 - 分块下载/上传，支持进度、重试、断点续传与取消

use crate::config::TransferConfig;
use crate::core::record::FileRecord;
use crate::core::scanner::hash_file;
use crate::error::{Result, SyncError};
use crate::storage::{RemoteClient, UploadBody};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

/// 下载中的临时文件后缀
pub const PARTIAL_SUFFIX: &str = ".gdsync-part";

/// 演练模式下代替真实文件夹 ID 的占位值
pub const DRY_RUN_FOLDER_ID: &str = "dry-run";

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// 单个文件的进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Bytes { done: u64, total: u64 },
    /// 总大小未知或为 0
    Indeterminate { done: u64 },
}

impl Progress {
    pub fn new(done: u64, total: u64) -> Self {
        if total == 0 {
            Progress::Indeterminate { done }
        } else {
            Progress::Bytes { done, total }
        }
    }

    pub fn done(&self) -> u64 {
        match self {
            Progress::Bytes { done, .. } | Progress::Indeterminate { done } => *done,
        }
    }

    /// 百分比（0-100），未知总量时为 None
    pub fn percent(&self) -> Option<u8> {
        match self {
            Progress::Bytes { done, total } => Some(((*done).min(*total) * 100 / *total) as u8),
            Progress::Indeterminate { .. } => None,
        }
    }
}

/// 单个文件的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Downloaded { bytes: u64 },
    Uploaded { bytes: u64, remote_id: String },
    Skipped { reason: String },
    DryRun,
    Failed { reason: String },
    Cancelled,
}

impl TransferOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TransferOutcome::Failed { .. })
    }

    /// 实际写入的字节数
    pub fn bytes(&self) -> u64 {
        match self {
            TransferOutcome::Downloaded { bytes } | TransferOutcome::Uploaded { bytes, .. } => {
                *bytes
            }
            _ => 0,
        }
    }
}

/// 发往进度消费者的事件
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Progress {
        path: String,
        direction: Direction,
        progress: Progress,
    },
    Finished {
        path: String,
        direction: Direction,
        outcome: TransferOutcome,
    },
}

/// 带路径的传输结果，顺序与输入一致
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub path: String,
    pub direction: Direction,
    pub outcome: TransferOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// 目标已存在时是否覆盖
    pub overwrite: bool,
    /// 只记录意图，不产生任何副作用
    pub dry_run: bool,
}

type FolderCache = Arc<tokio::sync::Mutex<HashMap<String, String>>>;

/// 单个上传的执行结果
enum UploadStep {
    DryRun,
    RemoteExists,
    Done { bytes: u64, remote_id: String },
}

/// 传输执行器
#[derive(Clone)]
pub struct TransferExecutor {
    client: Arc<dyn RemoteClient>,
    config: TransferConfig,
    cancelled: Arc<AtomicBool>,
    progress_tx: Option<mpsc::Sender<TransferEvent>>,
    /// 同一路径上的传输串行执行
    path_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TransferExecutor {
    pub fn new(client: Arc<dyn RemoteClient>, config: TransferConfig) -> Self {
        Self {
            client,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress_tx: None,
            path_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.config.chunk_timeout_secs.max(1))
    }

    async fn send_event(&self, event: TransferEvent) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(event).await;
        }
    }

    async fn lock_path(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.path_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// 瞬时错误按指数退避重试
    async fn with_retry<T, F, Fut>(&self, path: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(_) if self.is_cancelled() => return Err(SyncError::Cancelled),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self
                        .config
                        .retry_base_delay_ms
                        .saturating_mul(2_u64.saturating_pow(attempt));
                    warn!(
                        "{} 传输失败，{}ms 后重试 ({}/{}): {}",
                        path,
                        delay,
                        attempt + 1,
                        self.config.max_retries,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 收集任务结果，保持输入顺序
    async fn collect(
        direction: Direction,
        tasks: Vec<(String, Option<JoinHandle<TransferOutcome>>)>,
    ) -> Vec<TransferResult> {
        let mut results = Vec::with_capacity(tasks.len());
        for (path, handle) in tasks {
            let outcome = match handle {
                Some(handle) => handle.await.unwrap_or_else(|e| TransferOutcome::Failed {
                    reason: format!("task failed: {}", e),
                }),
                None => TransferOutcome::Cancelled,
            };
            results.push(TransferResult {
                path,
                direction,
                outcome,
            });
        }
        results
    }

    // ============ 下载 ============

    /// 下载一批远程文件到本地根目录
    pub async fn download(
        &self,
        records: &[FileRecord],
        local_root: &Path,
        options: TransferOptions,
    ) -> Vec<TransferResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let mut tasks = Vec::with_capacity(records.len());

        for record in records {
            if self.is_cancelled() {
                tasks.push((record.path.clone(), None));
                continue;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tasks.push((record.path.clone(), None));
                continue;
            };

            let this = self.clone();
            let record = record.clone();
            let root = local_root.to_path_buf();
            let path = record.path.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = this.download_one(&record, &root, options).await;
                this.send_event(TransferEvent::Finished {
                    path: record.path.clone(),
                    direction: Direction::Download,
                    outcome: outcome.clone(),
                })
                .await;
                outcome
            });
            tasks.push((path, Some(handle)));
        }

        Self::collect(Direction::Download, tasks).await
    }

    async fn download_one(
        &self,
        record: &FileRecord,
        local_root: &Path,
        options: TransferOptions,
    ) -> TransferOutcome {
        let target = record.local_path(local_root);
        let _guard = self.lock_path(&record.path).await;

        if !options.overwrite && target.exists() {
            debug!("本地文件已存在，跳过: {}", target.display());
            return TransferOutcome::Skipped {
                reason: "local file exists".to_string(),
            };
        }

        if options.dry_run {
            info!("[dry-run] 下载 {} -> {}", record.path, target.display());
            return TransferOutcome::DryRun;
        }

        match self.download_to(record, &target).await {
            Ok(bytes) => {
                info!("下载完成: {} ({} 字节)", record.path, bytes);
                TransferOutcome::Downloaded { bytes }
            }
            Err(SyncError::Cancelled) => {
                warn!("下载已取消: {}", record.path);
                TransferOutcome::Cancelled
            }
            Err(e) => {
                error!("下载失败: {}: {}", record.path, e);
                TransferOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn download_to(&self, record: &FileRecord, target: &Path) -> Result<u64> {
        let file_id = record.remote_id.as_deref().ok_or_else(|| SyncError::TransferFailure {
            path: record.path.clone(),
            reason: "missing remote id".to_string(),
        })?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(target);
        // 失败或取消时删除临时文件
        let cleanup = scopeguard::guard(partial.clone(), |p| {
            let _ = std::fs::remove_file(p);
        });

        // 旧的临时文件比目标还大，说明不是同一版本
        if let Ok(meta) = tokio::fs::metadata(&partial).await {
            if record.size > 0 && meta.len() > record.size {
                tokio::fs::remove_file(&partial).await?;
            }
        }

        let partial_ref = partial.as_path();
        let bytes = self
            .with_retry(&record.path, move || self.download_attempt(file_id, record, partial_ref))
            .await?;

        if record.has_hash() {
            let check = partial.clone();
            let actual = tokio::task::spawn_blocking(move || hash_file(&check))
                .await
                .map_err(|e| SyncError::TransferFailure {
                    path: record.path.clone(),
                    reason: e.to_string(),
                })??;
            if record.content_hash.as_deref() != Some(actual.as_str()) {
                return Err(SyncError::TransferFailure {
                    path: record.path.clone(),
                    reason: format!("checksum mismatch (got {})", actual),
                });
            }
        }

        tokio::fs::rename(&partial, target).await?;
        scopeguard::ScopeGuard::into_inner(cleanup);
        Ok(bytes)
    }

    /// 单次下载尝试，已有临时文件时从其末尾续传
    async fn download_attempt(&self, file_id: &str, record: &FileRecord, partial: &Path) -> Result<u64> {
        let existing = tokio::fs::metadata(partial)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if existing > 0 {
            debug!("从 {} 字节处续传: {}", existing, record.path);
        }

        let timeout = self.chunk_timeout();
        let stream = tokio::time::timeout(timeout, self.client.download(file_id, existing))
            .await
            .map_err(|_| SyncError::Timeout(format!("download request for {}", record.path)))??;

        let mut file = if stream.offset == 0 {
            tokio::fs::File::create(partial).await?
        } else if stream.offset == existing {
            tokio::fs::OpenOptions::new().append(true).open(partial).await?
        } else {
            return Err(SyncError::TransferFailure {
                path: record.path.clone(),
                reason: format!("unexpected resume offset {}", stream.offset),
            });
        };

        let mut done = stream.offset;
        self.send_event(TransferEvent::Progress {
            path: record.path.clone(),
            direction: Direction::Download,
            progress: Progress::new(done, record.size),
        })
        .await;

        let mut chunks = stream.chunks;
        let result: Result<()> = async {
            loop {
                if self.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                let next = tokio::time::timeout(timeout, chunks.next())
                    .await
                    .map_err(|_| SyncError::Timeout(format!("download chunk for {}", record.path)))?;
                let Some(chunk) = next else {
                    return Ok(());
                };
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                done += chunk.len() as u64;
                self.send_event(TransferEvent::Progress {
                    path: record.path.clone(),
                    direction: Direction::Download,
                    progress: Progress::new(done, record.size),
                })
                .await;
            }
        }
        .await;

        // 已写入的部分保留给下一次续传
        file.flush().await?;
        result.map(|_| done)
    }

    // ============ 上传 ============

    /// 上传一批本地文件到远程根文件夹
    pub async fn upload(
        &self,
        records: &[FileRecord],
        local_root: &Path,
        remote_root: &str,
        options: TransferOptions,
    ) -> Vec<TransferResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let folders: FolderCache = Arc::new(tokio::sync::Mutex::new(HashMap::from([(
            String::new(),
            remote_root.to_string(),
        )])));
        let mut tasks = Vec::with_capacity(records.len());

        for record in records {
            if self.is_cancelled() {
                tasks.push((record.path.clone(), None));
                continue;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tasks.push((record.path.clone(), None));
                continue;
            };

            let this = self.clone();
            let record = record.clone();
            let root = local_root.to_path_buf();
            let folders = folders.clone();
            let path = record.path.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = this.upload_one(&record, &root, &folders, options).await;
                this.send_event(TransferEvent::Finished {
                    path: record.path.clone(),
                    direction: Direction::Upload,
                    outcome: outcome.clone(),
                })
                .await;
                outcome
            });
            tasks.push((path, Some(handle)));
        }

        Self::collect(Direction::Upload, tasks).await
    }

    async fn upload_one(
        &self,
        record: &FileRecord,
        local_root: &Path,
        folders: &FolderCache,
        options: TransferOptions,
    ) -> TransferOutcome {
        let _guard = self.lock_path(&record.path).await;

        match self.upload_from(record, local_root, folders, options).await {
            Ok(UploadStep::DryRun) => {
                info!("[dry-run] 上传 {}", record.path);
                TransferOutcome::DryRun
            }
            Ok(UploadStep::RemoteExists) => {
                debug!("远程文件已存在，跳过: {}", record.path);
                TransferOutcome::Skipped {
                    reason: "remote file exists".to_string(),
                }
            }
            Ok(UploadStep::Done { bytes, remote_id }) => {
                info!("上传完成: {} ({} 字节)", record.path, bytes);
                TransferOutcome::Uploaded { bytes, remote_id }
            }
            Err(SyncError::Cancelled) => {
                warn!("上传已取消: {}", record.path);
                TransferOutcome::Cancelled
            }
            Err(e) => {
                error!("上传失败: {}: {}", record.path, e);
                TransferOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn upload_from(
        &self,
        record: &FileRecord,
        local_root: &Path,
        folders: &FolderCache,
        options: TransferOptions,
    ) -> Result<UploadStep> {
        let source = record.local_path(local_root);
        let size = tokio::fs::metadata(&source).await?.len();

        let parent_id = self
            .ensure_remote_dirs(&record.parent_segments(), folders, options.dry_run)
            .await?;
        if options.dry_run {
            debug!("[dry-run] {} 的父文件夹: {}", record.path, parent_id);
            return Ok(UploadStep::DryRun);
        }

        let name = record.file_name();
        let parent = parent_id.as_str();
        let existing_id = match (&record.remote_id, options.overwrite) {
            (Some(id), true) => Some(id.clone()),
            _ => self
                .with_retry(&record.path, move || self.client.find_child(name, parent))
                .await?
                .map(|item| item.id),
        };
        // 不覆盖时与下载一致：目标已存在则跳过
        if existing_id.is_some() && !options.overwrite {
            return Ok(UploadStep::RemoteExists);
        }

        let source_ref = source.as_path();
        let parent_ref = parent_id.as_str();
        let existing_ref = existing_id.as_deref();
        let chunks = size / self.config.chunk_size().max(1) as u64 + 1;
        let overall = self
            .chunk_timeout()
            .saturating_mul(u32::try_from(chunks).unwrap_or(u32::MAX).saturating_add(1));

        let remote_id = self
            .with_retry(&record.path, move || async move {
                let body = self.upload_body(record, source_ref, size).await?;
                let request = async {
                    match existing_ref {
                        Some(id) => self.client.update_file(id, body).await.map(|_| id.to_string()),
                        None => self.client.create_file(name, parent_ref, body).await,
                    }
                };
                let remote_id = tokio::time::timeout(overall, request)
                    .await
                    .map_err(|_| SyncError::Timeout(format!("upload of {}", record.path)))??;
                Ok::<_, SyncError>(remote_id)
            })
            .await?;

        Ok(UploadStep::Done {
            bytes: size,
            remote_id,
        })
    }

    /// 逐级确保父文件夹存在，同一次调用内缓存
    async fn ensure_remote_dirs(
        &self,
        segments: &[&str],
        folders: &FolderCache,
        dry_run: bool,
    ) -> Result<String> {
        let mut cache = folders.lock().await;
        let mut parent = cache.get("").cloned().unwrap_or_default();
        let mut key = String::new();

        for segment in segments {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(segment);

            if let Some(id) = cache.get(&key) {
                parent = id.clone();
                continue;
            }

            let id = if dry_run {
                DRY_RUN_FOLDER_ID.to_string()
            } else {
                let parent_ref = parent.as_str();
                let id = self
                    .with_retry(&key, move || self.client.ensure_folder(segment, parent_ref))
                    .await?;
                debug!("远程文件夹就绪: {} ({})", key, id);
                id
            };
            cache.insert(key.clone(), id.clone());
            parent = id;
        }

        Ok(parent)
    }

    /// 以分块流的形式读取本地文件，每个分块上报进度
    async fn upload_body(&self, record: &FileRecord, source: &Path, size: u64) -> Result<UploadBody> {
        let file = tokio::fs::File::open(source).await?;
        let tx = self.progress_tx.clone();
        let cancelled = self.cancelled.clone();
        let path = record.path.clone();
        let mut done = 0u64;

        let chunks = ReaderStream::with_capacity(file, self.config.chunk_size()).map(move |chunk: std::io::Result<Bytes>| -> Result<Bytes> {
            if cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }
            let chunk = chunk?;
            done += chunk.len() as u64;
            if let Some(tx) = &tx {
                let _ = tx.try_send(TransferEvent::Progress {
                    path: path.clone(),
                    direction: Direction::Upload,
                    progress: Progress::new(done, size),
                });
            }
            Ok(chunk)
        });

        Ok(UploadBody {
            size,
            chunks: Box::pin(chunks),
        })
    }
}

/// 目标文件对应的临时文件
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::hash_bytes;
    use crate::storage::MemoryDrive;

    fn fast_config() -> TransferConfig {
        TransferConfig {
            retry_base_delay_ms: 1,
            chunk_size_kb: 1,
            ..TransferConfig::default()
        }
    }

    fn remote_record(drive: &MemoryDrive, id: &str, path: &str) -> FileRecord {
        let content = drive.content(id).unwrap();
        FileRecord::remote(id, path, content.len() as u64, None, Some(hash_bytes(&content)))
    }

    #[test]
    fn test_progress() {
        assert_eq!(Progress::new(5, 0), Progress::Indeterminate { done: 5 });
        assert_eq!(Progress::new(42, 100).percent(), Some(42));
        assert_eq!(Progress::new(0, 0).percent(), None);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/a/report.pdf")),
            PathBuf::from("/tmp/a/report.pdf.gdsync-part")
        );
    }

    #[tokio::test]
    async fn test_download_writes_file_and_reports_progress() {
        let drive = Arc::new(MemoryDrive::new().with_chunk_size(4));
        let id = drive.add_file("n.txt", "root", b"hello world");
        let dir = tempfile::tempdir().unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let executor = TransferExecutor::new(drive.clone(), fast_config()).with_progress(tx);
        let record = remote_record(&drive, &id, "sub/n.txt");

        let results = executor
            .download(&[record], dir.path(), TransferOptions::default())
            .await;
        drop(executor);

        assert_eq!(results[0].outcome, TransferOutcome::Downloaded { bytes: 11 });
        assert_eq!(std::fs::read(dir.path().join("sub/n.txt")).unwrap(), b"hello world");
        assert!(!dir.path().join("sub/n.txt.gdsync-part").exists());

        let mut last = None;
        let mut finished = false;
        while let Some(event) = rx.recv().await {
            match event {
                TransferEvent::Progress { progress, .. } => last = Some(progress),
                TransferEvent::Finished { .. } => finished = true,
            }
        }
        assert_eq!(last, Some(Progress::Bytes { done: 11, total: 11 }));
        assert!(finished);
    }

    #[tokio::test]
    async fn test_download_skips_existing_without_overwrite() {
        let drive = Arc::new(MemoryDrive::new());
        let id = drive.add_file("a.txt", "root", b"remote");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"local").unwrap();

        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let record = remote_record(&drive, &id, "a.txt");

        for dry_run in [false, true] {
            let results = executor
                .download(
                    std::slice::from_ref(&record),
                    dir.path(),
                    TransferOptions {
                        overwrite: false,
                        dry_run,
                    },
                )
                .await;
            assert!(matches!(results[0].outcome, TransferOutcome::Skipped { .. }));
        }
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"local");

        let results = executor
            .download(
                &[record],
                dir.path(),
                TransferOptions {
                    overwrite: true,
                    dry_run: false,
                },
            )
            .await;
        assert_eq!(results[0].outcome, TransferOutcome::Downloaded { bytes: 6 });
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"remote");
    }

    #[tokio::test]
    async fn test_download_resumes_after_transient_failure() {
        let drive = Arc::new(MemoryDrive::new().with_chunk_size(3));
        let id = drive.add_file("big.bin", "root", b"0123456789abcdef");
        drive.fail_downloads(&id, 2);
        let dir = tempfile::tempdir().unwrap();

        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let record = remote_record(&drive, &id, "big.bin");
        let results = executor
            .download(&[record], dir.path(), TransferOptions::default())
            .await;

        assert_eq!(results[0].outcome, TransferOutcome::Downloaded { bytes: 16 });
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), b"0123456789abcdef");
    }

    #[tokio::test]
    async fn test_download_failure_removes_partial_and_batch_continues() {
        let drive = Arc::new(MemoryDrive::new().with_chunk_size(2));
        let bad = drive.add_file("bad.txt", "root", b"broken file");
        let good = drive.add_file("good.txt", "root", b"ok");
        drive.fail_downloads(&bad, 10);
        let dir = tempfile::tempdir().unwrap();

        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let records = vec![
            remote_record(&drive, &bad, "bad.txt"),
            remote_record(&drive, &good, "good.txt"),
        ];
        let results = executor
            .download(&records, dir.path(), TransferOptions::default())
            .await;

        assert_eq!(results[0].path, "bad.txt");
        assert!(results[0].outcome.is_failure());
        assert_eq!(results[1].outcome, TransferOutcome::Downloaded { bytes: 2 });
        assert!(!dir.path().join("bad.txt").exists());
        assert!(!dir.path().join("bad.txt.gdsync-part").exists());
    }

    #[tokio::test]
    async fn test_download_checksum_mismatch_fails() {
        let drive = Arc::new(MemoryDrive::new());
        let id = drive.add_file("a.txt", "root", b"content");
        let dir = tempfile::tempdir().unwrap();

        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let mut record = remote_record(&drive, &id, "a.txt");
        record.content_hash = Some(hash_bytes(b"something else"));
        let results = executor
            .download(&[record], dir.path(), TransferOptions::default())
            .await;

        assert!(results[0].outcome.is_failure());
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_executor_transfers_nothing() {
        let drive = Arc::new(MemoryDrive::new());
        let id = drive.add_file("a.txt", "root", b"x");
        let dir = tempfile::tempdir().unwrap();

        let flag = Arc::new(AtomicBool::new(true));
        let executor = TransferExecutor::new(drive.clone(), fast_config()).with_cancel(flag);
        let results = executor
            .download(&[remote_record(&drive, &id, "a.txt")], dir.path(), TransferOptions::default())
            .await;
        assert_eq!(results[0].outcome, TransferOutcome::Cancelled);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_creates_nested_folders_once() {
        let drive = Arc::new(MemoryDrive::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/2024")).unwrap();
        std::fs::write(dir.path().join("docs/2024/a.txt"), b"aaa").unwrap();
        std::fs::write(dir.path().join("docs/2024/b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join("docs/c.txt"), b"c").unwrap();

        let records = vec![
            FileRecord::local("docs/2024/a.txt", 3, 0, hash_bytes(b"aaa")),
            FileRecord::local("docs/2024/b.txt", 2, 0, hash_bytes(b"bb")),
            FileRecord::local("docs/c.txt", 1, 0, hash_bytes(b"c")),
        ];
        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let results = executor
            .upload(&records, dir.path(), "root", TransferOptions::default())
            .await;

        assert!(results.iter().all(|r| matches!(r.outcome, TransferOutcome::Uploaded { .. })));
        assert_eq!(drive.folder_creations(), 2);

        let docs = drive.find("docs", "root").unwrap();
        let year = drive.find("2024", &docs.id).unwrap();
        let a = drive.find("a.txt", &year.id).unwrap();
        assert_eq!(drive.content(&a.id).unwrap(), b"aaa");
    }

    #[tokio::test]
    async fn test_upload_overwrite_replaces_in_place() {
        let drive = Arc::new(MemoryDrive::new());
        let existing = drive.add_file("a.txt", "root", b"old");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"new content").unwrap();

        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let record = FileRecord::local("a.txt", 11, 0, hash_bytes(b"new content"));
        let results = executor
            .upload(
                &[record],
                dir.path(),
                "root",
                TransferOptions {
                    overwrite: true,
                    dry_run: false,
                },
            )
            .await;

        assert_eq!(
            results[0].outcome,
            TransferOutcome::Uploaded {
                bytes: 11,
                remote_id: existing.clone()
            }
        );
        assert_eq!(drive.files().len(), 1);
        assert_eq!(drive.content(&existing).unwrap(), b"new content");
    }

    #[tokio::test]
    async fn test_upload_dry_run_has_no_side_effects() {
        let drive = Arc::new(MemoryDrive::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
        std::fs::write(dir.path().join("x/y/z.txt"), b"z").unwrap();

        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let record = FileRecord::local("x/y/z.txt", 1, 0, hash_bytes(b"z"));
        let results = executor
            .upload(
                &[record],
                dir.path(),
                "root",
                TransferOptions {
                    overwrite: false,
                    dry_run: true,
                },
            )
            .await;

        assert_eq!(results[0].outcome, TransferOutcome::DryRun);
        assert_eq!(drive.folder_creations(), 0);
        assert_eq!(drive.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_missing_source_fails() {
        let drive = Arc::new(MemoryDrive::new());
        let dir = tempfile::tempdir().unwrap();
        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let record = FileRecord::local("ghost.txt", 1, 0, "h".into());
        let results = executor
            .upload(&[record], dir.path(), "root", TransferOptions::default())
            .await;
        assert!(results[0].outcome.is_failure());
    }

    #[tokio::test]
    async fn test_cancel_mid_download_removes_partial() {
        let drive = Arc::new(MemoryDrive::new().with_chunk_size(1));
        let id = drive.add_file("big.bin", "root", &[7u8; 4096]);
        let dir = tempfile::tempdir().unwrap();

        let flag = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(1);
        let watcher_flag = flag.clone();
        // 收到第一个有数据的进度事件后取消
        let watcher = tokio::spawn(async move {
            let mut first_done = None;
            while let Some(event) = rx.recv().await {
                if let TransferEvent::Progress { progress, .. } = event {
                    if progress.done() > 0 && first_done.is_none() {
                        first_done = Some(progress.done());
                        watcher_flag.store(true, Ordering::SeqCst);
                    }
                }
            }
            first_done
        });

        let executor = TransferExecutor::new(drive.clone(), fast_config())
            .with_cancel(flag)
            .with_progress(tx);
        let results = executor
            .download(&[remote_record(&drive, &id, "big.bin")], dir.path(), TransferOptions::default())
            .await;
        drop(executor);

        assert!(watcher.await.unwrap().is_some());
        assert_eq!(results[0].outcome, TransferOutcome::Cancelled);
        assert!(!dir.path().join("big.bin").exists());
        assert!(!dir.path().join("big.bin.gdsync-part").exists());
    }

    #[tokio::test]
    async fn test_same_path_downloads_do_not_interleave() {
        let drive = Arc::new(MemoryDrive::new().with_chunk_size(16));
        let first = drive.add_file("one.bin", "root", &[b'a'; 4096]);
        let second = drive.add_file("two.bin", "root", &[b'b'; 4096]);
        let dir = tempfile::tempdir().unwrap();

        let config = TransferConfig {
            max_concurrent_transfers: 4,
            ..fast_config()
        };
        let executor = TransferExecutor::new(drive.clone(), config);
        let records = vec![
            remote_record(&drive, &first, "same.bin"),
            remote_record(&drive, &second, "same.bin"),
        ];
        let options = TransferOptions {
            overwrite: true,
            dry_run: false,
        };
        let results = executor.download(&records, dir.path(), options).await;

        for result in &results {
            assert_eq!(result.outcome, TransferOutcome::Downloaded { bytes: 4096 });
        }
        let content = std::fs::read(dir.path().join("same.bin")).unwrap();
        assert_eq!(content.len(), 4096);
        assert!(content.iter().all(|b| *b == content[0]));
        assert!(!dir.path().join("same.bin.gdsync-part").exists());
    }

    #[tokio::test]
    async fn test_stalled_download_times_out() {
        let drive = Arc::new(MemoryDrive::new().with_chunk_size(2));
        let id = drive.add_file("slow.txt", "root", b"abcdef");
        drive.stall_downloads(&id);
        let dir = tempfile::tempdir().unwrap();

        let config = TransferConfig {
            max_retries: 0,
            chunk_timeout_secs: 1,
            ..fast_config()
        };
        let executor = TransferExecutor::new(drive.clone(), config);
        let results = executor
            .download(&[remote_record(&drive, &id, "slow.txt")], dir.path(), TransferOptions::default())
            .await;

        match &results[0].outcome {
            TransferOutcome::Failed { reason } => assert!(reason.contains("timed out"), "{}", reason),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!dir.path().join("slow.txt.gdsync-part").exists());
    }

    #[tokio::test]
    async fn test_upload_skips_existing_remote_without_overwrite() {
        let drive = Arc::new(MemoryDrive::new());
        let sub = drive.add_folder("sub", "root");
        let existing = drive.add_file("b.txt", &sub, b"remote");
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"local").unwrap();

        let executor = TransferExecutor::new(drive.clone(), fast_config());
        let record = FileRecord::local("sub/b.txt", 5, 0, hash_bytes(b"local"));
        let results = executor
            .upload(&[record], dir.path(), "root", TransferOptions::default())
            .await;

        assert_eq!(
            results[0].outcome,
            TransferOutcome::Skipped {
                reason: "remote file exists".to_string()
            }
        );
        assert_eq!(drive.upload_count(), 0);
        assert_eq!(drive.content(&existing).unwrap(), b"remote");
    }
}
