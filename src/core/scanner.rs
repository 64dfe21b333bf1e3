use crate::config::METADATA_DIR;
use crate::core::record::{FileRecord, RecordMap};
use crate::core::transfer::PARTIAL_SUFFIX;
use crate::error::{Result, SyncError};
use md5::{Digest, Md5};
use regex::Regex;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 计算摘要时每次读取的块大小
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 计算内存数据的 MD5 摘要
pub fn hash_bytes(data: &[u8]) -> String {
    to_hex(&Md5::digest(data))
}

/// 按固定块大小流式计算文件的 MD5 摘要
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// 忽略文件中的单条规则
#[derive(Debug, Clone)]
struct IgnoreRule {
    regex: Regex,
    /// 以 `/` 结尾：只匹配目录
    dir_only: bool,
    /// 含 `/`：匹配完整相对路径，否则匹配任一路径段
    anchored: bool,
}

impl IgnoreRule {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let dir_only = line.ends_with('/');
        let pattern = line.trim_end_matches('/').trim_start_matches('/');
        if pattern.is_empty() {
            return None;
        }
        match Regex::new(&glob_to_regex(pattern)) {
            Ok(regex) => Some(Self {
                regex,
                dir_only,
                anchored: pattern.contains('/'),
            }),
            Err(e) => {
                warn!("忽略无效的规则 {}: {}", line, e);
                None
            }
        }
    }

    fn matches(&self, segments: &[&str], is_dir: bool) -> bool {
        // 只匹配目录时，文件自身的名称不参与
        let dir_count = if is_dir || !self.dir_only {
            segments.len()
        } else {
            segments.len().saturating_sub(1)
        };

        if self.anchored {
            (1..=dir_count).any(|n| self.regex.is_match(&segments[..n].join("/")))
        } else {
            segments[..dir_count].iter().any(|s| self.regex.is_match(s))
        }
    }
}

/// 简单的 glob 转正则：`**` 跨目录，`*` 和 `?` 不跨目录
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

/// 项目忽略规则（`.gdsync/.gdsyncignore`）
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    pub fn parse(text: &str) -> Self {
        Self {
            rules: text.lines().filter_map(IgnoreRule::parse).collect(),
        }
    }

    /// 读取忽略文件，不存在时返回空规则
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SyncError::LocalScanFailure(format!(
                "cannot read ignore file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 判断相对路径是否被忽略
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
        !segments.is_empty() && self.rules.iter().any(|r| r.matches(&segments, is_dir))
    }
}

/// 遍历得到、尚未计算摘要的文件
struct WalkedFile {
    rel_path: String,
    abs_path: PathBuf,
    size: u64,
    mtime: i64,
}

/// 本地目录扫描器
pub struct LocalScanner {
    max_concurrent: usize,
    ignore: IgnoreRules,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for LocalScanner {
    fn default() -> Self {
        Self::new(8)
    }
}

impl LocalScanner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            ignore: IgnoreRules::default(),
            cancel_flag: None,
        }
    }

    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 扫描本地根目录，返回 path -> FileRecord
    pub async fn scan(&self, root: &Path) -> Result<RecordMap> {
        if !root.exists() {
            debug!("本地目录不存在，视为空: {}", root.display());
            return Ok(RecordMap::new());
        }
        if !root.is_dir() {
            return Err(SyncError::LocalScanFailure(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        info!("开始扫描本地目录: {}", root.display());

        let walk_root = root.to_path_buf();
        let ignore = self.ignore.clone();
        let cancel = self.cancel_flag.clone();
        let (files, ignored) = tokio::task::spawn_blocking(move || walk(&walk_root, &ignore, cancel))
            .await
            .map_err(|e| SyncError::LocalScanFailure(format!("walk task failed: {}", e)))??;

        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(files.len());

        for file in files {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SyncError::LocalScanFailure(e.to_string()))?;

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let hash = hash_file(&file.abs_path);
                (file, hash)
            });
            handles.push(handle);
        }

        // 按遍历顺序合并
        let mut records = RecordMap::new();
        for handle in handles {
            let (file, hash) = handle
                .await
                .map_err(|e| SyncError::LocalScanFailure(format!("hash task failed: {}", e)))?;
            let hash = hash.map_err(|e| {
                SyncError::LocalScanFailure(format!("cannot read {}: {}", file.abs_path.display(), e))
            })?;
            records.insert(FileRecord::local(file.rel_path, file.size, file.mtime, hash))?;
        }

        info!("本地扫描完成: {} 个文件, {} 个被忽略", records.len(), ignored);
        Ok(records)
    }
}

/// 同步遍历目录，跳过元数据目录和被忽略的条目
fn walk(
    root: &Path,
    ignore: &IgnoreRules,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(Vec<WalkedFile>, usize)> {
    let mut files = Vec::new();
    let mut ignored = 0usize;

    let entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name().to_str() != Some(METADATA_DIR));

    for entry in entries {
        if cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(SyncError::Cancelled);
        }

        let entry = entry.map_err(|e| SyncError::LocalScanFailure(e.to_string()))?;
        if entry.depth() == 0 {
            continue;
        }

        let rel_path = relative_path(root, entry.path())?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            debug!("跳过非普通文件: {}", rel_path);
            continue;
        }
        // 未完成的下载
        if rel_path.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        if ignore.is_ignored(&rel_path, false) {
            debug!("忽略文件: {}", rel_path);
            ignored += 1;
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| SyncError::LocalScanFailure(format!("{}: {}", rel_path, e)))?;
        let mtime = metadata
            .modified()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp())
            .unwrap_or(0);

        files.push(WalkedFile {
            rel_path,
            abs_path: entry.path().to_path_buf(),
            size: metadata.len(),
            mtime,
        });
    }

    Ok((files, ignored))
}

/// 相对路径，统一使用 `/`
fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|e| SyncError::LocalScanFailure(format!("{}: {}", path.display(), e)))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_hash_matches_known_digest() {
        assert_eq!(hash_bytes(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(hash_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_hash_file_independent_of_block_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..HASH_BLOCK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("big.bin");
        fs::write(&path, &data).unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_ignore_rules() {
        let rules = IgnoreRules::parse("# comment\n.git/\nnode_modules/\n*.log\n\nbuild/**/*.o\n");
        assert_eq!(rules.len(), 4);
        assert!(rules.is_ignored("app.log", false));
        assert!(rules.is_ignored("logs/deep/app.log", false));
        assert!(rules.is_ignored(".git/HEAD", false));
        assert!(rules.is_ignored("web/node_modules/pkg/index.js", false));
        assert!(rules.is_ignored("build/x/y/main.o", false));
        assert!(rules.is_ignored("build/main.o", false));
        assert!(!rules.is_ignored("src/main.rs", false));
        // 目录规则不匹配同名文件
        assert!(!rules.is_ignored("node_modules", false));
        assert!(!rules.is_ignored("catalog", false));
    }

    #[tokio::test]
    async fn test_scan_skips_metadata_and_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"a");
        write(dir.path(), "sub/b.txt", b"bb");
        write(dir.path(), ".gdsync/config.json", b"{}");
        write(dir.path(), "sub/.gdsync/state.json", b"{}");
        write(dir.path(), "sub/c.bin.gdsync-part", b"partial");

        let records = LocalScanner::new(2).scan(dir.path()).await.unwrap();
        let paths: Vec<_> = records.paths().collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);

        let b = records.get("sub/b.txt").unwrap();
        assert_eq!(b.size, 2);
        assert_eq!(b.content_hash.as_deref(), Some(hash_bytes(b"bb").as_str()));
        assert!(b.remote_id.is_none());
    }

    #[tokio::test]
    async fn test_scan_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = LocalScanner::default()
            .scan(&dir.path().join("nope"))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_scan_honours_ignore_rules() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.txt", b"k");
        write(dir.path(), "debug.log", b"l");
        write(dir.path(), "node_modules/x/index.js", b"j");

        let scanner = LocalScanner::new(4).with_ignore(IgnoreRules::parse("node_modules/\n*.log"));
        let records = scanner.scan(dir.path()).await.unwrap();
        let paths: Vec<_> = records.paths().collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn test_scan_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"a");
        let flag = Arc::new(AtomicBool::new(true));
        let err = LocalScanner::new(1)
            .with_cancel(flag)
            .scan(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
