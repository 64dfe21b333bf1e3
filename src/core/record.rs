//! 文件记录与同步计划的数据模型

use crate::error::{Result, SyncError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 全盘同步时本地根目录下的保留子目录
pub const DRIVE_DIR: &str = "Drive";

/// 云端根目录 ID
pub const ROOT_FOLDER_ID: &str = "root";

/// 单个文件的规范化描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 相对路径，使用 `/` 分隔
    pub path: String,
    pub size: u64,
    /// 修改时间（秒），远程文件可能缺失
    pub mtime: Option<i64>,
    /// 内容摘要（MD5 十六进制）
    pub content_hash: Option<String>,
    /// 远程文件 ID，仅远程记录携带
    pub remote_id: Option<String>,
}

impl FileRecord {
    pub fn local(path: impl Into<String>, size: u64, mtime: i64, content_hash: String) -> Self {
        Self {
            path: path.into(),
            size,
            mtime: Some(mtime),
            content_hash: Some(content_hash),
            remote_id: None,
        }
    }

    pub fn remote(
        remote_id: impl Into<String>,
        path: impl Into<String>,
        size: u64,
        mtime: Option<i64>,
        content_hash: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            mtime,
            content_hash,
            remote_id: Some(remote_id.into()),
        }
    }

    /// 复制一份记录并替换路径
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// 复制一份记录并替换远程 ID
    pub fn with_remote_id(&self, remote_id: Option<String>) -> Self {
        Self {
            remote_id,
            ..self.clone()
        }
    }

    /// 摘要存在且非空
    pub fn has_hash(&self) -> bool {
        self.content_hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// 路径的最后一段
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// 路径中的目录部分（不含文件名）
    pub fn parent_segments(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = self.path.split('/').filter(|s| !s.is_empty()).collect();
        parts.pop();
        parts
    }

    /// 记录在本地根目录下对应的文件
    pub fn local_path(&self, root: &Path) -> PathBuf {
        self.path
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

/// 按插入顺序保存的 path -> FileRecord 映射，路径必须唯一
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMap {
    records: IndexMap<String, FileRecord>,
}

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从记录序列构建，重复路径视为错误
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Result<Self> {
        let mut map = Self::new();
        for record in records {
            map.insert(record)?;
        }
        Ok(map)
    }

    /// 插入记录；路径已存在时返回 `DuplicatePath`，不会覆盖
    pub fn insert(&mut self, record: FileRecord) -> Result<()> {
        if self.records.contains_key(&record.path) {
            return Err(SyncError::DuplicatePath(record.path));
        }
        self.records.insert(record.path.clone(), record);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// 只保留满足条件的记录，顺序不变
    pub fn retain(&mut self, mut keep: impl FnMut(&FileRecord) -> bool) {
        self.records.retain(|_, record| keep(record));
    }

    pub fn into_records(self) -> Vec<FileRecord> {
        self.records.into_values().collect()
    }
}

/// 同步范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// 单个云端文件夹（扁平命名空间）
    Folder(String),
    /// 整个云盘（层级路径由父链接重建）
    FullDrive,
}

impl SyncScope {
    /// 本地同步根目录
    pub fn local_root(&self, project_root: &Path) -> PathBuf {
        match self {
            SyncScope::Folder(_) => project_root.to_path_buf(),
            SyncScope::FullDrive => project_root.join(DRIVE_DIR),
        }
    }

    /// 上传时的云端根文件夹 ID
    pub fn remote_root_id(&self) -> &str {
        match self {
            SyncScope::Folder(id) => id,
            SyncScope::FullDrive => ROOT_FOLDER_ID,
        }
    }

    /// 配置文件中的取值
    pub fn config_value(&self) -> &'static str {
        match self {
            SyncScope::Folder(_) => "folder",
            SyncScope::FullDrive => "full_drive",
        }
    }
}

impl std::fmt::Display for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncScope::Folder(id) => write!(f, "folder {}", id),
            SyncScope::FullDrive => write!(f, "full drive"),
        }
    }
}

/// 两侧都存在且无法确认内容一致的路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub local: FileRecord,
    pub remote: FileRecord,
}

/// 对比结果，执行任何传输之前的分类
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub uploads: Vec<FileRecord>,
    pub downloads: Vec<FileRecord>,
    pub unchanged: Vec<FileRecord>,
    pub conflicts: Vec<Conflict>,
}

impl Plan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            upload_count: self.uploads.len(),
            upload_bytes: self.uploads.iter().map(|r| r.size).sum(),
            download_count: self.downloads.len(),
            download_bytes: self.downloads.iter().map(|r| r.size).sum(),
            unchanged_count: self.unchanged.len(),
            conflict_count: self.conflicts.len(),
        }
    }

    /// 是否有需要执行的操作
    pub fn has_work(&self) -> bool {
        !(self.uploads.is_empty() && self.downloads.is_empty() && self.conflicts.is_empty())
    }

    /// 计划中出现过的所有路径
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.uploads
            .iter()
            .chain(&self.downloads)
            .chain(&self.unchanged)
            .map(|r| r.path.as_str())
            .chain(self.conflicts.iter().map(|c| c.path.as_str()))
    }
}

/// 计划统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub upload_count: usize,
    pub upload_bytes: u64,
    pub download_count: usize,
    pub download_bytes: u64,
    pub unchanged_count: usize,
    pub conflict_count: usize,
}

impl PlanSummary {
    pub fn total_files(&self) -> usize {
        self.upload_count + self.download_count + self.unchanged_count + self.conflict_count
    }
}
