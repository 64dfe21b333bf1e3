//! 冲突日志 `.gdsync/conflicts.json`，只追加

use crate::core::record::{Conflict, FileRecord};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 时间戳格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideInfo {
    pub size: Option<u64>,
    pub mtime: Option<i64>,
}

impl From<&FileRecord> for SideInfo {
    fn from(record: &FileRecord) -> Self {
        Self {
            size: Some(record.size),
            mtime: record.mtime,
        }
    }
}

/// 一次冲突处理的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictLogEntry {
    pub timestamp: String,
    pub path: String,
    pub local: SideInfo,
    pub drive: SideInfo,
    pub strategy: String,
    pub result: String,
}

impl ConflictLogEntry {
    pub fn new(conflict: &Conflict, strategy: &str, result: &str) -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            path: conflict.path.clone(),
            local: SideInfo::from(&conflict.local),
            drive: SideInfo::from(&conflict.remote),
            strategy: strategy.to_string(),
            result: result.to_string(),
        }
    }
}

pub struct ConflictLog {
    path: PathBuf,
}

impl ConflictLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_raw(&self) -> Result<Vec<serde_json::Value>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// 读取全部记录，文件不存在时为空；格式不符的旧条目跳过
    pub fn load(&self) -> Result<Vec<ConflictLogEntry>> {
        let raw = self.load_raw()?;
        let total = raw.len();
        let entries: Vec<ConflictLogEntry> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if entries.len() < total {
            debug!("冲突日志中有 {} 条无法识别的记录", total - entries.len());
        }
        Ok(entries)
    }

    /// 追加记录：读取原数组、追加、写临时文件后替换
    ///
    /// 原有条目按原样保留，即使字段与当前格式不同。
    pub fn append(&self, entries: &[ConflictLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut all = self.load_raw()?;
        for entry in entries {
            all.push(serde_json::to_value(entry)?);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&all)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!("冲突日志追加 {} 条，共 {} 条", entries.len(), all.len());
        Ok(())
    }
}
