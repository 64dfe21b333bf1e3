//! 应用配置模块
//!
//! 全局配置位于 `~/.config/gdsync/`，项目配置位于项目根目录下的 `.gdsync/`。

use crate::core::record::SyncScope;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 项目元数据目录，扫描时永远排除
pub const METADATA_DIR: &str = ".gdsync";
pub const CONFIG_FILE: &str = "config.json";
pub const STATE_FILE: &str = "state.json";
pub const IGNORE_FILE: &str = ".gdsyncignore";
pub const CONFLICT_LOG_FILE: &str = "conflicts.json";
pub const README_FILE: &str = "README.txt";
pub const TOKEN_FILE: &str = "token.json";

const DEFAULT_IGNORE: &str = "# Files to ignore for gdsync\n.git/\nnode_modules/\n*.log\n";
const README_TEXT: &str = "This directory is managed by gdsync.\n\
Do not edit files manually unless you know what you're doing.\n";

/// 全局配置目录
#[derive(Debug, Clone)]
pub struct GlobalPaths {
    dir: PathBuf,
}

impl GlobalPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 默认位置 `<config_dir>/gdsync`
    pub fn default_location() -> Self {
        let dir = dirs::config_dir()
            .map(|p| p.join("gdsync"))
            .unwrap_or_else(|| PathBuf::from(".gdsync-global"));
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn token_file(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }
}

/// 项目目录
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.meta_dir().join(CONFIG_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.meta_dir().join(STATE_FILE)
    }

    pub fn ignore_file(&self) -> PathBuf {
        self.meta_dir().join(IGNORE_FILE)
    }

    pub fn conflict_log(&self) -> PathBuf {
        self.meta_dir().join(CONFLICT_LOG_FILE)
    }

    pub fn is_initialized(&self) -> bool {
        self.meta_dir().is_dir()
    }

    /// 初始化项目：创建 `.gdsync/` 及其中的配置、状态、忽略文件和说明
    pub fn initialize(&self, scope: &SyncScope) -> Result<ProjectConfig> {
        if self.is_initialized() {
            return Err(SyncError::AlreadyInitialized(self.root.display().to_string()));
        }

        fs::create_dir_all(self.meta_dir())?;

        let config = ProjectConfig::new(&self.root, scope);
        config.save(self)?;
        ProjectState::default().save(self)?;
        fs::write(self.ignore_file(), DEFAULT_IGNORE)?;
        fs::write(self.meta_dir().join(README_FILE), README_TEXT)?;

        tracing::info!("项目已初始化: {:?} ({})", self.root, scope);
        Ok(config)
    }
}

/// 项目配置 `.gdsync/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub version: String,
    pub project_root: String,
    pub sync_scope: String,
    pub drive_folder_id: Option<String>,
    pub created_at: String,
}

impl ProjectConfig {
    pub fn new(root: &Path, scope: &SyncScope) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            project_root: root.display().to_string(),
            sync_scope: scope.config_value().to_string(),
            drive_folder_id: match scope {
                SyncScope::Folder(id) => Some(id.clone()),
                SyncScope::FullDrive => None,
            },
            created_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        }
    }

    /// 加载项目配置；未初始化时返回 `NotInitialized`
    pub fn load(paths: &ProjectPaths) -> Result<Self> {
        let path = paths.config_file();
        if !path.exists() {
            return Err(SyncError::NotInitialized(paths.root().display().to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, paths: &ProjectPaths) -> Result<()> {
        fs::write(paths.config_file(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 解析同步范围
    pub fn sync_scope(&self) -> Result<SyncScope> {
        match self.sync_scope.as_str() {
            "folder" => match self.drive_folder_id.as_deref() {
                Some(id) if !id.trim().is_empty() => Ok(SyncScope::Folder(id.trim().to_string())),
                _ => Err(SyncError::Config(
                    "sync_scope is 'folder' but drive_folder_id is missing".to_string(),
                )),
            },
            "full_drive" => Ok(SyncScope::FullDrive),
            other => Err(SyncError::UnknownSyncScope(other.to_string())),
        }
    }
}

/// 项目状态 `.gdsync/state.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectState {
    pub last_sync: Option<String>,
    #[serde(default)]
    pub files: serde_json::Map<String, serde_json::Value>,
}

impl ProjectState {
    /// 加载状态，文件不存在时返回空状态
    pub fn load(paths: &ProjectPaths) -> Result<Self> {
        let path = paths.state_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, paths: &ProjectPaths) -> Result<()> {
        fs::write(paths.state_file(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 记录一次成功同步的时间
    pub fn mark_synced(&mut self) {
        self.last_sync = Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 分块大小（KB）
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: u64,
    /// 最大并发传输数
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// 本地哈希计算的最大并发数
    #[serde(default = "default_max_concurrent_hashes")]
    pub max_concurrent_hashes: usize,
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 单个分块的超时（秒）
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

const MAX_CHUNK_SIZE_KB: u64 = 64 * 1024;
const MAX_CONCURRENCY: usize = 64;
const MAX_RETRIES: u32 = 10;
const MAX_RETRY_BASE_DELAY_MS: u64 = 60_000;
const MAX_CHUNK_TIMEOUT_SECS: u64 = 3600;

fn default_chunk_size_kb() -> u64 {
    1024 // 1MB
}

fn default_max_concurrent_transfers() -> usize {
    4
}

fn default_max_concurrent_hashes() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_chunk_timeout_secs() -> u64 {
    60
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_kb: default_chunk_size_kb(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            max_concurrent_hashes: default_max_concurrent_hashes(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
        }
    }
}

impl TransferConfig {
    /// 从全局配置文件加载传输配置
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join(CONFIG_FILE);
        if config_file.exists() {
            if let Ok(content) = fs::read_to_string(&config_file) {
                if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(transfer) = config.get("transfer") {
                        if let Ok(t) = serde_json::from_value::<TransferConfig>(transfer.clone()) {
                            return t.clamped();
                        }
                    }
                }
            }
        }
        Self::default()
    }

    /// 保存传输配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        fs::create_dir_all(config_dir)?;
        let config_file = config_dir.join(CONFIG_FILE);

        // 读取现有配置
        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        config["transfer"] = serde_json::to_value(self)?;

        fs::write(&config_file, serde_json::to_string_pretty(&config)?)
    }

    /// 把手工编辑的取值限制在可用范围内
    pub fn clamped(self) -> Self {
        Self {
            chunk_size_kb: self.chunk_size_kb.clamp(1, MAX_CHUNK_SIZE_KB),
            max_concurrent_transfers: self.max_concurrent_transfers.clamp(1, MAX_CONCURRENCY),
            max_concurrent_hashes: self.max_concurrent_hashes.clamp(1, MAX_CONCURRENCY),
            max_retries: self.max_retries.min(MAX_RETRIES),
            retry_base_delay_ms: self.retry_base_delay_ms.min(MAX_RETRY_BASE_DELAY_MS),
            chunk_timeout_secs: self.chunk_timeout_secs.clamp(1, MAX_CHUNK_TIMEOUT_SECS),
        }
    }

    /// 分块大小（字节），1KB 到 64MB
    pub fn chunk_size(&self) -> usize {
        (self.chunk_size_kb.clamp(1, MAX_CHUNK_SIZE_KB) * 1024) as usize
    }
}
