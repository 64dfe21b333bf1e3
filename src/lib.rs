pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

use config::{GlobalPaths, ProjectPaths, TransferConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::RemoteClient;

pub use crate::core::{SyncEngine, SyncOptions, SyncReport};
pub use error::{Result, SyncError};

/// 命令之间共享的运行环境
#[derive(Clone)]
pub struct AppState {
    pub global: GlobalPaths,
    pub project: ProjectPaths,
    /// Ctrl-C 时置位，传输和扫描在安全点检查
    pub cancelled: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(global: GlobalPaths, project: ProjectPaths) -> Self {
        Self {
            global,
            project,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 以当前目录为项目根目录，使用默认全局配置位置
    pub fn from_env(project_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let root = match project_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let global = GlobalPaths::default_location();
        std::fs::create_dir_all(global.dir())?;
        tracing::debug!("全局配置目录: {:?}, 项目目录: {:?}", global.dir(), root);
        Ok(Self::new(global, ProjectPaths::new(root)))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig::load(self.global.dir())
    }

    /// 使用给定客户端构建同步引擎
    pub fn engine_with(&self, client: Arc<dyn RemoteClient>) -> Result<SyncEngine> {
        Ok(
            SyncEngine::new(self.project.clone(), client, self.transfer_config())?
                .with_cancel(self.cancelled.clone()),
        )
    }

    /// 使用 Google Drive 客户端构建同步引擎
    ///
    /// 先检查项目是否已初始化，再读取令牌。
    pub fn engine(&self) -> Result<SyncEngine> {
        if !self.project.is_initialized() {
            return Err(SyncError::NotInitialized(
                self.project.root().display().to_string(),
            ));
        }
        self.engine_with(storage::create_client(&self.global)?)
    }
}
