use crate::config::{ProjectConfig, ProjectPaths, ProjectState, TransferConfig};
use crate::core::conflict::{ConflictOutcome, ConflictResolver};
use crate::core::conflict_log::{ConflictLog, ConflictLogEntry};
use crate::core::reconcile::reconcile;
use crate::core::record::{Plan, PlanSummary, RecordMap, SyncScope};
use crate::core::remote::{apply_path_filter, RemoteLister};
use crate::core::scanner::{IgnoreRules, LocalScanner};
use crate::core::transfer::{TransferEvent, TransferExecutor, TransferOptions, TransferOutcome, TransferResult};
use crate::error::{Result, SyncError};
use crate::storage::RemoteClient;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// 下载、上传并处理冲突
    Bidirectional,
    /// 只下载
    Pull,
    /// 只上传
    Push,
}

impl SyncMode {
    fn downloads(&self) -> bool {
        matches!(self, SyncMode::Bidirectional | SyncMode::Pull)
    }

    fn uploads(&self) -> bool {
        matches!(self, SyncMode::Bidirectional | SyncMode::Push)
    }
}

/// 单次运行的最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    DryRun,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub dry_run: bool,
    /// 全盘模式下只同步该路径（及其子路径）
    pub path_filter: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Bidirectional,
            dry_run: false,
            path_filter: None,
        }
    }
}

/// 同步报告
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: String,
    pub mode: SyncMode,
    pub status: SyncStatus,
    pub started_at: i64,
    pub finished_at: i64,
    pub summary: PlanSummary,
    pub transfers: Vec<TransferResult>,
    pub conflicts: Vec<ConflictOutcome>,
}

impl SyncReport {
    /// 所有传输结果（含冲突处理产生的）
    pub fn all_results(&self) -> impl Iterator<Item = &TransferResult> {
        self.transfers
            .iter()
            .chain(self.conflicts.iter().flat_map(|c| c.results.iter()))
    }

    pub fn failures(&self) -> Vec<&TransferResult> {
        self.all_results().filter(|r| r.outcome.is_failure()).collect()
    }

    pub fn skipped(&self) -> Vec<&TransferResult> {
        self.all_results()
            .filter(|r| matches!(r.outcome, TransferOutcome::Skipped { .. }))
            .collect()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.all_results().map(|r| r.outcome.bytes()).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.all_results().any(|r| r.outcome.is_failure())
    }
}

/// 同步引擎
pub struct SyncEngine {
    project: ProjectPaths,
    config: ProjectConfig,
    scope: SyncScope,
    client: Arc<dyn RemoteClient>,
    transfer: TransferConfig,
    cancelled: Arc<AtomicBool>,
    progress_tx: Option<mpsc::Sender<TransferEvent>>,
}

impl SyncEngine {
    /// 加载项目配置；未初始化或范围无效时失败
    pub fn new(
        project: ProjectPaths,
        client: Arc<dyn RemoteClient>,
        transfer: TransferConfig,
    ) -> Result<Self> {
        let config = ProjectConfig::load(&project)?;
        let scope = config.sync_scope()?;
        Ok(Self {
            project,
            config,
            scope,
            client,
            transfer,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress_tx: None,
        })
    }

    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn scope(&self) -> &SyncScope {
        &self.scope
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    /// 本地同步根目录
    pub fn local_root(&self) -> PathBuf {
        self.scope.local_root(self.project.root())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 同时扫描本地和列出云端
    pub async fn snapshot(&self, path_filter: Option<&str>) -> Result<(RecordMap, RecordMap)> {
        let filter = match (&self.scope, path_filter) {
            (SyncScope::FullDrive, Some(f)) => Some(f),
            (SyncScope::Folder(_), Some(f)) => {
                warn!("文件夹模式不支持路径过滤，忽略: {}", f);
                None
            }
            _ => None,
        };

        let local_root = self.local_root();
        let scanner = LocalScanner::new(self.transfer.max_concurrent_hashes)
            .with_ignore(IgnoreRules::load(&self.project.ignore_file())?)
            .with_cancel(self.cancelled.clone());
        let lister = RemoteLister::new(self.client.clone());

        let (local, remote) = tokio::join!(scanner.scan(&local_root), lister.list(&self.scope, filter));
        let mut local = local?;
        let remote = remote?;

        if let Some(f) = filter {
            let kept = apply_path_filter(local.into_records(), f);
            local = RecordMap::from_records(kept)?;
        }
        Ok((local, remote))
    }

    /// 生成同步计划，不做任何修改
    pub async fn plan(&self, path_filter: Option<&str>) -> Result<Plan> {
        let (local, remote) = self.snapshot(path_filter).await?;
        let plan = reconcile(&local, &remote);
        let summary = plan.summary();
        info!(
            "同步计划: 上传 {}, 下载 {}, 未变化 {}, 冲突 {}",
            summary.upload_count, summary.download_count, summary.unchanged_count, summary.conflict_count
        );
        Ok(plan)
    }

    /// 按模式执行计划
    pub async fn execute(
        &self,
        plan: &Plan,
        options: &SyncOptions,
        resolver: &ConflictResolver,
    ) -> Result<SyncReport> {
        let started_at = chrono::Utc::now().timestamp();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("开始同步 {} ({:?}, dry_run={})", run_id, options.mode, options.dry_run);

        let mut executor = TransferExecutor::new(self.client.clone(), self.transfer.clone())
            .with_cancel(self.cancelled.clone());
        if let Some(tx) = &self.progress_tx {
            executor = executor.with_progress(tx.clone());
        }

        let local_root = self.local_root();
        let remote_root = self.scope.remote_root_id();
        let fresh = TransferOptions {
            overwrite: false,
            dry_run: options.dry_run,
        };

        let mut transfers = Vec::new();
        if options.mode.downloads() && !plan.downloads.is_empty() {
            transfers.extend(executor.download(&plan.downloads, &local_root, fresh).await);
        }
        if options.mode.uploads() && !plan.uploads.is_empty() && !self.is_cancelled() {
            transfers.extend(
                executor
                    .upload(&plan.uploads, &local_root, remote_root, fresh)
                    .await,
            );
        }

        let mut conflicts = Vec::new();
        if !plan.conflicts.is_empty() && !self.is_cancelled() {
            let mut taken: HashSet<String> = plan.all_paths().map(String::from).collect();
            conflicts = resolver
                .apply(
                    &plan.conflicts,
                    &mut taken,
                    &executor,
                    &local_root,
                    remote_root,
                    options.dry_run,
                )
                .await;

            if !options.dry_run {
                let strategy = resolver.strategy().name();
                let entries: Vec<ConflictLogEntry> = conflicts
                    .iter()
                    .map(|c| ConflictLogEntry::new(&c.conflict, strategy, c.result_label()))
                    .collect();
                ConflictLog::new(self.project.conflict_log()).append(&entries)?;
            }
        }

        let mut report = SyncReport {
            run_id,
            mode: options.mode,
            status: SyncStatus::Completed,
            started_at,
            finished_at: chrono::Utc::now().timestamp(),
            summary: plan.summary(),
            transfers,
            conflicts,
        };

        report.status = if self.is_cancelled() {
            SyncStatus::Cancelled
        } else if report.has_failures() {
            SyncStatus::Failed
        } else if options.dry_run {
            SyncStatus::DryRun
        } else {
            SyncStatus::Completed
        };

        if report.status == SyncStatus::Completed {
            let mut state = ProjectState::load(&self.project)?;
            state.mark_synced();
            state.save(&self.project)?;
        }

        info!(
            "同步结束 {}: {:?}, {} 字节, {} 个失败",
            report.run_id,
            report.status,
            report.bytes_transferred(),
            report.failures().len()
        );
        Ok(report)
    }

    /// 规划并执行
    pub async fn run(&self, options: &SyncOptions, resolver: &ConflictResolver) -> Result<SyncReport> {
        let plan = self.plan(options.path_filter.as_deref()).await?;
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.execute(&plan, options, resolver).await
    }
}
