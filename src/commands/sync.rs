//! `run` / `pull drive` / `push local`

use super::prompt::{self, choose_drive_dir, LineReader, Prompter, TerminalChooser};
use super::ui;
use super::{EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_OK};
use crate::core::conflict::{ConflictResolver, ResolutionStrategy};
use crate::core::engine::{SyncEngine, SyncMode, SyncOptions, SyncStatus};
use crate::core::record::SyncScope;
use crate::error::SyncError;
use crate::AppState;
use anyhow::Context;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

const PROGRESS_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub mode: SyncMode,
    /// 自动确认所有提示
    pub yes: bool,
    pub dry_run: bool,
    pub download_dir: Option<String>,
    pub strategy: ResolutionStrategy,
}

impl RunArgs {
    /// `pull drive`：只下载，冲突以云端为准
    pub fn pull(yes: bool, dry_run: bool, download_dir: Option<String>) -> Self {
        Self {
            mode: SyncMode::Pull,
            yes,
            dry_run,
            download_dir,
            strategy: ResolutionStrategy::PreferRemote,
        }
    }

    /// `push local`：只上传，冲突以本地为准
    pub fn push(yes: bool, dry_run: bool) -> Self {
        Self {
            mode: SyncMode::Push,
            yes,
            dry_run,
            download_dir: None,
            strategy: ResolutionStrategy::PreferLocal,
        }
    }

    fn mode_downloads(&self) -> bool {
        self.mode != SyncMode::Push
    }
}

/// 去掉首尾的 `/`，空串视为未指定
fn normalize_dir(dir: Option<String>) -> Option<String> {
    dir.map(|d| d.trim().trim_matches('/').to_string())
        .filter(|d| !d.is_empty())
}

/// 下载范围的选择结果
enum DownloadScope {
    Filter(Option<String>),
    Aborted,
}

/// 全盘模式且未指定目录时询问下载范围
async fn resolve_download_dir<R: LineReader, W: Write>(
    engine: &SyncEngine,
    args: &RunArgs,
    prompter: &mut Prompter<R, W>,
) -> anyhow::Result<DownloadScope> {
    let given = normalize_dir(args.download_dir.clone());
    let full_drive = matches!(engine.scope(), SyncScope::FullDrive);
    if !full_drive || given.is_some() || args.yes || !args.mode_downloads() {
        return Ok(DownloadScope::Filter(given));
    }

    prompter.say("\nThis project is configured for full Google Drive sync.\n")?;
    prompter.say("What would you like to download?")?;
    prompter.say("  1) Entire Google Drive")?;
    prompter.say("  2) Choose a specific directory")?;

    if prompter.ask("\n> ")?.as_deref() != Some("2") {
        return Ok(DownloadScope::Filter(None));
    }
    Ok(match choose_drive_dir(prompter, engine.client().as_ref()).await? {
        Some(dir) => DownloadScope::Filter(normalize_dir(Some(dir))),
        None => DownloadScope::Aborted,
    })
}

fn exit_code(status: SyncStatus) -> i32 {
    match status {
        SyncStatus::Completed | SyncStatus::DryRun => EXIT_OK,
        SyncStatus::Failed => EXIT_FAILURE,
        SyncStatus::Cancelled => EXIT_INTERRUPTED,
    }
}

/// 使用 Google Drive 执行同步
pub async fn run(state: &AppState, args: RunArgs) -> anyhow::Result<i32> {
    let engine = state.engine().context("cannot start sync")?;
    let mut prompter = prompt::stdio();
    let resolver = ConflictResolver::new(args.strategy.clone())
        .with_auto_confirm(args.yes)
        .with_chooser(Arc::new(TerminalChooser));
    run_with(engine, args, &mut prompter, resolver, io::stdout()).await
}

/// 规划、确认并执行；引擎和交互均由调用方提供
pub async fn run_with<R: LineReader, W: Write, O: Write>(
    engine: SyncEngine,
    args: RunArgs,
    prompter: &mut Prompter<R, W>,
    resolver: ConflictResolver,
    mut out: O,
) -> anyhow::Result<i32> {
    let path_filter = match resolve_download_dir(&engine, &args, prompter).await? {
        DownloadScope::Filter(filter) => filter,
        DownloadScope::Aborted => {
            writeln!(out, "Aborted.")?;
            return Ok(EXIT_FAILURE);
        }
    };

    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_SIZE);
    let engine = engine.with_progress(tx);

    let plan = engine.plan(path_filter.as_deref()).await?;
    ui::write_plan(&mut out, &plan, args.mode)?;
    ui::write_conflicts(&mut out, &plan.conflicts)?;

    let s = plan.summary();
    let pending = match args.mode {
        SyncMode::Bidirectional => s.download_count + s.upload_count,
        SyncMode::Pull => s.download_count,
        SyncMode::Push => s.upload_count,
    } + s.conflict_count;
    if pending == 0 {
        writeln!(out, "\nEverything is up to date.")?;
        return Ok(EXIT_OK);
    }

    if !args.dry_run && !args.yes {
        let question = match args.mode {
            SyncMode::Pull => "\nProceed with downloads?",
            SyncMode::Push => "\nProceed with uploads?",
            SyncMode::Bidirectional => "\nProceed with sync?",
        };
        if !prompter.confirm(question)? {
            writeln!(out, "Aborted.")?;
            return Ok(EXIT_OK);
        }
    }

    let printer = tokio::spawn(ui::progress_printer(rx));
    let options = SyncOptions {
        mode: args.mode,
        dry_run: args.dry_run,
        path_filter,
    };
    let result = engine.execute(&plan, &options, &resolver).await;
    // 关闭进度通道，等待输出结束
    drop(engine);
    let _ = printer.await;

    let report = match result {
        Ok(report) => report,
        Err(SyncError::Cancelled) => {
            writeln!(out, "\nAborted.")?;
            return Ok(EXIT_INTERRUPTED);
        }
        Err(e) => return Err(e.into()),
    };

    ui::write_report(&mut out, &report)?;
    info!("运行 {} 结束: {:?}", report.run_id, report.status);
    Ok(exit_code(report.status))
}
