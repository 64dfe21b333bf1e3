//! 终端输出：计划、冲突报告、进度条和运行结果

use crate::core::engine::{SyncMode, SyncReport, SyncStatus};
use crate::core::record::{Conflict, FileRecord, Plan};
use crate::core::transfer::{Direction, Progress, TransferEvent, TransferOutcome};
use std::io::{self, Write};
use tokio::sync::mpsc;

const BAR_WIDTH: usize = 30;

/// 人类可读的大小，保留一位小数
pub fn format_size(bytes: u64) -> String {
    let mut n = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if n < 1024.0 {
            return format!("{:.1} {}", n, unit);
        }
        n /= 1024.0;
    }
    format!("{:.1} TB", n)
}

/// `[#####-----]  42%`，总量未知时为 `[?]`
pub fn progress_bar(done: u64, total: u64) -> String {
    if total == 0 {
        return "[?]".to_string();
    }
    let ratio = (done as f64 / total as f64).min(1.0);
    let filled = (ratio * BAR_WIDTH as f64) as usize;
    format!(
        "[{}{}] {:3}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        (ratio * 100.0) as u32
    )
}

/// 本地时区的 `%Y-%m-%d %H:%M:%S`
pub fn fmt_time(ts: Option<i64>) -> String {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Download => "↓",
        Direction::Upload => "↑",
    }
}

fn write_records(
    out: &mut impl Write,
    title: &str,
    direction: Direction,
    records: &[FileRecord],
) -> io::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    writeln!(out, "{}:", title)?;
    for r in records {
        writeln!(
            out,
            " {} {} | {} bytes | {}",
            arrow(direction),
            r.path,
            r.size,
            fmt_time(r.mtime)
        )?;
    }
    writeln!(out)
}

/// 打印同步计划；只列出该模式会执行的方向
pub fn write_plan(out: &mut impl Write, plan: &Plan, mode: SyncMode) -> io::Result<()> {
    writeln!(out, "\n🔍 Sync plan\n")?;
    if mode != SyncMode::Push {
        write_records(out, "Downloads", Direction::Download, &plan.downloads)?;
    }
    if mode != SyncMode::Pull {
        write_records(out, "Uploads", Direction::Upload, &plan.uploads)?;
    }

    let s = plan.summary();
    writeln!(out, "Summary:")?;
    writeln!(out, "Uploads:   {} ({})", s.upload_count, format_size(s.upload_bytes))?;
    writeln!(out, "Downloads: {} ({})", s.download_count, format_size(s.download_bytes))?;
    writeln!(out, "Unchanged: {}", s.unchanged_count)?;
    writeln!(out, "Conflicts: {}", s.conflict_count)
}

/// 冲突详情：类型、两侧大小和修改时间
pub fn write_conflicts(out: &mut impl Write, conflicts: &[Conflict]) -> io::Result<()> {
    if conflicts.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n⚠ Conflicts detected ({})\n", conflicts.len())?;

    for (i, c) in conflicts.iter().enumerate() {
        let ext = extension(&c.path);
        writeln!(out, "{}) {}", i + 1, c.path)?;
        writeln!(out, "   Type: {}", ext.as_deref().unwrap_or("unknown"))?;
        writeln!(
            out,
            "   Local:  {} | modified {}",
            format_size(c.local.size),
            fmt_time(c.local.mtime)
        )?;
        writeln!(
            out,
            "   Drive:  {} | modified {}",
            format_size(c.remote.size),
            fmt_time(c.remote.mtime)
        )?;
        if ext.as_deref() == Some("pdf") {
            writeln!(out, "   Note: PDF annotations cannot be merged safely")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => Some(name[pos + 1..].to_lowercase()),
        _ => None,
    }
}

fn outcome_line(outcome: &TransferOutcome) -> Option<String> {
    match outcome {
        TransferOutcome::Failed { reason } => Some(format!("failed: {}", reason)),
        TransferOutcome::Skipped { reason } => Some(format!("skipped: {}", reason)),
        TransferOutcome::Cancelled => Some("cancelled".to_string()),
        _ => None,
    }
}

/// 运行结果：逐个列出跳过和失败的文件，最后一行汇总
pub fn write_report(out: &mut impl Write, report: &SyncReport) -> io::Result<()> {
    for r in report.all_results() {
        if let Some(line) = outcome_line(&r.outcome) {
            writeln!(out, " {} {} ({})", arrow(r.direction), r.path, line)?;
        }
    }

    for c in &report.conflicts {
        match &c.renamed {
            Some((local_copy, drive_copy)) => writeln!(
                out,
                " ⚠ {}: {} -> {}, {}",
                c.conflict.path, c.action, local_copy, drive_copy
            )?,
            None => writeln!(out, " ⚠ {}: {}", c.conflict.path, c.result_label())?,
        }
    }

    let transferred = report
        .all_results()
        .filter(|r| {
            matches!(
                r.outcome,
                TransferOutcome::Downloaded { .. } | TransferOutcome::Uploaded { .. }
            )
        })
        .count();
    let status = match report.status {
        SyncStatus::Completed => "✅ Sync completed",
        SyncStatus::DryRun => "(no changes were made)",
        SyncStatus::Failed => "❌ Sync finished with failures",
        SyncStatus::Cancelled => "Aborted.",
    };
    writeln!(
        out,
        "\n{}: {} transferred ({}), {} skipped, {} failed",
        status,
        transferred,
        format_size(report.bytes_transferred()),
        report.skipped().len(),
        report.failures().len()
    )
}

fn progress_line(path: &str, direction: Direction, progress: &Progress) -> String {
    match progress {
        Progress::Bytes { done, total } => format!(
            "{} {} {}  {} / {}",
            arrow(direction),
            path,
            progress_bar(*done, *total),
            format_size(*done),
            format_size(*total)
        ),
        Progress::Indeterminate { done } => format!(
            "{} {} [?]  {}",
            arrow(direction),
            path,
            format_size(*done)
        ),
    }
}

/// 消费传输事件并在单行刷新进度，通道关闭时结束
pub async fn progress_printer(mut rx: mpsc::Receiver<TransferEvent>) {
    let mut width: usize = 0;
    while let Some(event) = rx.recv().await {
        let mut out = io::stdout().lock();
        let line = match &event {
            TransferEvent::Progress {
                path,
                direction,
                progress,
            } => progress_line(path, *direction, progress),
            TransferEvent::Finished {
                path,
                direction,
                outcome,
            } => {
                let status = outcome_line(outcome).unwrap_or_else(|| match outcome {
                    TransferOutcome::DryRun => "dry run".to_string(),
                    _ => format!("done ({})", format_size(outcome.bytes())),
                });
                format!("{} {} {}", arrow(*direction), path, status)
            }
        };
        let pad = width.saturating_sub(line.chars().count());
        width = line.chars().count();
        let _ = write!(out, "\r{}{}", line, " ".repeat(pad));
        if matches!(event, TransferEvent::Finished { .. }) {
            let _ = writeln!(out);
            width = 0;
        }
        let _ = out.flush();
    }
}
