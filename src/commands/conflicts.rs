use super::ui::{fmt_time, format_size};
use super::EXIT_OK;
use crate::core::conflict_log::{ConflictLog, SideInfo};
use crate::error::SyncError;
use crate::AppState;
use std::io::{self, Write};

fn side(info: &SideInfo) -> String {
    let size = info.size.map(format_size).unwrap_or_else(|| "?".to_string());
    format!("{} | modified {}", size, fmt_time(info.mtime))
}

/// 打印冲突日志
pub fn conflicts(state: &AppState, mut out: impl Write) -> anyhow::Result<i32> {
    if !state.project.is_initialized() {
        return Err(SyncError::NotInitialized(state.project.root().display().to_string()).into());
    }

    let entries = ConflictLog::new(state.project.conflict_log()).load()?;
    if entries.is_empty() {
        writeln!(out, "No conflicts recorded.")?;
        return Ok(EXIT_OK);
    }

    writeln!(out, "Conflict history ({})\n", entries.len())?;
    for e in &entries {
        writeln!(out, "{}  {}", e.timestamp, e.path)?;
        writeln!(out, "   Local:  {}", side(&e.local))?;
        writeln!(out, "   Drive:  {}", side(&e.drive))?;
        writeln!(out, "   Strategy: {} -> {}", e.strategy, e.result)?;
    }
    Ok(EXIT_OK)
}

/// 打印到标准输出
pub fn print_conflicts(state: &AppState) -> anyhow::Result<i32> {
    conflicts(state, io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalPaths, ProjectPaths};
    use crate::core::conflict_log::ConflictLogEntry;
    use crate::core::record::{Conflict, FileRecord, SyncScope};

    #[test]
    fn test_prints_entries() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(GlobalPaths::new(dir.path().join("g")), ProjectPaths::new(dir.path()));
        state.project.initialize(&SyncScope::FullDrive).unwrap();

        let mut out = Vec::new();
        conflicts(&state, &mut out).unwrap();
        assert!(String::from_utf8_lossy(&out).contains("No conflicts recorded."));

        let conflict = Conflict {
            path: "a.pdf".into(),
            local: FileRecord::local("a.pdf", 2048, 0, "x".into()),
            remote: FileRecord::remote("1", "a.pdf", 10, None, None),
        };
        ConflictLog::new(state.project.conflict_log())
            .append(&[ConflictLogEntry::new(&conflict, "ask", "keep-both")])
            .unwrap();

        let mut out = Vec::new();
        conflicts(&state, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Conflict history (1)"));
        assert!(text.contains("Local:  2.0 KB"));
        assert!(text.contains("Strategy: ask -> keep-both"));
    }
}
