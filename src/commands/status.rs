use super::ui;
use super::EXIT_OK;
use crate::config::ProjectState;
use crate::core::engine::{SyncEngine, SyncMode};
use crate::AppState;
use anyhow::Context;
use std::io::{self, Write};

/// 显示项目配置、上次同步时间和当前计划（不做任何修改）
pub async fn status(state: &AppState) -> anyhow::Result<i32> {
    let engine = state.engine().context("cannot read project status")?;
    status_with(state, &engine, io::stdout()).await
}

pub async fn status_with(state: &AppState, engine: &SyncEngine, mut out: impl Write) -> anyhow::Result<i32> {
    let config = engine.config();
    let last_sync = ProjectState::load(&state.project)?.last_sync;

    writeln!(out, "Project:   {}", state.project.root().display())?;
    writeln!(out, "Scope:     {}", engine.scope())?;
    writeln!(out, "Local dir: {}", engine.local_root().display())?;
    writeln!(out, "Created:   {}", config.created_at)?;
    writeln!(out, "Last sync: {}", last_sync.as_deref().unwrap_or("never"))?;

    let plan = engine.plan(None).await?;
    ui::write_plan(&mut out, &plan, SyncMode::Bidirectional)?;
    ui::write_conflicts(&mut out, &plan.conflicts)?;
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalPaths, ProjectPaths};
    use crate::core::record::{SyncScope, ROOT_FOLDER_ID};
    use crate::storage::MemoryDrive;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_status_shows_pending_plan() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(MemoryDrive::new());
        let folder = drive.add_folder("P", ROOT_FOLDER_ID);
        drive.add_file("new.txt", &folder, b"abc");

        let state = AppState::new(
            GlobalPaths::new(dir.path().join("global")),
            ProjectPaths::new(dir.path().join("project")),
        );
        state.project.initialize(&SyncScope::Folder(folder)).unwrap();
        let engine = state.engine_with(drive.clone()).unwrap();

        let mut out = Vec::new();
        assert_eq!(status_with(&state, &engine, &mut out).await.unwrap(), EXIT_OK);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Last sync: never"));
        assert!(text.contains(" ↓ new.txt | 3 bytes"));
        assert!(!state.project.root().join("new.txt").exists());
    }
}
