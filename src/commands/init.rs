use super::prompt::{LineReader, Prompter};
use super::{EXIT_FAILURE, EXIT_OK};
use crate::core::record::SyncScope;
use crate::error::SyncError;
use crate::AppState;
use anyhow::Context;
use std::io::Write;

/// 初始化当前项目
///
/// 同时未给出 `folder_id` 和 `full_drive` 时交互式选择范围。
pub fn init<R: LineReader, W: Write>(
    state: &AppState,
    folder_id: Option<String>,
    full_drive: bool,
    prompter: &mut Prompter<R, W>,
) -> anyhow::Result<i32> {
    if state.project.is_initialized() {
        return Err(SyncError::AlreadyInitialized(state.project.root().display().to_string()).into());
    }

    let scope = match (folder_id, full_drive) {
        (Some(_), true) => anyhow::bail!("--folder-id and --full-drive are mutually exclusive"),
        (Some(id), false) if !id.trim().is_empty() => SyncScope::Folder(id.trim().to_string()),
        (Some(_), false) => anyhow::bail!("folder ID is required"),
        (None, true) => SyncScope::FullDrive,
        (None, false) => match ask_scope(prompter)? {
            Some(scope) => scope,
            None => return Ok(EXIT_FAILURE),
        },
    };

    state
        .project
        .initialize(&scope)
        .with_context(|| format!("failed to initialize {}", state.project.root().display()))?;

    prompter.say("\n✅ gdsync initialized successfully")?;
    prompter.say("Run `gdsync run` to start syncing")?;
    Ok(EXIT_OK)
}

fn ask_scope<R: LineReader, W: Write>(prompter: &mut Prompter<R, W>) -> anyhow::Result<Option<SyncScope>> {
    prompter.say("✔ Initializing gdsync in current directory\n")?;
    prompter.say("Select sync scope:")?;
    prompter.say("  1) Specific Google Drive folder")?;
    prompter.say("  2) Entire Google Drive")?;

    match prompter.ask("> ")?.as_deref() {
        Some("1") => {
            let id = prompter.ask("Enter Google Drive Folder ID:\n> ")?.unwrap_or_default();
            if id.is_empty() {
                prompter.say("❌ Folder ID is required")?;
                return Ok(None);
            }
            Ok(Some(SyncScope::Folder(id)))
        }
        Some("2") => Ok(Some(SyncScope::FullDrive)),
        _ => {
            prompter.say("❌ Invalid choice")?;
            Ok(None)
        }
    }
}
