use super::prompt::{LineReader, Prompter};
use super::EXIT_OK;
use crate::error::SyncError;
use crate::AppState;
use anyhow::Context;
use std::fs;
use std::io::Write;

/// 删除项目的 `.gdsync/`；`all` 时同时删除全局令牌文件。本地同步的文件不受影响。
pub fn purge<R: LineReader, W: Write>(
    state: &AppState,
    yes: bool,
    all: bool,
    prompter: &mut Prompter<R, W>,
) -> anyhow::Result<i32> {
    let meta_dir = state.project.meta_dir();
    if !state.project.is_initialized() {
        return Err(SyncError::NotInitialized(state.project.root().display().to_string()).into());
    }

    if !yes {
        prompter.say(&format!("This will remove {}", meta_dir.display()))?;
        if all {
            prompter.say(&format!("and {}", state.global.token_file().display()))?;
        }
        if !prompter.confirm("Continue?")? {
            prompter.say("Aborted.")?;
            return Ok(EXIT_OK);
        }
    }

    fs::remove_dir_all(&meta_dir).with_context(|| format!("failed to remove {}", meta_dir.display()))?;
    tracing::info!("已删除项目元数据: {:?}", meta_dir);
    prompter.say("✔ Removed gdsync project metadata")?;

    if all {
        let token = state.global.token_file();
        if token.exists() {
            fs::remove_file(&token).with_context(|| format!("failed to remove {}", token.display()))?;
            prompter.say("✔ Removed stored access token")?;
        }
    }
    Ok(EXIT_OK)
}
