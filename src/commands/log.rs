//! 日志配置命令

use super::EXIT_OK;
use crate::logging::{LogConfig, LOG_FILE};
use crate::AppState;
use anyhow::Context;
use std::io::Write;

/// 显示或修改日志配置；没有任何参数时只显示
pub fn log_config(
    state: &AppState,
    enabled: Option<bool>,
    max_size_mb: Option<u32>,
    level: Option<String>,
    mut out: impl Write,
) -> anyhow::Result<i32> {
    let dir = state.global.dir();
    let mut config = LogConfig::load(dir);

    if enabled.is_some() || max_size_mb.is_some() || level.is_some() {
        config
            .update(enabled, max_size_mb, level.as_deref())
            .map_err(anyhow::Error::msg)?;
        config
            .save(dir)
            .with_context(|| format!("failed to write {}", state.global.config_file().display()))?;
        tracing::info!("日志配置已更新: {:?}", config);
    }

    writeln!(out, "Enabled:  {}", config.enabled)?;
    writeln!(out, "Level:    {}", config.level)?;
    writeln!(out, "Max size: {} MB", config.max_size_mb)?;
    writeln!(out, "File:     {}", state.global.log_dir().join(LOG_FILE).display())?;
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalPaths, ProjectPaths};

    #[test]
    fn test_update_and_show() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(GlobalPaths::new(dir.path()), ProjectPaths::new(dir.path()));

        let mut out = Vec::new();
        log_config(&state, None, Some(20), Some("warn".into()), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Level:    warn"));
        assert!(text.contains("Max size: 20 MB"));
        assert_eq!(LogConfig::load(dir.path()).level, "warn");

        assert!(log_config(&state, None, None, Some("chatty".into()), Vec::new()).is_err());
    }
}
