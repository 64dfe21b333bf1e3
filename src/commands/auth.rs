use super::{EXIT_FAILURE, EXIT_OK};
use crate::core::record::ROOT_FOLDER_ID;
use crate::storage::gdrive::TOKEN_ENV;
use crate::storage::{AccessToken, GoogleDriveClient, ItemQuery, RemoteClient};
use crate::AppState;
use std::io::{self, Write};

/// 检查访问令牌是否存在且可用
pub async fn status(state: &AppState) -> anyhow::Result<i32> {
    let mut out = io::stdout();
    writeln!(out, "Authentication status:\n")?;

    let token = match AccessToken::load(&state.global) {
        Ok(token) => {
            writeln!(out, "✔ Token: present ({})", token.source())?;
            token
        }
        Err(e) => {
            writeln!(out, "❌ Token: missing")?;
            writeln!(out, "   {}", e)?;
            return Ok(EXIT_FAILURE);
        }
    };

    let client = GoogleDriveClient::new(token)?;
    let probe = ItemQuery::ChildFolders {
        parent_id: ROOT_FOLDER_ID.to_string(),
    };
    match client.list_items(&probe, None).await {
        Ok(_) => {
            writeln!(out, "✔ Google Drive access: OK")?;
            Ok(EXIT_OK)
        }
        Err(e) => {
            tracing::warn!("Drive 访问检查失败: {}", e);
            writeln!(out, "❌ Google Drive access failed: {}", e)?;
            Ok(EXIT_FAILURE)
        }
    }
}

/// 令牌配置说明
pub fn help(state: &AppState) -> anyhow::Result<i32> {
    let mut out = io::stdout();
    writeln!(
        out,
        "\ngdsync authentication\n\n\
         gdsync uses an already issued OAuth access token with the Drive scope.\n\
         Provide it in one of two ways:\n\n\
         1. Environment variable:\n     export {}=<token>\n\n\
         2. Token file {}:\n     {{\"access_token\": \"<token>\"}}\n\n\
         Tokens expire; refresh them with your OAuth tooling of choice.\n\
         Check the setup with `gdsync auth status`.",
        TOKEN_ENV,
        state.global.token_file().display()
    )?;
    Ok(EXIT_OK)
}
