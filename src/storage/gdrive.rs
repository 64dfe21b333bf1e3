use super::{
    DownloadStream, ItemPage, ItemQuery, RemoteClient, RemoteItem, UploadBody,
    CONNECT_TIMEOUT_SECS, FOLDER_MIME_TYPE,
};
use crate::config::GlobalPaths;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3/files";
const LIST_FIELDS: &str =
    "nextPageToken, files(id,name,parents,md5Checksum,modifiedTime,size,mimeType)";
const PAGE_SIZE: &str = "1000";

/// 覆盖 token 文件的环境变量
pub const TOKEN_ENV: &str = "GDSYNC_ACCESS_TOKEN";

/// 已签发的访问令牌（不负责 OAuth 流程和刷新）
#[derive(Debug, Clone)]
pub struct AccessToken {
    token: String,
    source: String,
}

#[derive(Deserialize)]
struct TokenFile {
    #[serde(alias = "token")]
    access_token: Option<String>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source: "explicit".to_string(),
        }
    }

    /// 依次从环境变量和全局 token 文件读取
    pub fn load(global: &GlobalPaths) -> Result<Self> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Ok(Self {
                    token: token.trim().to_string(),
                    source: TOKEN_ENV.to_string(),
                });
            }
        }

        let path = global.token_file();
        let content = std::fs::read_to_string(&path).map_err(|_| {
            SyncError::AuthenticationRequired(format!(
                "no access token found (set {} or write {})",
                TOKEN_ENV,
                path.display()
            ))
        })?;
        let file: TokenFile = serde_json::from_str(&content).map_err(|e| {
            SyncError::AuthenticationRequired(format!("invalid token file {}: {}", path.display(), e))
        })?;

        match file.access_token {
            Some(token) if !token.trim().is_empty() => Ok(Self {
                token: token.trim().to_string(),
                source: path.display().to_string(),
            }),
            _ => Err(SyncError::AuthenticationRequired(format!(
                "token file {} has no access_token",
                path.display()
            ))),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Drive v3 `files` 资源
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    parents: Vec<String>,
    md5_checksum: Option<String>,
    modified_time: Option<String>,
    /// Drive 以字符串返回大小
    size: Option<String>,
    mime_type: Option<String>,
}

impl From<DriveFile> for RemoteItem {
    fn from(f: DriveFile) -> Self {
        RemoteItem {
            id: f.id,
            name: f.name,
            parents: f.parents,
            md5: f.md5_checksum,
            modified_time: f.modified_time.as_deref().and_then(parse_modified_time),
            size: f.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            mime_type: f.mime_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// RFC 3339 时间转换为秒
fn parse_modified_time(ts: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|t| t.timestamp())
}

/// 转义查询字符串中的值
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// 构建 Drive 查询表达式
fn build_query(query: &ItemQuery) -> String {
    match query {
        ItemQuery::Children { parent_id } => {
            format!("'{}' in parents and trashed=false", escape_query_value(parent_id))
        }
        ItemQuery::AllItems => "trashed=false".to_string(),
        ItemQuery::ChildFolders { parent_id } => format!(
            "mimeType='{}' and '{}' in parents and trashed=false",
            FOLDER_MIME_TYPE,
            escape_query_value(parent_id)
        ),
        ItemQuery::Named {
            name,
            parent_id,
            folders_only,
        } => {
            let mut q = format!(
                "name='{}' and '{}' in parents and trashed=false",
                escape_query_value(name),
                escape_query_value(parent_id)
            );
            if *folders_only {
                q.push_str(&format!(" and mimeType='{}'", FOLDER_MIME_TYPE));
            }
            q
        }
    }
}

/// 将非成功响应转换为错误
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(SyncError::AuthenticationRequired(
            "access token was rejected by Google Drive".to_string(),
        ));
    }
    Err(SyncError::Remote {
        status: status.as_u16(),
        message: message.chars().take(300).collect(),
    })
}

/// Google Drive v3 REST 客户端
pub struct GoogleDriveClient {
    http: Client,
    token: AccessToken,
    name: String,
}

impl GoogleDriveClient {
    pub fn new(token: AccessToken) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("gdsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            token,
            name: "gdrive://my-drive".to_string(),
        })
    }

    /// 开启可续传上传会话，返回会话 URL
    async fn start_upload_session(
        &self,
        method: reqwest::Method,
        url: String,
        metadata: serde_json::Value,
        size: u64,
    ) -> Result<String> {
        let resp = self
            .http
            .request(method, url)
            .bearer_auth(&self.token.token)
            .query(&[("uploadType", "resumable")])
            .header("X-Upload-Content-Length", size.to_string())
            .json(&metadata)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| SyncError::Remote {
                status: resp.status().as_u16(),
                message: "upload session has no Location header".to_string(),
            })
    }

    /// 向上传会话发送内容
    async fn send_upload_body(&self, session_url: &str, body: UploadBody) -> Result<Response> {
        let resp = self
            .http
            .put(session_url)
            .header(header::CONTENT_LENGTH, body.size)
            .body(reqwest::Body::wrap_stream(body.chunks))
            .send()
            .await?;
        check_status(resp).await
    }
}

#[async_trait]
impl RemoteClient for GoogleDriveClient {
    async fn list_items(&self, query: &ItemQuery, page_token: Option<&str>) -> Result<ItemPage> {
        let q = build_query(query);
        let mut params: Vec<(&str, &str)> = vec![
            ("q", q.as_str()),
            ("fields", LIST_FIELDS),
            ("pageSize", PAGE_SIZE),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let resp = self
            .http
            .get(API_BASE)
            .bearer_auth(&self.token.token)
            .query(&params)
            .send()
            .await?;
        let list: DriveFileList = check_status(resp).await?.json().await?;

        Ok(ItemPage {
            items: list.files.into_iter().map(RemoteItem::from).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn download(&self, file_id: &str, offset: u64) -> Result<DownloadStream> {
        let mut req = self
            .http
            .get(format!("{}/{}", API_BASE, file_id))
            .bearer_auth(&self.token.token)
            .query(&[("alt", "media")]);
        if offset > 0 {
            req = req.header(header::RANGE, format!("bytes={}-", offset));
        }

        let resp = check_status(req.send().await?).await?;
        // 服务端未返回 206 时从头开始
        let offset = if resp.status() == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            0
        };

        Ok(DownloadStream {
            offset,
            chunks: Box::pin(resp.bytes_stream().map_err(SyncError::from)),
        })
    }

    async fn create_file(&self, name: &str, parent_id: &str, body: UploadBody) -> Result<String> {
        let metadata = serde_json::json!({ "name": name, "parents": [parent_id] });
        let session = self
            .start_upload_session(reqwest::Method::POST, UPLOAD_BASE.to_string(), metadata, body.size)
            .await?;
        let created: CreatedFile = self.send_upload_body(&session, body).await?.json().await?;
        Ok(created.id)
    }

    async fn update_file(&self, file_id: &str, body: UploadBody) -> Result<()> {
        let session = self
            .start_upload_session(
                reqwest::Method::PATCH,
                format!("{}/{}", UPLOAD_BASE, file_id),
                serde_json::json!({}),
                body.size,
            )
            .await?;
        self.send_upload_body(&session, body).await?;
        Ok(())
    }

    async fn ensure_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let existing = self
            .list_items(
                &ItemQuery::Named {
                    name: name.to_string(),
                    parent_id: parent_id.to_string(),
                    folders_only: true,
                },
                None,
            )
            .await?;
        if let Some(folder) = existing.items.into_iter().next() {
            return Ok(folder.id);
        }

        let resp = self
            .http
            .post(API_BASE)
            .bearer_auth(&self.token.token)
            .query(&[("fields", "id")])
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await?;
        let created: CreatedFile = check_status(resp).await?.json().await?;
        tracing::debug!("创建云端文件夹: {} -> {}", name, created.id);
        Ok(created.id)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query() {
        assert_eq!(
            build_query(&ItemQuery::Children {
                parent_id: "abc".into()
            }),
            "'abc' in parents and trashed=false"
        );
        assert_eq!(build_query(&ItemQuery::AllItems), "trashed=false");
        assert_eq!(
            build_query(&ItemQuery::ChildFolders {
                parent_id: "root".into()
            }),
            "mimeType='application/vnd.google-apps.folder' and 'root' in parents and trashed=false"
        );
        assert_eq!(
            build_query(&ItemQuery::Named {
                name: "O'Brien".into(),
                parent_id: "p1".into(),
                folders_only: true,
            }),
            "name='O\\'Brien' and 'p1' in parents and trashed=false \
             and mimeType='application/vnd.google-apps.folder'"
        );
    }

    #[test]
    fn test_parse_file_list() {
        let json = r#"{
            "nextPageToken": "tok",
            "files": [
                {"id": "1", "name": "a.txt", "parents": ["root"], "md5Checksum": "abc",
                 "modifiedTime": "2024-01-02T03:04:05.000Z", "size": "42", "mimeType": "text/plain"},
                {"id": "2", "name": "Docs", "mimeType": "application/vnd.google-apps.folder"}
            ]
        }"#;
        let list: DriveFileList = serde_json::from_str(json).unwrap();
        assert_eq!(list.next_page_token.as_deref(), Some("tok"));

        let items: Vec<RemoteItem> = list.files.into_iter().map(RemoteItem::from).collect();
        assert_eq!(items[0].size, 42);
        assert_eq!(items[0].md5.as_deref(), Some("abc"));
        assert_eq!(items[0].modified_time, Some(1704164645));
        assert!(!items[0].is_folder());

        assert!(items[1].is_folder());
        assert_eq!(items[1].size, 0);
        assert!(items[1].parents.is_empty());
        assert_eq!(items[1].modified_time, None);
    }

    #[test]
    fn test_token_file_accepts_google_credentials_layout() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalPaths::new(dir.path());
        std::fs::write(
            global.token_file(),
            r#"{"token": "ya29.abc", "refresh_token": "r"}"#,
        )
        .unwrap();
        let file: TokenFile =
            serde_json::from_str(&std::fs::read_to_string(global.token_file()).unwrap()).unwrap();
        assert_eq!(file.access_token.as_deref(), Some("ya29.abc"));
    }
}
