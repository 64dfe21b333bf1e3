pub mod gdrive;
pub mod memory;

use crate::config::GlobalPaths;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

pub use gdrive::{AccessToken, GoogleDriveClient};
pub use memory::MemoryDrive;

// ============ 公共常量 ============

/// 云端文件夹的 MIME 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// 云端条目元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub parents: Vec<String>,
    pub md5: Option<String>,
    /// 修改时间（秒）
    pub modified_time: Option<i64>,
    pub size: u64,
    pub mime_type: Option<String>,
}

impl RemoteItem {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

/// 分页列表结果
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<RemoteItem>,
    pub next_page_token: Option<String>,
}

/// 列表查询条件（均排除回收站中的条目）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemQuery {
    /// 某文件夹的直接子项
    Children { parent_id: String },
    /// 整个云盘
    AllItems,
    /// 某文件夹下的子文件夹
    ChildFolders { parent_id: String },
    /// 某文件夹下指定名称的条目
    Named {
        name: String,
        parent_id: String,
        folders_only: bool,
    },
}

/// 字节块流
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 上传用字节块流（需要可跨线程共享以便交给 HTTP 请求体）
pub type UploadStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + Sync>>;

/// 下载流
pub struct DownloadStream {
    /// 实际起始偏移（服务端忽略 Range 时为 0）
    pub offset: u64,
    pub chunks: ChunkStream,
}

/// 上传内容
pub struct UploadBody {
    pub size: u64,
    pub chunks: UploadStream,
}

/// 云端存储客户端接口
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// 列出一页满足条件的条目
    async fn list_items(&self, query: &ItemQuery, page_token: Option<&str>) -> Result<ItemPage>;

    /// 翻页列出全部条目
    async fn list_all(&self, query: &ItemQuery) -> Result<Vec<RemoteItem>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_items(query, page_token.as_deref()).await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(items)
    }

    /// 从指定偏移开始下载文件内容
    async fn download(&self, file_id: &str, offset: u64) -> Result<DownloadStream>;

    /// 在父文件夹下创建文件，返回新文件 ID
    async fn create_file(&self, name: &str, parent_id: &str, body: UploadBody) -> Result<String>;

    /// 覆盖已有文件的内容
    async fn update_file(&self, file_id: &str, body: UploadBody) -> Result<()>;

    /// 查找父文件夹下的同名文件
    async fn find_child(&self, name: &str, parent_id: &str) -> Result<Option<RemoteItem>> {
        let items = self
            .list_items(
                &ItemQuery::Named {
                    name: name.to_string(),
                    parent_id: parent_id.to_string(),
                    folders_only: false,
                },
                None,
            )
            .await?;
        Ok(items.items.into_iter().find(|i| !i.is_folder()))
    }

    /// 列出某文件夹下的子文件夹（目录浏览用）
    async fn list_folders(&self, parent_id: &str) -> Result<Vec<RemoteItem>> {
        self.list_all(&ItemQuery::ChildFolders {
            parent_id: parent_id.to_string(),
        })
        .await
    }

    /// 获取或创建文件夹，返回文件夹 ID
    async fn ensure_folder(&self, name: &str, parent_id: &str) -> Result<String>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据全局配置创建云端客户端
pub fn create_client(global: &GlobalPaths) -> Result<Arc<dyn RemoteClient>> {
    let token = AccessToken::load(global)?;
    tracing::info!("初始化 Google Drive 客户端 (token 来源: {})", token.source());
    Ok(Arc::new(GoogleDriveClient::new(token)?) as Arc<dyn RemoteClient>)
}
