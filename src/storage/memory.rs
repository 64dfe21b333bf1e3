//! 内存中的云盘实现，用于测试和离线演练

use super::{
    DownloadStream, ItemPage, ItemQuery, RemoteClient, RemoteItem, UploadBody, FOLDER_MIME_TYPE,
};
use crate::core::scanner::hash_bytes;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

struct StoredItem {
    meta: RemoteItem,
    content: Vec<u8>,
    trashed: bool,
}

#[derive(Default)]
struct DriveState {
    items: Vec<StoredItem>,
    next_id: u64,
    /// 下载时注入的瞬时失败次数
    download_failures: HashMap<String, u32>,
    /// 第一个分块之后不再返回数据的文件
    stalled_downloads: HashSet<String>,
    folder_creations: usize,
    uploads: usize,
}

impl DriveState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn live(&self) -> impl Iterator<Item = &StoredItem> {
        self.items.iter().filter(|i| !i.trashed)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut StoredItem> {
        self.items.iter_mut().find(|i| i.meta.id == id && !i.trashed)
    }
}

/// 内存云盘
pub struct MemoryDrive {
    state: Mutex<DriveState>,
    page_size: usize,
    chunk_size: usize,
    name: String,
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriveState::default()),
            page_size: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            name: "memory://drive".to_string(),
        }
    }

    /// 每页返回的条目数（0 表示不分页）
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// 下载时每个分块的大小
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 添加文件夹
    pub fn add_folder(&self, name: &str, parent_id: &str) -> String {
        let mut state = self.state();
        let id = state.allocate_id();
        state.items.push(StoredItem {
            meta: RemoteItem {
                id: id.clone(),
                name: name.to_string(),
                parents: vec![parent_id.to_string()],
                md5: None,
                modified_time: Some(chrono::Utc::now().timestamp()),
                size: 0,
                mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            },
            content: Vec::new(),
            trashed: false,
        });
        id
    }

    /// 添加文件
    pub fn add_file(&self, name: &str, parent_id: &str, content: &[u8]) -> String {
        let mut state = self.state();
        let id = state.allocate_id();
        state.items.push(StoredItem {
            meta: Self::file_meta(&id, name, parent_id, content),
            content: content.to_vec(),
            trashed: false,
        });
        id
    }

    /// 直接添加元数据（用于构造异常的层级结构）
    pub fn add_item(&self, meta: RemoteItem) {
        self.state().items.push(StoredItem {
            meta,
            content: Vec::new(),
            trashed: false,
        });
    }

    /// 移入回收站
    pub fn trash(&self, id: &str) {
        if let Some(item) = self.state().find_mut(id) {
            item.trashed = true;
        }
    }

    /// 让接下来的若干次下载在传输中途失败
    pub fn fail_downloads(&self, id: &str, times: u32) {
        self.state().download_failures.insert(id.to_string(), times);
    }

    /// 让该文件的下载在第一个分块之后挂起
    pub fn stall_downloads(&self, id: &str) {
        self.state().stalled_downloads.insert(id.to_string());
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.state().live().find(|i| i.meta.id == id).map(|i| i.content.clone())
    }

    /// 查找父文件夹下的同名条目
    pub fn find(&self, name: &str, parent_id: &str) -> Option<RemoteItem> {
        self.state()
            .live()
            .find(|i| i.meta.name == name && i.meta.parents.iter().any(|p| p == parent_id))
            .map(|i| i.meta.clone())
    }

    /// 所有未删除的文件（不含文件夹）
    pub fn files(&self) -> Vec<RemoteItem> {
        self.state()
            .live()
            .filter(|i| !i.meta.is_folder())
            .map(|i| i.meta.clone())
            .collect()
    }

    pub fn folder_creations(&self) -> usize {
        self.state().folder_creations
    }

    pub fn upload_count(&self) -> usize {
        self.state().uploads
    }

    fn file_meta(id: &str, name: &str, parent_id: &str, content: &[u8]) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: name.to_string(),
            parents: vec![parent_id.to_string()],
            md5: Some(hash_bytes(content)),
            modified_time: Some(chrono::Utc::now().timestamp()),
            size: content.len() as u64,
            mime_type: Some("application/octet-stream".to_string()),
        }
    }

    fn matches(query: &ItemQuery, item: &RemoteItem) -> bool {
        let has_parent = |parent: &str| item.parents.iter().any(|p| p == parent);
        match query {
            ItemQuery::Children { parent_id } => has_parent(parent_id),
            ItemQuery::AllItems => true,
            ItemQuery::ChildFolders { parent_id } => item.is_folder() && has_parent(parent_id),
            ItemQuery::Named {
                name,
                parent_id,
                folders_only,
            } => &item.name == name && has_parent(parent_id) && (!folders_only || item.is_folder()),
        }
    }

    async fn collect_body(body: UploadBody) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(body.size as usize);
        let mut chunks = body.chunks;
        while let Some(chunk) = chunks.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

#[async_trait]
impl RemoteClient for MemoryDrive {
    async fn list_items(&self, query: &ItemQuery, page_token: Option<&str>) -> Result<ItemPage> {
        let state = self.state();
        let matching: Vec<RemoteItem> = state
            .live()
            .filter(|i| Self::matches(query, &i.meta))
            .map(|i| i.meta.clone())
            .collect();

        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| SyncError::Remote {
                    status: 400,
                    message: format!("invalid page token: {}", token),
                })?,
            None => 0,
        };

        if self.page_size == 0 {
            return Ok(ItemPage {
                items: matching.into_iter().skip(start).collect(),
                next_page_token: None,
            });
        }

        let end = (start + self.page_size).min(matching.len());
        let next_page_token = (end < matching.len()).then(|| end.to_string());
        Ok(ItemPage {
            items: matching[start.min(end)..end].to_vec(),
            next_page_token,
        })
    }

    async fn download(&self, file_id: &str, offset: u64) -> Result<DownloadStream> {
        let (content, fail, stall) = {
            let mut state = self.state();
            let content = state
                .live()
                .find(|i| i.meta.id == file_id && !i.meta.is_folder())
                .map(|i| i.content.clone())
                .ok_or_else(|| SyncError::Remote {
                    status: 404,
                    message: format!("file not found: {}", file_id),
                })?;
            let fail = match state.download_failures.get_mut(file_id) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            };
            let stall = state.stalled_downloads.contains(file_id);
            (content, fail, stall)
        };

        let start = (offset as usize).min(content.len());
        let mut chunks: Vec<Result<Bytes>> = content[start..]
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if fail {
            // 只发送第一个分块，然后中断
            chunks.truncate(1);
            chunks.push(Err(SyncError::Remote {
                status: 503,
                message: "connection dropped".to_string(),
            }));
        }

        if stall {
            chunks.truncate(1);
            let stream = futures::stream::iter(chunks).chain(futures::stream::pending());
            return Ok(DownloadStream {
                offset: start as u64,
                chunks: Box::pin(stream),
            });
        }

        Ok(DownloadStream {
            offset: start as u64,
            chunks: Box::pin(futures::stream::iter(chunks)),
        })
    }

    async fn create_file(&self, name: &str, parent_id: &str, body: UploadBody) -> Result<String> {
        let data = Self::collect_body(body).await?;
        let mut state = self.state();
        let id = state.allocate_id();
        state.items.push(StoredItem {
            meta: Self::file_meta(&id, name, parent_id, &data),
            content: data,
            trashed: false,
        });
        state.uploads += 1;
        Ok(id)
    }

    async fn update_file(&self, file_id: &str, body: UploadBody) -> Result<()> {
        let data = Self::collect_body(body).await?;
        let mut state = self.state();
        let item = state.find_mut(file_id).ok_or_else(|| SyncError::Remote {
            status: 404,
            message: format!("file not found: {}", file_id),
        })?;
        let parent = item.meta.parents.first().cloned().unwrap_or_default();
        item.meta = Self::file_meta(file_id, &item.meta.name.clone(), &parent, &data);
        item.content = data;
        state.uploads += 1;
        Ok(())
    }

    async fn ensure_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let existing = self
            .state()
            .live()
            .find(|i| {
                i.meta.is_folder() && i.meta.name == name && i.meta.parents.iter().any(|p| p == parent_id)
            })
            .map(|i| i.meta.id.clone());
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = self.add_folder(name, parent_id);
        self.state().folder_creations += 1;
        Ok(id)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
