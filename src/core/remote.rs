//! 云端文件列表与全盘路径重建

use crate::core::record::{FileRecord, RecordMap, SyncScope};
use crate::error::{Result, SyncError};
use crate::storage::{ItemQuery, RemoteClient, RemoteItem};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// 父链接的最大深度
pub const MAX_PATH_DEPTH: usize = 256;

/// 云端列表器
pub struct RemoteLister {
    client: Arc<dyn RemoteClient>,
}

impl RemoteLister {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self { client }
    }

    /// 列出同步范围内的全部文件
    pub async fn list(&self, scope: &SyncScope, path_filter: Option<&str>) -> Result<RecordMap> {
        info!("开始列出云端文件: {} ({})", scope, self.client.name());

        let records = match scope {
            SyncScope::Folder(folder_id) => {
                let items = self
                    .client
                    .list_all(&ItemQuery::Children {
                        parent_id: folder_id.clone(),
                    })
                    .await
                    .map_err(list_failure)?;
                items
                    .into_iter()
                    .filter(|item| !item.is_folder())
                    .map(|item| to_record(&item, item.name.clone()))
                    .collect()
            }
            SyncScope::FullDrive => {
                let items = self
                    .client
                    .list_all(&ItemQuery::AllItems)
                    .await
                    .map_err(list_failure)?;
                debug!("云盘共 {} 个条目", items.len());
                build_drive_paths(&items)?
            }
        };

        let records = match path_filter {
            Some(filter) => apply_path_filter(records, filter),
            None => records,
        };

        let map = RecordMap::from_records(records)?;
        info!("云端列表完成: {} 个文件", map.len());
        Ok(map)
    }
}

fn list_failure(err: SyncError) -> SyncError {
    match err {
        SyncError::AuthenticationRequired(_) | SyncError::Cancelled => err,
        other => SyncError::RemoteListFailure(other.to_string()),
    }
}

fn to_record(item: &RemoteItem, path: String) -> FileRecord {
    FileRecord::remote(
        item.id.clone(),
        path,
        item.size,
        item.modified_time,
        item.md5.clone(),
    )
}

/// 通过第一个父链接重建每个文件的完整路径
///
/// 父文件夹不在列表中（如云盘根目录）时路径在此截止；
/// 出现环或超过 [`MAX_PATH_DEPTH`] 时返回 `StructuralDriveError`。
pub fn build_drive_paths(items: &[RemoteItem]) -> Result<Vec<FileRecord>> {
    let by_id: HashMap<&str, &RemoteItem> = items.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut memo: HashMap<String, (String, usize)> = HashMap::new();

    let mut records = Vec::new();
    for item in items.iter().filter(|i| !i.is_folder()) {
        let path = resolve_path(item, &by_id, &mut memo)?;
        records.push(to_record(item, path));
    }
    Ok(records)
}

fn resolve_path(
    start: &RemoteItem,
    by_id: &HashMap<&str, &RemoteItem>,
    memo: &mut HashMap<String, (String, usize)>,
) -> Result<String> {
    if let Some((path, _)) = memo.get(&start.id) {
        return Ok(path.clone());
    }

    let mut chain: Vec<&RemoteItem> = vec![start];
    let mut seen: HashSet<&str> = HashSet::from([start.id.as_str()]);
    let mut base: Option<(String, usize)> = None;
    let mut current = start;

    while let Some(parent_id) = current.parents.first() {
        if let Some(known) = memo.get(parent_id) {
            base = Some(known.clone());
            break;
        }
        let Some(parent) = by_id.get(parent_id.as_str()) else {
            break;
        };
        if !seen.insert(parent.id.as_str()) {
            return Err(SyncError::StructuralDriveError(format!(
                "parent cycle at {} ({})",
                start.name, parent.id
            )));
        }
        chain.push(parent);
        if chain.len() > MAX_PATH_DEPTH {
            return Err(SyncError::StructuralDriveError(format!(
                "path deeper than {} levels: {}",
                MAX_PATH_DEPTH, start.name
            )));
        }
        current = parent;
    }

    if let Some((_, depth)) = &base {
        if depth + chain.len() > MAX_PATH_DEPTH {
            return Err(SyncError::StructuralDriveError(format!(
                "path deeper than {} levels: {}",
                MAX_PATH_DEPTH, start.name
            )));
        }
    }

    // 自顶向下拼接，顺便缓存每个祖先的路径
    let (mut path, mut depth) = base.unwrap_or_default();
    for item in chain.iter().rev() {
        path = if path.is_empty() {
            item.name.clone()
        } else {
            format!("{}/{}", path, item.name)
        };
        depth += 1;
        memo.insert(item.id.clone(), (path.clone(), depth));
    }
    Ok(path)
}

/// 保留等于过滤前缀或位于其下的路径
pub fn apply_path_filter(records: Vec<FileRecord>, filter: &str) -> Vec<FileRecord> {
    let filter = filter.trim_end_matches('/');
    if filter.is_empty() {
        return records;
    }
    let prefix = format!("{}/", filter);
    records
        .into_iter()
        .filter(|r| r.path == filter || r.path.starts_with(&prefix))
        .collect()
}
