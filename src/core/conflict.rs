use crate::core::record::{Conflict, FileRecord};
use crate::core::transfer::{
    Direction, TransferExecutor, TransferOptions, TransferOutcome, TransferResult,
};
use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// 冲突处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionAction {
    PreferRemote,
    PreferLocal,
    KeepBoth,
    Skip,
}

impl ResolutionAction {
    /// 冲突日志中的取值
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionAction::PreferRemote => "prefer-drive",
            ResolutionAction::PreferLocal => "prefer-local",
            ResolutionAction::KeepBoth => "keep-both",
            ResolutionAction::Skip => "skipped",
        }
    }
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// 交互式选择冲突处理方式
pub trait ConflictChooser: Send + Sync {
    /// 返回 None 表示没有有效选择
    fn choose(&self, conflict: &Conflict) -> Option<ResolutionAction>;
}

/// 调用方提供的逐个决策函数
pub type CustomResolver = Arc<dyn Fn(&Conflict) -> ResolutionAction + Send + Sync>;

/// 冲突解决策略
#[derive(Clone)]
pub enum ResolutionStrategy {
    Ask,
    PreferRemote,
    PreferLocal,
    Custom(CustomResolver),
}

impl ResolutionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionStrategy::Ask => "ask",
            ResolutionStrategy::PreferRemote => "prefer-drive",
            ResolutionStrategy::PreferLocal => "prefer-local",
            ResolutionStrategy::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResolutionStrategy({})", self.name())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ask" => Ok(ResolutionStrategy::Ask),
            "prefer-drive" | "prefer-remote" => Ok(ResolutionStrategy::PreferRemote),
            "prefer-local" => Ok(ResolutionStrategy::PreferLocal),
            other => Err(SyncError::Config(format!(
                "unknown conflict strategy '{}' (expected ask, prefer-drive or prefer-local)",
                other
            ))),
        }
    }
}

/// 在文件名（扩展名之前）追加后缀，保留目录部分
///
/// `a/b/report.pdf` + `(local copy)` -> `a/b/report (local copy).pdf`；
/// 以点开头或不含点的文件名视为没有扩展名。
pub fn with_suffix(path: &str, suffix: &str) -> String {
    let (dir, name) = match path.rfind('/') {
        Some(pos) => path.split_at(pos + 1),
        None => ("", path),
    };
    match name.rfind('.') {
        Some(pos) if pos > 0 => {
            let (stem, ext) = name.split_at(pos);
            format!("{}{} {}{}", dir, stem, suffix, ext)
        }
        _ => format!("{}{} {}", dir, name, suffix),
    }
}

/// 生成不与已占用路径冲突的带后缀路径
fn unique_suffixed(path: &str, label: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = with_suffix(path, &format!("({})", label));
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = with_suffix(path, &format!("({} {})", label, n));
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

/// 保留两份时的重命名记录：(本地副本, 云端副本)
pub fn keep_both_records(conflict: &Conflict, taken: &mut HashSet<String>) -> (FileRecord, FileRecord) {
    let local_path = unique_suffixed(&conflict.path, "local copy", taken);
    let drive_path = unique_suffixed(&conflict.path, "drive copy", taken);
    (
        conflict.local.with_path(local_path),
        conflict.remote.with_path(drive_path),
    )
}

/// 单个冲突的处理结果
#[derive(Debug, Clone)]
pub struct ConflictOutcome {
    pub conflict: Conflict,
    pub action: ResolutionAction,
    /// 保留两份时的新路径 (本地副本, 云端副本)
    pub renamed: Option<(String, String)>,
    pub results: Vec<TransferResult>,
}

impl ConflictOutcome {
    pub fn failed(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failure())
    }

    /// 冲突日志中的 result 字段
    pub fn result_label(&self) -> &'static str {
        if self.failed() {
            "failed"
        } else {
            self.action.label()
        }
    }
}

/// 冲突解决器
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
    chooser: Option<Arc<dyn ConflictChooser>>,
    /// 自动确认模式下 Ask 一律跳过
    auto_confirm: bool,
}

impl ConflictResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            chooser: None,
            auto_confirm: false,
        }
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn ConflictChooser>) -> Self {
        self.chooser = Some(chooser);
        self
    }

    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    pub fn strategy(&self) -> &ResolutionStrategy {
        &self.strategy
    }

    /// 决定单个冲突的处理方式
    pub fn resolve(&self, conflict: &Conflict) -> ResolutionAction {
        match &self.strategy {
            ResolutionStrategy::PreferRemote => ResolutionAction::PreferRemote,
            ResolutionStrategy::PreferLocal => ResolutionAction::PreferLocal,
            ResolutionStrategy::Custom(decide) => decide(conflict),
            ResolutionStrategy::Ask if self.auto_confirm => ResolutionAction::Skip,
            ResolutionStrategy::Ask => self
                .chooser
                .as_ref()
                .and_then(|c| c.choose(conflict))
                .unwrap_or(ResolutionAction::Skip),
        }
    }

    /// 按顺序决定并执行所有冲突
    ///
    /// `taken` 为计划中已出现的全部路径，保留两份时的新名称不会与之重复。
    pub async fn apply(
        &self,
        conflicts: &[Conflict],
        taken: &mut HashSet<String>,
        executor: &TransferExecutor,
        local_root: &Path,
        remote_root: &str,
        dry_run: bool,
    ) -> Vec<ConflictOutcome> {
        let mut outcomes = Vec::with_capacity(conflicts.len());

        for conflict in conflicts {
            let action = self.resolve(conflict);
            info!("冲突 {}: {}", conflict.path, action);

            let overwrite = TransferOptions {
                overwrite: true,
                dry_run,
            };
            let keep = TransferOptions {
                overwrite: false,
                dry_run,
            };

            let (renamed, results) = match action {
                ResolutionAction::PreferRemote => {
                    let results = executor
                        .download(std::slice::from_ref(&conflict.remote), local_root, overwrite)
                        .await;
                    (None, results)
                }
                ResolutionAction::PreferLocal => {
                    let record = conflict.local.with_remote_id(conflict.remote.remote_id.clone());
                    let results = executor
                        .upload(&[record], local_root, remote_root, overwrite)
                        .await;
                    (None, results)
                }
                ResolutionAction::KeepBoth => {
                    let (local_copy, drive_copy) = keep_both_records(conflict, taken);
                    let renamed = Some((local_copy.path.clone(), drive_copy.path.clone()));
                    let results = if dry_run {
                        Vec::new()
                    } else {
                        Self::keep_both(conflict, local_copy, drive_copy, executor, local_root, remote_root, keep)
                            .await
                    };
                    (renamed, results)
                }
                ResolutionAction::Skip => (None, Vec::new()),
            };

            outcomes.push(ConflictOutcome {
                conflict: conflict.clone(),
                action,
                renamed,
                results,
            });
        }

        outcomes
    }

    /// 本地文件改名为本地副本后上传，云端版本下载为云端副本
    async fn keep_both(
        conflict: &Conflict,
        local_copy: FileRecord,
        drive_copy: FileRecord,
        executor: &TransferExecutor,
        local_root: &Path,
        remote_root: &str,
        options: TransferOptions,
    ) -> Vec<TransferResult> {
        let from = conflict.local.local_path(local_root);
        let to = local_copy.local_path(local_root);
        // 被忽略或未扫描到的同名文件不能被改名覆盖
        if tokio::fs::symlink_metadata(&to).await.is_ok() {
            warn!("本地副本路径已被占用: {}", to.display());
            return vec![TransferResult {
                path: local_copy.path,
                direction: Direction::Upload,
                outcome: TransferOutcome::Failed {
                    reason: "local copy path already exists".to_string(),
                },
            }];
        }

        let mut results = executor
            .download(std::slice::from_ref(&drive_copy), local_root, options)
            .await;

        match tokio::fs::rename(&from, &to).await {
            Ok(()) => {
                results.extend(executor.upload(&[local_copy], local_root, remote_root, options).await);
            }
            Err(e) => {
                warn!("无法重命名 {} -> {}: {}", from.display(), to.display(), e);
                results.push(TransferResult {
                    path: local_copy.path,
                    direction: Direction::Upload,
                    outcome: TransferOutcome::Failed {
                        reason: format!("rename failed: {}", e),
                    },
                });
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::core::scanner::hash_bytes;
    use crate::storage::MemoryDrive;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict(path: &str) -> Conflict {
        Conflict {
            path: path.to_string(),
            local: FileRecord::local(path, 5, 100, "l".into()),
            remote: FileRecord::remote("r1", path, 7, Some(200), Some("r".into())),
        }
    }

    struct FixedChooser {
        answer: Option<ResolutionAction>,
        calls: AtomicUsize,
    }

    impl ConflictChooser for FixedChooser {
        fn choose(&self, _conflict: &Conflict) -> Option<ResolutionAction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("report.pdf", "(local copy)"), "report (local copy).pdf");
        assert_eq!(
            with_suffix("a/b/report.pdf", "(drive copy)"),
            "a/b/report (drive copy).pdf"
        );
        assert_eq!(with_suffix(".bashrc", "(local copy)"), ".bashrc (local copy)");
        assert_eq!(with_suffix("Makefile", "(local copy)"), "Makefile (local copy)");
        assert_eq!(
            with_suffix("archive.tar.gz", "(local copy)"),
            "archive.tar (local copy).gz"
        );
        assert_eq!(with_suffix("v1.2/notes", "(x)"), "v1.2/notes (x)");
    }

    #[test]
    fn test_keep_both_avoids_taken_names() {
        let mut taken: HashSet<String> =
            ["report.pdf", "report (local copy).pdf"].iter().map(|s| s.to_string()).collect();
        let (local, drive) = keep_both_records(&conflict("report.pdf"), &mut taken);
        assert_eq!(local.path, "report (local copy 2).pdf");
        assert_eq!(drive.path, "report (drive copy).pdf");
        assert_eq!(drive.remote_id.as_deref(), Some("r1"));
        assert!(taken.contains("report (drive copy).pdf"));
    }

    #[test]
    fn test_strategies() {
        let c = conflict("a.txt");
        assert_eq!(
            ConflictResolver::new(ResolutionStrategy::PreferRemote).resolve(&c),
            ResolutionAction::PreferRemote
        );
        assert_eq!(
            ConflictResolver::new(ResolutionStrategy::PreferLocal).resolve(&c),
            ResolutionAction::PreferLocal
        );
        let custom = ResolutionStrategy::Custom(Arc::new(|c: &Conflict| {
            if c.local.size < c.remote.size {
                ResolutionAction::PreferRemote
            } else {
                ResolutionAction::PreferLocal
            }
        }));
        assert_eq!(ConflictResolver::new(custom).resolve(&c), ResolutionAction::PreferRemote);
    }

    #[test]
    fn test_ask_uses_chooser_and_skips_without_answer() {
        let c = conflict("a.txt");
        let chooser = Arc::new(FixedChooser {
            answer: Some(ResolutionAction::KeepBoth),
            calls: AtomicUsize::new(0),
        });
        let resolver = ConflictResolver::new(ResolutionStrategy::Ask).with_chooser(chooser.clone());
        assert_eq!(resolver.resolve(&c), ResolutionAction::KeepBoth);

        // 自动确认时不询问
        let resolver = ConflictResolver::new(ResolutionStrategy::Ask)
            .with_chooser(chooser.clone())
            .with_auto_confirm(true);
        assert_eq!(resolver.resolve(&c), ResolutionAction::Skip);
        assert_eq!(chooser.calls.load(Ordering::SeqCst), 1);

        let silent = Arc::new(FixedChooser {
            answer: None,
            calls: AtomicUsize::new(0),
        });
        let resolver = ConflictResolver::new(ResolutionStrategy::Ask).with_chooser(silent);
        assert_eq!(resolver.resolve(&c), ResolutionAction::Skip);
        assert_eq!(ConflictResolver::new(ResolutionStrategy::Ask).resolve(&c), ResolutionAction::Skip);
    }

    #[test]
    fn test_parse_strategy() {
        assert!(matches!("ask".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::Ask)));
        assert!(matches!("prefer-drive".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::PreferRemote)));
        assert!(matches!("prefer-local".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::PreferLocal)));
        assert!("newest".parse::<ResolutionStrategy>().is_err());
    }

    #[tokio::test]
    async fn test_keep_both_executes_renames() {
        let drive = Arc::new(MemoryDrive::new());
        let remote_id = drive.add_file("report.pdf", "root", b"drive version");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"local version").unwrap();

        let c = Conflict {
            path: "report.pdf".into(),
            local: FileRecord::local("report.pdf", 13, 0, hash_bytes(b"local version")),
            remote: FileRecord::remote(
                remote_id,
                "report.pdf",
                13,
                None,
                Some(hash_bytes(b"drive version")),
            ),
        };
        let executor = TransferExecutor::new(drive.clone(), TransferConfig::default());
        let resolver = ConflictResolver::new(ResolutionStrategy::Custom(Arc::new(|_: &Conflict| {
            ResolutionAction::KeepBoth
        })));
        let mut taken = HashSet::from(["report.pdf".to_string()]);
        let outcomes = resolver
            .apply(&[c], &mut taken, &executor, dir.path(), "root", false)
            .await;

        assert_eq!(outcomes[0].result_label(), "keep-both");
        assert_eq!(
            std::fs::read(dir.path().join("report (drive copy).pdf")).unwrap(),
            b"drive version"
        );
        assert_eq!(
            std::fs::read(dir.path().join("report (local copy).pdf")).unwrap(),
            b"local version"
        );
        let uploaded = drive.find("report (local copy).pdf", "root").unwrap();
        assert_eq!(drive.content(&uploaded.id).unwrap(), b"local version");
    }

    #[tokio::test]
    async fn test_failed_transfer_is_reported() {
        let drive = Arc::new(MemoryDrive::new());
        let dir = tempfile::tempdir().unwrap();
        let executor = TransferExecutor::new(drive.clone(), TransferConfig::default());
        let resolver = ConflictResolver::new(ResolutionStrategy::PreferRemote);

        // 远程文件不存在，下载失败
        let outcomes = resolver
            .apply(&[conflict("gone.txt")], &mut HashSet::new(), &executor, dir.path(), "root", false)
            .await;
        assert!(matches!(outcomes[0].results[0].outcome, TransferOutcome::Failed { .. }));
        assert_eq!(outcomes[0].result_label(), "failed");
    }

    #[tokio::test]
    async fn test_keep_both_dry_run_only_reports_names() {
        let drive = Arc::new(MemoryDrive::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let executor = TransferExecutor::new(drive.clone(), TransferConfig::default());
        let resolver = ConflictResolver::new(ResolutionStrategy::Custom(Arc::new(|_: &Conflict| {
            ResolutionAction::KeepBoth
        })));

        let outcomes = resolver
            .apply(&[conflict("a.txt")], &mut HashSet::new(), &executor, dir.path(), "root", true)
            .await;
        assert_eq!(
            outcomes[0].renamed,
            Some(("a (local copy).txt".to_string(), "a (drive copy).txt".to_string()))
        );
        assert!(dir.path().join("a.txt").exists());
        assert!(!dir.path().join("a (local copy).txt").exists());
        assert_eq!(drive.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_keep_both_never_replaces_unscanned_local_copy() {
        let drive = Arc::new(MemoryDrive::new());
        let remote_id = drive.add_file("notes.txt", "root", b"drive");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"local").unwrap();
        // 例如被忽略规则隐藏的文件，不在计划路径中
        std::fs::write(dir.path().join("notes (local copy).txt"), b"precious").unwrap();

        let c = Conflict {
            path: "notes.txt".into(),
            local: FileRecord::local("notes.txt", 5, 0, hash_bytes(b"local")),
            remote: FileRecord::remote(remote_id, "notes.txt", 5, None, Some(hash_bytes(b"drive"))),
        };
        let executor = TransferExecutor::new(drive.clone(), TransferConfig::default());
        let resolver = ConflictResolver::new(ResolutionStrategy::Custom(Arc::new(|_: &Conflict| {
            ResolutionAction::KeepBoth
        })));
        let mut taken = HashSet::from(["notes.txt".to_string()]);
        let outcomes = resolver
            .apply(&[c], &mut taken, &executor, dir.path(), "root", false)
            .await;

        assert_eq!(outcomes[0].result_label(), "failed");
        assert_eq!(
            std::fs::read(dir.path().join("notes (local copy).txt")).unwrap(),
            b"precious"
        );
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"local");
        assert!(!dir.path().join("notes (drive copy).txt").exists());
        assert_eq!(drive.upload_count(), 0);
    }
}
