pub mod conflict;
pub mod conflict_log;
pub mod engine;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod scanner;
pub mod transfer;

pub use conflict::{
    keep_both_records, with_suffix, ConflictChooser, ConflictOutcome, ConflictResolver,
    ResolutionAction, ResolutionStrategy,
};
pub use conflict_log::{ConflictLog, ConflictLogEntry};
pub use engine::{SyncEngine, SyncMode, SyncOptions, SyncReport, SyncStatus};
pub use reconcile::reconcile;
pub use record::{Conflict, FileRecord, Plan, PlanSummary, RecordMap, SyncScope};
pub use remote::{apply_path_filter, build_drive_paths, RemoteLister};
pub use scanner::{hash_bytes, hash_file, IgnoreRules, LocalScanner};
pub use transfer::{
    Direction, Progress, TransferEvent, TransferExecutor, TransferOptions, TransferOutcome,
    TransferResult,
};
