//! 错误类型

use thiserror::Error;

/// 同步核心使用的 Result 别名
pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步过程中的错误
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("gdsync is not initialized in {0}")]
    NotInitialized(String),

    #[error("gdsync is already initialized in {0}")]
    AlreadyInitialized(String),

    #[error("unknown sync_scope: {0}")]
    UnknownSyncScope(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("failed to list remote files: {0}")]
    RemoteListFailure(String),

    #[error("failed to scan local files: {0}")]
    LocalScanFailure(String),

    #[error("transfer failed for {path}: {reason}")]
    TransferFailure { path: String, reason: String },

    #[error("inconsistent drive hierarchy: {0}")]
    StructuralDriveError(String),

    #[error("duplicate path in snapshot: {0}")]
    DuplicatePath(String),

    #[error("remote request failed ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    /// 是否为可重试的瞬时错误（网络抖动、限流、服务端 5xx）
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Timeout(_) => true,
            SyncError::Remote { status, .. } => *status == 429 || *status >= 500,
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            SyncError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Cancelled => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::Timeout("chunk".into()).is_transient());
        assert!(SyncError::Remote {
            status: 503,
            message: "backend".into()
        }
        .is_transient());
        assert!(SyncError::Remote {
            status: 429,
            message: "rate".into()
        }
        .is_transient());
        assert!(!SyncError::Remote {
            status: 404,
            message: "missing".into()
        }
        .is_transient());
        assert!(!SyncError::StructuralDriveError("cycle".into()).is_transient());
        assert!(SyncError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SyncError::Cancelled.exit_code(), 130);
        assert_eq!(SyncError::NotInitialized(".".into()).exit_code(), 1);
    }
}
