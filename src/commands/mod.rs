//! 命令行子命令的实现，每个命令返回进程退出码

pub mod auth;
pub mod conflicts;
pub mod init;
pub mod log;
pub mod prompt;
pub mod purge;
pub mod status;
pub mod sync;
pub mod ui;

/// 成功
pub const EXIT_OK: i32 = 0;
/// 失败或有文件传输失败
pub const EXIT_FAILURE: i32 = 1;
/// 被 Ctrl-C 中断
pub const EXIT_INTERRUPTED: i32 = 130;
