use clap::{Parser, Subcommand, ValueEnum};
use gdsync_lib::commands::{self, prompt, sync::RunArgs};
use gdsync_lib::core::conflict::ResolutionStrategy;
use gdsync_lib::core::engine::SyncMode;
use gdsync_lib::logging::init_logging;
use gdsync_lib::{AppState, SyncError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gdsync")]
#[command(about = "Google Drive sync CLI")]
#[command(version)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true, env = "GDSYNC_PROJECT_DIR")]
    directory: Option<PathBuf>,

    /// Also print debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize gdsync in the project directory
    Init {
        /// Sync a single Drive folder
        #[arg(long, value_name = "ID", conflicts_with = "full_drive")]
        folder_id: Option<String>,
        /// Sync the entire Drive under ./Drive
        #[arg(long)]
        full_drive: bool,
    },
    /// Run sync (downloads, uploads, conflict resolution)
    Run {
        /// Auto confirm all prompts
        #[arg(short, long)]
        yes: bool,
        /// Show the sync plan without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Download only this Drive directory (full-drive mode)
        #[arg(long, value_name = "PATH")]
        download_dir: Option<String>,
        /// How to resolve conflicts
        #[arg(long, default_value = "ask", value_parser = ["ask", "prefer-drive", "prefer-local"])]
        conflict_strategy: String,
    },
    /// Download from Drive only; conflicts prefer Drive
    Pull {
        #[arg(value_enum)]
        target: PullTarget,
        #[arg(short, long)]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, value_name = "PATH")]
        download_dir: Option<String>,
    },
    /// Upload local files only; conflicts prefer local
    Push {
        #[arg(value_enum)]
        target: PushTarget,
        #[arg(short, long)]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show configuration, last sync and pending changes
    Status,
    /// Show the conflict history
    Conflicts,
    /// Remove gdsync from the project
    Purge {
        /// Auto confirm purge
        #[arg(short, long)]
        yes: bool,
        /// Also remove the stored access token
        #[arg(long)]
        all: bool,
    },
    /// Google Drive authentication
    Auth {
        #[command(subcommand)]
        command: Option<AuthCommand>,
    },
    /// Show or change log settings
    Log {
        #[arg(long)]
        enable: bool,
        #[arg(long, conflicts_with = "enable")]
        disable: bool,
        /// error, warn, info, debug or trace
        #[arg(long)]
        level: Option<String>,
        /// Rotate the log file above this size (1-100)
        #[arg(long, value_name = "MB")]
        max_size_mb: Option<u32>,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Check whether a usable access token is configured
    Status,
    /// Show token setup instructions
    Help,
}

#[derive(Clone, Copy, ValueEnum)]
enum PullTarget {
    Drive,
}

#[derive(Clone, Copy, ValueEnum)]
enum PushTarget {
    Local,
}

async fn dispatch(state: &AppState, command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Init {
            folder_id,
            full_drive,
        } => commands::init::init(state, folder_id, full_drive, &mut prompt::stdio()),
        Commands::Run {
            yes,
            dry_run,
            download_dir,
            conflict_strategy,
        } => {
            let strategy: ResolutionStrategy = conflict_strategy.parse()?;
            let args = RunArgs {
                mode: SyncMode::Bidirectional,
                yes,
                dry_run,
                download_dir,
                strategy,
            };
            commands::sync::run(state, args).await
        }
        Commands::Pull {
            target: PullTarget::Drive,
            yes,
            dry_run,
            download_dir,
        } => commands::sync::run(state, RunArgs::pull(yes, dry_run, download_dir)).await,
        Commands::Push {
            target: PushTarget::Local,
            yes,
            dry_run,
        } => commands::sync::run(state, RunArgs::push(yes, dry_run)).await,
        Commands::Status => commands::status::status(state).await,
        Commands::Conflicts => commands::conflicts::print_conflicts(state),
        Commands::Purge { yes, all } => commands::purge::purge(state, yes, all, &mut prompt::stdio()),
        Commands::Auth { command } => match command {
            Some(AuthCommand::Status) => commands::auth::status(state).await,
            Some(AuthCommand::Help) | None => commands::auth::help(state),
        },
        Commands::Log {
            enable,
            disable,
            level,
            max_size_mb,
        } => {
            let enabled = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::log::log_config(state, enabled, max_size_mb, level, std::io::stdout())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let state = match AppState::from_env(cli.directory.clone()) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(commands::EXIT_FAILURE);
        }
    };
    let guard = init_logging(&state.global, cli.verbose);

    // 第一次 Ctrl-C 请求取消，第二次立即退出
    let signal_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling... (press Ctrl-C again to abort)");
            signal_state.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nAborted.");
            std::process::exit(commands::EXIT_INTERRUPTED);
        }
    });

    let code = match dispatch(&state, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("命令失败: {:#}", e);
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<SyncError>()
                .map(SyncError::exit_code)
                .unwrap_or(commands::EXIT_FAILURE)
        }
    };

    // 退出前刷新日志
    drop(guard);
    std::process::exit(code);
}
