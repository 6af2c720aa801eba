//! agent-tail - Live multi-session tailing of AI assistant transcripts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agent_tail::app::TailApp;
use agent_tail::config::{ConfigError, ConfigLoader};
use agent_tail::display::{print_error, print_session_list, ConsoleSink};
use agent_tail::watcher::{
    default_projects_root, find_latest_in_root, locate_by_cwd, resolve_session, SessionIndex,
    WatcherError,
};

#[derive(Parser)]
#[command(
    name = "agent-tail",
    about = "Live multi-session tailing of AI assistant transcripts",
    version
)]
struct Cli {
    /// Session id, partial id, or path to a transcript file.
    session: Option<String>,

    /// Only consider projects whose directory name contains this text.
    #[arg(short, long)]
    project: Option<String>,

    /// Find the newest document transcript recorded for this directory.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Directory holding transcripts (default: ~/.claude/projects).
    #[arg(long)]
    root: Option<PathBuf>,

    /// Config file path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Switch to newly discovered subagent sessions automatically.
    #[arg(short, long)]
    follow: bool,

    /// Print full event text without truncation.
    #[arg(long)]
    raw: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error("Cannot determine transcript root; pass --root")]
    NoRoot,

    #[error("No session found{0}")]
    NoSession(String),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn locate(cli: &Cli) -> Result<PathBuf, CliError> {
    if let Some(session) = &cli.session {
        let as_path = Path::new(session);
        if as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }
    }

    let root = cli
        .root
        .clone()
        .or_else(default_projects_root)
        .ok_or(CliError::NoRoot)?;

    if let Some(session) = &cli.session {
        return resolve_session(&root, session)
            .ok_or_else(|| CliError::NoSession(format!(" matching '{session}'")));
    }

    if let Some(cwd) = &cli.cwd {
        let cwd = cwd.display().to_string();
        let index_path = SessionIndex::default_path();
        let mut index = index_path
            .as_deref()
            .map(SessionIndex::load)
            .unwrap_or_default();
        let found = locate_by_cwd(&root, &cwd, &mut index);
        if let Some(index_path) = &index_path {
            if let Err(e) = index.save(index_path) {
                tracing::warn!(error = %e, "Failed to save session index");
            }
        }
        return found.ok_or_else(|| CliError::NoSession(format!(" for {cwd}")));
    }

    find_latest_in_root(&root, cli.project.as_deref()).ok_or_else(|| {
        CliError::NoSession(
            cli.project
                .as_ref()
                .map_or_else(String::new, |p| format!(" for project '{p}'")),
        )
    })
}

/// Apply one stdin command. Returns `false` to quit.
fn handle_command(app: &TailApp, command: &str) -> bool {
    let registry = app.registry();
    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    match command.trim() {
        "" => {}
        "q" | "quit" => return false,
        "n" => {
            registry.switch_next();
        }
        "p" => {
            registry.switch_prev();
        }
        "l" => print_session_list(&registry.snapshot()),
        query => match registry.find(query).map(str::to_string) {
            Some(id) => {
                registry.switch_to(&id);
            }
            None => print_error(&format!("No session matches '{query}'")),
        },
    }
    true
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    config.raw_mode |= cli.raw;
    config.sessions.follow_new |= cli.follow;

    let session_path = locate(&cli)?;
    tracing::info!(path = %session_path.display(), "Tailing session");

    let app = TailApp::start(session_path, config, Arc::new(ConsoleSink)).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(command)) => {
                    if !handle_command(&app, &command) {
                        break;
                    }
                }
                // Stdin closed; keep tailing until interrupted.
                Ok(None) => {
                    let _ = tokio::signal::ctrl_c().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read command");
                    break;
                }
            },
        }
    }

    app.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "agent-tail failed");
        print_error(&e.to_string());
        std::process::exit(1);
    }
}
