//! hud-hook: CLI hook handler for Capacitor session state tracking.
//!
//! Handles agent hook events and shell precmd callbacks, and writes the files the
//! engine reads. Nothing here ever prints to stdout; the agent owns it.
//!
//! ## Subcommands
//!
//! - `handle`: Main hook handler, reads JSON from stdin
//! - `cwd`: Shell CWD tracking (called by shell precmd hooks)
//! - `thinking`: Toggle the thinking flag on a project's record
//! - `lock-holder`: Background lock keeper (spawned internally)

mod cwd;
mod error;
mod handle;
mod lock_holder;
mod logging;
mod thinking;

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hud-hook")]
#[command(about = "Capacitor session state tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a hook event (reads JSON from stdin)
    Handle,

    /// Report shell current working directory (called by shell precmd hooks)
    Cwd {
        /// Absolute path to current working directory
        #[arg(value_name = "PATH")]
        path: String,

        /// Shell process ID
        #[arg(value_name = "PID")]
        pid: u32,

        /// Terminal device path (e.g., /dev/ttys003)
        #[arg(value_name = "TTY")]
        tty: String,
    },

    /// Mark the session in a project as thinking or not
    #[command(group(ArgGroup::new("flag").required(true).args(["on", "off"])))]
    Thinking {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        cwd: Option<String>,

        #[arg(long)]
        on: bool,

        #[arg(long)]
        off: bool,
    },

    /// Lock holder (spawned by handle command)
    LockHolder {
        /// Session that owns the lock
        #[arg(long)]
        session_id: String,

        /// Project path the lock covers
        #[arg(long)]
        cwd: String,

        /// Agent process PID to monitor
        #[arg(long)]
        pid: u32,

        /// Lock directory path
        #[arg(long)]
        lock_dir: PathBuf,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Handle => {
            if let Err(e) = handle::run() {
                tracing::error!(error = %e, "hud-hook handle failed");
                std::process::exit(1);
            }
        }
        Commands::Cwd { path, pid, tty } => {
            // CWD tracking is non-critical - log errors but exit 0 to not disrupt shell
            if let Err(e) = cwd::run(&path, pid, &tty) {
                tracing::warn!(error = %e, "hud-hook cwd failed");
            }
        }
        Commands::Thinking { cwd, on, off: _ } => {
            if let Err(e) = thinking::run(cwd.as_deref(), on) {
                tracing::warn!(error = %e, "hud-hook thinking failed");
            }
        }
        Commands::LockHolder {
            session_id,
            cwd: cwd_path,
            pid,
            lock_dir,
        } => {
            lock_holder::run(&session_id, &cwd_path, pid, &lock_dir);
        }
    }
}
