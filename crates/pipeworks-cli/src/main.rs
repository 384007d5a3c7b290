//! CLI adapter for the pipeworks pipeline execution engine: a thin daemon
//! wrapper around the core library.
//!
//! The HTTP server and trigger routing live elsewhere; what lives here is
//! the process lifecycle around them — config loading, the PID/status
//! file, and graceful shutdown on `SIGINT`.

mod lock;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pipeworks::config::{ConfigOverrides, RuntimeConfig};
use pipeworks::engine::Reporter;

use lock::PidFile;

const DEFAULT_CONFIG_PATH: &str = "./conf/runtime.conf";
const SHUTDOWN_DRAIN: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "pipeworks", version)]
#[command(about = "Pipeline execution engine daemon")]
struct Cli {
    /// Listen address override.
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Listen port override.
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Path to the runtime config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start, stop, or check on the daemon process.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    /// Start the daemon in the foreground, blocking until shutdown.
    Start,
    /// Signal a running daemon (found via its PID file) to stop.
    Stop,
    /// Print the running daemon's PID/status, if any.
    Monitor,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> anyhow::ExitCode {
    match run() {
        Ok(()) => anyhow::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[error] {e:#}");
            anyhow::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    let mut config = if cli.config.exists() {
        RuntimeConfig::load(&cli.config).context("loading runtime config")?
    } else {
        reporter.warn(&format!(
            "config file {} not found, using defaults",
            cli.config.display()
        ));
        RuntimeConfig::default()
    };
    config.apply_overrides(&ConfigOverrides {
        address: cli.address,
        port: cli.port,
    });

    let run_dir = PathBuf::from(".pipeworks");

    match cli.cmd {
        Commands::Daemon { action: DaemonAction::Start } => start(&run_dir, &config, &mut reporter),
        Commands::Daemon { action: DaemonAction::Stop } => stop(&run_dir, &mut reporter),
        Commands::Daemon { action: DaemonAction::Monitor } => monitor(&run_dir, &mut reporter),
    }
}

fn start(run_dir: &Path, config: &RuntimeConfig, reporter: &mut dyn Reporter) -> Result<()> {
    let pid_file = PidFile::acquire(run_dir).context("acquiring daemon PID file")?;
    reporter.info(&format!(
        "pipeworks daemon starting on {}:{} (pid {})",
        config.listen.address, config.listen.port, pid_file.pid()
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
        reporter.info("received shutdown signal, draining for up to 10s");
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        Ok::<(), anyhow::Error>(())
    })?;

    pid_file.release().context("releasing daemon PID file")?;
    reporter.info("clean shutdown");
    Ok(())
}

fn stop(run_dir: &Path, reporter: &mut dyn Reporter) -> Result<()> {
    let info = PidFile::read(run_dir).context("reading daemon PID file")?;
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        signal::kill(Pid::from_raw(info.pid as i32), Signal::SIGTERM)
            .with_context(|| format!("failed to signal pid {}", info.pid))?;
    }
    reporter.info(&format!("sent stop signal to pid {}", info.pid));
    Ok(())
}

fn monitor(run_dir: &Path, reporter: &mut dyn Reporter) -> Result<()> {
    match PidFile::read(run_dir) {
        Ok(info) => {
            println!("pipeworks daemon running: pid={} host={} since={}", info.pid, info.hostname, info.started_at);
            Ok(())
        }
        Err(_) => {
            reporter.info("no daemon PID file found; not running");
            Ok(())
        }
    }
}
