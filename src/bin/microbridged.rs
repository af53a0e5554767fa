//! microbridge daemon - TCP bridge for ADK boards
//!
//! Listens for boards, tracks their sensor reading and broadcasts LED
//! commands.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! microbridged start
//!
//! # Start the daemon (background/daemonized) on a custom port
//! microbridged start -d --port 4567
//!
//! # Reassemble readings split across reads
//! microbridged start --framing stream
//!
//! # Toggle the LED on every connected board
//! microbridged toggle
//!
//! # Stop the daemon
//! microbridged stop
//!
//! # Check daemon status
//! microbridged status
//!
//! # Enable debug logging
//! RUST_LOG=microbridged=debug microbridged start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown
//! - SIGUSR1: Toggle the LED

use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use microbridge_protocol::FrameMode;
use microbridged::board::AdkBoard;
use microbridged::config::{BridgeConfig, CliOverrides};
use microbridged::hub::Hub;

/// microbridge daemon - ADK board TCP bridge
#[derive(Parser, Debug)]
#[command(name = "microbridged", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start(StartArgs),
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
    /// Toggle the LED on every connected board
    Toggle,
}

#[derive(clap::Args, Debug, Default)]
struct StartArgs {
    /// Run as a background daemon (fork to background)
    #[arg(short = 'd', long)]
    daemon: bool,

    /// TCP port boards connect to
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind on
    #[arg(long)]
    host: Option<IpAddr>,

    /// Sensor framing: "chunk" or "stream"
    #[arg(long, value_parser = parse_framing)]
    framing: Option<FrameMode>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Toggle the LED every SECS seconds (0 = off)
    #[arg(long, value_name = "SECS")]
    blink: Option<u64>,
}

fn parse_framing(s: &str) -> Result<FrameMode, String> {
    FrameMode::parse(s).ok_or_else(|| format!("unknown framing '{s}' (expected chunk or stream)"))
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("microbridge")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("microbridged.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("microbridged.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, signal) };
        if result != 0 {
            bail!("Failed to signal process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        bail!("Signals are only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start(StartArgs::default()));

    match command {
        Command::Start(start) => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'microbridged stop' to stop it first.");
                process::exit(1);
            }

            // The daemon runs from "/", so resolve the config path first.
            let overrides = CliOverrides {
                port: start.port,
                host: start.host,
                framing: start.framing,
            };
            let config = BridgeConfig::load(start.config.as_deref(), &overrides)
                .context("Failed to load configuration")?;

            if start.daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config, start.blink.map(Duration::from_secs));

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                send_signal(pid, libc::SIGTERM)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Log: {}", log_file_path().display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
        Command::Toggle => {
            if let Some(pid) = is_daemon_running() {
                send_signal(pid, libc::SIGUSR1)?;
                println!("LED toggle requested.");
                Ok(())
            } else {
                eprintln!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: BridgeConfig, blink: Option<Duration>) -> Result<()> {
    let level = &config.logging.level;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("microbridged={level}").parse()?)
                .add_directive(format!("microbridge_protocol={level}").parse()?)
                .add_directive(format!("microbridge_core={level}").parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "microbridge daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let hub = Hub::with_options(config.server.port, config.hub_options());
    let board = AdkBoard::new(hub, config.sensor.framing);

    board
        .on_resume()
        .await
        .with_context(|| format!("Failed to start hub on port {}", config.server.port))?;

    info!(
        port = config.server.port,
        framing = %config.sensor.framing,
        "Bridge ready"
    );

    let mut toggles = toggle_requests()?;
    let mut blink_timer = blink
        .filter(|period| !period.is_zero())
        .map(|period| tokio::time::interval_at(tokio::time::Instant::now() + period, period));

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            Some(()) = toggles.recv() => {
                let report = board.toggle_led().await;
                info!(
                    led = %board.led_state().await,
                    delivered = report.delivered.len(),
                    "LED toggled on request"
                );
            }
            _ = tick(&mut blink_timer) => {
                board.toggle_led().await;
            }
        }
    }

    board.on_delete().await;

    let snapshot = board.sensor_snapshot();
    info!(
        last_value = snapshot.value.raw(),
        updates = snapshot.updates,
        "microbridge daemon stopped"
    );
    Ok(())
}

/// Completes on the next blink tick, or never when blinking is off.
async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Forwards SIGUSR1 as toggle requests.
fn toggle_requests() -> Result<tokio::sync::mpsc::Receiver<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel(4);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr1 =
            signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
        tokio::spawn(async move {
            while sigusr1.recv().await.is_some() {
                if tx.try_send(()).is_err() {
                    warn!("Dropping LED toggle request, previous ones still pending");
                }
            }
        });
    }

    #[cfg(not(unix))]
    drop(tx);

    Ok(rx)
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
