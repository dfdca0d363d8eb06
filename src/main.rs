//! Seis Logger CLI
//!
//! Runs the acquisition daemon and the tools that share its serial device.

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use seis_logger::{
    archive::files_in_range,
    calibration::run_calibration,
    config::Config,
    daemon::{run_daemon, LoggerContext},
    instance::{is_held, liveness_for, process_alive, remove_marker, Liveness, MarkerInfo},
    JsonTraceCodec, RunOutcome, VERSION,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// How long `stop` waits for the daemon to remove its marker.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a background `start` waits for the daemon to take the marker.
const START_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "seis-logger")]
#[command(version = VERSION)]
#[command(about = "Data logger for a serial-attached seismometer", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the data logger
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop a running data logger
    Stop,

    /// Stop, then start the data logger in the background
    Restart,

    /// Show whether the data logger is running
    Status,

    /// Print live readings to check the sensor offset
    Calibrate,

    /// List stored windows
    List {
        /// How many hours back to look
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// Show configuration
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let config_path = cli.config.unwrap_or_else(Config::config_path);

    let result = match cli.command {
        Commands::Start { foreground } => cmd_start(&config_path, foreground),
        Commands::Stop => cmd_stop(&config_path),
        Commands::Restart => cmd_stop(&config_path).and_then(|()| cmd_start(&config_path, false)),
        Commands::Status => cmd_status(&config_path),
        Commands::Calibrate => cmd_calibrate(&config_path),
        Commands::List { hours } => cmd_list(&config_path, hours),
        Commands::Config { init } => cmd_config(&config_path, init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SEIS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_from(path).with_context(|| format!("loading {}", path.display()))
}

fn cmd_start(config_path: &Path, foreground: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let marker = &config.daemon.pidfile;
    let liveness = liveness_for(config.daemon.liveness);
    if is_held(marker, liveness.as_ref())? {
        let pid = MarkerInfo::read(marker)?.and_then(|m| m.pid);
        match pid {
            Some(pid) => bail!("already running (pid {pid})"),
            None => bail!("already running (marker {})", marker.display()),
        }
    }

    if foreground {
        run_foreground(config)
    } else {
        spawn_background(config_path, &config)
    }
}

fn run_foreground(config: Config) -> Result<()> {
    let context = LoggerContext::new(config)?;

    let stop = Arc::new(AtomicBool::new(false));
    ctrlc_handler(stop.clone());

    match run_daemon(&context, &stop)? {
        RunOutcome::Stopped => Ok(()),
        RunOutcome::Disconnected => bail!("device disconnected"),
    }
}

/// Re-run this executable as `start --foreground`, detached from the terminal.
fn spawn_background(config_path: &Path, config: &Config) -> Result<()> {
    let exe = std::env::current_exe().context("locating executable")?;

    let stderr = match &config.file.logpath {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Stdio::from(file)
        }
        None => Stdio::null(),
    };

    let mut command = Command::new(exe);
    command
        .arg("--config")
        .arg(config_path)
        .args(["start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(stderr);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().context("starting background process")?;

    let deadline = Instant::now() + START_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            bail!("data logger exited during startup ({status})");
        }
        let marker = MarkerInfo::read(&config.daemon.pidfile)?;
        if marker.and_then(|m| m.pid) == Some(child.id()) {
            println!("Seis Logger v{VERSION} started (pid {})", child.id());
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }

    println!(
        "Seis Logger v{VERSION} launched (pid {}), marker not yet written",
        child.id()
    );
    Ok(())
}

fn cmd_stop(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let marker = &config.daemon.pidfile;

    let Some(info) = MarkerInfo::read(marker)? else {
        println!("Not running.");
        return Ok(());
    };
    let Some(pid) = info.pid else {
        bail!("marker {} does not hold a pid", marker.display());
    };

    if !process_alive(pid) {
        remove_marker(marker)?;
        println!("Removed stale marker {} (pid {pid})", marker.display());
        return Ok(());
    }

    terminate(pid)?;
    let deadline = Instant::now() + STOP_TIMEOUT;
    while marker.exists() {
        if Instant::now() >= deadline {
            bail!("pid {pid} did not stop within {}s", STOP_TIMEOUT.as_secs());
        }
        thread::sleep(POLL_INTERVAL);
    }

    println!("Stopped (pid {pid})");
    Ok(())
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    let raw = libc::pid_t::try_from(pid).context("pid out of range")?;
    let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context(format!("signalling pid {pid}"));
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<()> {
    bail!("stopping pid {pid} is not supported on this platform")
}

fn cmd_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let marker = &config.daemon.pidfile;

    println!("Seis Logger Status");
    println!("==================");
    println!();
    println!("Config: {}", config_path.display());
    println!("Marker: {}", marker.display());
    println!("Data:   {}", config.file.datapath.display());

    match MarkerInfo::read(marker)? {
        None => println!("State:  stopped"),
        Some(info) => {
            let pid = info
                .pid
                .map_or_else(|| "unknown".to_string(), |p| p.to_string());
            let state = if liveness_for(config.daemon.liveness).is_alive(&info) {
                "running"
            } else {
                "stale marker"
            };
            println!("State:  {state} (pid {pid})");
        }
    }
    Ok(())
}

fn cmd_calibrate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    let stop = Arc::new(AtomicBool::new(false));
    ctrlc_handler(stop.clone());

    let result = run_calibration(&config, &stop, &mut std::io::stdout().lock());
    match result {
        Ok(count) => {
            println!("{count} samples read");
            Ok(())
        }
        Err(e) if e.is_already_running() => {
            println!("The data logger is running ({e}). Stop it before calibrating.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_list(config_path: &Path, hours: u32) -> Result<()> {
    let config = load_config(config_path)?;
    let end = Utc::now();
    let start = end - ChronoDuration::hours(i64::from(hours));

    let root = &config.file.datapath;
    let files = files_in_range(root, JsonTraceCodec::EXTENSION, start, end)
        .with_context(|| format!("reading {}", root.display()))?;

    for file in &files {
        println!("{}  {}", file.start.format("%Y-%m-%d %H:%M:%S"), file.path.display());
    }
    println!("{} windows in the last {hours}h", files.len());
    Ok(())
}

fn cmd_config(config_path: &Path, init: bool) -> Result<()> {
    if init {
        if config_path.exists() {
            bail!("{} already exists", config_path.display());
        }
        Config::default().save_to(config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let config = load_config(config_path)?;
    println!("Configuration ({})", config_path.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn ctrlc_handler(stop: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
