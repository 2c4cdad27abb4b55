#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use doc_overlay::constants::runtime;
use doc_overlay::{OverlayConfig, OverlayManager, OverlayState, Rect};

/// Overlay an external document editor window onto a region of a host window
#[derive(Parser, Debug)]
#[command(name = "doc-overlay", version, about)]
struct Cli {
    /// Config file path override
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve overlay requests on a Unix socket
    #[cfg(unix)]
    Serve {
        /// Socket path (default: $XDG_RUNTIME_DIR/doc-overlay/overlay.sock)
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Open one document and keep it overlaid until interrupted
    Open(OpenArgs),

    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct OpenArgs {
    file: PathBuf,

    /// Container x, relative to the host window
    #[arg(long, allow_hyphen_values = true)]
    x: i32,

    /// Container y, relative to the host window
    #[arg(long, allow_hyphen_values = true)]
    y: i32,

    #[arg(long)]
    width: i32,

    #[arg(long)]
    height: i32,

    /// Host window screen x
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    window_x: i32,

    /// Host window screen y
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    window_y: i32,

    /// Base directory for relative document paths
    #[arg(long)]
    documents_dir: Option<PathBuf>,
}

fn init_logging(config: &OverlayConfig) -> Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| config.log_level.clone())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")?;
    Ok(())
}

/// Flag raised by SIGINT/SIGTERM
#[cfg(unix)]
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .with_context(|| format!("Failed to register handler for signal {signal}"))?;
    }
    Ok(flag)
}

#[cfg(not(unix))]
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    Ok(Arc::new(AtomicBool::new(false)))
}

fn log_callbacks(manager: &OverlayManager) {
    manager.set_state_callback(Arc::new(|state: &OverlayState| {
        info!(state = state.as_str(), "Overlay state");
    }));
    manager.set_error_callback(Arc::new(|message: &str| {
        error!(error = %message, "Overlay error");
    }));
}

#[cfg(unix)]
fn serve(config: OverlayConfig, socket: Option<PathBuf>) -> Result<()> {
    use doc_overlay::ipc::{serve_connection, Flow, OverlayServer};

    let shutdown = shutdown_flag()?;
    let mut manager = OverlayManager::new(config)?;
    log_callbacks(&manager);

    let server = match socket {
        Some(path) => OverlayServer::bind_to(path)?,
        None => OverlayServer::bind()?,
    };
    info!(socket = %server.path().display(), "Overlay server listening");

    while !shutdown.load(Ordering::SeqCst) {
        match server.try_accept()? {
            Some(mut conn) => {
                if serve_connection(&mut conn, &mut manager, &shutdown)? == Flow::Shutdown {
                    break;
                }
            }
            None => std::thread::sleep(Duration::from_millis(runtime::ACCEPT_POLL_INTERVAL_MS)),
        }
    }

    info!("Overlay server shutting down");
    manager.stop();
    Ok(())
}

fn open(config: OverlayConfig, args: OpenArgs) -> Result<()> {
    let shutdown = shutdown_flag()?;
    let mut manager = OverlayManager::new(config)?;
    log_callbacks(&manager);
    manager.initialize(args.documents_dir.as_deref());
    manager.update_window_position(args.window_x, args.window_y);

    let bounds = Rect::new(args.x, args.y, args.width, args.height);
    manager
        .load_document(&args.file, bounds)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    while !shutdown.load(Ordering::SeqCst) {
        if let OverlayState::Error(message) = manager.state() {
            warn!(error = %message, "Session ended with an error");
            break;
        }
        std::thread::sleep(Duration::from_millis(runtime::SESSION_POLL_INTERVAL_MS));
    }

    manager.stop();
    Ok(())
}

fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    OverlayConfig::default().save_to(&path)?;
    println!("{}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(OverlayConfig::config_path);

    if let Command::InitConfig { force } = cli.command {
        return init_config(config_path, force);
    }

    let config = OverlayConfig::load_from(&config_path)?;
    init_logging(&config)?;
    info!(config = %config_path.display(), "doc-overlay starting");

    match cli.command {
        #[cfg(unix)]
        Command::Serve { socket } => serve(config, socket),
        Command::Open(args) => open(config, args),
        Command::InitConfig { .. } => Ok(()),
    }
}
