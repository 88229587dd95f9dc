// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drover Daemon (droverd)
//!
//! Ships container and file logs to downstream sinks with durable
//! positions, deduplication, retries, and a dead-letter queue.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use drover_core::SystemClock;
use drover_daemon::{Daemon, DroverConfig, LifecycleError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Exit codes: 0 clean, 1 startup/config error, 2 shutdown timeout.
const EXIT_OK: i32 = 0;
const EXIT_STARTUP: i32 = 1;
const EXIT_SHUTDOWN_TIMEOUT: i32 = 2;

const DEFAULT_CONFIG_PATH: &str = "/etc/drover/config.yaml";

/// Health is logged on change, on this cadence.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    let config_path = match parse_args() {
        Ok(path) => path,
        Err(code) => std::process::exit(code),
    };

    let config = match DroverConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    let _log_guard = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to set up logging: {e}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    info!(config = %config_path.display(), "starting droverd");

    let daemon = match Daemon::build(config, Arc::new(SystemClock)) {
        Ok(daemon) => daemon,
        Err(LifecycleError::LockFailed(path)) => {
            eprintln!("droverd is already running (lock: {})", path.display());
            std::process::exit(EXIT_STARTUP);
        }
        Err(e) => {
            error!(error = %e, "failed to start");
            eprintln!("error: {e}");
            std::process::exit(EXIT_STARTUP);
        }
    };
    daemon.start();

    let code = run_until_signalled(daemon, &config_path).await;
    // Flush the non-blocking appender before the process exits
    drop(_log_guard);
    std::process::exit(code);
}

/// Signal loop: SIGTERM/SIGINT shut down, SIGHUP reloads.
async fn run_until_signalled(daemon: Daemon, config_path: &Path) -> i32 {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "signal handler failed");
            return EXIT_STARTUP;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "signal handler failed");
            return EXIT_STARTUP;
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "signal handler failed");
            return EXIT_STARTUP;
        }
    };

    let mut health_tick = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    let mut last_health = daemon.health();

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading configuration");
                match DroverConfig::load(config_path) {
                    Ok(next) => {
                        if let Err(e) = daemon.reload(next) {
                            warn!(error = %e, "reload rejected, keeping current configuration");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "reload failed, keeping current configuration");
                    }
                }
            }
            _ = health_tick.tick() => {
                let health = daemon.health();
                if health != last_health {
                    info!(
                        from = last_health.as_str(),
                        to = health.as_str(),
                        "health changed"
                    );
                    last_health = health;
                }
            }
        }
    }

    match daemon.shutdown().await {
        Ok(()) => EXIT_OK,
        Err(LifecycleError::Shutdown(e)) => {
            error!(error = %e, "shutdown overran its ceiling");
            EXIT_SHUTDOWN_TIMEOUT
        }
        Err(e) => {
            error!(error = %e, "shutdown reported an error");
            EXIT_SHUTDOWN_TIMEOUT
        }
    }
}

/// `droverd [--config <path>] [--version] [--help]`
fn parse_args() -> Result<PathBuf, i32> {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => config_path = PathBuf::from(path),
                None => {
                    eprintln!("error: --config requires a path");
                    return Err(EXIT_STARTUP);
                }
            },
            "--version" | "-V" => {
                println!("droverd {}", env!("CARGO_PKG_VERSION"));
                return Err(EXIT_OK);
            }
            "--help" | "-h" => {
                println!("droverd {}", env!("CARGO_PKG_VERSION"));
                println!("Ships container and file logs to downstream sinks.");
                println!();
                println!("USAGE:");
                println!("    droverd [--config <path>]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <path>   Configuration file (default: {DEFAULT_CONFIG_PATH})");
                println!("    -h, --help            Print help information");
                println!("    -V, --version         Print version information");
                println!();
                println!("SIGNALS:");
                println!("    SIGHUP                Reload the configuration file");
                println!("    SIGTERM, SIGINT       Graceful shutdown");
                return Err(EXIT_OK);
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: droverd [--config <path>]");
                return Err(EXIT_STARTUP);
            }
        }
    }
    Ok(config_path)
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

fn setup_logging(
    config: &DroverConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match &config.logging.path {
        Some(path) => {
            rotate_log_if_needed(path);
            let dir = path.parent().unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)?;
            let file_name = path
                .file_name()
                .ok_or_else(|| std::io::Error::other("log path has no file name"))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(non_blocking))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            Ok(None)
        }
    }
}

/// Shift `drover.log` → `.1` → `.2` → `.3` when it grows too large.
/// Best-effort: rotation failures never block startup.
fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}
