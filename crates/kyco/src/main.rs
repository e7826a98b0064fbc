// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kyco SDN controller
//!
//! # Usage
//!
//! ```bash
//! # Switches on :6633, API on 127.0.0.1:8181
//! kyco
//!
//! # Custom ports and NApps directory
//! kyco --port 6653 --api-port 8080 --napps-dir ./napps
//!
//! # Using configuration file
//! kyco --config kyco.toml
//!
//! # Write a default configuration file
//! kyco gen-config --output kyco.toml
//! ```

use clap::{Parser, Subcommand};
use crossbeam::channel::{self, RecvTimeoutError};
use kyco::{Controller, ControllerConfig, LogStream};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// How often the main thread checks whether the API asked to stop.
const API_POLL: Duration = Duration::from_millis(500);

/// Kyco SDN controller
#[derive(Parser, Debug)]
#[command(name = "kyco")]
#[command(about = "Kyco SDN controller - switch connections, event pipelines and NApps")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address switches connect to
    #[arg(short, long)]
    listen: Option<IpAddr>,

    /// TCP port switches connect to (0 = ephemeral)
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP API port (0 = ephemeral)
    #[arg(long)]
    api_port: Option<u16>,

    /// NApps directory
    #[arg(long)]
    napps_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate default configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "kyco.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(Commands::GenConfig { output }) = args.command {
        ControllerConfig::default().to_file(&output)?;
        println!("Configuration written to {}", output.display());
        return Ok(());
    }

    let config = build_config(&args)?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(LogStream::global().layer())
        .init();

    info!("Kyco SDN controller v{}", env!("CARGO_PKG_VERSION"));

    let controller = Controller::new(config)?;
    controller.start()?;

    let (tx, rx) = channel::bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    }) {
        warn!("Ctrl+C handler not installed: {}", e);
    }

    loop {
        match rx.recv_timeout(API_POLL) {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !controller.handle().api_running() {
                    info!("API server stopped, shutting down...");
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(report) = controller.stop(true) {
        if !report.is_clean() {
            warn!(
                "Shutdown not clean: {} panicked, {} detached",
                report.panicked.len(),
                report.detached.len()
            );
        }
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<ControllerConfig, kyco::config::ConfigError> {
    let mut config = match args.config {
        Some(ref path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(api_port) = args.api_port {
        config.api_port = api_port;
    }
    if let Some(ref dir) = args.napps_dir {
        config.napps_dir = dir.clone();
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from([
            "kyco",
            "--port",
            "6653",
            "--api-port",
            "0",
            "--napps-dir",
            "/tmp/napps",
            "--log-level",
            "debug",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.port, 6653);
        assert_eq!(config.api_port, 0);
        assert_eq!(config.napps_dir, PathBuf::from("/tmp/napps"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.listen, ControllerConfig::default().listen);
    }

    #[test]
    fn test_cli_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kyco.toml");
        std::fs::write(&path, "port = 7000\nshutdown_timeout_secs = 3\n").unwrap();

        let args = Args::parse_from(["kyco", "--config", path.to_str().unwrap(), "--port", "7001"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.shutdown_timeout_secs, 3);
    }

    #[test]
    fn test_cli_rejects_shared_port() {
        let args = Args::parse_from(["kyco", "--listen", "127.0.0.1", "--port", "8181"]);
        assert!(build_config(&args).is_err());
    }
}
