// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kyco SDN controller core
//!
//! Accepts switch connections over TCP, moves events through four FIFO
//! buffers (raw, msg-in, msg-out, app) and hands each event to the listeners
//! whose regular expression matches its name. NApps plug listeners and REST
//! endpoints into the controller at load time.
//!
//! # Quick Start
//!
//! ```bash
//! # Switches on :6633, API on 127.0.0.1:8181
//! kyco
//!
//! # Using a config file
//! kyco --config kyco.toml
//!
//! # Follow the controller log (any websocket client)
//! websocat ws://127.0.0.1:8181/kytos/logs
//!
//! # Ask the running controller to stop its API
//! curl http://127.0.0.1:8181/kytos/shutdown
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! listen = "0.0.0.0"
//! port = 6633
//! api_address = "127.0.0.1"
//! api_port = 8181
//! napps_dir = "/var/lib/kyco/napps"
//! core_napps = ["kyco/switch_inventory"]
//! shutdown_timeout_secs = 10
//! log_level = "info"
//! ```
//!
//! # Embedding
//!
//! ```no_run
//! use kyco::{Controller, ControllerConfig, KycoEvent, Listener};
//!
//! let controller = Controller::new(ControllerConfig::default())?;
//! controller.register_listener(
//!     "core.switches.new",
//!     Listener::new("example", |event: &KycoEvent| {
//!         println!("{}", event);
//!         Ok(())
//!     }),
//! )?;
//! controller.start()?;
//! controller.stop(true);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod api;
pub mod buffers;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod listeners;
pub mod logs;
pub mod napps;
pub mod switch;

pub use buffers::{EventBuffer, KycoBuffers};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerHandle, WeakControllerHandle};
pub use error::{ControllerError, ListenerError, NAppError, NAppLoadError};
pub use events::{KycoEvent, OutboundMessage, RawMessage};
pub use listeners::{EventListeners, Listener};
pub use logs::LogStream;
pub use napps::{NApp, NAppCatalog, NAppHost};
pub use switch::{Connection, ConnectionId, Dpid, Switch};
