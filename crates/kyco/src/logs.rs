// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live log streaming.
//!
//! [`LogLayer`] is a `tracing_subscriber` layer that formats every event into
//! one text line and publishes it on a [`LogStream`] broadcast channel. The
//! HTTP server forwards the channel to websocket clients on
//! `GET /kytos/logs`.
//!
//! ```no_run
//! use tracing_subscriber::prelude::*;
//!
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(kyco::logs::LogStream::global().layer())
//!     .init();
//! ```

use chrono::{SecondsFormat, Utc};
use std::fmt::{self, Write as _};
use std::sync::OnceLock;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Lines buffered per subscriber before the slowest one starts lagging.
pub const LOG_BACKLOG: usize = 1024;

/// URL under `/kytos` serving the log websocket.
pub const LOGS_URL: &str = "/logs";

static GLOBAL: OnceLock<LogStream> = OnceLock::new();

/// Broadcast channel of formatted log lines.
#[derive(Clone, Debug)]
pub struct LogStream {
    tx: broadcast::Sender<String>,
}

impl LogStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Process-wide stream served by the HTTP API.
    pub fn global() -> &'static LogStream {
        GLOBAL.get_or_init(|| LogStream::new(LOG_BACKLOG))
    }

    /// Layer publishing into this stream.
    pub fn layer(&self) -> LogLayer {
        LogLayer {
            tx: self.tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a line. Returns false when nobody listens.
    pub fn publish(&self, line: String) -> bool {
        self.tx.send(line).is_ok()
    }
}

/// Layer feeding a [`LogStream`].
#[derive(Clone, Debug)]
pub struct LogLayer {
    tx: broadcast::Sender<String>,
}

impl<S: Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Nothing to format for when no client is attached
        if self.tx.receiver_count() == 0 {
            return;
        }

        let meta = event.metadata();
        let mut fields = LineVisitor::default();
        event.record(&mut fields);

        let line = format!(
            "{} {:>5} {}: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            meta.level(),
            meta.target(),
            fields.finish()
        );
        let _ = self.tx.send(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
