// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event envelope passed through the controller buffers.
//!
//! An event has a dotted hierarchical name (`core.connection.new`), optional
//! source and destination connections, and a content map. Events are built
//! once with [`KycoEvent::new`] and the `with_*` methods, then never mutated:
//! listeners only ever see `&KycoEvent`.

use crate::error::PackError;
use crate::switch::{Connection, Switch};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Event names that are part of the controller contract.
pub mod names {
    /// A switch opened a TCP connection (raw buffer, source = connection).
    pub const CONNECTION_NEW: &str = "core.connection.new";
    /// A dpid was seen for the first time (app buffer, content `switch`).
    pub const SWITCHES_NEW: &str = "core.switches.new";
    /// Poison pill understood by every dispatch loop.
    pub const SHUTDOWN: &str = "core.shutdown";
}

/// Outbound protocol message: anything that can be packed into wire bytes.
///
/// The protocol encoder lives outside the controller; the msg-out loop only
/// relies on this contract.
pub trait OutboundMessage: fmt::Debug + Send + Sync {
    fn pack(&self) -> Result<Vec<u8>, PackError>;
}

/// Already-encoded message bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage(pub Vec<u8>);

impl OutboundMessage for RawMessage {
    fn pack(&self) -> Result<Vec<u8>, PackError> {
        Ok(self.0.clone())
    }
}

/// A value stored in an event's content map.
#[derive(Debug, Clone)]
pub enum EventValue {
    Switch(Arc<Switch>),
    Connection(Arc<Connection>),
    Message(Arc<dyn OutboundMessage>),
    Json(serde_json::Value),
}

/// Content map of an event.
pub type EventContent = BTreeMap<String, EventValue>;

/// Controller event.
#[derive(Debug, Clone)]
pub struct KycoEvent {
    name: String,
    source: Option<Arc<Connection>>,
    destination: Option<Arc<Connection>>,
    content: EventContent,
}

impl KycoEvent {
    /// Create an event with an empty content map.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            destination: None,
            content: EventContent::new(),
        }
    }

    /// The shutdown sentinel.
    pub fn shutdown() -> Self {
        Self::new(names::SHUTDOWN)
    }

    /// `core.connection.new` for a freshly accepted connection.
    pub fn connection_new(connection: Arc<Connection>) -> Self {
        Self::new(names::CONNECTION_NEW).with_source(connection)
    }

    /// `core.switches.new` carrying the new switch.
    pub fn switches_new(switch: Arc<Switch>) -> Self {
        Self::new(names::SWITCHES_NEW).with_content("switch", EventValue::Switch(switch))
    }

    /// Outbound message event for the msg-out buffer.
    pub fn message_out(
        name: impl Into<String>,
        destination: Arc<Connection>,
        message: Arc<dyn OutboundMessage>,
    ) -> Self {
        Self::new(name)
            .with_destination(destination)
            .with_content("message", EventValue::Message(message))
    }

    pub fn with_source(mut self, source: Arc<Connection>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_destination(mut self, destination: Arc<Connection>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_content(mut self, key: impl Into<String>, value: EventValue) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&Arc<Connection>> {
        self.source.as_ref()
    }

    pub fn destination(&self) -> Option<&Arc<Connection>> {
        self.destination.as_ref()
    }

    pub fn content(&self) -> &EventContent {
        &self.content
    }

    /// Whether this is the shutdown sentinel.
    pub fn is_shutdown(&self) -> bool {
        self.name == names::SHUTDOWN
    }

    /// The `message` entry, if it holds an outbound message.
    pub fn message(&self) -> Option<&Arc<dyn OutboundMessage>> {
        match self.content.get("message") {
            Some(EventValue::Message(msg)) => Some(msg),
            _ => None,
        }
    }

    /// The `switch` entry, if it holds a switch.
    pub fn switch(&self) -> Option<&Arc<Switch>> {
        match self.content.get("switch") {
            Some(EventValue::Switch(switch)) => Some(switch),
            _ => None,
        }
    }
}

impl fmt::Display for KycoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KycoEvent({})", self.name)
    }
}
