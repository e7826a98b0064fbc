// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bundled core NApp keeping an inventory of announced switches.
//!
//! Listens to `core.switches.new` and serves `GET /kytos/switches`.

use super::{NApp, NAppListeners};
use crate::api::RestResponse;
use crate::controller::{ControllerHandle, WeakControllerHandle};
use crate::error::{ListenerError, NAppError};
use crate::events::{names, KycoEvent};
use crate::listeners::Listener;
use crate::switch::Dpid;
use axum::http::{Method, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

pub const NAPP_NAME: &str = "kyco/switch_inventory";
pub const SWITCHES_URL: &str = "/switches";

#[derive(Debug, Serialize)]
struct SwitchEntry {
    dpid: String,
    connection: Option<String>,
    connected: bool,
}

#[derive(Debug, Serialize)]
struct Inventory {
    switches: Vec<SwitchEntry>,
    announced: Vec<String>,
}

/// Switch inventory NApp.
pub struct SwitchInventory {
    handle: WeakControllerHandle,
    announced: Arc<Mutex<Vec<Dpid>>>,
    listener: Listener,
}

impl SwitchInventory {
    pub fn new(handle: &ControllerHandle) -> Self {
        let announced: Arc<Mutex<Vec<Dpid>>> = Arc::default();
        let seen = announced.clone();
        let listener = Listener::new(NAPP_NAME, move |event: &KycoEvent| {
            let switch = event
                .switch()
                .ok_or_else(|| ListenerError::failed(format!("{} without switch", event)))?;
            info!("Switch {} announced", switch.dpid());
            seen.lock().push(switch.dpid().clone());
            Ok(())
        });

        Self {
            handle: handle.downgrade(),
            announced,
            listener,
        }
    }

    /// Catalog factory.
    pub fn boxed(handle: ControllerHandle) -> Result<Box<dyn NApp>, NAppError> {
        Ok(Box::new(Self::new(&handle)))
    }

    /// Dpids seen on `core.switches.new`, in arrival order.
    pub fn announced(&self) -> Vec<Dpid> {
        self.announced.lock().clone()
    }
}

fn inventory(handle: &ControllerHandle, announced: &[Dpid]) -> Inventory {
    let switches = handle
        .registry()
        .switches()
        .into_iter()
        .map(|switch| {
            let connection = switch.connection();
            SwitchEntry {
                dpid: switch.dpid().to_string(),
                connected: connection.as_ref().is_some_and(|c| c.is_alive()),
                connection: connection.map(|c| c.id().to_string()),
            }
        })
        .collect();

    Inventory {
        switches,
        announced: announced.iter().map(Dpid::to_string).collect(),
    }
}

impl NApp for SwitchInventory {
    fn listeners(&self) -> NAppListeners {
        let mut listeners = NAppListeners::new();
        listeners.insert(names::SWITCHES_NEW.to_string(), vec![self.listener.clone()]);
        listeners
    }

    fn start(&mut self) -> Result<(), NAppError> {
        let handle = self
            .handle
            .upgrade()
            .ok_or_else(|| NAppError::new("controller is gone"))?;

        let weak = self.handle.clone();
        let announced = self.announced.clone();
        let mounted = handle.register_rest_endpoint(SWITCHES_URL, &[Method::GET], move |_req| {
            let Some(handle) = weak.upgrade() else {
                return RestResponse::empty(StatusCode::SERVICE_UNAVAILABLE);
            };
            let body = inventory(&handle, &announced.lock());
            match serde_json::to_value(body) {
                Ok(value) => RestResponse::json(StatusCode::OK, &value),
                Err(e) => RestResponse::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        });
        if !mounted {
            debug!("{} endpoint already mounted", SWITCHES_URL);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        debug!("{} shutting down", NAPP_NAME);
    }

    fn is_core(&self) -> bool {
        true
    }
}
