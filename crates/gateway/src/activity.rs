//! Running totals of bridge activity, fed from the event bus.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast::error::RecvError};
use tokio::task::JoinHandle;
use toolbridge_core::event::{DomainEvent, EventBus};
use tracing::{debug, info, warn};

/// What the gateway has seen the bridge do since it started.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Activity {
    pub exchanges: u64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub errors: u64,

    /// Adapters reported down and not yet reconnected.
    pub adapters_down: BTreeSet<String>,
}

impl Activity {
    pub fn apply(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::BridgeInitialized { .. } => {}
            DomainEvent::ResponseGenerated { .. } => self.exchanges += 1,
            DomainEvent::ToolExecuted { success, .. } => {
                self.tool_calls += 1;
                if !success {
                    self.tool_failures += 1;
                }
            }
            DomainEvent::AdapterStateChanged {
                adapter, connected, ..
            } => {
                if *connected {
                    self.adapters_down.remove(adapter);
                } else {
                    self.adapters_down.insert(adapter.clone());
                }
            }
            DomainEvent::ErrorOccurred { .. } => self.errors += 1,
        }
    }
}

/// Subscribe to `bus` and fold every event into `activity` until the bus
/// is dropped.
pub fn track(bus: &EventBus, activity: Arc<RwLock<Activity>>) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    log_event(&event);
                    activity.write().await.apply(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Activity tracker fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::ToolExecuted {
            tool_name,
            adapter,
            success,
            duration_ms,
            ..
        } => debug!(tool = %tool_name, adapter = %adapter, success, duration_ms, "Tool executed"),
        DomainEvent::AdapterStateChanged {
            adapter, connected, ..
        } => info!(adapter = %adapter, connected, "Adapter state changed"),
        _ => {}
    }
}
