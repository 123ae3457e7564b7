// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI port watcher.
//!
//! A `PortWatcher` absorbs the asynchronous, event-driven device enumeration
//! of the platform and presents a blocking, thread-safe view of the current
//! ports. Accessors block until the platform reports that its initial
//! enumeration is complete; after that they read a lock-consistent snapshot
//! while add/remove events keep arriving on platform threads.
//!
//! Change notifications are only raised once the initial enumeration has
//! completed. Devices that arrive earlier are recorded silently, then a single
//! `EnumerationComplete` notification is raised.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace};

use super::backend::{DeviceEvent, DeviceEventSink, MidiPlatform, WatchSubscription};
use super::{PortId, PortRecord, PortType, PortUpdate};
use crate::error::{MidiError, Result};

/// Port-changed callback.
///
/// Receives the watcher that changed so the callee can query it. Runs on the
/// platform's event thread; it must not feed events back into the same
/// watcher.
pub type PortChangedCallback = Arc<dyn Fn(&PortWatcher, PortUpdate) + Send + Sync>;

#[derive(Debug, Default)]
struct WatcherState {
    /// Arrival order, except that removal swaps the last port into the gap
    ports: Vec<PortRecord>,
    /// Flips to true once and is never reset
    enumeration_complete: bool,
}

/// Tracks the MIDI ports of one direction.
pub struct PortWatcher {
    port_type: PortType,
    state: Mutex<WatcherState>,
    enumerated: Condvar,
    /// Serializes event handling so notifications keep platform order
    dispatch: Mutex<()>,
    callback: Option<PortChangedCallback>,
    subscription: Mutex<Option<Box<dyn WatchSubscription>>>,
}

impl PortWatcher {
    /// Create a watcher in the constructed state. Nothing is watched until
    /// `start` or `initialize` is called.
    pub fn new(port_type: PortType, callback: Option<PortChangedCallback>) -> Arc<Self> {
        Arc::new(Self {
            port_type,
            state: Mutex::new(WatcherState::default()),
            enumerated: Condvar::new(),
            dispatch: Mutex::new(()),
            callback,
            subscription: Mutex::new(None),
        })
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    /// Start watching and block until the initial enumeration is complete.
    ///
    /// There is no timeout: a platform that never completes its enumeration
    /// blocks the caller forever.
    pub fn initialize(self: &Arc<Self>, platform: &dyn MidiPlatform) -> Result<()> {
        self.start(platform)?;
        self.wait_for_enumeration();
        Ok(())
    }

    /// Subscribe to the platform's device watch without waiting.
    ///
    /// The platform only holds a weak reference, so dropping the last
    /// `Arc<PortWatcher>` stops the watch.
    pub fn start(self: &Arc<Self>, platform: &dyn MidiPlatform) -> Result<()> {
        let weak = Arc::downgrade(self);
        let sink: DeviceEventSink = Arc::new(move |event| {
            if let Some(watcher) = weak.upgrade() {
                watcher.handle_event(event);
            }
        });

        let subscription =
            platform
                .watch(self.port_type, sink)
                .map_err(|source| MidiError::PortWatcherInit {
                    port_type: self.port_type,
                    source,
                })?;

        debug!(port_type = %self.port_type, "port watcher started");
        if let Some(mut previous) = self.subscription.lock().replace(subscription) {
            previous.stop();
        }
        Ok(())
    }

    /// Whether the initial enumeration has completed. Never blocks.
    pub fn is_enumerated(&self) -> bool {
        self.state.lock().enumeration_complete
    }

    /// Block until the initial enumeration has completed.
    pub fn wait_for_enumeration(&self) {
        drop(self.enumerated_state());
    }

    /// Number of known ports. Blocks until enumerated.
    pub fn port_count(&self) -> usize {
        self.enumerated_state().ports.len()
    }

    /// Name of the port at `index`, `None` when out of range. Blocks until
    /// enumerated.
    pub fn port_name(&self, index: usize) -> Option<String> {
        self.enumerated_state()
            .ports
            .get(index)
            .map(|port| port.name().to_string())
    }

    /// Platform id of the port at `index`, `None` when out of range. Blocks
    /// until enumerated.
    pub fn port_id(&self, index: usize) -> Option<PortId> {
        self.enumerated_state()
            .ports
            .get(index)
            .map(|port| port.id().clone())
    }

    /// Port at `index`, `None` when out of range. Blocks until enumerated.
    pub fn port(&self, index: usize) -> Option<PortRecord> {
        self.enumerated_state().ports.get(index).cloned()
    }

    /// Snapshot of all ports. Blocks until enumerated.
    ///
    /// Indices are only meaningful until the next add/remove notification.
    pub fn ports(&self) -> Vec<PortRecord> {
        self.enumerated_state().ports.clone()
    }

    /// Apply one device event and raise the matching notification.
    ///
    /// This is the sink the platform feeds; it may be called from any thread.
    pub fn handle_event(&self, event: DeviceEvent) {
        let _order = self.dispatch.lock();

        let update = match event {
            DeviceEvent::Added { name, id } => self.on_device_added(name, id),
            DeviceEvent::Removed { id } => self.on_device_removed(&id),
            DeviceEvent::Updated { id } => {
                // Device metadata updates carry nothing actionable for MIDI ports
                trace!(port_type = %self.port_type, %id, "device updated");
                None
            }
            DeviceEvent::EnumerationCompleted => self.on_enumeration_completed(),
        };

        if let Some(update) = update {
            if let Some(callback) = &self.callback {
                callback(self, update);
            }
        }
    }

    fn enumerated_state(&self) -> MutexGuard<'_, WatcherState> {
        let mut state = self.state.lock();
        while !state.enumeration_complete {
            self.enumerated.wait(&mut state);
        }
        state
    }

    fn on_device_added(&self, name: String, id: PortId) -> Option<PortUpdate> {
        let mut state = self.state.lock();
        if state.ports.iter().any(|port| port.id() == &id) {
            debug!(port_type = %self.port_type, %id, "ignoring duplicate device");
            return None;
        }

        info!(port_type = %self.port_type, %name, %id, "MIDI port added");
        state.ports.push(PortRecord::new(name, id));
        state.enumeration_complete.then_some(PortUpdate::PortAdded)
    }

    fn on_device_removed(&self, id: &PortId) -> Option<PortUpdate> {
        let mut state = self.state.lock();
        let index = state.ports.iter().position(|port| port.id() == id)?;

        let removed = state.ports.swap_remove(index);
        info!(port_type = %self.port_type, name = %removed.name(), %id, "MIDI port removed");
        state.enumeration_complete.then_some(PortUpdate::PortRemoved)
    }

    fn on_enumeration_completed(&self) -> Option<PortUpdate> {
        let mut state = self.state.lock();
        if state.enumeration_complete {
            return None;
        }

        state.enumeration_complete = true;
        self.enumerated.notify_all();
        info!(
            port_type = %self.port_type,
            count = state.ports.len(),
            "MIDI port enumeration complete"
        );
        Some(PortUpdate::EnumerationComplete)
    }
}

impl Drop for PortWatcher {
    fn drop(&mut self) {
        if let Some(mut subscription) = self.subscription.get_mut().take() {
            subscription.stop();
            debug!(port_type = %self.port_type, "port watcher stopped");
        }
    }
}
