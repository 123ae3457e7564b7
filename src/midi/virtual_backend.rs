// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! In-process virtual MIDI platform.
//!
//! Devices, hotplug events and incoming messages are driven from code, and
//! every byte sent to an output is recorded. Used by the tests and benches,
//! and handy for exercising client code without hardware.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::backend::{
    DeviceEvent, DeviceEventSink, MidiInputHandle, MidiOutput, MidiPlatform, PlatformError,
    RawInputHandler, WatchSubscription,
};
use super::{PortId, PortType};

#[derive(Default)]
struct Direction {
    devices: Vec<(String, PortId)>,
    sink: Option<(u64, DeviceEventSink)>,
    defer_enumeration: bool,
    fail_watch: bool,
}

struct OpenInput {
    token: u64,
    id: PortId,
    handler: Arc<Mutex<RawInputHandler>>,
}

enum ProbeFailure {
    Unavailable(String),
    Unsupported(String),
}

#[derive(Default)]
struct VirtualState {
    inputs: Direction,
    outputs: Direction,
    open_inputs: Vec<OpenInput>,
    open_outputs: usize,
    sent: Vec<(PortId, Vec<u8>)>,
    unopenable: HashSet<PortId>,
    probe_failure: Option<ProbeFailure>,
    watch_log: Vec<PortType>,
    next_token: u64,
}

impl VirtualState {
    fn direction(&mut self, port_type: PortType) -> &mut Direction {
        match port_type {
            PortType::In => &mut self.inputs,
            PortType::Out => &mut self.outputs,
        }
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

/// Scriptable MIDI platform. Clones share the same devices and state.
#[derive(Clone, Default)]
pub struct VirtualPlatform {
    shared: Arc<Mutex<VirtualState>>,
}

impl VirtualPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `probe` fail as if the MIDI runtime could not start.
    pub fn set_unavailable(&self, reason: &str) {
        self.shared.lock().probe_failure = Some(ProbeFailure::Unavailable(reason.to_string()));
    }

    /// Make `probe` fail as if the OS were too old for MIDI device watching.
    pub fn set_unsupported(&self, reason: &str) {
        self.shared.lock().probe_failure = Some(ProbeFailure::Unsupported(reason.to_string()));
    }

    /// Hold back `EnumerationCompleted` for `port_type` until
    /// `complete_enumeration` is called.
    pub fn defer_enumeration(&self, port_type: PortType) {
        self.shared.lock().direction(port_type).defer_enumeration = true;
    }

    /// Make the next watches of `port_type` fail to start.
    pub fn fail_watch(&self, port_type: PortType) {
        self.shared.lock().direction(port_type).fail_watch = true;
    }

    /// Make opening the device with `id` fail.
    pub fn fail_open(&self, id: &str) {
        self.shared.lock().unopenable.insert(PortId::from(id));
    }

    /// Plug in a device. Reported to a running watch as `Added`.
    pub fn add_device(&self, port_type: PortType, name: &str, id: &str) {
        let id = PortId::from(id);
        let sink = {
            let mut state = self.shared.lock();
            let direction = state.direction(port_type);
            direction.devices.push((name.to_string(), id.clone()));
            direction.sink.as_ref().map(|(_, sink)| Arc::clone(sink))
        };
        if let Some(sink) = sink {
            sink(DeviceEvent::Added {
                name: name.to_string(),
                id,
            });
        }
    }

    /// Unplug a device. Reported to a running watch as `Removed`, even when
    /// the id is unknown.
    pub fn remove_device(&self, port_type: PortType, id: &str) {
        let id = PortId::from(id);
        let sink = {
            let mut state = self.shared.lock();
            let direction = state.direction(port_type);
            direction.devices.retain(|(_, known)| known != &id);
            direction.sink.as_ref().map(|(_, sink)| Arc::clone(sink))
        };
        if let Some(sink) = sink {
            sink(DeviceEvent::Removed { id });
        }
    }

    /// Report a metadata update for a device.
    pub fn update_device(&self, port_type: PortType, id: &str) {
        self.emit(port_type, DeviceEvent::Updated { id: PortId::from(id) });
    }

    /// Report the end of the initial enumeration to a running watch.
    pub fn complete_enumeration(&self, port_type: PortType) {
        self.emit(port_type, DeviceEvent::EnumerationCompleted);
    }

    /// Deliver an incoming message to every open input on `id`.
    ///
    /// # Arguments
    /// * `timestamp_us` - Microseconds since the port was opened
    pub fn deliver(&self, id: &str, timestamp_us: u64, message: &[u8]) {
        let id = PortId::from(id);
        let handlers: Vec<_> = self
            .shared
            .lock()
            .open_inputs
            .iter()
            .filter(|open| open.id == id)
            .map(|open| Arc::clone(&open.handler))
            .collect();

        for handler in handlers {
            let mut handler = handler.lock();
            (*handler)(timestamp_us, message);
        }
    }

    /// Whether a watch of `port_type` is currently running.
    pub fn is_watching(&self, port_type: PortType) -> bool {
        self.shared.lock().direction(port_type).sink.is_some()
    }

    /// Port types in the order watches were started.
    pub fn watch_log(&self) -> Vec<PortType> {
        self.shared.lock().watch_log.clone()
    }

    /// Number of input handles currently open.
    pub fn open_input_count(&self) -> usize {
        self.shared.lock().open_inputs.len()
    }

    /// Number of output handles currently open.
    pub fn open_output_count(&self) -> usize {
        self.shared.lock().open_outputs
    }

    /// Messages sent to the output with `id`, oldest first.
    pub fn sent_to(&self, id: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter(|(port, _)| port.as_str() == id)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    fn emit(&self, port_type: PortType, event: DeviceEvent) {
        let sink = self
            .shared
            .lock()
            .direction(port_type)
            .sink
            .as_ref()
            .map(|(_, sink)| Arc::clone(sink));
        if let Some(sink) = sink {
            sink(event);
        }
    }

    fn is_present(state: &mut VirtualState, id: &PortId) -> bool {
        [PortType::In, PortType::Out]
            .into_iter()
            .any(|t| state.direction(t).devices.iter().any(|(_, known)| known == id))
    }
}

impl MidiPlatform for VirtualPlatform {
    fn probe(&self) -> Result<(), PlatformError> {
        match &self.shared.lock().probe_failure {
            Some(ProbeFailure::Unavailable(reason)) => {
                Err(PlatformError::Unavailable(reason.clone()))
            }
            Some(ProbeFailure::Unsupported(reason)) => {
                Err(PlatformError::Unsupported(reason.clone()))
            }
            None => Ok(()),
        }
    }

    fn watch(
        &self,
        port_type: PortType,
        sink: DeviceEventSink,
    ) -> Result<Box<dyn WatchSubscription>, PlatformError> {
        let (token, initial) = {
            let mut state = self.shared.lock();
            state.watch_log.push(port_type);
            let token = state.token();
            let direction = state.direction(port_type);
            if direction.fail_watch {
                return Err(PlatformError::Watch(format!(
                    "virtual {port_type} watch refused"
                )));
            }

            direction.sink = Some((token, Arc::clone(&sink)));
            let mut initial: Vec<DeviceEvent> = direction
                .devices
                .iter()
                .map(|(name, id)| DeviceEvent::Added {
                    name: name.clone(),
                    id: id.clone(),
                })
                .collect();
            if !direction.defer_enumeration {
                initial.push(DeviceEvent::EnumerationCompleted);
            }
            (token, initial)
        };

        for event in initial {
            sink(event);
        }

        Ok(Box::new(VirtualSubscription {
            shared: Arc::downgrade(&self.shared),
            port_type,
            token,
        }))
    }

    fn open_input(
        &self,
        id: &PortId,
        handler: RawInputHandler,
    ) -> Result<Box<dyn MidiInputHandle>, PlatformError> {
        let mut state = self.shared.lock();
        if state.unopenable.contains(id) || !Self::is_present(&mut state, id) {
            return Err(PlatformError::PortNotFound(id.clone()));
        }

        let token = state.token();
        state.open_inputs.push(OpenInput {
            token,
            id: id.clone(),
            handler: Arc::new(Mutex::new(handler)),
        });
        Ok(Box::new(VirtualInput {
            shared: Arc::downgrade(&self.shared),
            token,
        }))
    }

    fn open_output(&self, id: &PortId) -> Result<Box<dyn MidiOutput>, PlatformError> {
        let mut state = self.shared.lock();
        if state.unopenable.contains(id) || !Self::is_present(&mut state, id) {
            return Err(PlatformError::PortNotFound(id.clone()));
        }

        state.open_outputs += 1;
        Ok(Box::new(VirtualOutput {
            shared: Arc::downgrade(&self.shared),
            id: id.clone(),
        }))
    }
}

struct VirtualSubscription {
    shared: Weak<Mutex<VirtualState>>,
    port_type: PortType,
    token: u64,
}

impl WatchSubscription for VirtualSubscription {
    fn stop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut state = shared.lock();
            let direction = state.direction(self.port_type);
            if matches!(direction.sink, Some((token, _)) if token == self.token) {
                direction.sink = None;
            }
        }
    }
}

impl Drop for VirtualSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

struct VirtualInput {
    shared: Weak<Mutex<VirtualState>>,
    token: u64,
}

impl MidiInputHandle for VirtualInput {}

impl Drop for VirtualInput {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock().open_inputs.retain(|open| open.token != self.token);
        }
    }
}

struct VirtualOutput {
    shared: Weak<Mutex<VirtualState>>,
    id: PortId,
}

impl MidiOutput for VirtualOutput {
    fn send(&mut self, message: &[u8]) -> Result<(), PlatformError> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| PlatformError::Send("virtual platform dropped".to_string()))?;
        let mut state = shared.lock();
        if !VirtualPlatform::is_present(&mut state, &self.id) {
            return Err(PlatformError::Send(format!("device {} unplugged", self.id)));
        }
        state.sent.push((self.id.clone(), message.to_vec()));
        Ok(())
    }
}

impl Drop for VirtualOutput {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut state = shared.lock();
            state.open_outputs = state.open_outputs.saturating_sub(1);
        }
    }
}
