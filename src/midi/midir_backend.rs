// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! midir backend.
//!
//! Uses the `midir` crate for port I/O: WinRT `Windows.Devices.Midi` on
//! Windows, ALSA on Linux, CoreMIDI on macOS. midir has no device-watch
//! primitive, so each watch runs a polling thread that diffs successive port
//! snapshots into `DeviceEvent`s.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, warn};

use super::backend::{
    DeviceEvent, DeviceEventSink, MidiInputHandle, MidiOutput as MidiOutputPort, MidiPlatform,
    PlatformError, RawInputHandler, WatchSubscription,
};
use super::{PortId, PortType};
use crate::config::BridgeConfig;

/// Shortest accepted hotplug poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One port as seen by a single poll
type Snapshot = Vec<(PortId, String)>;

/// Platform backed by midir.
#[derive(Debug, Clone)]
pub struct MidirPlatform {
    client_name: String,
    poll_interval: Duration,
}

impl MidirPlatform {
    pub fn new(client_name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client_name: client_name.into(),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.client_name.clone(), config.poll_interval())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for MidirPlatform {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl MidiPlatform for MidirPlatform {
    fn probe(&self) -> Result<(), PlatformError> {
        MidiInput::new(&self.client_name)
            .map(drop)
            .map_err(|e| PlatformError::Unavailable(e.to_string()))
    }

    fn watch(
        &self,
        port_type: PortType,
        sink: DeviceEventSink,
    ) -> Result<Box<dyn WatchSubscription>, PlatformError> {
        let scanner = Scanner::new(port_type, &self.client_name)?;
        let watch = spawn_polling_watch(scanner, port_type, self.poll_interval, sink)?;
        Ok(Box::new(watch))
    }

    fn open_input(
        &self,
        id: &PortId,
        mut handler: RawInputHandler,
    ) -> Result<Box<dyn MidiInputHandle>, PlatformError> {
        let mut input = MidiInput::new(&self.client_name)
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;
        input.ignore(Ignore::None);

        let port = input
            .ports()
            .into_iter()
            .find(|port| port.id() == id.as_str())
            .ok_or_else(|| PlatformError::PortNotFound(id.clone()))?;

        let connection = input
            .connect(
                &port,
                &format!("{}-in", self.client_name),
                move |timestamp_us, message, _| handler(timestamp_us, message),
                (),
            )
            .map_err(|e| PlatformError::Connect(e.to_string()))?;

        Ok(Box::new(MidirInput {
            _connection: connection,
        }))
    }

    fn open_output(&self, id: &PortId) -> Result<Box<dyn MidiOutputPort>, PlatformError> {
        let output = MidiOutput::new(&self.client_name)
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;

        let port = output
            .ports()
            .into_iter()
            .find(|port| port.id() == id.as_str())
            .ok_or_else(|| PlatformError::PortNotFound(id.clone()))?;

        let connection = output
            .connect(&port, &format!("{}-out", self.client_name))
            .map_err(|e| PlatformError::Connect(e.to_string()))?;

        Ok(Box::new(MidirOutput { connection }))
    }
}

/// Source of port snapshots for a polling watch.
trait PortScanner: Send + 'static {
    fn snapshot(&mut self) -> Snapshot;
}

/// Spawn the thread that turns successive snapshots of `scanner` into
/// device events: `Added` for the first snapshot, `EnumerationCompleted`,
/// then one diff per poll until stopped.
fn spawn_polling_watch<S: PortScanner>(
    mut scanner: S,
    port_type: PortType,
    interval: Duration,
    sink: DeviceEventSink,
) -> Result<PollingWatch, PlatformError> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let thread = thread::Builder::new()
        .name(format!("midibridge-{port_type}-watch"))
        .spawn(move || {
            let mut known = scanner.snapshot();
            for (id, name) in &known {
                sink(DeviceEvent::Added {
                    name: name.clone(),
                    id: id.clone(),
                });
            }
            sink(DeviceEvent::EnumerationCompleted);

            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let current = scanner.snapshot();
                for event in diff_snapshots(&known, &current) {
                    sink(event);
                }
                known = current;
            }
            debug!(%port_type, "midir watch thread exiting");
        })
        .map_err(|e| PlatformError::Watch(e.to_string()))?;

    Ok(PollingWatch {
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

/// midir client used by a watch thread to list ports
enum Scanner {
    In(MidiInput),
    Out(MidiOutput),
}

impl Scanner {
    fn new(port_type: PortType, client_name: &str) -> Result<Self, PlatformError> {
        let scanner = match port_type {
            PortType::In => MidiInput::new(client_name).map(Scanner::In),
            PortType::Out => MidiOutput::new(client_name).map(Scanner::Out),
        };
        scanner.map_err(|e| PlatformError::Watch(e.to_string()))
    }
}

impl PortScanner for Scanner {
    /// Current ports. A port that disappears between listing and naming is
    /// left out; the next poll reports it as removed if it was known.
    fn snapshot(&mut self) -> Snapshot {
        match self {
            Scanner::In(input) => input
                .ports()
                .iter()
                .filter_map(|port| {
                    let name = input.port_name(port).ok()?;
                    Some((PortId::new(port.id()), name))
                })
                .collect(),
            Scanner::Out(output) => output
                .ports()
                .iter()
                .filter_map(|port| {
                    let name = output.port_name(port).ok()?;
                    Some((PortId::new(port.id()), name))
                })
                .collect(),
        }
    }
}

/// Events turning `previous` into `current`: removals first, then
/// arrivals in `current` order, then renames.
fn diff_snapshots(previous: &[(PortId, String)], current: &[(PortId, String)]) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    for (id, _) in previous {
        if !current.iter().any(|(known, _)| known == id) {
            events.push(DeviceEvent::Removed { id: id.clone() });
        }
    }

    for (id, name) in current {
        if !previous.iter().any(|(known, _)| known == id) {
            events.push(DeviceEvent::Added {
                name: name.clone(),
                id: id.clone(),
            });
        }
    }

    for (id, name) in current {
        if previous
            .iter()
            .any(|(known, old_name)| known == id && old_name != name)
        {
            events.push(DeviceEvent::Updated { id: id.clone() });
        }
    }

    events
}

struct PollingWatch {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WatchSubscription for PollingWatch {
    fn stop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.thread.take() {
            // The last watcher reference can be released on the watch thread itself
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("midir watch thread panicked");
            }
        }
    }
}

impl Drop for PollingWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

struct MidirInput {
    _connection: MidiInputConnection<()>,
}

impl MidiInputHandle for MidirInput {}

struct MidirOutput {
    connection: MidiOutputConnection,
}

impl MidiOutputPort for MidirOutput {
    fn send(&mut self, message: &[u8]) -> Result<(), PlatformError> {
        self.connection
            .send(message)
            .map_err(|e| PlatformError::Send(e.to_string()))
    }
}
