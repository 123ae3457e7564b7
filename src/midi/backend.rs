// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Platform seam.
//!
//! Everything the watcher and the ports need from the operating system:
//! a device-watch primitive that streams `DeviceEvent`s, and blocking
//! port-open calls that hand back live port handles.

use std::sync::Arc;

use thiserror::Error;

use super::{PortId, PortType};

/// Failures reported by a platform backend.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("MIDI runtime unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported platform: {0}")]
    Unsupported(String),

    #[error("device watch failed: {0}")]
    Watch(String),

    #[error("MIDI port {0} not found")]
    PortNotFound(PortId),

    #[error("failed to connect to MIDI port: {0}")]
    Connect(String),

    #[error("{0}")]
    Send(String),
}

/// Device-watch notifications, in the order the platform raises them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added { name: String, id: PortId },
    Removed { id: PortId },
    Updated { id: PortId },
    EnumerationCompleted,
}

/// Receiver for device events. Called on platform threads.
pub type DeviceEventSink = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Receive handler installed on an open input port.
///
/// Arguments are the platform timestamp in microseconds since the port was
/// opened, and the raw message bytes.
pub type RawInputHandler = Box<dyn FnMut(u64, &[u8]) + Send + 'static>;

/// A running device watch. Dropping it stops the watch.
pub trait WatchSubscription: Send {
    /// Stop delivering events. Idempotent.
    fn stop(&mut self);
}

/// A live input port handle. Dropping it disconnects the receive handler.
pub trait MidiInputHandle: Send {}

/// Trait for MIDI output implementations.
pub trait MidiOutput: Send {
    /// Send a MIDI message immediately.
    ///
    /// # Arguments
    /// * `message` - Raw MIDI bytes (e.g., `[0x90, 60, 127]` for Note On)
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err` if the message could not be sent
    fn send(&mut self, message: &[u8]) -> Result<(), PlatformError>;
}

/// Operating system MIDI services.
pub trait MidiPlatform: Send + Sync {
    /// Check that the MIDI runtime is usable at all.
    fn probe(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    /// Subscribe to device arrival/removal for `port_type` and start watching.
    ///
    /// Events may be delivered on any thread, including synchronously from
    /// inside this call.
    fn watch(
        &self,
        port_type: PortType,
        sink: DeviceEventSink,
    ) -> Result<Box<dyn WatchSubscription>, PlatformError>;

    /// Open an input port, blocking until the platform resolves it.
    fn open_input(
        &self,
        id: &PortId,
        handler: RawInputHandler,
    ) -> Result<Box<dyn MidiInputHandle>, PlatformError>;

    /// Open an output port, blocking until the platform resolves it.
    fn open_output(&self, id: &PortId) -> Result<Box<dyn MidiOutput>, PlatformError>;
}
