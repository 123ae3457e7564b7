// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI port watching and port I/O.
//!
//! This module provides the device watcher, the engine that owns one watcher
//! per direction, and input/output ports. The operating system side sits
//! behind the `MidiPlatform` trait, allowing different backends (midir,
//! the in-process virtual backend, etc.) to be used interchangeably.

pub mod backend;
pub mod engine;
pub mod input;
pub mod midir_backend;
pub mod output;
pub mod virtual_backend;
pub mod watcher;

use std::fmt;
use std::sync::Arc;

pub use backend::{
    DeviceEvent, DeviceEventSink, MidiInputHandle, MidiOutput, MidiPlatform, PlatformError,
    RawInputHandler, WatchSubscription,
};
pub use engine::MidiEngine;
pub use input::{InputPort, MidiInCallback, MidiInEvent};
pub use midir_backend::MidirPlatform;
pub use output::OutputPort;
pub use virtual_backend::VirtualPlatform;
pub use watcher::{PortChangedCallback, PortWatcher};

/// Direction of a MIDI port.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    In = 0,
    Out = 1,
}

impl PortType {
    /// Decode a raw value received over the C ABI.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(PortType::In),
            1 => Some(PortType::Out),
            _ => None,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::In => f.write_str("input"),
            PortType::Out => f.write_str("output"),
        }
    }
}

/// Kind of change reported to a port-changed callback.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortUpdate {
    PortAdded = 0,
    PortRemoved = 1,
    EnumerationComplete = 2,
}

/// Opaque platform identifier of a MIDI device.
///
/// Cheap to clone; compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortId(Arc<str>);

impl PortId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PortId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// A port as currently known to a watcher: display name plus platform id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    name: String,
    id: PortId,
}

impl PortRecord {
    pub fn new(name: impl Into<String>, id: impl Into<PortId>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// Human-readable device name (UTF-8)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier used to re-open the device
    pub fn id(&self) -> &PortId {
        &self.id
    }
}

/// MIDI message constants
pub mod messages {
    // Channel Voice Messages (upper nibble, lower nibble is channel 0-15)
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
}
