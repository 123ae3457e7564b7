// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI port watching and port I/O behind a stable C ABI.
//!
//! `MidiEngine` owns one `PortWatcher` per direction. A watcher turns the
//! platform's asynchronous device events into a port list that readers see
//! only after the initial enumeration has finished, and forwards later
//! changes to a callback. Ports are opened by index through the engine.
//!
//! The `ffi` module exports the same operations as `extern "C"` functions;
//! `include/midibridge.h` declares them for C callers.

pub mod config;
pub mod error;
pub mod ffi;
pub mod midi;

pub use config::BridgeConfig;
pub use error::{ErrorCode, MidiError, Result};
pub use midi::{
    InputPort, MidiEngine, MidiInCallback, MidiInEvent, MidiPlatform, MidirPlatform, OutputPort,
    PortChangedCallback, PortId, PortRecord, PortType, PortUpdate, PortWatcher, VirtualPlatform,
};
