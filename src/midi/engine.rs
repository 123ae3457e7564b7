// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI engine: one input watcher, one output watcher, and port resolution.

use std::sync::Arc;

use tracing::{error, info};

use super::backend::MidiPlatform;
use super::input::{InputPort, MidiInCallback};
use super::output::OutputPort;
use super::watcher::{PortChangedCallback, PortWatcher};
use super::{PortId, PortType};
use crate::error::{MidiError, Result};

/// Aggregate root handed to clients.
///
/// Owns exactly one watcher per direction for its whole lifetime. Dropping
/// the engine stops both watches; ports opened from it stay usable.
pub struct MidiEngine {
    platform: Arc<dyn MidiPlatform>,
    inputs: Arc<PortWatcher>,
    outputs: Arc<PortWatcher>,
}

impl MidiEngine {
    /// Start both watchers and wait for their initial enumeration.
    ///
    /// The input watcher is initialized first; if it fails the output
    /// watcher is never started and its error is returned.
    pub fn initialize(
        platform: Arc<dyn MidiPlatform>,
        callback: Option<PortChangedCallback>,
    ) -> Result<Self> {
        platform.probe().map_err(|err| {
            error!(error = %err, "MIDI platform unavailable");
            MidiError::from_probe(err)
        })?;

        let inputs = PortWatcher::new(PortType::In, callback.clone());
        inputs.initialize(platform.as_ref())?;

        let outputs = PortWatcher::new(PortType::Out, callback);
        outputs.initialize(platform.as_ref())?;

        info!(
            inputs = inputs.port_count(),
            outputs = outputs.port_count(),
            "MIDI engine initialized"
        );
        Ok(Self {
            platform,
            inputs,
            outputs,
        })
    }

    /// Watcher for `port_type`. Never blocks.
    pub fn port_watcher(&self, port_type: PortType) -> &Arc<PortWatcher> {
        match port_type {
            PortType::In => &self.inputs,
            PortType::Out => &self.outputs,
        }
    }

    /// Platform id of the port at `index`, `None` when out of range.
    pub fn resolve_port_id(&self, port_type: PortType, index: usize) -> Option<PortId> {
        self.port_watcher(port_type).port_id(index)
    }

    /// The platform this engine opens ports on.
    pub fn platform(&self) -> &Arc<dyn MidiPlatform> {
        &self.platform
    }

    /// Open the input port at `index`, delivering messages to `callback`.
    pub fn open_input(&self, index: usize, callback: MidiInCallback) -> Result<InputPort> {
        let id = self.resolve_checked(PortType::In, index)?;
        let mut port = InputPort::new(Arc::clone(&self.platform));
        port.open(&id, callback)?;
        Ok(port)
    }

    /// Open the output port at `index`.
    pub fn open_output(&self, index: usize) -> Result<OutputPort> {
        let id = self.resolve_checked(PortType::Out, index)?;
        let port = OutputPort::new(Arc::clone(&self.platform));
        port.open(&id)?;
        Ok(port)
    }

    /// Resolve `index`, turning an out-of-range index into an error.
    pub fn resolve_checked(&self, port_type: PortType, index: usize) -> Result<PortId> {
        self.resolve_port_id(port_type, index)
            .ok_or_else(|| MidiError::InvalidPortIndex {
                port_type,
                index,
                count: self.port_watcher(port_type).port_count(),
            })
    }
}
