// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI output port.
//!
//! Messages are copied into a per-port buffer before being handed to the
//! platform. The buffer grows to the largest message sent so far and never
//! shrinks. The copy and the send happen under one lock, so an `OutputPort`
//! can be shared between threads.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::backend::{MidiOutput, MidiPlatform};
use super::PortId;
use crate::error::{MidiError, Result};

#[derive(Default)]
struct OutputState {
    handle: Option<Box<dyn MidiOutput>>,
    id: Option<PortId>,
    buffer: Vec<u8>,
}

/// MIDI output port.
pub struct OutputPort {
    platform: Arc<dyn MidiPlatform>,
    state: Mutex<OutputState>,
}

impl OutputPort {
    /// Create an unopened port on `platform`.
    pub fn new(platform: Arc<dyn MidiPlatform>) -> Self {
        Self {
            platform,
            state: Mutex::new(OutputState::default()),
        }
    }

    /// Open the device with `id`, closing any previously open device.
    ///
    /// Blocks until the platform hands back a port or fails.
    pub fn open(&self, id: &PortId) -> Result<()> {
        self.close();

        let handle = self.platform.open_output(id).map_err(|source| {
            warn!(%id, error = %source, "failed to open MIDI output port");
            MidiError::OpenPort {
                id: id.clone(),
                source,
            }
        })?;

        let mut state = self.state.lock();
        state.handle = Some(handle);
        state.id = Some(id.clone());
        debug!(%id, "MIDI output port opened");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    /// Id of the open device, if any
    pub fn port_id(&self) -> Option<PortId> {
        self.state.lock().id.clone()
    }

    /// Send a MIDI message immediately.
    ///
    /// # Arguments
    /// * `message` - Raw MIDI bytes (e.g., `[0x90, 60, 127]` for Note On)
    ///
    /// # Returns
    /// * `Ok(())` on success, or when `message` is empty
    /// * `Err(MidiError::PortClosed)` if the port is not open
    /// * `Err(MidiError::Send)` if the platform rejected the message
    pub fn send(&self, message: &[u8]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let handle = state.handle.as_mut().ok_or(MidiError::PortClosed)?;
        if message.is_empty() {
            return Ok(());
        }

        if message.len() > state.buffer.len() {
            state.buffer = vec![0; message.len()];
        }
        let buffer = &mut state.buffer[..message.len()];
        buffer.copy_from_slice(message);

        handle.send(buffer).map_err(MidiError::Send)
    }

    /// Size of the reusable send buffer: the largest message sent so far.
    pub fn buffer_capacity(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Release the platform port. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.handle.take().is_some() {
            debug!(id = ?state.id, "MIDI output port closed");
        }
        state.id = None;
    }
}

impl Drop for OutputPort {
    fn drop(&mut self) {
        self.close();
    }
}
