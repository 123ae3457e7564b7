// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI Input handling for receiving messages from devices.
//!
//! An `InputPort` opens a platform input by id and converts the platform's
//! receive events into a uniform `(port, timestamp, bytes)` callback.
//!
//! Timestamps are absolute milliseconds since the port was opened. The
//! first message after open also becomes the baseline for `delta_ms`, which
//! is 0.0 for that message and the gap to the previous message afterwards.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::backend::{MidiInputHandle, MidiPlatform, RawInputHandler};
use super::PortId;
use crate::error::{MidiError, Result};

/// One received MIDI message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiInEvent<'a> {
    /// Milliseconds since the port was opened
    pub timestamp_ms: f64,
    /// Milliseconds since the previous message (0.0 for the first)
    pub delta_ms: f64,
    /// Raw MIDI bytes
    pub bytes: &'a [u8],
}

/// Receive callback. The `PortId` tells apart several inputs sharing one
/// callback. Runs on a platform thread with the port's receive lock held,
/// so it must not call back into its own `InputPort` (`port_id`, `open`,
/// `close`, or drop it); that deadlocks.
pub type MidiInCallback = Arc<dyn Fn(&PortId, &MidiInEvent<'_>) + Send + Sync>;

#[derive(Default)]
struct ReceiveState {
    callback: Option<MidiInCallback>,
    port_id: Option<PortId>,
    first_message: bool,
    last_timestamp_us: u64,
}

impl ReceiveState {
    fn dispatch(&mut self, timestamp_us: u64, bytes: &[u8]) {
        let (Some(callback), Some(port_id)) = (&self.callback, &self.port_id) else {
            return;
        };

        if self.first_message {
            self.first_message = false;
            self.last_timestamp_us = timestamp_us;
        }

        let delta_us = timestamp_us.saturating_sub(self.last_timestamp_us);
        self.last_timestamp_us = timestamp_us;

        let event = MidiInEvent {
            timestamp_ms: timestamp_us as f64 / 1000.0,
            delta_ms: delta_us as f64 / 1000.0,
            bytes,
        };
        callback(port_id, &event);
    }

    fn reset(&mut self) {
        *self = ReceiveState::default();
    }
}

/// MIDI input port.
pub struct InputPort {
    platform: Arc<dyn MidiPlatform>,
    receive: Arc<Mutex<ReceiveState>>,
    handle: Option<Box<dyn MidiInputHandle>>,
}

impl InputPort {
    /// Create an unopened port on `platform`.
    pub fn new(platform: Arc<dyn MidiPlatform>) -> Self {
        Self {
            platform,
            receive: Arc::new(Mutex::new(ReceiveState::default())),
            handle: None,
        }
    }

    /// Open the device with `id` and start delivering messages to `callback`.
    ///
    /// Blocks until the platform hands back a port or fails. An already open
    /// port is closed first.
    pub fn open(&mut self, id: &PortId, callback: MidiInCallback) -> Result<()> {
        self.close();

        {
            let mut receive = self.receive.lock();
            receive.callback = Some(callback);
            receive.port_id = Some(id.clone());
            receive.first_message = true;
            receive.last_timestamp_us = 0;
        }

        let receive = Arc::clone(&self.receive);
        let handler: RawInputHandler = Box::new(move |timestamp_us, bytes| {
            receive.lock().dispatch(timestamp_us, bytes);
        });

        match self.platform.open_input(id, handler) {
            Ok(handle) => {
                self.handle = Some(handle);
                debug!(%id, "MIDI input port opened");
                Ok(())
            }
            Err(source) => {
                self.receive.lock().reset();
                warn!(%id, error = %source, "failed to open MIDI input port");
                Err(MidiError::OpenPort {
                    id: id.clone(),
                    source,
                })
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Id of the open device, if any
    pub fn port_id(&self) -> Option<PortId> {
        self.receive.lock().port_id.clone()
    }

    /// Stop receiving and release the platform port.
    ///
    /// Idempotent. Waits for a callback that is already running, and no
    /// callback starts after this returns. Must not be called from inside
    /// this port's own receive callback.
    pub fn close(&mut self) {
        self.receive.lock().reset();
        if self.handle.take().is_some() {
            debug!("MIDI input port closed");
        }
    }
}

impl Drop for InputPort {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::virtual_backend::VirtualPlatform;
    use crate::midi::PortType;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    type Received = Arc<Mutex<Vec<(String, f64, f64, Vec<u8>)>>>;

    fn setup() -> (VirtualPlatform, InputPort, MidiInCallback, Received) {
        let platform = VirtualPlatform::new();
        platform.add_device(PortType::In, "Keys", "k1");
        platform.add_device(PortType::In, "Pads", "p1");

        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let callback: MidiInCallback = Arc::new(move |id, event| {
            sink.lock().push((
                id.to_string(),
                event.timestamp_ms,
                event.delta_ms,
                event.bytes.to_vec(),
            ));
        });

        let port = InputPort::new(Arc::new(platform.clone()));
        (platform, port, callback, received)
    }

    #[test]
    fn test_receive_absolute_and_delta() {
        let (platform, mut port, callback, received) = setup();
        port.open(&PortId::from("k1"), callback).unwrap();
        assert!(port.is_open());

        platform.deliver("k1", 5_000, &[0x90, 60, 100]);
        platform.deliver("k1", 7_500, &[0x80, 60, 0]);
        platform.deliver("k1", 10_000, &[0xF8]);

        assert_eq!(
            *received.lock(),
            vec![
                ("k1".to_string(), 5.0, 0.0, vec![0x90, 60, 100]),
                ("k1".to_string(), 7.5, 2.5, vec![0x80, 60, 0]),
                ("k1".to_string(), 10.0, 2.5, vec![0xF8]),
            ]
        );
    }

    #[test]
    fn test_other_ports_not_delivered() {
        let (platform, mut port, callback, received) = setup();
        port.open(&PortId::from("k1"), callback).unwrap();

        platform.deliver("p1", 1_000, &[0x99, 36, 127]);
        assert!(received.lock().is_empty());
    }

    #[test]
    fn test_shared_callback_identifies_port() {
        let (platform, mut keys, callback, received) = setup();
        let mut pads = InputPort::new(Arc::new(platform.clone()));
        keys.open(&PortId::from("k1"), Arc::clone(&callback)).unwrap();
        pads.open(&PortId::from("p1"), callback).unwrap();

        platform.deliver("p1", 1_000, &[0x99, 36, 127]);
        platform.deliver("k1", 2_000, &[0x90, 60, 100]);

        let ports: Vec<String> = received.lock().iter().map(|r| r.0.clone()).collect();
        assert_eq!(ports, vec!["p1", "k1"]);
    }

    #[test]
    fn test_close_stops_callbacks() {
        let (platform, mut port, callback, received) = setup();
        port.open(&PortId::from("k1"), callback).unwrap();
        platform.deliver("k1", 1_000, &[0x90, 60, 100]);

        port.close();
        assert!(!port.is_open());
        assert_eq!(platform.open_input_count(), 0);

        platform.deliver("k1", 2_000, &[0x80, 60, 0]);
        assert_eq!(received.lock().len(), 1);
    }

    #[test]
    fn test_close_waits_for_running_callback() {
        let (platform, mut port, _callback, received) = setup();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let finished = Arc::new(AtomicBool::new(false));

        let sink = Arc::clone(&received);
        let done = Arc::clone(&finished);
        let blocking: MidiInCallback = Arc::new(move |id, event| {
            let _ = entered_tx.send(());
            let _ = release_rx.lock().recv();
            sink.lock().push((
                id.to_string(),
                event.timestamp_ms,
                event.delta_ms,
                event.bytes.to_vec(),
            ));
            done.store(true, Ordering::SeqCst);
        });
        port.open(&PortId::from("k1"), blocking).unwrap();

        let sender = platform.clone();
        let delivery = thread::spawn(move || sender.deliver("k1", 1_000, &[0x90, 60, 100]));
        entered_rx.recv().unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();
        });
        port.close();
        assert!(finished.load(Ordering::SeqCst));

        delivery.join().unwrap();
        releaser.join().unwrap();
        platform.deliver("k1", 2_000, &[0x80, 60, 0]);
        assert_eq!(received.lock().len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_platform, mut port, _callback, _received) = setup();
        port.close();
        port.close();
        assert!(!port.is_open());
        assert_eq!(port.port_id(), None);
    }

    #[test]
    fn test_open_failure_leaves_port_closed() {
        let (platform, mut port, callback, received) = setup();
        platform.fail_open("k1");

        let err = port.open(&PortId::from("k1"), callback).unwrap_err();
        assert!(matches!(err, MidiError::OpenPort { .. }));
        assert!(!port.is_open());
        assert_eq!(port.port_id(), None);

        platform.deliver("k1", 1_000, &[0x90, 60, 100]);
        assert!(received.lock().is_empty());
    }

    #[test]
    fn test_open_unknown_device() {
        let (_platform, mut port, callback, _received) = setup();
        let err = port.open(&PortId::from("gone"), callback).unwrap_err();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_reopen_resets_baseline() {
        let (platform, mut port, callback, received) = setup();
        port.open(&PortId::from("k1"), Arc::clone(&callback)).unwrap();
        platform.deliver("k1", 1_000, &[0x90, 60, 100]);
        platform.deliver("k1", 3_000, &[0x80, 60, 0]);

        port.open(&PortId::from("p1"), callback).unwrap();
        assert_eq!(platform.open_input_count(), 1);
        platform.deliver("p1", 9_000, &[0x99, 36, 127]);

        let last = received.lock().last().cloned().unwrap();
        assert_eq!(last, ("p1".to_string(), 9.0, 0.0, vec![0x99, 36, 127]));
    }

    #[test]
    fn test_drop_disconnects() {
        let (platform, mut port, callback, _received) = setup();
        port.open(&PortId::from("k1"), callback).unwrap();
        drop(port);
        assert_eq!(platform.open_input_count(), 0);
    }
}
