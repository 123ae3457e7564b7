// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Error types for the MIDI bridge.
//!
//! `MidiError` is what the Rust API returns. `ErrorCode` is its stable,
//! C-compatible projection used by the exported functions in `ffi`.

use thiserror::Error;

use crate::midi::backend::PlatformError;
use crate::midi::{PortId, PortType};

#[derive(Error, Debug)]
pub enum MidiError {
    #[error("MIDI runtime could not be initialized: {0}")]
    RuntimeInit(String),

    #[error("platform version does not support MIDI device watching")]
    UnsupportedPlatformVersion,

    #[error("failed to start {port_type} port watcher: {source}")]
    PortWatcherInit {
        port_type: PortType,
        #[source]
        source: PlatformError,
    },

    #[error("{port_type} port index {index} is out of range ({count} ports)")]
    InvalidPortIndex {
        port_type: PortType,
        index: usize,
        count: usize,
    },

    #[error("failed to open MIDI port {id}: {source}")]
    OpenPort {
        id: PortId,
        #[source]
        source: PlatformError,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("MIDI port is not open")]
    PortClosed,

    #[error("failed to send MIDI message: {0}")]
    Send(#[source] PlatformError),
}

impl MidiError {
    /// Map a failed platform probe onto the engine-level error.
    pub fn from_probe(err: PlatformError) -> Self {
        match err {
            PlatformError::Unsupported(_) => MidiError::UnsupportedPlatformVersion,
            other => MidiError::RuntimeInit(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MidiError>;

/// Error codes returned across the C ABI.
///
/// Discriminants are part of the ABI and must not be reordered.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError = 0,
    RuntimeInitError = 1,
    UnsupportedPlatformVersion = 2,
    PortwatcherInitError = 3,
    InvalidPortIndex = 4,
    OpenPortError = 5,
    InvalidParameter = 6,
    MemoryError = 7,
    UnspecifiedError = 8,
}

impl From<&MidiError> for ErrorCode {
    fn from(err: &MidiError) -> Self {
        match err {
            MidiError::RuntimeInit(_) => ErrorCode::RuntimeInitError,
            MidiError::UnsupportedPlatformVersion => ErrorCode::UnsupportedPlatformVersion,
            MidiError::PortWatcherInit { .. } => ErrorCode::PortwatcherInitError,
            MidiError::InvalidPortIndex { .. } => ErrorCode::InvalidPortIndex,
            MidiError::OpenPort { .. } => ErrorCode::OpenPortError,
            MidiError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            MidiError::PortClosed | MidiError::Send(_) => ErrorCode::UnspecifiedError,
        }
    }
}

impl From<MidiError> for ErrorCode {
    fn from(err: MidiError) -> Self {
        ErrorCode::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_discriminants() {
        assert_eq!(ErrorCode::NoError as i32, 0);
        assert_eq!(ErrorCode::PortwatcherInitError as i32, 3);
        assert_eq!(ErrorCode::InvalidPortIndex as i32, 4);
        assert_eq!(ErrorCode::UnspecifiedError as i32, 8);
    }

    #[test]
    fn test_probe_mapping() {
        let err = MidiError::from_probe(PlatformError::Unsupported("too old".into()));
        assert_eq!(ErrorCode::from(&err), ErrorCode::UnsupportedPlatformVersion);

        let err = MidiError::from_probe(PlatformError::Unavailable("no sequencer".into()));
        assert_eq!(ErrorCode::from(&err), ErrorCode::RuntimeInitError);
        assert!(err.to_string().contains("no sequencer"));
    }

    #[test]
    fn test_invalid_index_message() {
        let err = MidiError::InvalidPortIndex {
            port_type: PortType::In,
            index: 3,
            count: 1,
        };
        assert_eq!(err.to_string(), "input port index 3 is out of range (1 ports)");
        assert_eq!(ErrorCode::from(err), ErrorCode::InvalidPortIndex);
    }
}
