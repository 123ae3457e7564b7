// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! C ABI.
//!
//! Opaque handles, plain function pointers and `ErrorCode` results, declared
//! for C callers in `include/midibridge.h`. No panic crosses this boundary:
//! every export runs its body under `catch_unwind`.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::Arc;

use tracing::{error, warn};

use crate::config::BridgeConfig;
use crate::error::{ErrorCode, Result};
use crate::midi::{
    InputPort, MidiEngine, MidiInCallback, MidiPlatform, MidirPlatform, OutputPort,
    PortChangedCallback, PortType, PortUpdate, PortWatcher,
};

/// Engine handle returned by `midibridge_initialize`.
pub struct MidiBridge {
    engine: MidiEngine,
}

/// Watcher handle. Borrowed from its `MidiBridge`, never freed by the caller.
pub type MidiPortWatcher = PortWatcher;

/// Open input port handle.
pub struct MidiInPort {
    port: InputPort,
}

/// Open output port handle.
pub struct MidiOutPort {
    port: OutputPort,
}

/// `(watcher, update, context)`
pub type MidiPortChangedCallback =
    Option<unsafe extern "C" fn(*const MidiPortWatcher, PortUpdate, *mut c_void)>;

/// `(port, timestamp_ms, bytes, length, context)`
pub type MidiInPortCallback =
    Option<unsafe extern "C" fn(*const MidiInPort, f64, *const u8, u32, *mut c_void)>;

/// Caller-owned context pointer, handed back untouched on every callback.
#[derive(Clone, Copy)]
struct Context(*mut c_void);

// The pointer is only passed back to the caller, never dereferenced here.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    fn get(self) -> *mut c_void {
        self.0
    }
}

thread_local! {
    static NAME_BUFFER: RefCell<CString> = RefCell::new(CString::default());
}

/// Run an export body, turning a panic into `fallback`.
fn guard<T>(fallback: T, body: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(_) => {
            error!("panic caught at the C boundary");
            fallback
        }
    }
}

/// Copy `name` into this thread's name buffer and return a pointer to it.
fn stash_name(name: &str) -> *const c_char {
    let name = CString::new(name.replace('\0', "")).unwrap_or_default();
    NAME_BUFFER.with(|buffer| {
        let mut buffer = buffer.borrow_mut();
        *buffer = name;
        buffer.as_ptr()
    })
}

fn initialize_with_platform(
    platform: Arc<dyn MidiPlatform>,
    callback: MidiPortChangedCallback,
    context: *mut c_void,
) -> Result<MidiBridge> {
    let context = Context(context);
    let callback: Option<PortChangedCallback> = callback.map(|callback| {
        let callback: PortChangedCallback = Arc::new(move |watcher, update| unsafe {
            callback(watcher as *const MidiPortWatcher, update, context.get())
        });
        callback
    });

    let engine = MidiEngine::initialize(platform, callback)?;
    Ok(MidiBridge { engine })
}

/// Initialize on `platform` and store the new handle in `out_bridge`.
///
/// # Safety
/// `out_bridge` must be null or valid for writes.
pub(crate) unsafe fn initialize_into(
    platform: Arc<dyn MidiPlatform>,
    callback: MidiPortChangedCallback,
    out_bridge: *mut *mut MidiBridge,
    context: *mut c_void,
) -> ErrorCode {
    if out_bridge.is_null() {
        return ErrorCode::InvalidParameter;
    }
    *out_bridge = ptr::null_mut();

    match initialize_with_platform(platform, callback, context) {
        Ok(bridge) => {
            *out_bridge = Box::into_raw(Box::new(bridge));
            ErrorCode::NoError
        }
        Err(err) => {
            error!(error = %err, "MIDI bridge initialization failed");
            ErrorCode::from(&err)
        }
    }
}

/// Start both port watchers and wait for their initial enumeration.
///
/// `callback` may be null. Settings come from the file named by
/// `MIDIBRIDGE_CONFIG`, if set.
///
/// # Safety
/// `out_bridge` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn midibridge_initialize(
    callback: MidiPortChangedCallback,
    out_bridge: *mut *mut MidiBridge,
    context: *mut c_void,
) -> ErrorCode {
    guard(ErrorCode::UnspecifiedError, || {
        if out_bridge.is_null() {
            return ErrorCode::InvalidParameter;
        }

        let config = BridgeConfig::from_env().unwrap_or_else(|err| {
            warn!(error = %err, "ignoring MIDI bridge config, using defaults");
            BridgeConfig::default()
        });
        let platform: Arc<dyn MidiPlatform> = Arc::new(MidirPlatform::from_config(&config));
        initialize_into(platform, callback, out_bridge, context)
    })
}

/// Stop both watchers and release the engine. Null is ignored.
///
/// # Safety
/// `bridge` must be null or a handle from `midibridge_initialize` that has
/// not been freed.
#[no_mangle]
pub unsafe extern "C" fn midibridge_free(bridge: *mut MidiBridge) {
    guard((), || {
        if !bridge.is_null() {
            drop(Box::from_raw(bridge));
        }
    })
}

/// Watcher for `port_type`, or null for a null bridge or an unknown type.
///
/// # Safety
/// `bridge` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn midibridge_get_port_watcher(
    bridge: *const MidiBridge,
    port_type: c_int,
) -> *const MidiPortWatcher {
    guard(ptr::null(), || {
        let Some(bridge) = bridge.as_ref() else {
            return ptr::null();
        };
        match PortType::from_raw(port_type) {
            Some(port_type) => Arc::as_ptr(bridge.engine.port_watcher(port_type)),
            None => ptr::null(),
        }
    })
}

/// Number of ports. Blocks until the initial enumeration has completed.
///
/// # Safety
/// `watcher` must be null or obtained from a live bridge.
#[no_mangle]
pub unsafe extern "C" fn midibridge_watcher_get_port_count(
    watcher: *const MidiPortWatcher,
) -> u32 {
    guard(0, || match watcher.as_ref() {
        Some(watcher) => u32::try_from(watcher.port_count()).unwrap_or(u32::MAX),
        None => 0,
    })
}

/// Name of the port at `index`, or an empty string when out of range.
///
/// The string belongs to the calling thread and stays valid until its next
/// name query.
///
/// # Safety
/// `watcher` must be null or obtained from a live bridge.
#[no_mangle]
pub unsafe extern "C" fn midibridge_watcher_get_port_name(
    watcher: *const MidiPortWatcher,
    index: u32,
) -> *const c_char {
    guard(ptr::null(), || {
        let name = watcher
            .as_ref()
            .and_then(|watcher| watcher.port_name(index as usize))
            .unwrap_or_default();
        stash_name(&name)
    })
}

/// `MidiPortType` of the watcher, or -1 for null.
///
/// # Safety
/// `watcher` must be null or obtained from a live bridge.
#[no_mangle]
pub unsafe extern "C" fn midibridge_watcher_get_port_type(
    watcher: *const MidiPortWatcher,
) -> c_int {
    guard(-1, || match watcher.as_ref() {
        Some(watcher) => watcher.port_type() as c_int,
        None => -1,
    })
}

/// Open the input port at `index`. Messages are delivered to `callback` on a
/// platform thread until the port is freed. On failure `out_port` is null.
///
/// # Safety
/// `bridge` must be null or a live handle; `out_port` must be null or valid
/// for writes.
#[no_mangle]
pub unsafe extern "C" fn midibridge_open_in_port(
    bridge: *const MidiBridge,
    index: u32,
    callback: MidiInPortCallback,
    out_port: *mut *mut MidiInPort,
    context: *mut c_void,
) -> ErrorCode {
    guard(ErrorCode::UnspecifiedError, || {
        if out_port.is_null() {
            return ErrorCode::InvalidParameter;
        }
        *out_port = ptr::null_mut();

        let (Some(bridge), Some(callback)) = (bridge.as_ref(), callback) else {
            return ErrorCode::InvalidParameter;
        };
        let id = match bridge.engine.resolve_checked(PortType::In, index as usize) {
            Ok(id) => id,
            Err(err) => return ErrorCode::from(&err),
        };

        // Boxed first so the callback can report the handle's final address
        let mut handle = Box::new(MidiInPort {
            port: InputPort::new(Arc::clone(bridge.engine.platform())),
        });
        let port_addr = &*handle as *const MidiInPort as usize;
        let context = Context(context);
        let receive: MidiInCallback = Arc::new(move |_, event| {
            let length = u32::try_from(event.bytes.len()).unwrap_or(u32::MAX);
            unsafe {
                callback(
                    port_addr as *const MidiInPort,
                    event.timestamp_ms,
                    event.bytes.as_ptr(),
                    length,
                    context.get(),
                )
            }
        });

        match handle.port.open(&id, receive) {
            Ok(()) => {
                *out_port = Box::into_raw(handle);
                ErrorCode::NoError
            }
            Err(err) => ErrorCode::from(&err),
        }
    })
}

/// Close an input port. No callback runs after this returns. Null is ignored.
///
/// # Safety
/// `port` must be null or a handle from `midibridge_open_in_port` that has
/// not been freed. Must not be called from inside that port's callback.
#[no_mangle]
pub unsafe extern "C" fn midibridge_free_in_port(port: *mut MidiInPort) {
    guard((), || {
        if !port.is_null() {
            drop(Box::from_raw(port));
        }
    })
}

/// Open the output port at `index`. On failure `out_port` is null.
///
/// `context` is accepted for symmetry with the input call and is unused.
///
/// # Safety
/// `bridge` must be null or a live handle; `out_port` must be null or valid
/// for writes.
#[no_mangle]
pub unsafe extern "C" fn midibridge_open_out_port(
    bridge: *const MidiBridge,
    index: u32,
    out_port: *mut *mut MidiOutPort,
    _context: *mut c_void,
) -> ErrorCode {
    guard(ErrorCode::UnspecifiedError, || {
        if out_port.is_null() {
            return ErrorCode::InvalidParameter;
        }
        *out_port = ptr::null_mut();

        let Some(bridge) = bridge.as_ref() else {
            return ErrorCode::InvalidParameter;
        };
        match bridge.engine.open_output(index as usize) {
            Ok(port) => {
                *out_port = Box::into_raw(Box::new(MidiOutPort { port }));
                ErrorCode::NoError
            }
            Err(err) => ErrorCode::from(&err),
        }
    })
}

/// Close an output port. Null is ignored.
///
/// # Safety
/// `port` must be null or a handle from `midibridge_open_out_port` that has
/// not been freed.
#[no_mangle]
pub unsafe extern "C" fn midibridge_free_out_port(port: *mut MidiOutPort) {
    guard((), || {
        if !port.is_null() {
            drop(Box::from_raw(port));
        }
    })
}

/// Send `length` bytes. Failures are logged, not returned.
///
/// # Safety
/// `port` must be null or a live output handle; `bytes` must be valid for
/// `length` reads.
#[no_mangle]
pub unsafe extern "C" fn midibridge_out_port_send(
    port: *const MidiOutPort,
    bytes: *const u8,
    length: u32,
) {
    guard((), || {
        let Some(port) = port.as_ref() else {
            warn!("send on a null MIDI output port");
            return;
        };
        if length == 0 {
            return;
        }
        if bytes.is_null() {
            warn!("dropped MIDI send: null bytes");
            return;
        }

        let message = slice::from_raw_parts(bytes, length as usize);
        if let Err(err) = port.port.send(message) {
            warn!(error = %err, "dropped MIDI send");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::VirtualPlatform;
    use parking_lot::Mutex;
    use std::ffi::CStr;

    type Changes = Mutex<Vec<(usize, PortUpdate)>>;
    type Received = Mutex<Vec<(usize, f64, Vec<u8>)>>;

    unsafe extern "C" fn on_port_changed(
        watcher: *const MidiPortWatcher,
        update: PortUpdate,
        context: *mut c_void,
    ) {
        let changes = &*(context as *const Changes);
        changes.lock().push((watcher as usize, update));
    }

    unsafe extern "C" fn on_message(
        port: *const MidiInPort,
        timestamp_ms: f64,
        bytes: *const u8,
        length: u32,
        context: *mut c_void,
    ) {
        let received = &*(context as *const Received);
        let message = slice::from_raw_parts(bytes, length as usize).to_vec();
        received.lock().push((port as usize, timestamp_ms, message));
    }

    fn platform_with_devices() -> VirtualPlatform {
        let platform = VirtualPlatform::new();
        platform.add_device(PortType::In, "DeviceA", "a1");
        platform.add_device(PortType::In, "DeviceB", "b2");
        platform.add_device(PortType::Out, "Synth", "s1");
        platform
    }

    fn open_bridge(platform: &VirtualPlatform) -> *mut MidiBridge {
        let mut bridge = ptr::null_mut();
        let code = unsafe {
            initialize_into(Arc::new(platform.clone()), None, &mut bridge, ptr::null_mut())
        };
        assert_eq!(code, ErrorCode::NoError);
        assert!(!bridge.is_null());
        bridge
    }

    fn name_of(watcher: *const MidiPortWatcher, index: u32) -> String {
        unsafe {
            CStr::from_ptr(midibridge_watcher_get_port_name(watcher, index))
                .to_string_lossy()
                .into_owned()
        }
    }

    #[test]
    fn test_initialize_requires_out_pointer() {
        let code = unsafe { midibridge_initialize(None, ptr::null_mut(), ptr::null_mut()) };
        assert_eq!(code, ErrorCode::InvalidParameter);
    }

    #[test]
    fn test_watcher_queries() {
        let platform = platform_with_devices();
        let bridge = open_bridge(&platform);

        unsafe {
            let inputs = midibridge_get_port_watcher(bridge, PortType::In as c_int);
            let outputs = midibridge_get_port_watcher(bridge, PortType::Out as c_int);
            assert!(!inputs.is_null());
            assert_ne!(inputs, outputs);

            assert_eq!(midibridge_watcher_get_port_count(inputs), 2);
            assert_eq!(midibridge_watcher_get_port_count(outputs), 1);
            assert_eq!(midibridge_watcher_get_port_type(inputs), 0);
            assert_eq!(midibridge_watcher_get_port_type(outputs), 1);
            assert_eq!(name_of(inputs, 0), "DeviceA");
            assert_eq!(name_of(inputs, 1), "DeviceB");
            assert_eq!(name_of(inputs, 7), "");

            assert!(midibridge_get_port_watcher(bridge, 5).is_null());
            midibridge_free(bridge);
        }
    }

    #[test]
    fn test_null_handles_are_tolerated() {
        unsafe {
            assert!(midibridge_get_port_watcher(ptr::null(), 0).is_null());
            assert_eq!(midibridge_watcher_get_port_count(ptr::null()), 0);
            assert_eq!(midibridge_watcher_get_port_type(ptr::null()), -1);
            assert_eq!(name_of(ptr::null(), 0), "");

            midibridge_free(ptr::null_mut());
            midibridge_free_in_port(ptr::null_mut());
            midibridge_free_out_port(ptr::null_mut());
            midibridge_out_port_send(ptr::null(), [0x90u8, 60, 127].as_ptr(), 3);
        }
    }

    #[test]
    fn test_port_changed_callback_gets_watcher_and_context() {
        let platform = platform_with_devices();
        let changes: Changes = Mutex::new(Vec::new());
        let context = &changes as *const Changes as *mut c_void;

        let mut bridge = ptr::null_mut();
        unsafe {
            let code = initialize_into(
                Arc::new(platform.clone()),
                Some(on_port_changed),
                &mut bridge,
                context,
            );
            assert_eq!(code, ErrorCode::NoError);

            let inputs = midibridge_get_port_watcher(bridge, 0) as usize;
            let outputs = midibridge_get_port_watcher(bridge, 1) as usize;

            platform.remove_device(PortType::In, "a1");
            assert_eq!(
                *changes.lock(),
                vec![
                    (inputs, PortUpdate::EnumerationComplete),
                    (outputs, PortUpdate::EnumerationComplete),
                    (inputs, PortUpdate::PortRemoved),
                ]
            );
            assert_eq!(midibridge_watcher_get_port_count(inputs as *const _), 1);
            midibridge_free(bridge);
        }
    }

    #[test]
    fn test_initialize_failure_leaves_null_handle() {
        let platform = platform_with_devices();
        platform.fail_watch(PortType::Out);

        let mut bridge = 0x1 as *mut MidiBridge;
        let code = unsafe {
            initialize_into(Arc::new(platform), None, &mut bridge, ptr::null_mut())
        };
        assert_eq!(code, ErrorCode::PortwatcherInitError);
        assert!(bridge.is_null());
    }

    #[test]
    fn test_unsupported_platform_code() {
        let platform = platform_with_devices();
        platform.set_unsupported("no device watcher");

        let mut bridge = ptr::null_mut();
        let code = unsafe {
            initialize_into(Arc::new(platform), None, &mut bridge, ptr::null_mut())
        };
        assert_eq!(code, ErrorCode::UnsupportedPlatformVersion);
    }

    #[test]
    fn test_open_in_port_delivers_messages() {
        let platform = platform_with_devices();
        let bridge = open_bridge(&platform);
        let received: Received = Mutex::new(Vec::new());
        let context = &received as *const Received as *mut c_void;

        unsafe {
            let mut port = ptr::null_mut();
            let code = midibridge_open_in_port(bridge, 1, Some(on_message), &mut port, context);
            assert_eq!(code, ErrorCode::NoError);
            assert!(!port.is_null());

            platform.deliver("b2", 2_500, &[0x90, 60, 127]);
            platform.deliver("a1", 3_000, &[0x90, 61, 127]);

            assert_eq!(
                *received.lock(),
                vec![(port as usize, 2.5, vec![0x90, 60, 127])]
            );

            midibridge_free_in_port(port);
            platform.deliver("b2", 4_000, &[0x80, 60, 0]);
            assert_eq!(received.lock().len(), 1);
            assert_eq!(platform.open_input_count(), 0);
            midibridge_free(bridge);
        }
    }

    #[test]
    fn test_open_in_port_errors() {
        let platform = platform_with_devices();
        let bridge = open_bridge(&platform);

        unsafe {
            let mut port = 0x1 as *mut MidiInPort;
            let code =
                midibridge_open_in_port(bridge, 2, Some(on_message), &mut port, ptr::null_mut());
            assert_eq!(code, ErrorCode::InvalidPortIndex);
            assert!(port.is_null());

            let code = midibridge_open_in_port(bridge, 0, None, &mut port, ptr::null_mut());
            assert_eq!(code, ErrorCode::InvalidParameter);

            let code = midibridge_open_in_port(
                bridge,
                0,
                Some(on_message),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            assert_eq!(code, ErrorCode::InvalidParameter);

            platform.fail_open("a1");
            let code =
                midibridge_open_in_port(bridge, 0, Some(on_message), &mut port, ptr::null_mut());
            assert_eq!(code, ErrorCode::OpenPortError);
            assert!(port.is_null());
            midibridge_free(bridge);
        }
    }

    #[test]
    fn test_out_port_send() {
        let platform = platform_with_devices();
        let bridge = open_bridge(&platform);

        unsafe {
            let mut port = ptr::null_mut();
            let code = midibridge_open_out_port(bridge, 0, &mut port, ptr::null_mut());
            assert_eq!(code, ErrorCode::NoError);

            let note_on = [0x90u8, 60, 127];
            midibridge_out_port_send(port, note_on.as_ptr(), 3);
            midibridge_out_port_send(port, ptr::null(), 3);
            midibridge_out_port_send(port, ptr::null(), 0);
            assert_eq!(platform.sent_to("s1"), vec![note_on.to_vec()]);

            midibridge_free_out_port(port);
            assert_eq!(platform.open_output_count(), 0);

            let mut port = 0x1 as *mut MidiOutPort;
            let code = midibridge_open_out_port(bridge, 1, &mut port, ptr::null_mut());
            assert_eq!(code, ErrorCode::InvalidPortIndex);
            assert!(port.is_null());
            midibridge_free(bridge);
        }
    }

    #[test]
    fn test_ports_survive_bridge_free() {
        let platform = platform_with_devices();
        let bridge = open_bridge(&platform);

        unsafe {
            let mut port = ptr::null_mut();
            midibridge_open_out_port(bridge, 0, &mut port, ptr::null_mut());
            midibridge_free(bridge);

            midibridge_out_port_send(port, [0xFAu8].as_ptr(), 1);
            assert_eq!(platform.sent_to("s1"), vec![vec![0xFA]]);
            midibridge_free_out_port(port);
        }
    }

    #[test]
    fn test_name_buffer_replaced_per_query() {
        let platform = platform_with_devices();
        let bridge = open_bridge(&platform);

        unsafe {
            let inputs = midibridge_get_port_watcher(bridge, 0);
            let first = name_of(inputs, 0);
            let second = name_of(inputs, 1);
            assert_eq!((first.as_str(), second.as_str()), ("DeviceA", "DeviceB"));
            midibridge_free(bridge);
        }
    }
}
