// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

use anyhow::{Context, Result};
use midibridge::midi::messages::{NOTE_OFF, NOTE_ON};
use midibridge::{
    BridgeConfig, MidiEngine, MidiInCallback, MidiInEvent, MidiPlatform, MidirPlatform,
    OutputPort, PortChangedCallback, PortId, PortType, PortUpdate, PortWatcher,
};
use parking_lot::Mutex;
use std::env;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Serializes console output from the main thread and MIDI callback threads
static PRINT_LOCK: Mutex<()> = parking_lot::const_mutex(());

macro_rules! say {
    ($($arg:tt)*) => {{
        let _guard = PRINT_LOCK.lock();
        println!($($arg)*);
    }};
}

fn print_usage() {
    println!("midibridge - MIDI port watcher and MIDI thru");
    println!();
    println!("Usage: midibridge [--config <FILE>] [COMMAND]");
    println!();
    println!("With no command: watch ports, send a test note to output 0 and");
    println!("forward input 0 to output 0 until Enter is pressed.");
    println!();
    println!("Commands:");
    println!("  --list            List MIDI input and output ports");
    println!("  --watch           Print port changes until Enter is pressed");
    println!("  --monitor <N>     Print messages from input port N");
    println!("  --test-note <N>   Send a test note to output port N");
    println!("  --help            Show this help message");
}

fn print_ports(watcher: &PortWatcher) {
    let ports = watcher.ports();
    let _guard = PRINT_LOCK.lock();
    println!("MIDI {} ports:", watcher.port_type());
    if ports.is_empty() {
        println!("  (none)");
    }
    for (index, port) in ports.iter().enumerate() {
        println!("  {}: {}", index, port.name());
    }
}

fn print_message(id: &PortId, event: &MidiInEvent<'_>) {
    let bytes: Vec<String> = event.bytes.iter().map(|b| format!("{:02X}", b)).collect();
    say!(
        "{} [{:>10.3} ms] {}",
        id,
        event.timestamp_ms,
        bytes.join(" ")
    );
}

fn wait_for_enter() -> Result<()> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(())
}

fn port_changed_printer() -> PortChangedCallback {
    Arc::new(|watcher, update| {
        match update {
            PortUpdate::PortAdded => say!("MIDI {} port added", watcher.port_type()),
            PortUpdate::PortRemoved => say!("MIDI {} port removed", watcher.port_type()),
            PortUpdate::EnumerationComplete => {
                say!("MIDI {} port enumeration complete", watcher.port_type())
            }
        }
        print_ports(watcher);
    })
}

fn start_engine(config: &BridgeConfig, callback: Option<PortChangedCallback>) -> Result<MidiEngine> {
    let platform: Arc<dyn MidiPlatform> = Arc::new(MidirPlatform::from_config(config));
    MidiEngine::initialize(platform, callback).context("Failed to initialize MIDI")
}

fn send_test_note(output: &OutputPort) -> Result<()> {
    let note = 60; // Middle C
    let velocity = 127;

    output.send(&[NOTE_ON, note, velocity])?;
    say!("Note On sent");

    // Hold for 500ms
    thread::sleep(Duration::from_millis(500));

    output.send(&[NOTE_OFF, note, velocity])?;
    say!("Note Off sent");
    Ok(())
}

fn list_ports(config: &BridgeConfig) -> Result<()> {
    let engine = start_engine(config, None)?;
    print_ports(engine.port_watcher(PortType::In));
    print_ports(engine.port_watcher(PortType::Out));
    Ok(())
}

fn watch_ports(config: &BridgeConfig) -> Result<()> {
    let _engine = start_engine(config, Some(port_changed_printer()))?;
    say!("Watching MIDI ports (press Enter to stop)...");
    wait_for_enter()
}

fn monitor_input(config: &BridgeConfig, index: usize) -> Result<()> {
    let engine = start_engine(config, None)?;
    let callback: MidiInCallback = Arc::new(print_message);
    let _input = engine
        .open_input(index, callback)
        .with_context(|| format!("Failed to open MIDI input {}", index))?;

    say!("Monitoring MIDI input {} (press Enter to stop)...", index);
    wait_for_enter()
}

fn test_note(config: &BridgeConfig, index: usize) -> Result<()> {
    let engine = start_engine(config, None)?;
    let output = engine
        .open_output(index)
        .with_context(|| format!("Failed to open MIDI output {}", index))?;

    say!("Sending test note (Middle C) to output {}...", index);
    send_test_note(&output)?;
    say!("Test complete!");
    Ok(())
}

/// Note test on output 0, then forward input 0 to output 0.
fn run_thru(config: &BridgeConfig) -> Result<()> {
    let engine = start_engine(config, Some(port_changed_printer()))?;

    let output = match engine.open_output(0) {
        Ok(port) => Some(Arc::new(port)),
        Err(err) => {
            say!("Unable to open MIDI output 0: {}", err);
            None
        }
    };
    if let Some(output) = &output {
        send_test_note(output)?;
    }

    let thru = output.clone();
    let callback: MidiInCallback = Arc::new(move |id, event| {
        print_message(id, event);
        if let Some(output) = &thru {
            if let Err(err) = output.send(event.bytes) {
                warn!(error = %err, "MIDI thru send failed");
            }
        }
    });
    let input = match engine.open_input(0, callback) {
        Ok(port) => Some(port),
        Err(err) => {
            say!("Unable to open MIDI input 0: {}", err);
            None
        }
    };

    if input.is_some() {
        say!("MIDI thru running (press Enter to quit)...");
    } else {
        say!("Press Enter to quit...");
    }
    wait_for_enter()?;

    // Stop callbacks before the output they forward to goes away
    drop(input);
    Ok(())
}

fn parse_index(args: &[String], position: usize, option: &str) -> Result<usize> {
    let raw = args
        .get(position)
        .with_context(|| format!("{} requires a port number (see --list)", option))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid port number: {}", raw))
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let config = match args.iter().position(|arg| arg == "--config") {
        Some(position) => {
            let path = args
                .get(position + 1)
                .cloned()
                .context("--config requires a file path")?;
            args.drain(position..position + 2);
            BridgeConfig::load(&path)?
        }
        None => BridgeConfig::from_env()?,
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(config.tracing_level())
        .try_init()
        .ok();

    match args.first().map(String::as_str) {
        None => run_thru(&config)?,
        Some("--list") => list_ports(&config)?,
        Some("--watch") => watch_ports(&config)?,
        Some("--monitor") => monitor_input(&config, parse_index(&args, 1, "--monitor")?)?,
        Some("--test-note") => test_note(&config, parse_index(&args, 1, "--test-note")?)?,
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
