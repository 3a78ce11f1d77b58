//! Host console for the firmware core.
//!
//! Reads one JSON command per line from stdin, drives the machine thread
//! until the command settles, and relays the response. With the
//! `serial_port` feature and `--port`, drives a real device instead.

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{info, warn};

use rust_step::gpio::MockGpio;
use rust_step::machine::Machine;
use rust_step::machine_thread::MachineThread;
use rust_step::port::{MemoryPort, SerialIo};
use rust_step::status::Status;

/// Heartbeats allowed per command before the console gives up on it.
const HEARTBEAT_GUARD: u32 = 1_000_000;

#[derive(Parser, Debug)]
#[command(name = "rust_step", version, about = "JSON stepper controller console")]
struct Args {
    /// Pretty-print responses
    #[arg(long)]
    pretty: bool,

    /// Serial device to drive instead of stdin
    #[cfg(feature = "serial_port")]
    #[arg(long)]
    port: Option<String>,

    /// Baud rate for --port
    #[cfg(feature = "serial_port")]
    #[arg(long, default_value_t = 115_200)]
    baud: u32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    #[cfg(feature = "serial_port")]
    if let Some(name) = &args.port {
        return run_serial(name, args.baud, args.pretty);
    }

    run_stdio(args.pretty)
}

fn memory_port(thread: &mut MachineThread) -> Result<&mut MemoryPort> {
    thread
        .port_mut()
        .as_any_mut()
        .downcast_mut::<MemoryPort>()
        .ok_or_else(|| anyhow!("console thread is not backed by a memory port"))
}

fn run_stdio(pretty: bool) -> Result<()> {
    let mut machine = Machine::new(Box::new(MockGpio::new()));
    machine.json_pretty_print = pretty;
    let mut thread = MachineThread::new(machine, Box::new(MemoryPort::new()));

    info!("console ready; one JSON command per line");
    for line in std::io::stdin().lines() {
        let line = line?;
        memory_port(&mut thread)?.push_line(&line);

        let mut guard = 0u32;
        loop {
            thread.heartbeat();
            let settled =
                thread.status == Status::WaitIdle && !memory_port(&mut thread)?.pending_input();
            if settled {
                break;
            }
            guard += 1;
            if guard >= HEARTBEAT_GUARD {
                warn!("command did not settle after {} heartbeats", guard);
                break;
            }
        }
        print!("{}", memory_port(&mut thread)?.take_output());
    }
    Ok(())
}

#[cfg(feature = "serial_port")]
fn run_serial(name: &str, baud: u32, pretty: bool) -> Result<()> {
    use rust_step::machine::TICK_MICROSECONDS;
    use rust_step::port::HardwarePort;

    let port = HardwarePort::open(name, baud)?;
    let mut machine = Machine::new(Box::new(MockGpio::new()));
    machine.json_pretty_print = pretty;
    let mut thread = MachineThread::new(machine, Box::new(port));

    info!("driving '{}' at {} baud", name, baud);
    loop {
        thread.heartbeat();
        std::thread::sleep(std::time::Duration::from_micros(u64::from(TICK_MICROSECONDS)));
    }
}
