//! Firmware core for a line-oriented JSON stepper-motion controller.
//!
//! A host streams newline-terminated JSON command objects over a serial
//! link; this crate parses, validates, and executes them against a model
//! of a multi-axis stepper machine, emitting one JSON response line per
//! command. Everything runs cooperatively: a scheduler calls
//! [`machine_thread::MachineThread::heartbeat`] once per tick and every
//! long-running command splits itself across ticks with BUSY_* statuses.
//!
//! Hardware sits behind two seams: [`port::SerialIo`] for the byte link
//! and [`gpio::Gpio`] for pins and delays, each with an in-memory double
//! so the whole pipeline runs headless under test.

pub mod controller;
pub mod display;
pub mod field;
pub mod gpio;
pub mod json_command;
pub mod machine;
pub mod machine_thread;
pub mod port;
pub mod status;
pub mod stroke;
pub mod version;
