//! Top-level per-heartbeat state machine.
//!
//! The scheduler calls [`MachineThread::heartbeat`] once per tick. Each
//! heartbeat does one bounded step: pump serial input into the command,
//! drive the controller while the command is busy, or flush the response
//! and return to idle. Serial input arriving while a command is in flight
//! cancels it; the cancellation response goes out before the new line is
//! read. The display is updated with the coarse status class after every
//! step.

use log::debug;

use crate::controller::JsonController;
use crate::display::{DISPLAY_ERROR, DISPLAY_IDLE, DISPLAY_OPERATOR, DISPLAY_PROCESSING};
use crate::json_command::JsonCommand;
use crate::machine::Machine;
use crate::port::SerialIo;
use crate::status::Status;

/// Owns the machine, the in-flight command, the controller, and the port.
pub struct MachineThread {
    /// The machine this thread drives.
    pub machine: Machine,
    /// The single in-flight command.
    pub command: JsonCommand,
    /// Per-command dispatcher.
    pub controller: JsonController,
    /// Thread status, advanced one step per heartbeat.
    pub status: Status,
    port: Box<dyn SerialIo>,
}

impl MachineThread {
    /// New thread in the idle state.
    pub fn new(machine: Machine, port: Box<dyn SerialIo>) -> Self {
        Self {
            machine,
            command: JsonCommand::new(),
            controller: JsonController::new(),
            status: Status::WaitIdle,
            port,
        }
    }

    /// Borrow the serial port (hosts downcast through `as_any_mut`).
    pub fn port_mut(&mut self) -> &mut dyn SerialIo {
        self.port.as_mut()
    }

    /// One cooperative step.
    pub fn heartbeat(&mut self) {
        self.machine.ticks += 1;
        let status = self.status;
        self.status = match status {
            Status::WaitIdle => {
                if self.port.available() {
                    self.command.clear();
                    self.command.parse(self.port.as_mut(), None)
                } else {
                    Status::WaitIdle
                }
            }
            Status::WaitEol => {
                if self.port.available() {
                    self.command.parse(self.port.as_mut(), None)
                } else {
                    Status::WaitEol
                }
            }
            busy if busy.is_processing() => {
                if self.port.available() {
                    self.controller.cancel(
                        &self.machine,
                        &mut self.command,
                        self.port.as_mut(),
                        Status::SerialCancel,
                    )
                } else {
                    self.controller
                        .process(&mut self.machine, &mut self.command, self.port.as_mut())
                }
            }
            Status::WaitCancelled => Status::WaitIdle,
            terminal => {
                // parse failures already pushed their minimal {"s":N} line
                if !self.command.has_responded() {
                    self.controller.send_response(
                        &self.machine,
                        &mut self.command,
                        self.port.as_mut(),
                    );
                }
                debug!("command finished ({})", terminal.code());
                Status::WaitIdle
            }
        };
        self.display_status();
    }

    /// Map the status class onto the display and show it.
    fn display_status(&mut self) {
        match self.status {
            Status::Ok => {
                // don't change anything
            }
            Status::WaitIdle
            | Status::WaitEol
            | Status::WaitCancelled
            | Status::WaitMoving
            | Status::WaitBusy => {
                self.machine.display.set_status(DISPLAY_IDLE);
            }
            busy if busy.is_processing() => {
                self.machine.display.set_status(DISPLAY_PROCESSING);
            }
            Status::WaitOperator | Status::WaitCamera => {
                self.machine.display.set_status(DISPLAY_OPERATOR);
            }
            _ => {
                self.machine.display.set_status(DISPLAY_ERROR);
            }
        }
        self.machine.display.show();
    }
}
