//! Status display sink.
//!
//! The physical display (LED ring, LCD, whatever the board carries) is an
//! external collaborator; the core only tracks the values the `dpy`
//! namespace exposes and the coarse state the machine thread pushes after
//! every heartbeat.

use log::trace;

/// Idle indication.
pub const DISPLAY_IDLE: u8 = 1;
/// A command is being processed.
pub const DISPLAY_PROCESSING: u8 = 2;
/// Operator attention required.
pub const DISPLAY_OPERATOR: u8 = 3;
/// Error indication.
pub const DISPLAY_ERROR: u8 = 4;

/// Host-settable wait states (assigned through `dpy.ds`).
pub const DISPLAY_WAIT_IDLE: u8 = 10;
/// Host-settable error wait.
pub const DISPLAY_WAIT_ERROR: u8 = 11;
/// Host-settable operator wait.
pub const DISPLAY_WAIT_OPERATOR: u8 = 12;
/// Host-settable moving indication.
pub const DISPLAY_BUSY_MOVING: u8 = 13;
/// Host-settable busy indication.
pub const DISPLAY_BUSY: u8 = 14;
/// Host-settable camera wait.
pub const DISPLAY_WAIT_CAMERA: u8 = 15;

/// Opaque display state: coarse status plus the camera lamp channel.
#[derive(Debug, Default)]
pub struct Display {
    /// Current display status byte.
    pub status: u8,
    /// Brightness level.
    pub level: u8,
    /// Camera lamp red channel.
    pub camera_r: u8,
    /// Camera lamp green channel.
    pub camera_g: u8,
    /// Camera lamp blue channel.
    pub camera_b: u8,
}

impl Display {
    /// New display in the idle state.
    pub fn new() -> Self {
        Self {
            status: DISPLAY_IDLE,
            ..Self::default()
        }
    }

    /// Replace the coarse status.
    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    /// Push the current state to the physical display.
    pub fn show(&self) {
        trace!(
            "display status:{} level:{} rgb:{},{},{}",
            self.status,
            self.level,
            self.camera_r,
            self.camera_g,
            self.camera_b
        );
    }
}
