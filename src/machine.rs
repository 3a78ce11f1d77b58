//! Machine model: axes, motors, pin map, and motion primitives.
//!
//! The machine owns all mutable hardware-facing state. Six named axes
//! (`x,y,z,a,b,c`) carry configuration and position; four motors map onto
//! axes and are what strokes and moves address. The pulse primitive is
//! the single path to the step/dir pins, so limit switches and the
//! emergency stop are honored everywhere motion can originate.

use log::{info, warn};

use crate::display::Display;
use crate::gpio::{Gpio, MockGpio, PinMode, NOPIN};
use crate::status::Status;
use crate::stroke::Stroke;

/// Signed step coordinate.
pub type StepCoord = i32;

/// Microsecond delay value.
pub type DelayMics = i32;

/// Process-wide clock tick.
pub type Ticks = u64;

/// Number of named axes.
pub const AXIS_COUNT: usize = 6;

/// Number of motor output channels.
pub const MOTOR_COUNT: usize = 4;

/// Duration of one clock tick in microseconds.
pub const TICK_MICROSECONDS: u32 = 64;

/// Clock ticks per second.
pub const TICKS_PER_SECOND: u32 = 15_625;

/// Step-pulse high time in microseconds.
const PULSE_WIDTH_MICS: u32 = 2;

/// Steps per heartbeat when a move supplies no step rate.
const DEFAULT_STEP_RATE: StepCoord = 100;

/// Search steps issued per heartbeat while homing.
const HOME_PULSES_PER_TICK: i32 = 16;

/// Four values, one per motor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quad<T> {
    /// Per-motor values, indexed by motor.
    pub value: [T; MOTOR_COUNT],
}

impl Quad<StepCoord> {
    /// All-zero quad.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Quad with the same value on every channel.
    pub fn splat(v: StepCoord) -> Self {
        Self {
            value: [v; MOTOR_COUNT],
        }
    }

    /// True when every channel is zero.
    pub fn is_zero(&self) -> bool {
        self.value.iter().all(|v| *v == 0)
    }

    /// Channel-wise absolute value.
    pub fn absolute(&self) -> Self {
        let mut out = *self;
        for v in &mut out.value {
            *v = v.abs();
        }
        out
    }
}

impl std::ops::AddAssign for Quad<StepCoord> {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.value.iter_mut().zip(rhs.value.iter()) {
            *a += *b;
        }
    }
}

impl std::ops::Sub for Quad<StepCoord> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        let mut out = self;
        for (a, b) in out.value.iter_mut().zip(rhs.value.iter()) {
            *a -= *b;
        }
        out
    }
}

/// One degree of freedom and its hardware binding.
#[derive(Debug, Clone)]
pub struct Axis {
    enabled: bool,
    /// Step-direction polarity: true drives the dir pin high for forward.
    pub dir_high: bool,
    /// Home position in steps.
    pub home: StepCoord,
    /// Idle snooze delay in microseconds.
    pub idle_snooze: DelayMics,
    /// Steps backed off the limit switch after a homing latch.
    pub latch_backoff: StepCoord,
    /// Last sampled maximum-limit state.
    pub at_max: bool,
    /// Last sampled minimum-limit state.
    pub at_min: bool,
    /// Microsteps per full step, at least 1.
    pub microsteps: u8,
    /// Direction pin.
    pub pin_dir: u8,
    /// Enable pin (active low).
    pub pin_enable: u8,
    /// Maximum limit switch pin.
    pub pin_max: u8,
    /// Minimum limit switch pin.
    pub pin_min: u8,
    /// Step pin.
    pub pin_step: u8,
    /// Current position in steps.
    pub position: StepCoord,
    /// Full-step angle in degrees.
    pub step_angle: f32,
    /// Extra delay per homing search step, microseconds.
    pub search_delay: DelayMics,
    /// Lowest reachable position in steps.
    pub travel_min: StepCoord,
    /// Highest reachable position in steps.
    pub travel_max: StepCoord,
    /// Delay between step pulses, microseconds.
    pub us_delay: DelayMics,
    /// True while this axis is searching for its home switch.
    pub homing: bool,
}

impl Default for Axis {
    fn default() -> Self {
        Self {
            enabled: false,
            dir_high: true,
            home: 0,
            idle_snooze: 0,
            latch_backoff: 200,
            at_max: false,
            at_min: false,
            microsteps: 16,
            pin_dir: NOPIN,
            pin_enable: NOPIN,
            pin_max: NOPIN,
            pin_min: NOPIN,
            pin_step: NOPIN,
            position: 0,
            step_angle: 1.8,
            search_delay: 800,
            travel_min: 0,
            travel_max: 32_000,
            us_delay: 0,
            homing: false,
        }
    }
}

impl Axis {
    /// True when the axis may move.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current binding of one of this axis's pins.
    pub fn pin(&self, select: PinSelect) -> u8 {
        match select {
            PinSelect::Dir => self.pin_dir,
            PinSelect::Enable => self.pin_enable,
            PinSelect::Max => self.pin_max,
            PinSelect::Min => self.pin_min,
            PinSelect::Step => self.pin_step,
        }
    }
}

/// One stepper output channel.
#[derive(Debug, Clone, Copy)]
pub struct Motor {
    /// Index of the axis this motor drives.
    pub axis: usize,
}

/// Which of an axis's pins to rebind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinSelect {
    /// Direction pin.
    Dir,
    /// Enable pin.
    Enable,
    /// Maximum limit pin.
    Max,
    /// Minimum limit pin.
    Min,
    /// Step pin.
    Step,
}

/// Pin configuration selector: 0 clears every binding, 1 applies the
/// RAMPS 1.4 shield map for the first four axes.
pub const PIN_CONFIG_NONE: i32 = 0;
/// RAMPS 1.4 preset selector.
pub const PIN_CONFIG_RAMPS14: i32 = 1;

/// (dir, enable, max, min, step) per axis for the RAMPS 1.4 shield.
const RAMPS14_PINS: [(u8, u8, u8, u8, u8); 4] = [
    (55, 38, 2, 3, 54),
    (61, 56, 15, 14, 60),
    (48, 62, 19, 18, 46),
    (28, 24, NOPIN, NOPIN, 26),
];

/// The whole controllable machine.
pub struct Machine {
    /// Named axes, indexed `x,y,z,a,b,c`.
    pub axis: [Axis; AXIS_COUNT],
    motor: [Motor; MOTOR_COUNT],
    /// Stroke workspace for the current planned motion.
    pub stroke: Stroke,
    pin_config: i32,
    /// Invert limit-switch polarity.
    pub invert_lim: bool,
    /// Pretty-print responses.
    pub json_pretty_print: bool,
    /// Status display sink.
    pub display: Display,
    /// Process-wide tick counter, advanced once per heartbeat.
    pub ticks: Ticks,
    estop: bool,
    gpio: Box<dyn Gpio>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(Box::new(MockGpio::new()))
    }
}

impl Machine {
    /// New machine with default axes and a 1:1 motor map onto `x,y,z,a`.
    pub fn new(gpio: Box<dyn Gpio>) -> Self {
        Self {
            axis: Default::default(),
            motor: [
                Motor { axis: 0 },
                Motor { axis: 1 },
                Motor { axis: 2 },
                Motor { axis: 3 },
            ],
            stroke: Stroke::new(),
            pin_config: PIN_CONFIG_NONE,
            invert_lim: false,
            json_pretty_print: false,
            display: Display::new(),
            ticks: 0,
            estop: false,
            gpio,
        }
    }

    /// Borrow the GPIO backend (tests downcast through `as_any_mut`).
    pub fn gpio_mut(&mut self) -> &mut dyn Gpio {
        self.gpio.as_mut()
    }

    /// Request or clear an emergency stop. While set, every pulse fails
    /// with `ESTOP`.
    pub fn set_estop(&mut self, on: bool) {
        if on {
            warn!("emergency stop engaged");
        }
        self.estop = on;
    }

    /// Axis index for a one-letter axis name.
    pub fn axis_of_name(&self, name: &str) -> Option<usize> {
        let mut chars = name.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        match c {
            'x' => Some(0),
            'y' => Some(1),
            'z' => Some(2),
            'a' => Some(3),
            'b' => Some(4),
            'c' => Some(5),
            _ => None,
        }
    }

    /// Motor index for a motor digit (`1..4`) or an axis letter mapped to
    /// a motor.
    pub fn motor_of_operand(&self, c: char) -> Option<usize> {
        if let Some(d) = c.to_digit(10) {
            let m = d as usize;
            if (1..=MOTOR_COUNT).contains(&m) {
                return Some(m - 1);
            }
            return None;
        }
        let i_axis = self.axis_of_name(&c.to_string())?;
        (0..MOTOR_COUNT).find(|m| self.motor[*m].axis == i_axis)
    }

    /// Axis index for a motor digit or an axis letter.
    pub fn axis_of_operand(&self, name: &str) -> Option<usize> {
        if let Some(i) = self.axis_of_name(name) {
            return Some(i);
        }
        let mut chars = name.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        self.motor_of_operand(c).map(|m| self.motor[m].axis)
    }

    /// Axis index a motor currently drives.
    pub fn motor_axis_index(&self, i_motor: usize) -> usize {
        self.motor[i_motor].axis
    }

    /// Axis a motor currently drives.
    pub fn motor_axis(&self, i_motor: usize) -> &Axis {
        &self.axis[self.motor[i_motor].axis]
    }

    /// Remap a motor onto an axis.
    pub fn set_motor_axis(&mut self, i_motor: usize, i_axis: i32) -> Status {
        if i_motor >= MOTOR_COUNT {
            return Status::MotorIndex;
        }
        let Ok(i_axis) = usize::try_from(i_axis) else {
            return Status::AxisError;
        };
        if i_axis >= AXIS_COUNT {
            return Status::AxisError;
        }
        self.motor[i_motor].axis = i_axis;
        Status::Ok
    }

    /// Enable or disable an axis, driving its enable pin (active low).
    /// Returns the effective enabled state.
    pub fn enable_axis(&mut self, i_axis: usize, active: bool) -> bool {
        let pin = self.axis[i_axis].pin_enable;
        if pin != NOPIN {
            self.gpio.digital_write(pin, !active);
        }
        self.axis[i_axis].enabled = active;
        info!(
            "axis {} {}",
            i_axis,
            if active { "enabled" } else { "disabled" }
        );
        active
    }

    /// Sample the minimum limit switch, honoring `invert_lim`.
    pub fn read_at_min(&mut self, i_axis: usize) -> bool {
        let invert = self.invert_lim;
        let axis = &mut self.axis[i_axis];
        if axis.pin_min != NOPIN {
            axis.at_min = self.gpio.digital_read(axis.pin_min) != invert;
        }
        axis.at_min
    }

    /// Sample the maximum limit switch, honoring `invert_lim`.
    pub fn read_at_max(&mut self, i_axis: usize) -> bool {
        let invert = self.invert_lim;
        let axis = &mut self.axis[i_axis];
        if axis.pin_max != NOPIN {
            axis.at_max = self.gpio.digital_read(axis.pin_max) != invert;
        }
        axis.at_max
    }

    /// Rebind one of an axis's pins. A changed, assigned pin gets its mode
    /// and optional initial level applied before the binding moves.
    pub fn set_pin(
        &mut self,
        i_axis: usize,
        select: PinSelect,
        new_pin: u8,
        mode: PinMode,
        initial: Option<bool>,
    ) {
        let axis = &mut self.axis[i_axis];
        let slot = match select {
            PinSelect::Dir => &mut axis.pin_dir,
            PinSelect::Enable => &mut axis.pin_enable,
            PinSelect::Max => &mut axis.pin_max,
            PinSelect::Min => &mut axis.pin_min,
            PinSelect::Step => &mut axis.pin_step,
        };
        if new_pin != *slot && new_pin != NOPIN {
            self.gpio.pin_mode(new_pin, mode);
            if let Some(level) = initial {
                self.gpio.digital_write(new_pin, level);
            }
        }
        *slot = new_pin;
    }

    /// Current pin configuration selector.
    pub fn pin_config(&self) -> i32 {
        self.pin_config
    }

    /// Apply a pin configuration preset.
    pub fn set_pin_config(&mut self, pc: i32) -> Status {
        match pc {
            PIN_CONFIG_NONE => {
                for i_axis in 0..AXIS_COUNT {
                    self.set_pin(i_axis, PinSelect::Dir, NOPIN, PinMode::Output, None);
                    self.set_pin(i_axis, PinSelect::Enable, NOPIN, PinMode::Output, None);
                    self.set_pin(i_axis, PinSelect::Max, NOPIN, PinMode::Input, None);
                    self.set_pin(i_axis, PinSelect::Min, NOPIN, PinMode::Input, None);
                    self.set_pin(i_axis, PinSelect::Step, NOPIN, PinMode::Output, None);
                }
            }
            PIN_CONFIG_RAMPS14 => {
                for (i_axis, (dir, enable, max, min, step)) in RAMPS14_PINS.iter().enumerate() {
                    self.set_pin(i_axis, PinSelect::Dir, *dir, PinMode::Output, None);
                    self.set_pin(i_axis, PinSelect::Enable, *enable, PinMode::Output, Some(true));
                    self.set_pin(i_axis, PinSelect::Max, *max, PinMode::Input, None);
                    self.set_pin(i_axis, PinSelect::Min, *min, PinMode::Input, None);
                    self.set_pin(i_axis, PinSelect::Step, *step, PinMode::Output, None);
                }
            }
            _ => return Status::PinConfig,
        }
        self.pin_config = pc;
        info!("pin configuration {} applied", pc);
        Status::Ok
    }

    /// Set every motor's axis position directly (self-test staging).
    pub fn set_motor_position(&mut self, positions: Quad<StepCoord>) {
        for m in 0..MOTOR_COUNT {
            let i_axis = self.motor[m].axis;
            self.axis[i_axis].position = positions.value[m];
        }
    }

    /// Read every motor's axis position.
    pub fn motor_position(&self) -> Quad<StepCoord> {
        let mut out = Quad::zero();
        for m in 0..MOTOR_COUNT {
            out.value[m] = self.axis[self.motor[m].axis].position;
        }
        out
    }

    /// Emit the requested number of step pulses on each motor channel,
    /// interleaved one step at a time so simultaneous moves stay roughly
    /// coordinated. Stops on the first hardware event.
    pub fn pulse(&mut self, mut steps: Quad<StepCoord>) -> Status {
        while !steps.is_zero() {
            for m in 0..MOTOR_COUNT {
                let delta = steps.value[m];
                if delta == 0 {
                    continue;
                }
                let forward = delta > 0;
                let status = self.step_axis(self.motor[m].axis, forward);
                if status != Status::Ok {
                    return status;
                }
                steps.value[m] -= if forward { 1 } else { -1 };
            }
        }
        Status::Ok
    }

    /// One microstep on one axis: direction, pulse, position bookkeeping.
    fn step_axis(&mut self, i_axis: usize, forward: bool) -> Status {
        if self.estop {
            return Status::EStop;
        }
        let invert = self.invert_lim;
        let axis = &mut self.axis[i_axis];
        if !axis.enabled {
            return Status::AxisDisabled;
        }
        if forward && axis.pin_max != NOPIN {
            axis.at_max = self.gpio.digital_read(axis.pin_max) != invert;
            if axis.at_max {
                warn!("axis {} maximum limit tripped", i_axis);
                return Status::LimitMax;
            }
        }
        if !forward && axis.pin_min != NOPIN {
            axis.at_min = self.gpio.digital_read(axis.pin_min) != invert;
            if axis.at_min {
                warn!("axis {} minimum limit tripped", i_axis);
                return Status::LimitMin;
            }
        }
        let dir_level = if forward { axis.dir_high } else { !axis.dir_high };
        self.gpio.digital_write(axis.pin_dir, dir_level);
        self.gpio.digital_write(axis.pin_step, true);
        self.gpio.delay_micros(PULSE_WIDTH_MICS);
        self.gpio.digital_write(axis.pin_step, false);
        if axis.us_delay > 0 {
            self.gpio.delay_micros(axis.us_delay as u32);
        }
        axis.position += if forward { 1 } else { -1 };
        Status::Ok
    }

    /// Drive every homing axis one heartbeat's worth of work: search
    /// toward the minimum switch, then back off and land on `home`.
    /// `BUSY_MOVING` until every flagged axis has latched.
    pub fn home(&mut self) -> Status {
        let mut homing_any = false;
        for i_axis in 0..AXIS_COUNT {
            if !self.axis[i_axis].homing {
                continue;
            }
            if !self.axis[i_axis].is_enabled() {
                self.axis[i_axis].homing = false;
                continue;
            }
            if self.axis[i_axis].pin_min == NOPIN {
                // no switch to search for
                self.axis[i_axis].position = self.axis[i_axis].home;
                self.axis[i_axis].homing = false;
                info!("axis {} homed (no switch)", i_axis);
                continue;
            }
            if self.read_at_min(i_axis) {
                let backoff = self.axis[i_axis].latch_backoff;
                for _ in 0..backoff {
                    let status = self.step_axis(i_axis, true);
                    if status != Status::Ok {
                        return status;
                    }
                }
                self.axis[i_axis].position = self.axis[i_axis].home;
                self.axis[i_axis].at_min = false;
                self.axis[i_axis].homing = false;
                info!("axis {} homed", i_axis);
                continue;
            }
            for _ in 0..HOME_PULSES_PER_TICK {
                let status = self.step_axis(i_axis, false);
                match status {
                    Status::Ok => {}
                    // the switch latched mid-search; back off next call
                    Status::LimitMin => break,
                    other => return other,
                }
                let delay = self.axis[i_axis].search_delay;
                if delay > 0 {
                    self.gpio.delay_micros(delay as u32);
                }
            }
            homing_any = true;
        }
        if homing_any {
            Status::BusyMoving
        } else {
            Status::Ok
        }
    }

    /// Advance every motor toward its absolute target, bounded by the
    /// step-rate budget per heartbeat. `BUSY_MOVING` until all targets are
    /// reached; travel violations and disabled axes fail before any step.
    pub fn move_to(&mut self, dest: Quad<StepCoord>, step_rate: StepCoord) -> Status {
        for m in 0..MOTOR_COUNT {
            let i_axis = self.motor[m].axis;
            let axis = &self.axis[i_axis];
            let target = dest.value[m];
            if target == axis.position {
                continue;
            }
            if !axis.is_enabled() {
                return Status::AxisDisabled;
            }
            if target < axis.travel_min {
                return Status::TravelMin;
            }
            if target > axis.travel_max {
                return Status::TravelMax;
            }
        }
        let budget = if step_rate > 0 {
            step_rate
        } else {
            DEFAULT_STEP_RATE
        };
        let mut moving = false;
        for m in 0..MOTOR_COUNT {
            let i_axis = self.motor[m].axis;
            let delta = dest.value[m] - self.axis[i_axis].position;
            if delta == 0 {
                continue;
            }
            let forward = delta > 0;
            let n = delta.abs().min(budget);
            for _ in 0..n {
                let status = self.step_axis(i_axis, forward);
                if status != Status::Ok {
                    return status;
                }
            }
            if dest.value[m] != self.axis[i_axis].position {
                moving = true;
            }
        }
        if moving {
            Status::BusyMoving
        } else {
            Status::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_of(machine: &mut Machine) -> &mut MockGpio {
        machine
            .gpio_mut()
            .as_any_mut()
            .downcast_mut::<MockGpio>()
            .expect("mock gpio")
    }

    fn enabled_machine() -> Machine {
        let mut machine = Machine::default();
        machine.axis[0].pin_step = 54;
        machine.axis[0].pin_dir = 55;
        machine.axis[0].pin_min = 3;
        machine.enable_axis(0, true);
        machine
    }

    #[test]
    fn test_pulse_updates_position_and_pins() {
        let mut machine = enabled_machine();
        let status = machine.pulse(Quad {
            value: [5, 0, 0, 0],
        });
        assert_eq!(status, Status::Ok);
        assert_eq!(machine.axis[0].position, 5);
        assert_eq!(mock_of(&mut machine).rising_edges(54), 5);
        // forward with default polarity drives dir high
        assert!(mock_of(&mut machine).level(55));
    }

    #[test]
    fn test_pulse_reverse() {
        let mut machine = enabled_machine();
        machine.axis[0].position = 10;
        assert_eq!(
            machine.pulse(Quad {
                value: [-4, 0, 0, 0]
            }),
            Status::Ok
        );
        assert_eq!(machine.axis[0].position, 6);
        assert!(!mock_of(&mut machine).level(55));
    }

    #[test]
    fn test_pulse_disabled_axis() {
        let mut machine = Machine::default();
        assert_eq!(
            machine.pulse(Quad {
                value: [1, 0, 0, 0]
            }),
            Status::AxisDisabled
        );
    }

    #[test]
    fn test_limit_min_trips() {
        let mut machine = enabled_machine();
        mock_of(&mut machine).set_level(3, true);
        let status = machine.pulse(Quad {
            value: [-1, 0, 0, 0],
        });
        assert_eq!(status, Status::LimitMin);
        assert_eq!(machine.axis[0].position, 0);
        assert!(machine.axis[0].at_min);
    }

    #[test]
    fn test_invert_lim() {
        let mut machine = enabled_machine();
        machine.invert_lim = true;
        // raw low now reads as tripped
        assert_eq!(
            machine.pulse(Quad {
                value: [-1, 0, 0, 0]
            }),
            Status::LimitMin
        );
        mock_of(&mut machine).set_level(3, true);
        assert_eq!(
            machine.pulse(Quad {
                value: [-1, 0, 0, 0]
            }),
            Status::Ok
        );
    }

    #[test]
    fn test_estop() {
        let mut machine = enabled_machine();
        machine.set_estop(true);
        assert_eq!(
            machine.pulse(Quad {
                value: [1, 0, 0, 0]
            }),
            Status::EStop
        );
    }

    #[test]
    fn test_move_to_completion() {
        let mut machine = enabled_machine();
        let dest = Quad {
            value: [250, 0, 0, 0],
        };
        assert_eq!(machine.move_to(dest, 100), Status::BusyMoving);
        assert_eq!(machine.axis[0].position, 100);
        assert_eq!(machine.move_to(dest, 100), Status::BusyMoving);
        assert_eq!(machine.move_to(dest, 100), Status::Ok);
        assert_eq!(machine.axis[0].position, 250);
    }

    #[test]
    fn test_move_to_travel_limits() {
        let mut machine = enabled_machine();
        machine.axis[0].travel_max = 500;
        assert_eq!(
            machine.move_to(
                Quad {
                    value: [501, 0, 0, 0]
                },
                0
            ),
            Status::TravelMax
        );
        machine.axis[0].position = 10;
        assert_eq!(
            machine.move_to(
                Quad {
                    value: [-1, 0, 0, 0]
                },
                0
            ),
            Status::TravelMin
        );
    }

    #[test]
    fn test_move_to_disabled_target() {
        let mut machine = Machine::default();
        assert_eq!(
            machine.move_to(
                Quad {
                    value: [0, 5, 0, 0]
                },
                0
            ),
            Status::AxisDisabled
        );
        // no motion requested anywhere: fine
        assert_eq!(machine.move_to(Quad::zero(), 0), Status::Ok);
    }

    #[test]
    fn test_home_search_then_latch() {
        let mut machine = enabled_machine();
        machine.axis[0].position = 100;
        machine.axis[0].home = 7;
        machine.axis[0].latch_backoff = 3;
        machine.axis[0].homing = true;

        assert_eq!(machine.home(), Status::BusyMoving);
        assert!(machine.axis[0].position < 100);

        // switch trips: the next call backs off and lands on home
        mock_of(&mut machine).set_level(3, true);
        assert_eq!(machine.home(), Status::Ok);
        assert_eq!(machine.axis[0].position, 7);
        assert!(!machine.axis[0].homing);
        assert_eq!(machine.home(), Status::Ok);
    }

    #[test]
    fn test_home_without_switch() {
        let mut machine = Machine::default();
        machine.axis[2].pin_step = 46;
        machine.enable_axis(2, true);
        machine.axis[2].home = 42;
        machine.axis[2].homing = true;
        assert_eq!(machine.home(), Status::Ok);
        assert_eq!(machine.axis[2].position, 42);
    }

    #[test]
    fn test_motor_remap() {
        let mut machine = Machine::default();
        assert_eq!(machine.set_motor_axis(0, 4), Status::Ok);
        assert_eq!(machine.motor_axis_index(0), 4);
        assert_eq!(machine.set_motor_axis(0, 9), Status::AxisError);
        assert_eq!(machine.set_motor_axis(7, 0), Status::MotorIndex);
    }

    #[test]
    fn test_operand_lookup() {
        let machine = Machine::default();
        assert_eq!(machine.axis_of_name("x"), Some(0));
        assert_eq!(machine.axis_of_name("c"), Some(5));
        assert_eq!(machine.axis_of_name("q"), None);
        assert_eq!(machine.motor_of_operand('1'), Some(0));
        assert_eq!(machine.motor_of_operand('4'), Some(3));
        assert_eq!(machine.motor_of_operand('x'), Some(0));
        assert_eq!(machine.motor_of_operand('b'), None);
        assert_eq!(machine.axis_of_operand("2"), Some(1));
    }

    #[test]
    fn test_pin_config_preset() {
        let mut machine = Machine::default();
        assert_eq!(machine.set_pin_config(PIN_CONFIG_RAMPS14), Status::Ok);
        assert_eq!(machine.axis[0].pin_step, 54);
        assert_eq!(machine.axis[1].pin_dir, 61);
        assert_eq!(machine.axis[3].pin_min, NOPIN);
        assert_eq!(mock_of(&mut machine).mode(54), Some(PinMode::Output));
        // enable pins initialize high (disabled)
        assert!(mock_of(&mut machine).level(38));

        assert_eq!(machine.set_pin_config(9), Status::PinConfig);
        assert_eq!(machine.pin_config(), PIN_CONFIG_RAMPS14);
    }
}
