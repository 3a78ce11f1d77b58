//! Stroke engine: compressed delta-velocity motion played out in real time.
//!
//! A stroke is a planned motion of up to [`SEGMENT_COUNT`] segments, each
//! holding one signed-8-bit velocity change per motor. Traversal
//! integrates the deltas into per-motor velocities, scales them into step
//! counts, and pushes them through the machine's pulse primitive at the
//! pace the planned time dictates. The planner that produces segment
//! streams lives outside this crate; everything here executes them.

use log::debug;

use crate::machine::{Machine, Quad, StepCoord, Ticks, MOTOR_COUNT, TICKS_PER_SECOND, TICK_MICROSECONDS};
use crate::status::Status;

/// Maximum number of segments in one stroke.
pub const SEGMENT_COUNT: usize = 100;

/// Largest velocity change a segment can carry, in scaled steps.
pub const SEG_VALUE_MAX: i32 = 127;

/// One segment: a velocity delta per motor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrokeSegment {
    /// Velocity change per motor, range −127..=127.
    pub value: [i8; MOTOR_COUNT],
}

/// A planned motion and its traversal state.
#[derive(Debug, Clone)]
pub struct Stroke {
    /// Segment store; only `[0, length)` is active.
    pub seg: [StrokeSegment; SEGMENT_COUNT],
    /// Number of active segments.
    pub length: usize,
    /// Next segment to integrate.
    pub cur_seg: usize,
    /// Exact end-position target in raw steps, when set.
    pub d_end_pos: Quad<StepCoord>,
    /// True when `d_end_pos` was supplied and must be landed on.
    pub end_pos_set: bool,
    /// Step scale applied to integrated velocities.
    pub scale: StepCoord,
    /// Tick the traversal started at.
    pub t_start: Ticks,
    /// Peak per-motor velocity seen so far, in scaled units.
    pub v_peak: i32,
    dt_total: Ticks,
    time_planned: f32,
    started: bool,
    velocity: [StepCoord; MOTOR_COUNT],
    m_pos: Quad<StepCoord>,
}

impl Default for Stroke {
    fn default() -> Self {
        Self::new()
    }
}

impl Stroke {
    /// New empty stroke.
    pub fn new() -> Self {
        Self {
            seg: [StrokeSegment::default(); SEGMENT_COUNT],
            length: 0,
            cur_seg: 0,
            d_end_pos: Quad::zero(),
            end_pos_set: false,
            scale: 1,
            t_start: 0,
            v_peak: 0,
            dt_total: 0,
            time_planned: 0.0,
            started: false,
            velocity: [0; MOTOR_COUNT],
            m_pos: Quad::zero(),
        }
    }

    /// Reset to the empty state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Planned duration in seconds.
    pub fn time_planned(&self) -> f32 {
        self.time_planned
    }

    /// Set the planned duration in seconds.
    pub fn set_time_planned(&mut self, seconds: f32) {
        self.time_planned = seconds;
    }

    /// Planned duration in microseconds.
    pub fn plan_micros(&self) -> i64 {
        (f64::from(self.time_planned) * 1_000_000.0) as i64
    }

    /// Total planned duration in ticks (valid after `start`).
    pub fn dt_total(&self) -> Ticks {
        self.dt_total
    }

    /// Accumulated motor positions, in raw steps from the start point.
    pub fn position(&self) -> Quad<StepCoord> {
        self.m_pos
    }

    /// Validate the plan and arm traversal at tick `now`.
    pub fn start(&mut self, now: Ticks) -> Status {
        if self.length == 0 {
            return Status::StrokeNullError;
        }
        if self.length >= SEGMENT_COUNT {
            return Status::StrokeMaxLen;
        }
        if self.plan_micros() < i64::from(TICK_MICROSECONDS) {
            return Status::StrokeTime;
        }
        self.t_start = now;
        self.dt_total =
            ((f64::from(self.time_planned) * f64::from(TICKS_PER_SECOND)) as Ticks).max(1);
        self.cur_seg = 0;
        self.velocity = [0; MOTOR_COUNT];
        self.m_pos = Quad::zero();
        self.v_peak = 0;
        self.started = true;
        debug!(
            "stroke armed: {} segments over {} ticks, scale {}",
            self.length, self.dt_total, self.scale
        );
        Status::Ok
    }

    /// Advance the motors to where the plan says they should be at tick
    /// `now`. `BUSY_MOVING` while segments remain, `OK` once the final
    /// segment and the end-position correction have been emitted.
    pub fn traverse(&mut self, now: Ticks, machine: &mut Machine) -> Status {
        if !self.started {
            return Status::StrokeStart;
        }
        let elapsed = now.saturating_sub(self.t_start);
        let goal = ((elapsed * self.length as Ticks) / self.dt_total).min(self.length as Ticks)
            as usize;
        while self.cur_seg < goal {
            let seg = self.seg[self.cur_seg];
            let mut pulses = Quad::zero();
            let mut v_seg = 0;
            for m in 0..MOTOR_COUNT {
                self.velocity[m] += StepCoord::from(seg.value[m]);
                if self.velocity[m].abs() > SEG_VALUE_MAX {
                    return Status::StrokeSegPulses;
                }
                pulses.value[m] = self.velocity[m] * self.scale;
                v_seg = v_seg.max(self.velocity[m].abs());
            }
            let status = machine.pulse(pulses);
            if status != Status::Ok {
                return status;
            }
            self.m_pos += pulses;
            self.v_peak = self.v_peak.max(v_seg);
            self.cur_seg += 1;
        }
        if self.cur_seg >= self.length {
            if self.end_pos_set {
                let residual = self.d_end_pos - self.m_pos;
                let tolerance = SEG_VALUE_MAX * self.scale.abs().max(1);
                if residual.value.iter().any(|v| v.abs() > tolerance) {
                    return Status::StrokeEndError;
                }
                if !residual.is_zero() {
                    let status = machine.pulse(residual);
                    if status != Status::Ok {
                        return status;
                    }
                    self.m_pos += residual;
                }
            }
            return Status::Ok;
        }
        Status::BusyMoving
    }
}
