//! Command dispatch: one parsed request tree in, one response line out.
//!
//! `JsonController::process` walks the request-root keys in wire order and
//! routes each to its namespace handler. Handlers follow one shared
//! convention: an empty-string value expands into a nested object of every
//! recognized child key (the "query everything" sentinel), child keys are
//! accepted bare (`en`) or namespace-prefixed (`xen`), and the first
//! failing key short-circuits the rest of the command.
//!
//! Multi-tick commands (`mov`, `ho`, `dvs`, the self-test) are driven by
//! re-entry: the machine thread re-invokes `process` every heartbeat while
//! the aggregate status is BUSY_*, and each handler consults the command's
//! stored status to decide between initialization and continuation.

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::display::{
    DISPLAY_BUSY, DISPLAY_BUSY_MOVING, DISPLAY_WAIT_CAMERA, DISPLAY_WAIT_ERROR,
    DISPLAY_WAIT_IDLE, DISPLAY_WAIT_OPERATOR,
};
use crate::field::{is_query, process_field};
use crate::gpio::PinMode;
use crate::json_command::JsonCommand;
use crate::machine::{
    Machine, PinSelect, Quad, StepCoord, Ticks, MOTOR_COUNT, TICKS_PER_SECOND,
};
use crate::port::SerialIo;
use crate::status::Status;
use crate::stroke::{Stroke, SEGMENT_COUNT, SEG_VALUE_MAX};
use crate::version::wire_version;

const AXIS_CHILD_KEYS: [&str; 19] = [
    "dh", "en", "ho", "is", "lb", "lm", "ln", "mi", "pd", "pe", "pm", "pn", "po", "ps", "sa",
    "sd", "tm", "tn", "ud",
];
const SYS_CHILD_KEYS: [&str; 7] = ["fr", "jp", "lh", "lp", "pc", "tc", "v"];
const DPY_CHILD_KEYS: [&str; 5] = ["cb", "cg", "cr", "dl", "ds"];
const MOTOR_CHILD_KEYS: [&str; 1] = ["ma"];
const QUAD_CHILD_KEYS: [&str; 4] = ["1", "2", "3", "4"];
const SELFTEST_CHILD_KEYS: [&str; 8] = ["lp", "mv", "pp", "pu", "sg", "te", "tp", "tv"];

/// True when `key` names `name` either bare or with a one-character group
/// prefix (`en` or `xen`).
fn suffix1_matches(key: &str, name: &str) -> bool {
    key == name || (key.len() == name.len() + 1 && key.ends_with(name))
}

/// True when `key` names `name` either bare or prefixed with the
/// three-character namespace (`fr` or `sysfr`).
fn ns_matches(key: &str, ns: &str, name: &str) -> bool {
    key == name || key.strip_prefix(ns) == Some(name)
}

/// Replace the empty-string sentinel at `key` with an object holding every
/// child key mapped to the sentinel. Fails `JSON_KEY` (naming the last
/// expected child) when the arena budget cannot hold the expansion.
fn expand_query(
    jcmd: &mut JsonCommand,
    jobj: &mut Map<String, Value>,
    key: &str,
    children: &[&str],
) -> Status {
    if !matches!(jobj.get(key), Some(v) if is_query(v)) {
        return Status::Ok;
    }
    if !jcmd.alloc_nodes(children.len()) {
        let last = children.last().copied().unwrap_or(key);
        return jcmd.set_error(Status::JsonKey, last);
    }
    let mut node = Map::new();
    for child in children {
        node.insert((*child).to_string(), Value::String(String::new()));
    }
    jobj.insert(key.to_string(), Value::Object(node));
    Status::Ok
}

/// Move the nested object at `key` out for mutation; pair with
/// [`restore_child`]. `None` when the value is not an object.
fn take_child(jobj: &mut Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    match jobj.get_mut(key) {
        Some(Value::Object(kid)) => Some(std::mem::take(kid)),
        _ => None,
    }
}

fn restore_child(jobj: &mut Map<String, Value>, key: &str, kid: Map<String, Value>) {
    jobj.insert(key.to_string(), Value::Object(kid));
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Per-command dispatcher. Holds only bookkeeping; the machine is borrowed
/// for the duration of each call and never retained.
#[derive(Debug)]
pub struct JsonController {
    last_processed: Ticks,
    n_loops: i32,
}

impl Default for JsonController {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonController {
    /// New controller.
    pub fn new() -> Self {
        Self {
            last_processed: 0,
            n_loops: 0,
        }
    }

    /// Tick of the most recent `process` call.
    pub fn last_processed(&self) -> Ticks {
        self.last_processed
    }

    /// Process every request-root key in order, store the aggregate status
    /// on the command, and emit the response once the command stops being
    /// busy.
    pub fn process(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        port: &mut dyn SerialIo,
    ) -> Status {
        self.n_loops = self.n_loops.wrapping_add(1);
        let mut root = jcmd.take_request();
        let keys: Vec<String> = root.keys().cloned().collect();
        let mut status = Status::Ok;
        let mut failed_key: Option<&String> = None;
        for key in &keys {
            if status.code() < 0 {
                break;
            }
            status = self.dispatch(machine, jcmd, &mut root, key);
            if status.is_error() {
                failed_key = Some(key);
            }
        }
        jcmd.put_request(root);
        jcmd.set_status(status);
        // every failing response names its key, even where the handler
        // returned a bare status
        if status.is_error() && jcmd.error().is_none() {
            if let Some(key) = failed_key {
                jcmd.set_error(status, key);
            }
        }
        if !status.is_processing() {
            self.send_response(machine, jcmd, port);
        }
        self.last_processed = machine.ticks;
        status
    }

    /// Force `cause` onto the command, emit its response immediately, and
    /// end in `WAIT_CANCELLED`.
    pub fn cancel(
        &self,
        machine: &Machine,
        jcmd: &mut JsonCommand,
        port: &mut dyn SerialIo,
        cause: Status,
    ) -> Status {
        warn!("command cancelled ({})", cause.code());
        jcmd.set_error(cause, "cancel");
        self.send_response(machine, jcmd, port);
        Status::WaitCancelled
    }

    /// Serialize the response (compact or pretty per the machine flag)
    /// with a trailing newline, at most once per command.
    pub fn send_response(
        &self,
        machine: &Machine,
        jcmd: &mut JsonCommand,
        port: &mut dyn SerialIo,
    ) {
        let line = jcmd.serialize_response(machine.json_pretty_print);
        if let Err(e) = port.write_line(&line) {
            warn!("failed to write response: {}", e);
        }
        jcmd.set_responded();
    }

    fn dispatch(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        root: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        debug!("dispatch key '{}'", key);
        if key == "dvs" {
            return self.process_stroke(machine, jcmd, root, key);
        }
        if key == "mov" {
            return self.process_move(machine, jcmd, root, key);
        }
        if key.starts_with("ho") {
            return self.process_home(machine, jcmd, root, key);
        }
        if key.starts_with("tst") {
            return self.process_test(machine, jcmd, root, key);
        }
        if key.starts_with("sys") {
            return self.process_sys(machine, jcmd, root, key);
        }
        if key.starts_with("dpy") {
            return self.process_display(machine, jcmd, root, key);
        }
        if key.starts_with("mpo") {
            return self.process_stepper_position(machine, jcmd, root, key);
        }
        match key.chars().next() {
            Some(group @ '1'..='4') => self.process_motor(machine, jcmd, root, key, group),
            Some(group) if machine.axis_of_name(&group.to_string()).is_some() => {
                self.process_axis(machine, jcmd, root, key, group)
            }
            _ => jcmd.set_error(Status::UnrecognizedName, key),
        }
    }

    // ------------------------------------------------------------------
    // sys
    // ------------------------------------------------------------------

    fn process_sys(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        if key == "sys" {
            let status = expand_query(jcmd, jobj, key, &SYS_CHILD_KEYS);
            if status != Status::Ok {
                return status;
            }
            let Some(mut kid) = take_child(jobj, key) else {
                return Status::Ok;
            };
            let keys: Vec<String> = kid.keys().cloned().collect();
            let mut status = Status::Ok;
            for child in &keys {
                status = self.process_sys(machine, jcmd, &mut kid, child);
                if status != Status::Ok {
                    break;
                }
            }
            restore_child(jobj, key, kid);
            return status;
        }
        if ns_matches(key, "sys", "fr") {
            jobj.insert(key.to_string(), Value::from(jcmd.response_available() as i64));
            Status::Ok
        } else if ns_matches(key, "sys", "jp") {
            process_field(jobj, key, &mut machine.json_pretty_print)
        } else if ns_matches(key, "sys", "pc") {
            let assignment = jobj.get(key).is_some_and(|v| !is_query(v));
            let mut pc = machine.pin_config();
            let status = process_field(jobj, key, &mut pc);
            if status == Status::Ok && assignment {
                let applied = machine.set_pin_config(pc);
                if applied != Status::Ok {
                    return jcmd.set_error(applied, key);
                }
            }
            status
        } else if ns_matches(key, "sys", "lh") {
            process_field(jobj, key, &mut machine.invert_lim)
        } else if ns_matches(key, "sys", "lp") {
            process_field(jobj, key, &mut self.n_loops)
        } else if ns_matches(key, "sys", "tc") {
            jobj.insert(key.to_string(), Value::from(machine.ticks));
            Status::Ok
        } else if ns_matches(key, "sys", "v") {
            jobj.insert(key.to_string(), Value::from(wire_version()));
            Status::Ok
        } else {
            jcmd.set_error(Status::UnrecognizedName, key)
        }
    }

    // ------------------------------------------------------------------
    // dpy
    // ------------------------------------------------------------------

    fn process_display(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        if key == "dpy" {
            let status = expand_query(jcmd, jobj, key, &DPY_CHILD_KEYS);
            if status != Status::Ok {
                return status;
            }
            let Some(mut kid) = take_child(jobj, key) else {
                return Status::Ok;
            };
            let keys: Vec<String> = kid.keys().cloned().collect();
            let mut status = Status::Ok;
            for child in &keys {
                status = self.process_display(machine, jcmd, &mut kid, child);
                if status != Status::Ok {
                    break;
                }
            }
            restore_child(jobj, key, kid);
            return status;
        }
        if ns_matches(key, "dpy", "cb") {
            process_field(jobj, key, &mut machine.display.camera_b)
        } else if ns_matches(key, "dpy", "cg") {
            process_field(jobj, key, &mut machine.display.camera_g)
        } else if ns_matches(key, "dpy", "cr") {
            process_field(jobj, key, &mut machine.display.camera_r)
        } else if ns_matches(key, "dpy", "dl") {
            process_field(jobj, key, &mut machine.display.level)
        } else if ns_matches(key, "dpy", "ds") {
            let assignment = jobj.get(key).is_some_and(|v| !is_query(v));
            let status = process_field(jobj, key, &mut machine.display.status);
            if status != Status::Ok || !assignment {
                return status;
            }
            match machine.display.status {
                DISPLAY_WAIT_IDLE => Status::WaitIdle,
                DISPLAY_WAIT_ERROR => Status::WaitError,
                DISPLAY_WAIT_OPERATOR => Status::WaitOperator,
                DISPLAY_BUSY_MOVING => Status::WaitMoving,
                DISPLAY_BUSY => Status::WaitBusy,
                DISPLAY_WAIT_CAMERA => Status::WaitCamera,
                _ => status,
            }
        } else {
            jcmd.set_error(Status::UnrecognizedName, key)
        }
    }

    // ------------------------------------------------------------------
    // axis
    // ------------------------------------------------------------------

    fn process_axis(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
        group: char,
    ) -> Status {
        let Some(i_axis) = machine.axis_of_name(&group.to_string()) else {
            return Status::AxisError;
        };
        if key.len() == 1 {
            let status = expand_query(jcmd, jobj, key, &AXIS_CHILD_KEYS);
            if status != Status::Ok {
                return status;
            }
            let Some(mut kid) = take_child(jobj, key) else {
                return Status::Ok;
            };
            let keys: Vec<String> = kid.keys().cloned().collect();
            let mut status = Status::Ok;
            for child in &keys {
                status = self.process_axis(machine, jcmd, &mut kid, child, group);
                if status != Status::Ok {
                    break;
                }
            }
            restore_child(jobj, key, kid);
            return status;
        }
        if suffix1_matches(key, "en") {
            let mut active = machine.axis[i_axis].is_enabled();
            let status = process_field(jobj, key, &mut active);
            if status == Status::Ok {
                let effective = machine.enable_axis(i_axis, active);
                jobj.insert(key.to_string(), Value::Bool(effective));
            }
            status
        } else if suffix1_matches(key, "dh") {
            process_field(jobj, key, &mut machine.axis[i_axis].dir_high)
        } else if suffix1_matches(key, "ho") {
            // the axis-level home key drives the same homing cycle as the
            // ho namespace: mark on first pass, search on re-entry
            match jcmd.status() {
                Status::BusyParsed => {
                    let status = Self::process_home_field(machine, jobj, key, i_axis);
                    if status == Status::Ok && machine.axis[i_axis].homing {
                        Status::BusyMoving
                    } else {
                        status
                    }
                }
                Status::BusyMoving => machine.home(),
                _ => process_field(jobj, key, &mut machine.axis[i_axis].home),
            }
        } else if suffix1_matches(key, "is") {
            process_field(jobj, key, &mut machine.axis[i_axis].idle_snooze)
        } else if suffix1_matches(key, "lb") {
            process_field(jobj, key, &mut machine.axis[i_axis].latch_backoff)
        } else if suffix1_matches(key, "lm") {
            machine.read_at_max(i_axis);
            process_field(jobj, key, &mut machine.axis[i_axis].at_max)
        } else if suffix1_matches(key, "ln") {
            machine.read_at_min(i_axis);
            process_field(jobj, key, &mut machine.axis[i_axis].at_min)
        } else if suffix1_matches(key, "mi") {
            let status = process_field(jobj, key, &mut machine.axis[i_axis].microsteps);
            if status == Status::Ok && machine.axis[i_axis].microsteps < 1 {
                machine.axis[i_axis].microsteps = 1;
                return jcmd.set_error(Status::JsonPositive1, "mi");
            }
            status
        } else if suffix1_matches(key, "pd") {
            self.process_pin(machine, jobj, key, i_axis, PinSelect::Dir, PinMode::Output, None)
        } else if suffix1_matches(key, "pe") {
            self.process_pin(
                machine,
                jobj,
                key,
                i_axis,
                PinSelect::Enable,
                PinMode::Output,
                Some(true),
            )
        } else if suffix1_matches(key, "pm") {
            self.process_pin(machine, jobj, key, i_axis, PinSelect::Max, PinMode::Input, None)
        } else if suffix1_matches(key, "pn") {
            self.process_pin(machine, jobj, key, i_axis, PinSelect::Min, PinMode::Input, None)
        } else if suffix1_matches(key, "po") {
            process_field(jobj, key, &mut machine.axis[i_axis].position)
        } else if suffix1_matches(key, "ps") {
            self.process_pin(machine, jobj, key, i_axis, PinSelect::Step, PinMode::Output, None)
        } else if suffix1_matches(key, "sa") {
            process_field(jobj, key, &mut machine.axis[i_axis].step_angle)
        } else if suffix1_matches(key, "sd") {
            process_field(jobj, key, &mut machine.axis[i_axis].search_delay)
        } else if suffix1_matches(key, "tm") {
            process_field(jobj, key, &mut machine.axis[i_axis].travel_max)
        } else if suffix1_matches(key, "tn") {
            process_field(jobj, key, &mut machine.axis[i_axis].travel_min)
        } else if suffix1_matches(key, "ud") {
            process_field(jobj, key, &mut machine.axis[i_axis].us_delay)
        } else {
            jcmd.set_error(Status::UnrecognizedName, key)
        }
    }

    fn process_pin(
        &mut self,
        machine: &mut Machine,
        jobj: &mut Map<String, Value>,
        key: &str,
        i_axis: usize,
        select: PinSelect,
        mode: PinMode,
        initial: Option<bool>,
    ) -> Status {
        let mut new_pin = machine.axis[i_axis].pin(select);
        let status = process_field(jobj, key, &mut new_pin);
        machine.set_pin(i_axis, select, new_pin, mode, initial);
        status
    }

    // ------------------------------------------------------------------
    // motor
    // ------------------------------------------------------------------

    fn process_motor(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
        group: char,
    ) -> Status {
        if key.len() == 1 {
            let status = expand_query(jcmd, jobj, key, &MOTOR_CHILD_KEYS);
            if status != Status::Ok {
                return status;
            }
            let Some(mut kid) = take_child(jobj, key) else {
                return Status::Ok;
            };
            let keys: Vec<String> = kid.keys().cloned().collect();
            let mut status = Status::Ok;
            for child in &keys {
                status = self.process_motor(machine, jcmd, &mut kid, child, group);
                if status != Status::Ok {
                    break;
                }
            }
            restore_child(jobj, key, kid);
            return status;
        }
        if suffix1_matches(key, "ma") {
            let Some(digit) = group.to_digit(10) else {
                return Status::MotorIndex;
            };
            let i_motor = digit as usize;
            if !(1..=MOTOR_COUNT).contains(&i_motor) {
                return Status::MotorIndex;
            }
            let i_motor = i_motor - 1;
            let mut i_axis = machine.motor_axis_index(i_motor) as i32;
            let status = process_field(jobj, key, &mut i_axis);
            if status != Status::Ok {
                return status;
            }
            machine.set_motor_axis(i_motor, i_axis)
        } else {
            Status::Ok
        }
    }

    // ------------------------------------------------------------------
    // mpo
    // ------------------------------------------------------------------

    fn process_stepper_position(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        if key.len() == 3 {
            let status = expand_query(jcmd, jobj, key, &QUAD_CHILD_KEYS);
            if status != Status::Ok {
                return status;
            }
            let Some(mut kid) = take_child(jobj, key) else {
                return Status::PositionError;
            };
            let keys: Vec<String> = kid.keys().cloned().collect();
            let mut status = Status::Ok;
            for child in &keys {
                status = self.process_stepper_position(machine, jcmd, &mut kid, child);
                if status != Status::Ok {
                    break;
                }
            }
            restore_child(jobj, key, kid);
            return status;
        }
        let i_axis = machine
            .axis_of_operand(key)
            .or_else(|| key.strip_prefix("mpo").and_then(|rest| machine.axis_of_operand(rest)));
        let Some(i_axis) = i_axis else {
            return jcmd.set_error(Status::NoMotor, key);
        };
        process_field(jobj, key, &mut machine.axis[i_axis].position)
    }

    // ------------------------------------------------------------------
    // home
    // ------------------------------------------------------------------

    fn process_home(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        match jcmd.status() {
            Status::BusyParsed => self.initialize_home(machine, jcmd, jobj, key),
            Status::BusyMoving => machine.home(),
            _ => jcmd.set_error(Status::State, key),
        }
    }

    fn initialize_home(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        let mut status = Status::Ok;
        if key == "ho" {
            let expanded = expand_query(jcmd, jobj, key, &QUAD_CHILD_KEYS);
            if expanded != Status::Ok {
                return expanded;
            }
            if let Some(mut kid) = take_child(jobj, key) {
                let keys: Vec<String> = kid.keys().cloned().collect();
                for child in &keys {
                    status = self.initialize_home(machine, jcmd, &mut kid, child);
                    if status != Status::BusyMoving {
                        restore_child(jobj, key, kid);
                        return status;
                    }
                }
                restore_child(jobj, key, kid);
                return status;
            }
        } else {
            let operand = key.chars().last().unwrap_or(' ');
            let Some(i_motor) = machine.motor_of_operand(operand) else {
                return jcmd.set_error(Status::NoMotor, key);
            };
            let i_axis = machine.motor_axis_index(i_motor);
            status = Self::process_home_field(machine, jobj, key, i_axis);
        }
        if status == Status::Ok {
            Status::BusyMoving
        } else {
            status
        }
    }

    /// Query or assign the home position, then mark the axis for homing
    /// if it can move (disabled axes echo their position instead).
    fn process_home_field(
        machine: &mut Machine,
        jobj: &mut Map<String, Value>,
        key: &str,
        i_axis: usize,
    ) -> Status {
        let status = process_field(jobj, key, &mut machine.axis[i_axis].home);
        if machine.axis[i_axis].is_enabled() {
            jobj.insert(key.to_string(), Value::from(machine.axis[i_axis].home));
            machine.axis[i_axis].homing = true;
        } else {
            jobj.insert(key.to_string(), Value::from(machine.axis[i_axis].position));
            machine.axis[i_axis].homing = false;
        }
        status
    }

    // ------------------------------------------------------------------
    // mov
    // ------------------------------------------------------------------

    fn process_move(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        match jcmd.status() {
            Status::BusyParsed => self.initialize_move(machine, jcmd, jobj, key),
            Status::BusyMoving => machine.move_to(jcmd.mov, jcmd.step_rate),
            _ => jcmd.set_error(Status::State, key),
        }
    }

    fn initialize_move(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        let mut status = Status::Ok;
        if key == "mov" {
            if let Some(mut kid) = take_child(jobj, key) {
                jcmd.mov = Quad::zero();
                jcmd.step_rate = 0;
                let keys: Vec<String> = kid.keys().cloned().collect();
                for child in &keys {
                    status = self.initialize_move(machine, jcmd, &mut kid, child);
                    if status != Status::BusyMoving {
                        restore_child(jobj, key, kid);
                        return status;
                    }
                }
                restore_child(jobj, key, kid);
                return status;
            }
        } else if key == "sr" {
            status = process_field(jobj, key, &mut jcmd.step_rate);
        } else {
            let operand = key.chars().last().unwrap_or(' ');
            let Some(i_motor) = machine.motor_of_operand(operand) else {
                return jcmd.set_error(Status::NoMotor, key);
            };
            status = process_field(jobj, key, &mut jcmd.mov.value[i_motor]);
        }
        if status == Status::Ok {
            Status::BusyMoving
        } else {
            status
        }
    }

    // ------------------------------------------------------------------
    // dvs
    // ------------------------------------------------------------------

    fn process_stroke(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        if !matches!(jobj.get(key), Some(Value::Object(_))) {
            return Status::JsonStrokeError;
        }
        let status = jcmd.status();
        if status == Status::BusyParsed {
            let Some(mut kid) = take_child(jobj, key) else {
                return Status::JsonStrokeError;
            };
            let result = self.initialize_stroke(machine, jcmd, &mut kid);
            restore_child(jobj, key, kid);
            return result;
        }
        if status == Status::BusyMoving {
            let mut result = status;
            if machine.stroke.cur_seg < machine.stroke.length {
                let Some(mut kid) = take_child(jobj, key) else {
                    return Status::JsonStrokeError;
                };
                result = Self::traverse_stroke(machine, &mut kid);
                restore_child(jobj, key, kid);
            }
            if !result.is_error() && machine.stroke.cur_seg >= machine.stroke.length {
                result = Status::Ok;
            }
            return result;
        }
        status
    }

    fn initialize_stroke(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        stroke_obj: &mut Map<String, Value>,
    ) -> Status {
        let mut slen = [0usize; MOTOR_COUNT];
        let mut us_ok = false;
        machine.stroke.clear();
        let keys: Vec<String> = stroke_obj.keys().cloned().collect();
        for key in &keys {
            if key == "us" {
                let mut plan_micros: i32 = 0;
                let status = process_field(stroke_obj, key, &mut plan_micros);
                if status != Status::Ok {
                    return jcmd.set_error(status, key);
                }
                machine.stroke.set_time_planned(plan_micros as f32 / 1_000_000.0);
                us_ok = true;
            } else if key == "dp" {
                let Some(Value::Array(items)) = stroke_obj.get(key) else {
                    return jcmd.set_error(Status::FieldArrayError, key);
                };
                if items.is_empty() {
                    return jcmd.set_error(Status::JsonArrayLen, key);
                }
                for (i, item) in items.iter().take(MOTOR_COUNT).enumerate() {
                    let Some(v) = item.as_i64() else {
                        return jcmd.set_error(Status::FieldArrayError, key);
                    };
                    machine.stroke.d_end_pos.value[i] = v as StepCoord;
                }
                machine.stroke.end_pos_set = true;
            } else if key == "sc" {
                let mut scale = machine.stroke.scale;
                let status = process_field(stroke_obj, key, &mut scale);
                if status != Status::Ok {
                    return jcmd.set_error(status, key);
                }
                machine.stroke.scale = scale;
            } else {
                let operand = key.chars().next().unwrap_or(' ');
                let i_motor = if key.len() == 1 {
                    machine.motor_of_operand(operand)
                } else {
                    None
                };
                let Some(i_motor) = i_motor else {
                    return jcmd.set_error(Status::NoMotor, key);
                };
                let status =
                    Self::initialize_stroke_array(machine, jcmd, stroke_obj, key, i_motor, &mut slen[i_motor]);
                if status != Status::BusyMoving {
                    return status;
                }
            }
        }
        if !us_ok {
            return jcmd.set_error(Status::FieldRequired, "us");
        }
        for (i_motor, pair_error) in [
            (1, Status::S1S2LenError),
            (2, Status::S1S3LenError),
            (3, Status::S1S4LenError),
        ] {
            if slen[0] != 0 && slen[i_motor] != 0 && slen[0] != slen[i_motor] {
                return pair_error;
            }
        }
        machine.stroke.length = slen.iter().copied().find(|n| *n != 0).unwrap_or(0);
        if machine.stroke.length == 0 {
            return Status::StrokeNullError;
        }
        let started = machine.stroke.start(machine.ticks);
        if started != Status::Ok {
            return started;
        }
        Status::BusyMoving
    }

    fn initialize_stroke_array(
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        stroke_obj: &mut Map<String, Value>,
        key: &str,
        i_motor: usize,
        slen: &mut usize,
    ) -> Status {
        let Some(Value::Array(items)) = stroke_obj.get(key) else {
            return jcmd.set_error(Status::FieldArrayError, key);
        };
        let deltas: Vec<i64> = {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let Some(v) = item.as_i64() else {
                    return jcmd.set_error(Status::RangeError, key);
                };
                out.push(v);
            }
            out
        };
        for v in deltas {
            if !(-i64::from(SEG_VALUE_MAX)..=i64::from(SEG_VALUE_MAX)).contains(&v) {
                return jcmd.set_error(Status::RangeError, key);
            }
            if *slen >= SEGMENT_COUNT {
                return Status::StrokeMaxLen;
            }
            machine.stroke.seg[*slen].value[i_motor] = v as i8;
            *slen += 1;
        }
        stroke_obj.insert(key.to_string(), Value::from(0));
        Status::BusyMoving
    }

    fn traverse_stroke(machine: &mut Machine, stroke_obj: &mut Map<String, Value>) -> Status {
        let mut stroke = std::mem::take(&mut machine.stroke);
        let status = stroke.traverse(machine.ticks, machine);
        let pos = stroke.position();
        machine.stroke = stroke;

        let keys: Vec<String> = stroke_obj.keys().cloned().collect();
        for key in &keys {
            let operand = key.chars().last().unwrap_or(' ');
            if let Some(i_motor) = machine.motor_of_operand(operand) {
                stroke_obj.insert(key.clone(), Value::from(pos.value[i_motor]));
            }
        }
        status
    }

    // ------------------------------------------------------------------
    // tst
    // ------------------------------------------------------------------

    fn process_test(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        let status = jcmd.status();
        if status != Status::BusyParsed && status != Status::BusyMoving {
            return status;
        }
        if key == "tst" {
            let Some(mut kid) = take_child(jobj, key) else {
                return jcmd.set_error(Status::JsonObject, key);
            };
            let keys: Vec<String> = kid.keys().cloned().collect();
            let mut result = status;
            for child in &keys {
                result = self.process_test(machine, jcmd, &mut kid, child);
            }
            restore_child(jobj, key, kid);
            return result;
        }
        if ns_matches(key, "tst", "rv") {
            let steps = match Self::quad_from_array(jobj, key, |i, revs| {
                let axis = machine.motor_axis(i);
                let rev_steps = (360.0 / axis.step_angle) as StepCoord;
                let rev_microsteps = rev_steps * StepCoord::from(axis.microsteps);
                revs * rev_microsteps
            }) {
                Ok(steps) => steps,
                Err(status) => return jcmd.set_error(status, key),
            };
            let mut result = machine.pulse(steps);
            if result == Status::Ok {
                machine.gpio_mut().delay_millis(250);
                result = machine.pulse(steps.absolute());
                machine.gpio_mut().delay_millis(250);
            }
            if result == Status::Ok {
                result = Status::BusyMoving;
            }
            result
        } else if ns_matches(key, "tst", "sp") {
            let steps = match Self::quad_from_array(jobj, key, |_, v| v) {
                Ok(steps) => steps,
                Err(status) => return jcmd.set_error(status, key),
            };
            machine.pulse(steps)
        } else if ns_matches(key, "tst", "ph") {
            PhSelfTest::new().process(machine, jcmd, jobj, key)
        } else {
            jcmd.set_error(Status::UnrecognizedName, key)
        }
    }

    /// Read an optional-per-motor array into a quad, mapping each present
    /// element through `f`.
    fn quad_from_array(
        jobj: &Map<String, Value>,
        key: &str,
        mut f: impl FnMut(usize, StepCoord) -> StepCoord,
    ) -> Result<Quad<StepCoord>, Status> {
        let Some(Value::Array(items)) = jobj.get(key) else {
            return Err(Status::FieldArrayError);
        };
        let mut steps = Quad::zero();
        for (i, item) in items.iter().take(MOTOR_COUNT).enumerate() {
            let Some(v) = item.as_i64() else {
                return Err(Status::FieldArrayError);
            };
            steps.value[i] = f(i, v as StepCoord);
        }
        Ok(steps)
    }
}

// ----------------------------------------------------------------------
// Self-test
// ----------------------------------------------------------------------

/// Pulse-throughput self-test: builds a linear stroke across every enabled
/// motor, runs it to completion inside one heartbeat, reverses, and
/// reports loop samples, pulse rate, and timing.
struct PhSelfTest {
    n_samples: i32,
    pulses: StepCoord,
    v_max: i32,
    tv_max: f32,
    n_segs: i16,
}

impl PhSelfTest {
    fn new() -> Self {
        Self {
            n_samples: 0,
            pulses: 6400,
            v_max: 12_800,
            tv_max: 0.7,
            n_segs: 0,
        }
    }

    fn process(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
        key: &str,
    ) -> Status {
        if key == "ph" || key == "tstph" {
            let status = expand_query(jcmd, jobj, key, &SELFTEST_CHILD_KEYS);
            if status != Status::Ok {
                return status;
            }
            let Some(mut kid) = take_child(jobj, key) else {
                return jcmd.set_error(Status::JsonObject, key);
            };
            let keys: Vec<String> = kid.keys().cloned().collect();
            for child in &keys {
                let status = self.process(machine, jcmd, &mut kid, child);
                if status != Status::Ok {
                    restore_child(jobj, key, kid);
                    return status;
                }
            }
            let mut status = self.execute(machine, jcmd, &mut kid);
            if status == Status::BusyMoving {
                self.pulses = -self.pulses;
                status = self.execute(machine, jcmd, &mut kid);
            }
            restore_child(jobj, key, kid);
            status
        } else if key == "lp" || key == "pp" || key == "te" || key == "tp" {
            // output variables
            Status::Ok
        } else if key == "mv" {
            process_field(jobj, key, &mut self.v_max)
        } else if key == "pu" {
            process_field(jobj, key, &mut self.pulses)
        } else if key == "sg" {
            process_field(jobj, key, &mut self.n_segs)
        } else if key == "tv" {
            process_field(jobj, key, &mut self.tv_max)
        } else {
            jcmd.set_error(Status::UnrecognizedName, key)
        }
    }

    fn execute(
        &mut self,
        machine: &mut Machine,
        jcmd: &mut JsonCommand,
        jobj: &mut Map<String, Value>,
    ) -> Status {
        if self.n_segs >= SEGMENT_COUNT as i16 {
            return jcmd.set_error(Status::StrokeMaxLen, "sg");
        }
        let enabled: Vec<bool> = (0..MOTOR_COUNT)
            .map(|m| machine.motor_axis(m).is_enabled())
            .collect();
        let mut start = Quad::zero();
        if self.pulses < 0 {
            for m in 0..MOTOR_COUNT {
                start.value[m] = if enabled[m] { -self.pulses } else { 0 };
            }
        }
        machine.set_motor_position(start);
        let mut dest = Quad::zero();
        for m in 0..MOTOR_COUNT {
            dest.value[m] = if enabled[m] { self.pulses } else { 0 };
        }
        let displacement = dest - machine.motor_position();
        let built = build_line(&mut machine.stroke, displacement, self.v_max, self.tv_max, self.n_segs);
        if built != Status::Ok {
            return built;
        }
        let t_start = machine.ticks;
        let started = machine.stroke.start(t_start);
        match started {
            Status::Ok => {}
            Status::StrokeTime => return jcmd.set_error(started, "tv"),
            other => return other,
        }
        let mut status;
        loop {
            self.n_samples += 1;
            // the self-test spans a single heartbeat, so it advances the
            // process clock itself
            machine.ticks += 1;
            let mut stroke = std::mem::take(&mut machine.stroke);
            status = stroke.traverse(machine.ticks, machine);
            machine.stroke = stroke;
            if status != Status::BusyMoving {
                break;
            }
        }
        if status == Status::Ok {
            status = Status::BusyMoving; // burn-in repeats until cancelled
        }
        let t_elapsed = machine.ticks - t_start;
        let te = t_elapsed as f64 / f64::from(TICKS_PER_SECOND);
        let tp = f64::from(machine.stroke.time_planned());
        let length = machine.stroke.length;
        let pulse_rate = if te > 0.0 {
            f64::from(machine.stroke.v_peak) * (length as f64 / te)
        } else {
            0.0
        };
        jobj.insert("lp".to_string(), Value::from(self.n_samples));
        jobj.insert("pp".to_string(), Value::from(round_to(pulse_rate, 1)));
        jobj.insert("sg".to_string(), Value::from(length as i64));
        jobj.insert("te".to_string(), Value::from(round_to(te, 3)));
        jobj.insert("tp".to_string(), Value::from(round_to(tp, 3)));
        status
    }
}

/// Build a symmetric linear ramp covering `displacement` on every motor
/// with a nonzero component. Stands in for the external curve planner:
/// unit delta-velocity triangle at an integer scale, with the residual
/// landed through the stroke's end-position correction.
fn build_line(
    stroke: &mut Stroke,
    displacement: Quad<StepCoord>,
    v_max: i32,
    tv_max: f32,
    n_segs: i16,
) -> Status {
    stroke.clear();
    let magnitude = displacement
        .value
        .iter()
        .map(|v| v.abs())
        .max()
        .unwrap_or(0);
    if magnitude == 0 {
        return Status::StrokeNullError;
    }
    // keep the triangle short enough that the residual fits the
    // end-correction tolerance: h^4 <= 127 * |displacement|
    let h_cap = (f64::from(127 * magnitude)).powf(0.25).floor() as i32;
    let mut half = h_cap.clamp(1, (SEGMENT_COUNT as i32 - 2) / 2);
    if n_segs > 0 {
        half = half.min((i32::from(n_segs) / 2).max(1));
    }
    let tri = half * half;
    let scale = (magnitude + tri - 1) / tri;
    for s in 0..half as usize {
        for m in 0..MOTOR_COUNT {
            let sign = displacement.value[m].signum() as i8;
            stroke.seg[s].value[m] = sign;
            stroke.seg[half as usize + s].value[m] = -sign;
        }
    }
    stroke.length = (2 * half) as usize;
    stroke.scale = scale;
    stroke.d_end_pos = displacement;
    stroke.end_pos_set = true;
    let seconds = (magnitude as f32 / v_max.max(1) as f32).max(2.0 * tv_max);
    stroke.set_time_planned(seconds);
    Status::Ok
}
