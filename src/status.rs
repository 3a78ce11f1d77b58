//! Status codes shared by every stage of the command pipeline.
//!
//! A `Status` is the single outcome type of the firmware core: parsing,
//! dispatch, motion, and hardware events all speak it. Codes cross the
//! serial link as signed integers in the response `"s"` field, so the
//! numbering is part of the wire protocol and must not drift:
//!
//! - `0` success, `10..=13` busy phases, `20..=26` input waits
//! - `-1` uninitialized command
//! - `-100..` internal errors, `-200..` stroke errors, `-400..` JSON and
//!   protocol errors, `-900..` hardware events

/// Outcome or phase of a command, with its wire code as discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    /// Operation completed successfully.
    Ok = 0,
    /// JSON parsed, awaiting processing.
    BusyParsed = 10,
    /// Processing a non-motion command.
    Busy = 11,
    /// Processing a motion command.
    BusyMoving = 12,
    /// Processing setup.
    BusySetup = 13,
    /// Awaiting input: inactive.
    WaitIdle = 20,
    /// Awaiting input: remainder of an EOL-terminated command.
    WaitEol = 21,
    /// Awaiting input: camera-ready display.
    WaitCamera = 22,
    /// Awaiting input: operator attention required.
    WaitOperator = 23,
    /// Awaiting input: motion command display.
    WaitMoving = 24,
    /// Awaiting input: non-motion command display.
    WaitBusy = 25,
    /// Awaiting input: command interrupted by serial input.
    WaitCancelled = 26,
    /// Uninitialized command.
    Empty = -1,

    // internal errors
    /// Could not process position.
    PositionError = -100,
    /// Could not process axis.
    AxisError = -101,
    /// Could not process system configuration.
    SysError = -102,
    /// Motor index out of range.
    MotorIndex = -112,
    /// Pulse step out of range.
    StepRangeError = -113,
    /// No more JSON memory.
    JsonMem = -118,
    /// Display error indicator.
    WaitError = -119,
    /// Motion requested for a disabled axis.
    AxisDisabled = -120,
    /// Attempt to change NOPIN.
    NoPin = -121,
    /// Invalid motor index.
    MotorError = -129,
    /// Proposed but not yet implemented.
    NotImplemented = -130,
    /// Axis must be mapped to a motor.
    NoMotor = -131,
    /// Invalid pin configuration.
    PinConfig = -132,
    /// Provided value out of range.
    ValueRange = -133,
    /// Invalid state.
    State = -134,

    // stroke errors
    /// Stroke has too many pulses per segment.
    StrokeSegPulses = -200,
    /// Stroke delta/end-position mismatch.
    StrokeEndError = -201,
    /// Stroke maximum length exceeded.
    StrokeMaxLen = -202,
    /// Stroke planned time is below one tick.
    StrokeTime = -203,
    /// Stroke start() must be called before traverse().
    StrokeStart = -204,
    /// Stroke has no segments.
    StrokeNullError = -205,

    // JSON and protocol errors
    /// Unbalanced JSON braces.
    JsonBraceError = -400,
    /// Unbalanced JSON brackets.
    JsonBracketError = -401,
    /// Unrecognized command name.
    UnrecognizedName = -402,
    /// JSON invalid.
    JsonParseError = -403,
    /// JSON exceeds buffer size.
    JsonTooLong = -404,
    /// JSON object expected.
    JsonObject = -407,
    /// JSON value >= 0 expected.
    JsonPositive = -408,
    /// JSON value >= 1 expected.
    JsonPositive1 = -409,
    /// JSON buffer overflow: could not create an object key.
    JsonKey = -410,
    /// Expected a JSON object for the stroke.
    JsonStrokeError = -411,
    /// Stroke segment value out of range.
    RangeError = -412,
    /// Stroke segment 1/2 length mismatch.
    S1S2LenError = -413,
    /// Stroke segment 1/3 length mismatch.
    S1S3LenError = -414,
    /// Stroke segment 1/4 length mismatch.
    S1S4LenError = -415,
    /// Could not process field.
    FieldError = -416,
    /// Provided field value is out of range.
    FieldRangeError = -417,
    /// Expected a JSON array field value.
    FieldArrayError = -418,
    /// Expected a JSON field value.
    FieldRequired = -419,
    /// JSON array is too short.
    JsonArrayLen = -420,
    /// JSON field is output-only.
    OutputField = -421,

    // hardware events
    /// Emergency hardware stop.
    EStop = -900,
    /// Command cancelled by serial input.
    SerialCancel = -901,
    /// Travel would be below the minimum.
    TravelMin = -902,
    /// Travel would exceed the maximum.
    TravelMax = -903,
    /// Minimum limit switch tripped.
    LimitMin = -904,
    /// Maximum limit switch tripped.
    LimitMax = -905,
}

impl Status {
    /// Wire code of this status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// True exactly for the BUSY_* phases: the command is not finished and
    /// must be re-driven on the next heartbeat.
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            Status::Busy | Status::BusyMoving | Status::BusyParsed | Status::BusySetup
        )
    }

    /// True for every negative code (errors and hardware events).
    pub fn is_error(self) -> bool {
        self.code() < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_partition() {
        assert!(Status::BusyParsed.is_processing());
        assert!(Status::Busy.is_processing());
        assert!(Status::BusyMoving.is_processing());
        assert!(Status::BusySetup.is_processing());

        assert!(!Status::Ok.is_processing());
        assert!(!Status::WaitIdle.is_processing());
        assert!(!Status::WaitCancelled.is_processing());
        assert!(!Status::JsonParseError.is_processing());
        assert!(!Status::LimitMax.is_processing());
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::BusyParsed.code(), 10);
        assert_eq!(Status::WaitCancelled.code(), 26);
        assert_eq!(Status::Empty.code(), -1);
        assert_eq!(Status::JsonMem.code(), -118);
        assert_eq!(Status::StrokeNullError.code(), -205);
        assert_eq!(Status::UnrecognizedName.code(), -402);
        assert_eq!(Status::JsonTooLong.code(), -404);
        assert_eq!(Status::RangeError.code(), -412);
        assert_eq!(Status::SerialCancel.code(), -901);
        assert_eq!(Status::LimitMax.code(), -905);
    }

    #[test]
    fn test_error_classes() {
        assert!(Status::JsonParseError.is_error());
        assert!(Status::EStop.is_error());
        assert!(Status::Empty.is_error());
        assert!(!Status::Ok.is_error());
        assert!(!Status::WaitEol.is_error());
    }
}
