//! Firmware version constants reported by `sys.v`.

/// Major version.
pub const VERSION_MAJOR: i32 = 0;
/// Minor version.
pub const VERSION_MINOR: i32 = 1;
/// Patch version.
pub const VERSION_PATCH: i32 = 0;

/// Version encoded for the wire: `major*100 + minor + patch/100`.
pub fn wire_version() -> f64 {
    f64::from(VERSION_MAJOR) * 100.0 + f64::from(VERSION_MINOR) + f64::from(VERSION_PATCH) / 100.0
}
