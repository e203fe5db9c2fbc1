//! Simulation time is kept as an integer count of nanoseconds.

pub type SimTime = u64;

pub const NANOS_PER_MICRO: SimTime = 1_000;
pub const NANOS_PER_MILLI: SimTime = 1_000_000;
pub const NANOS_PER_SEC: SimTime = 1_000_000_000;

/// Convert (non-negative) seconds to simulation time, rounding to the nearest nanosecond.
pub fn from_secs_f64(secs: f64) -> SimTime {
    if secs <= 0.0 || !secs.is_finite() {
        return 0;
    }
    (secs * NANOS_PER_SEC as f64).round() as SimTime
}

pub fn as_secs_f64(time: SimTime) -> f64 {
    time as f64 / NANOS_PER_SEC as f64
}

pub fn micros(us: u64) -> SimTime {
    us * NANOS_PER_MICRO
}
