//! Shared-medium PHY model: log-distance path loss, constant-speed
//! propagation, SNR-driven rate selection and frame airtime.

use wifi_sweep_abstract::time::{self, NANOS_PER_SEC};
use wifi_sweep_abstract::{SimTime, Vector3, WifiStandard};

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
pub const REFERENCE_DISTANCE_M: f64 = 1.0;
/// Free-space loss at the reference distance for 5.15 GHz.
pub const REFERENCE_LOSS_DB: f64 = 46.6777;
pub const PATH_LOSS_EXPONENT: f64 = 3.0;

/// MAC header, FCS and LLC/IP/UDP encapsulation added to every payload.
pub const FRAME_OVERHEAD_BYTES: u32 = 64;

pub const SLOT: SimTime = 9_000;
pub const SIFS: SimTime = 16_000;
pub const DIFS: SimTime = SIFS + 2 * SLOT;
pub const ACK_DURATION: SimTime = 44_000;
pub const CW_MIN: u32 = 15;

/// Minimum SNR in dB for each MCS index.
const MCS_MIN_SNR_DB: [f64; 14] = [
    2.0, 5.0, 9.0, 11.0, 15.0, 18.0, 20.0, 25.0, 29.0, 31.0, 34.0, 37.0, 40.0, 43.0,
];

pub fn path_loss_db(distance_m: f64) -> f64 {
    if distance_m <= REFERENCE_DISTANCE_M {
        return REFERENCE_LOSS_DB;
    }
    REFERENCE_LOSS_DB + 10.0 * PATH_LOSS_EXPONENT * (distance_m / REFERENCE_DISTANCE_M).log10()
}

pub fn rx_power_dbm(tx_power_dbm: f64, from: &Vector3, to: &Vector3) -> f64 {
    tx_power_dbm - path_loss_db(from.distance_to(to))
}

pub fn propagation_delay(from: &Vector3, to: &Vector3) -> SimTime {
    time::from_secs_f64(from.distance_to(to) / SPEED_OF_LIGHT)
}

/// Highest rate whose SNR requirement is met, or `None` when even MCS 0 cannot be decoded.
pub fn select_rate_mbps(standard: WifiStandard, snr_db: f64) -> Option<f64> {
    standard
        .mcs_rates_mbps()
        .iter()
        .zip(MCS_MIN_SNR_DB.iter())
        .take_while(|(_, min_snr)| snr_db >= **min_snr)
        .map(|(rate, _)| *rate)
        .last()
}

/// Time the medium is held for one data frame and its acknowledgement, excluding backoff.
pub fn airtime(standard: WifiStandard, payload_bytes: u32, rate_mbps: f64) -> SimTime {
    let bits = (payload_bytes + FRAME_OVERHEAD_BYTES) as f64 * 8.0;
    let payload_ns = (bits / (rate_mbps * 1e6) * NANOS_PER_SEC as f64).ceil() as SimTime;
    DIFS + standard.preamble() + payload_ns + SIFS + ACK_DURATION
}
