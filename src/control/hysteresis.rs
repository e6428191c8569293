//! Two-threshold fan control.
//!
//! The fan switches on at `on` and only switches off again once the
//! temperature falls to `off`, so readings between the two thresholds never
//! toggle it. At or above `critical` the fan is always requested on.

use crate::config::Thresholds;

pub fn is_critical(temperature: f64, thresholds: &Thresholds) -> bool {
    temperature >= thresholds.critical
}

/// Desired fan state for a reading, given the current fan state.
pub fn desired_fan_state(temperature: f64, fan_on: bool, thresholds: &Thresholds) -> bool {
    if is_critical(temperature, thresholds) || (temperature >= thresholds.on && !fan_on) {
        true
    } else if temperature <= thresholds.off && fan_on {
        false
    } else {
        fan_on
    }
}
