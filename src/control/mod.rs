//! Fan control: the hysteresis decision and the actuator that applies it.

pub mod fan;
pub mod hysteresis;

pub use fan::{ControlSource, FanActuator, Transition};
pub use hysteresis::{desired_fan_state, is_critical};
