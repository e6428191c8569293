//! Fan actuator with a maximum continuous runtime cutoff.

use crate::error::HardwareError;
use crate::hardware::FanOutput;
use crate::state::DeviceState;
use log::{error, info, warn};
use std::time::Duration;
use strum::Display;
use tokio::time::Instant;

/// Who asked for a fan change. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ControlSource {
    Automatic,
    Manual,
    Safety,
}

/// Result of a successful [`FanActuator::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Requested state already active, nothing written.
    Unchanged,
    TurnedOn,
    TurnedOff,
    /// An "on" request was turned into "off" because the fan exceeded its
    /// maximum continuous runtime.
    SafetyCutoff,
}

impl Transition {
    /// New fan state if the output changed.
    pub fn fan_on(&self) -> Option<bool> {
        match self {
            Transition::Unchanged => None,
            Transition::TurnedOn => Some(true),
            Transition::TurnedOff | Transition::SafetyCutoff => Some(false),
        }
    }
}

pub struct FanActuator {
    output: Box<dyn FanOutput>,
    max_runtime: Duration,
}

impl FanActuator {
    pub fn new(output: Box<dyn FanOutput>, max_runtime: Duration) -> Self {
        Self {
            output,
            max_runtime,
        }
    }

    fn runtime_exceeded(&self, state: &DeviceState, now: Instant) -> bool {
        state.fan_on
            && state
                .fan_runtime(now)
                .is_some_and(|runtime| runtime > self.max_runtime)
    }

    /// Drive the fan towards `desired`.
    ///
    /// The logical state in `state` only changes once the pin write has
    /// succeeded; a failed write leaves it untouched and returns the error.
    pub fn apply(
        &mut self,
        state: &mut DeviceState,
        desired: bool,
        source: ControlSource,
    ) -> Result<Transition, HardwareError> {
        let now = Instant::now();
        let mut target = desired;
        let mut cutoff = false;

        if desired && self.runtime_exceeded(state, now) {
            warn!(
                "Fan maximum runtime of {}s exceeded, forcing off",
                self.max_runtime.as_secs()
            );
            target = false;
            cutoff = true;
        }

        if target == state.fan_on {
            return Ok(Transition::Unchanged);
        }

        if let Err(e) = self.output.write(target) {
            error!(
                "Error controlling fan (turning {}): {}",
                if target { "ON" } else { "OFF" },
                e
            );
            return Err(e);
        }

        state.fan_on = target;
        state.fan_start_time = target.then_some(now);

        let source = if cutoff { ControlSource::Safety } else { source };
        info!("Fan turned {} ({})", if target { "ON" } else { "OFF" }, source);

        Ok(if cutoff {
            Transition::SafetyCutoff
        } else if target {
            Transition::TurnedOn
        } else {
            Transition::TurnedOff
        })
    }

    /// Cut a fan that has been running past its limit, whatever the mode.
    pub fn enforce_max_runtime(
        &mut self,
        state: &mut DeviceState,
    ) -> Result<Transition, HardwareError> {
        if self.runtime_exceeded(state, Instant::now()) {
            self.apply(state, true, ControlSource::Safety)
        } else {
            Ok(Transition::Unchanged)
        }
    }

    /// Write the "off" level regardless of the tracked state. Used on shutdown.
    pub fn force_off(&mut self, state: &mut DeviceState) -> Result<(), HardwareError> {
        self.output.write(false)?;
        state.fan_on = false;
        state.fan_start_time = None;
        Ok(())
    }

    pub fn release(&mut self) {
        self.output.release();
    }
}
