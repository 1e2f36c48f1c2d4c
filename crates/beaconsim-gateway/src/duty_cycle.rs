//! Per-frequency duty-cycle accounting.
//!
//! After a transmission of airtime `T` on a frequency limited to duty cycle
//! `d`, that frequency stays blocked until `end + T·(1/d − 1)`, so that over
//! any busy/blocked cycle the on-air fraction is exactly `d`.

use std::collections::HashMap;

use beacon_frame::Frequency;
use beaconsim_common::SimTime;

use crate::GatewayError;

fn check(duty_cycle: f64) -> Result<f64, GatewayError> {
    if duty_cycle > 0.0 && duty_cycle <= 1.0 {
        Ok(duty_cycle)
    } else {
        Err(GatewayError::InvalidDutyCycle(duty_cycle))
    }
}

/// Tracks when each frequency next becomes available.
#[derive(Debug, Clone, Default)]
pub struct DutyCycleLedger {
    default_limit: Option<f64>,
    limits: HashMap<Frequency, f64>,
    blocked_until: HashMap<Frequency, SimTime>,
}

impl DutyCycleLedger {
    /// Ledger applying `default_limit` to every frequency; `None` disables
    /// accounting for frequencies without an explicit limit.
    pub fn new(default_limit: Option<f64>) -> Result<Self, GatewayError> {
        if let Some(d) = default_limit {
            check(d)?;
        }
        Ok(Self {
            default_limit,
            ..Default::default()
        })
    }

    /// Set the limit for one frequency.
    pub fn set_limit(&mut self, frequency: Frequency, duty_cycle: f64) -> Result<(), GatewayError> {
        self.limits.insert(frequency, check(duty_cycle)?);
        Ok(())
    }

    pub fn limit(&self, frequency: Frequency) -> Option<f64> {
        self.limits.get(&frequency).copied().or(self.default_limit)
    }

    /// Charge a transmission that starts at `start` and lasts `airtime`.
    pub fn charge(&mut self, frequency: Frequency, start: SimTime, airtime: SimTime) {
        let Some(d) = self.limit(frequency) else {
            return;
        };
        let off_time = SimTime::from_secs_f64(airtime.as_secs_f64() * (1.0 / d - 1.0));
        let until = start + airtime + off_time;
        let entry = self.blocked_until.entry(frequency).or_insert(SimTime::ZERO);
        *entry = (*entry).max(until);
    }

    /// Earliest time `frequency` may be used again.
    pub fn available_at(&self, frequency: Frequency) -> SimTime {
        self.blocked_until
            .get(&frequency)
            .copied()
            .unwrap_or(SimTime::ZERO)
    }
}
