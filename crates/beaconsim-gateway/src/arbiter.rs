//! Transmit arbitration for a half-duplex radio.
//!
//! The [`TransmitArbiter`] is the single point of truth for whether the
//! radio is busy. It has two states:
//!
//! ```text
//!   Idle --send--> Transmitting(window) --tx_finished--> Idle
//! ```
//!
//! Every path that transmits (beacons, ping-slot downlinks, uplinks) gates
//! on [`TransmitArbiter::waiting_time`] returning zero before calling
//! [`TransmitArbiter::send`]. A `send` while a window is open is rejected
//! with [`GatewayError::ContractViolation`] and leaves the window untouched.

use beacon_frame::{FrameId, Frequency, LoraFrame};
use beaconsim_common::{EventClock, RadioRxEvent, RxFailure, SimTime};
use beaconsim_lora::time_on_air;
use tracing::{debug, error, trace, warn};

use crate::{DutyCycleLedger, GatewayError, RadioLink};

/// Interval during which the radio is reserved for one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitWindow {
    pub start: SimTime,
    pub end: SimTime,
    pub frequency: Frequency,
    pub frame: FrameId,
}

impl TransmitWindow {
    pub fn airtime(&self) -> SimTime {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    Idle,
    Transmitting(TransmitWindow),
}

/// Owns the radio's transmit state and its duty-cycle ledger.
pub struct TransmitArbiter<L> {
    node: String,
    link: L,
    state: ArbiterState,
    duty_cycle: DutyCycleLedger,
}

impl<L: RadioLink> TransmitArbiter<L> {
    /// Create an idle arbiter. `duty_cycle` applies to every frequency;
    /// `None` disables duty-cycle accounting.
    pub fn new(node: impl Into<String>, link: L, duty_cycle: Option<f64>) -> Result<Self, GatewayError> {
        Ok(Self {
            node: node.into(),
            link,
            state: ArbiterState::Idle,
            duty_cycle: DutyCycleLedger::new(duty_cycle)?,
        })
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    pub fn is_transmitting(&self) -> bool {
        matches!(self.state, ArbiterState::Transmitting(_))
    }

    pub fn active_window(&self) -> Option<&TransmitWindow> {
        match &self.state {
            ArbiterState::Transmitting(window) => Some(window),
            ArbiterState::Idle => None,
        }
    }

    pub fn duty_cycle(&self) -> &DutyCycleLedger {
        &self.duty_cycle
    }

    pub fn duty_cycle_mut(&mut self) -> &mut DutyCycleLedger {
        &mut self.duty_cycle
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Delay from `now` until a frame may be sent on `frequency`.
    ///
    /// Zero means "send now". While a window is open the result is never
    /// zero, even once its end time has been reached but completion has not
    /// yet been reported.
    pub fn waiting_time(&self, frequency: Frequency, now: SimTime) -> SimTime {
        let radio_free = match &self.state {
            ArbiterState::Transmitting(window) => {
                window.end.max(now + SimTime::from_micros(1))
            }
            ArbiterState::Idle => now,
        };
        let free_at = radio_free.max(self.duty_cycle.available_at(frequency));
        free_at.saturating_sub(now)
    }

    /// Open a transmit window for `frame` and hand it to the radio.
    pub fn send(
        &mut self,
        frame: LoraFrame,
        clock: &mut dyn EventClock,
    ) -> Result<TransmitWindow, GatewayError> {
        if let ArbiterState::Transmitting(active) = &self.state {
            error!(
                node = %self.node,
                frame = frame.id.0,
                active = active.frame.0,
                "send while transmitting"
            );
            return Err(GatewayError::ContractViolation(format!(
                "{}: send of frame {} while frame {} is on the air until {}",
                self.node, frame.id.0, active.frame.0, active.end
            )));
        }

        let now = clock.now();
        let airtime = time_on_air(frame.data_rate, frame.len());
        let window = TransmitWindow {
            start: now,
            end: now + airtime,
            frequency: frame.frequency,
            frame: frame.id,
        };
        debug!(
            node = %self.node,
            frame = frame.id.0,
            kind = frame.kind.as_str(),
            frequency = %frame.frequency,
            end = %window.end,
            "window open"
        );

        self.link.transmit(frame, clock)?;
        self.duty_cycle.charge(window.frequency, now, airtime);
        self.state = ArbiterState::Transmitting(window);
        Ok(window)
    }

    /// Close the active window when the radio reports completion of `frame`.
    ///
    /// A report when idle, or for a frame other than the one on the air, is
    /// logged and ignored.
    pub fn tx_finished(&mut self, frame: FrameId, now: SimTime) -> Option<TransmitWindow> {
        match self.state {
            ArbiterState::Transmitting(window) if window.frame == frame => {
                self.state = ArbiterState::Idle;
                debug!(node = %self.node, frame = frame.0, at = %now, "window closed");
                Some(window)
            }
            ArbiterState::Transmitting(window) => {
                warn!(
                    node = %self.node,
                    frame = frame.0,
                    active = window.frame.0,
                    "tx_finished for a frame that is not on the air"
                );
                None
            }
            ArbiterState::Idle => {
                warn!(node = %self.node, frame = frame.0, "tx_finished while idle");
                None
            }
        }
    }

    /// Reception hook. Does not affect transmit state.
    pub fn receive(&self, rx: &RadioRxEvent) {
        trace!(node = %self.node, frame = rx.frame.id.0, kind = rx.frame.kind.as_str(), "receive");
    }

    /// Failed-reception hook. Does not affect transmit state.
    pub fn failed_reception(&self, rx: &RadioRxEvent, reason: RxFailure) {
        trace!(node = %self.node, frame = rx.frame.id.0, reason = reason.as_str(), "failed reception");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::testing::RecordingLink;
    use beacon_frame::{BeaconFrame, DataRate, DevAddr, NetworkTime};
    use beaconsim_common::SimContext;

    fn arbiter(duty_cycle: Option<f64>) -> TransmitArbiter<RecordingLink> {
        TransmitArbiter::new("gw0", RecordingLink::default(), duty_cycle).unwrap()
    }

    fn beacon_freq() -> Frequency {
        Frequency::from_mhz(923.3)
    }

    fn frame(id: u64) -> LoraFrame {
        let beacon = BeaconFrame::new(NetworkTime::ZERO, DataRate::Dr3, beacon_freq());
        LoraFrame::beacon(FrameId(id), &beacon)
    }

    #[test]
    fn test_send_then_finish_then_send_again() {
        let mut arb = arbiter(None);
        let mut ctx = SimContext::new();
        assert!(!arb.is_transmitting());

        arb.send(frame(1), &mut ctx).unwrap();
        assert!(arb.is_transmitting());

        assert!(arb.tx_finished(FrameId(1), ctx.now()).is_some());
        assert!(!arb.is_transmitting());

        arb.send(frame(2), &mut ctx).unwrap();
        assert!(arb.is_transmitting());
        assert_eq!(arb.link().sent.len(), 2);
    }

    #[test]
    fn test_send_while_transmitting_is_rejected() {
        let mut arb = arbiter(None);
        let mut ctx = SimContext::new();
        let window = arb.send(frame(1), &mut ctx).unwrap();

        let err = arb.send(frame(2), &mut ctx).unwrap_err();
        assert!(matches!(err, GatewayError::ContractViolation(_)));
        assert_eq!(arb.active_window(), Some(&window));
        assert_eq!(arb.link().sent.len(), 1);
    }

    #[test]
    fn test_stray_tx_finished_is_ignored() {
        let mut arb = arbiter(None);
        let mut ctx = SimContext::new();
        assert!(arb.tx_finished(FrameId(9), SimTime::ZERO).is_none());

        arb.send(frame(1), &mut ctx).unwrap();
        assert!(arb.tx_finished(FrameId(9), SimTime::ZERO).is_none());
        assert!(arb.is_transmitting());
    }

    #[test]
    fn test_waiting_time_reference_policy() {
        let mut arb = arbiter(None);
        let mut ctx = SimContext::new();
        assert_eq!(arb.waiting_time(beacon_freq(), SimTime::ZERO), SimTime::ZERO);

        let window = arb.send(frame(1), &mut ctx).unwrap();
        assert_eq!(window.airtime(), SimTime::from_micros(36_096));
        // Any frequency waits for the single radio.
        let other = Frequency::from_mhz(927.5);
        assert_eq!(arb.waiting_time(other, SimTime::ZERO), window.end);
        assert_eq!(
            arb.waiting_time(beacon_freq(), SimTime::from_micros(10_000)),
            SimTime::from_micros(26_096)
        );
        // Completion not yet reported at the window end.
        assert_eq!(arb.waiting_time(beacon_freq(), window.end), SimTime::from_micros(1));

        arb.tx_finished(FrameId(1), window.end);
        assert_eq!(arb.waiting_time(other, window.end), SimTime::ZERO);
    }

    #[test]
    fn test_waiting_time_with_duty_cycle() {
        let mut arb = arbiter(Some(0.1));
        let mut ctx = SimContext::new();
        let window = arb.send(frame(1), &mut ctx).unwrap();
        arb.tx_finished(FrameId(1), window.end);

        // Blocked for 9x the airtime after the window on the same frequency.
        let blocked = arb.waiting_time(beacon_freq(), window.end);
        assert_eq!(blocked, SimTime::from_micros(36_096 * 9));
        // Other frequencies are free.
        assert_eq!(
            arb.waiting_time(Frequency::from_mhz(923.9), window.end),
            SimTime::ZERO
        );
    }

    #[test]
    fn test_half_duplex_over_sequence() {
        let mut arb = arbiter(None);
        let mut ctx = SimContext::new();
        for id in 0..5 {
            assert!(!arb.is_transmitting());
            let f = LoraFrame::downlink(
                FrameId(id),
                DevAddr::new(1),
                vec![0; id as usize],
                DataRate::Dr10,
                beacon_freq(),
            );
            arb.send(f, &mut ctx).unwrap();
            assert!(arb.is_transmitting());
            arb.tx_finished(FrameId(id), ctx.now());
        }
        assert!(!arb.is_transmitting());
    }
}
