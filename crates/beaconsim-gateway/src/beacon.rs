//! Periodic beacon transmission.
//!
//! Ticks fall on the nominal grid `first_beacon_at + k·interval`. The next
//! tick is scheduled before the current beacon is attempted, so the grid
//! does not depend on whether the beacon was sent or how long it took.
//!
//! A beacon is only handed to the arbiter when the beacon frequency is free
//! right now. Otherwise it is dropped, logged and counted; the next beacon
//! goes out on the next tick.

use beacon_frame::{BeaconError, BeaconFrame, DataRate, FrameId, Frequency, LoraFrame, NetworkTime};
use beaconsim_common::{EntityId, EventClock, EventId, EventPayload, SimTime};
use tracing::{debug, info, warn};

use crate::{GatewayError, RadioLink, TransmitArbiter};

/// LoRaWAN Class B beacon period.
pub const BEACON_INTERVAL: SimTime = SimTime::from_secs(128);

/// Beacon channel and timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconConfig {
    pub interval: SimTime,
    pub data_rate: DataRate,
    pub frequency: Frequency,
    /// Virtual time of the first tick.
    pub first_beacon_at: SimTime,
    /// Network time at virtual time zero.
    pub initial_network_time: NetworkTime,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            interval: BEACON_INTERVAL,
            data_rate: DataRate::Dr3,
            frequency: Frequency::from_hz(923_300_000),
            first_beacon_at: SimTime::ZERO,
            initial_network_time: NetworkTime::ZERO,
        }
    }
}

/// Why a beacon tick produced no transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The radio or the beacon frequency was not free.
    RadioBusy { wait: SimTime },
    /// The on-wire time would not be greater than the last one sent.
    NotMonotonic,
}

impl SkipReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SkipReason::RadioBusy { .. } => "radio_busy",
            SkipReason::NotMonotonic => "not_monotonic",
        }
    }
}

/// Result of one beacon tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconTick {
    /// Index of the tick on the nominal grid.
    pub period: u64,
    /// Nominal time of this tick.
    pub tick_time: SimTime,
    pub beacon: BeaconFrame,
    /// `None` when the beacon was sent.
    pub skipped: Option<SkipReason>,
}

impl BeaconTick {
    pub fn was_sent(&self) -> bool {
        self.skipped.is_none()
    }
}

/// Drives the beacon cycle of one gateway.
#[derive(Debug)]
pub struct BeaconScheduler {
    config: BeaconConfig,
    owner: EntityId,
    pending: Option<EventId>,
    period: u64,
    last_sent_ms: Option<u64>,
    sent: u64,
    skipped: u64,
}

impl BeaconScheduler {
    /// Scheduler whose tick events are delivered to `owner`.
    ///
    /// Fails on a zero interval.
    pub fn new(config: BeaconConfig, owner: EntityId) -> Result<Self, GatewayError> {
        if config.interval.is_zero() {
            return Err(GatewayError::InvalidBeaconInterval(config.interval));
        }
        Ok(Self {
            config,
            owner,
            pending: None,
            period: 0,
            last_sent_ms: None,
            sent: 0,
            skipped: 0,
        })
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn beacons_sent(&self) -> u64 {
        self.sent
    }

    pub fn beacons_skipped(&self) -> u64 {
        self.skipped
    }

    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    /// Nominal time of tick `period`.
    pub fn tick_time(&self, period: u64) -> SimTime {
        SimTime::from_micros(
            self.config
                .first_beacon_at
                .as_micros()
                .saturating_add(period.saturating_mul(self.config.interval.as_micros())),
        )
    }

    /// Network time at virtual time `now`.
    pub fn network_time(&self, now: SimTime) -> Result<NetworkTime, BeaconError> {
        self.config
            .initial_network_time
            .checked_add_micros(now.as_micros())
            .ok_or_else(|| BeaconError::range(format!("network time overflows at {now}")))
    }

    /// Schedule the first tick. Restarting resumes the grid at the next
    /// nominal tick after now.
    pub fn start(&mut self, clock: &mut dyn EventClock) {
        self.stop(clock);
        let now = clock.now();
        let first = self.config.first_beacon_at;
        if now > first {
            let elapsed = (now - first).as_micros();
            let interval = self.config.interval.as_micros();
            self.period = elapsed.div_ceil(interval);
        }
        self.schedule(clock);
        info!(
            interval = %self.config.interval,
            frequency = %self.config.frequency,
            data_rate = %self.config.data_rate,
            first = %self.tick_time(self.period),
            "beacon scheduler started"
        );
    }

    /// Cancel the pending tick, if any.
    pub fn stop(&mut self, clock: &mut dyn EventClock) {
        if let Some(id) = self.pending.take() {
            clock.cancel(id);
        }
    }

    fn schedule(&mut self, clock: &mut dyn EventClock) {
        let delay = self.tick_time(self.period).saturating_sub(clock.now());
        self.pending = Some(clock.schedule_after(delay, vec![self.owner], EventPayload::BeaconTick));
    }

    /// Handle a tick: schedule the next one, then try to send the beacon.
    pub fn on_tick<L: RadioLink>(
        &mut self,
        arbiter: &mut TransmitArbiter<L>,
        clock: &mut dyn EventClock,
        frame_id: FrameId,
    ) -> Result<BeaconTick, GatewayError> {
        let now = clock.now();
        let period = self.period;
        let tick_time = self.tick_time(period);
        self.period += 1;
        self.schedule(clock);

        let beacon = BeaconFrame::new(
            self.network_time(now)?,
            self.config.data_rate,
            self.config.frequency,
        );
        let on_wire_ms = beacon.network_time().as_millis();

        let skipped = if self.last_sent_ms.is_some_and(|last| on_wire_ms <= last) {
            Some(SkipReason::NotMonotonic)
        } else {
            let wait = arbiter.waiting_time(self.config.frequency, now);
            if wait.is_zero() {
                None
            } else {
                Some(SkipReason::RadioBusy { wait })
            }
        };

        match skipped {
            None => {
                arbiter.send(LoraFrame::beacon(frame_id, &beacon), clock)?;
                self.last_sent_ms = Some(on_wire_ms);
                self.sent += 1;
                debug!(period, %beacon, "beacon sent");
            }
            Some(reason) => {
                self.skipped += 1;
                warn!(period, %beacon, reason = reason.as_str(), "beacon dropped");
            }
        }

        Ok(BeaconTick {
            period,
            tick_time,
            beacon,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::testing::RecordingLink;
    use beaconsim_common::SimContext;

    const GW: EntityId = EntityId(1);

    fn setup(config: BeaconConfig) -> (BeaconScheduler, TransmitArbiter<RecordingLink>, SimContext) {
        let arbiter = TransmitArbiter::new("gw0", RecordingLink::default(), None).unwrap();
        (BeaconScheduler::new(config, GW).unwrap(), arbiter, SimContext::new())
    }

    /// Run `count` ticks, completing every transmission immediately.
    fn run_ticks(
        sched: &mut BeaconScheduler,
        arb: &mut TransmitArbiter<RecordingLink>,
        ctx: &mut SimContext,
        count: usize,
    ) -> Vec<(SimTime, BeaconTick)> {
        let mut ticks = Vec::new();
        while ticks.len() < count {
            let event = ctx.next_event().unwrap();
            assert!(matches!(event.payload, EventPayload::BeaconTick));
            let id = FrameId(ticks.len() as u64);
            let tick = sched.on_tick(arb, ctx, id).unwrap();
            if tick.was_sent() {
                arb.tx_finished(id, ctx.now());
            }
            ticks.push((event.time, tick));
        }
        ticks
    }

    #[test]
    fn test_ticks_at_zero_and_interval() {
        let (mut sched, mut arb, mut ctx) = setup(BeaconConfig::default());
        sched.start(&mut ctx);
        let ticks = run_ticks(&mut sched, &mut arb, &mut ctx, 2);
        assert_eq!(ticks[0].0, SimTime::ZERO);
        assert_eq!(ticks[1].0, SimTime::from_secs(128));
        assert_eq!(sched.beacons_sent(), 2);
    }

    #[test]
    fn test_periodicity_independent_of_outcome() {
        let (mut sched, mut arb, mut ctx) = setup(BeaconConfig::default());
        sched.start(&mut ctx);

        let mut fired = Vec::new();
        for k in 0..6u64 {
            let event = ctx.next_event().unwrap();
            fired.push(event.time);
            let tick = sched.on_tick(&mut arb, &mut ctx, FrameId(k)).unwrap();
            // Completion is never reported for tick 1, so the radio stays
            // busy for every later tick.
            if tick.was_sent() && k != 1 {
                arb.tx_finished(FrameId(k), ctx.now());
            }
        }
        for pair in fired.windows(2) {
            assert_eq!(pair[1] - pair[0], BEACON_INTERVAL);
        }
        assert_eq!(sched.beacons_sent(), 2);
        assert_eq!(sched.beacons_skipped(), 4);
    }

    #[test]
    fn test_busy_radio_drops_beacon() {
        let (mut sched, mut arb, mut ctx) = setup(BeaconConfig::default());
        sched.start(&mut ctx);

        ctx.next_event().unwrap();
        let first = sched.on_tick(&mut arb, &mut ctx, FrameId(1)).unwrap();
        assert!(first.was_sent());
        // Completion never reported.

        ctx.next_event().unwrap();
        let second = sched.on_tick(&mut arb, &mut ctx, FrameId(2)).unwrap();
        assert!(matches!(second.skipped, Some(SkipReason::RadioBusy { .. })));
        assert_eq!(sched.beacons_skipped(), 1);
        assert_eq!(arb.link().sent.len(), 1);
        // The next tick is still pending on the grid.
        assert_eq!(ctx.peek_time(), Some(SimTime::from_secs(256)));
    }

    #[test]
    fn test_network_time_tracks_clock() {
        let config = BeaconConfig {
            initial_network_time: NetworkTime::from_secs(1_000_000).unwrap(),
            first_beacon_at: SimTime::from_secs(5),
            ..Default::default()
        };
        let (mut sched, mut arb, mut ctx) = setup(config);
        sched.start(&mut ctx);
        let ticks = run_ticks(&mut sched, &mut arb, &mut ctx, 2);
        assert_eq!(ticks[0].1.beacon.network_time().as_secs(), 1_000_005);
        assert_eq!(ticks[1].1.beacon.network_time().as_secs(), 1_000_133);
        assert_eq!(ticks[1].1.tick_time, SimTime::from_secs(133));
    }

    #[test]
    fn test_on_wire_times_strictly_increase() {
        let (mut sched, mut arb, mut ctx) = setup(BeaconConfig::default());
        sched.start(&mut ctx);
        let ticks = run_ticks(&mut sched, &mut arb, &mut ctx, 4);
        let wire: Vec<u64> = ticks
            .iter()
            .filter(|(_, t)| t.was_sent())
            .map(|(_, t)| t.beacon.network_time().as_millis())
            .collect();
        assert!(wire.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_stop_cancels_pending_tick() {
        let (mut sched, _arb, mut ctx) = setup(BeaconConfig::default());
        sched.start(&mut ctx);
        assert!(sched.is_running());
        sched.stop(&mut ctx);
        assert!(!sched.is_running());
        assert!(ctx.next_event().is_none());
    }

    #[test]
    fn test_restart_resumes_on_grid() {
        let (mut sched, _arb, mut ctx) = setup(BeaconConfig::default());
        ctx.post_event(SimTime::from_secs(200), vec![GW], EventPayload::Timer { timer_id: 0 });
        ctx.next_event().unwrap();
        sched.start(&mut ctx);
        assert_eq!(ctx.peek_time(), Some(SimTime::from_secs(256)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = BeaconConfig {
            interval: SimTime::ZERO,
            ..Default::default()
        };
        assert_eq!(
            BeaconScheduler::new(config, GW).unwrap_err(),
            GatewayError::InvalidBeaconInterval(SimTime::ZERO)
        );
        assert!(BeaconScheduler::new(BeaconConfig::default(), GW).is_ok());
    }
}
