//! Half-duplex simulated radio.
//!
//! The radio sits between a MAC and the [`BroadcastMedium`](crate::BroadcastMedium).
//! Event flow:
//!
//! | Incoming | From | Action |
//! |---|---|---|
//! | `RadioTxRequest` | MAC | start transmitting, post `TransmitAir` to the medium |
//! | `Timer` (tx end) | self | go idle, post `RadioTxComplete` to the MAC |
//! | `ReceiveAir` | medium | post `RadioRxPacket` or `RadioRxFailed` to the MAC |

use std::collections::VecDeque;

use beacon_frame::{FrameId, LoraFrame};
use beaconsim_common::{
    Entity, EntityId, Event, EventPayload, RadioRxEvent, RadioTxCompleteEvent, ReceiveAirEvent,
    RxFailure, SimContext, SimError, SimTime, TransmitAirEvent,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{time_on_air, RadioError};

const TX_END_TIMER: u64 = 1;

/// How long past transmissions are remembered for half-duplex checks.
/// Longer than a [`MAX_PAYLOAD_LEN`](beacon_frame::MAX_PAYLOAD_LEN) frame at any rate in the data-rate table.
const TX_HISTORY_RETENTION: SimTime = SimTime::from_secs(10);

/// Radio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Probability that a frame is lost on the link, in `[0, 1]`.
    #[serde(default)]
    pub rx_loss_probability: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            rx_loss_probability: 0.0,
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<(), RadioError> {
        if !(0.0..=1.0).contains(&self.rx_loss_probability) {
            return Err(RadioError::InvalidLossProbability(self.rx_loss_probability));
        }
        Ok(())
    }
}

/// Radio state.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioState {
    Idle,
    Transmitting { frame: LoraFrame, end: SimTime },
}

/// A simulated half-duplex LoRa radio.
pub struct SimulatedRadio {
    id: EntityId,
    name: String,
    mac: EntityId,
    medium: EntityId,
    config: RadioConfig,
    rng: ChaCha8Rng,
    state: RadioState,
    tx_history: VecDeque<(SimTime, SimTime)>,
}

impl SimulatedRadio {
    pub fn new(
        id: EntityId,
        name: impl Into<String>,
        mac: EntityId,
        medium: EntityId,
        config: RadioConfig,
        seed: u64,
    ) -> Result<Self, RadioError> {
        config.validate()?;
        Ok(Self {
            id,
            name: name.into(),
            mac,
            medium,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            state: RadioState::Idle,
            tx_history: VecDeque::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &RadioState {
        &self.state
    }

    pub fn is_transmitting(&self) -> bool {
        matches!(self.state, RadioState::Transmitting { .. })
    }

    fn transmitted_during(&self, start: SimTime, end: SimTime) -> bool {
        self.tx_history.iter().any(|&(s, e)| s < end && start < e)
    }

    fn prune_history(&mut self, now: SimTime) {
        let horizon = now.saturating_sub(TX_HISTORY_RETENTION);
        while let Some(&(_, end)) = self.tx_history.front() {
            if end >= horizon {
                break;
            }
            self.tx_history.pop_front();
        }
    }

    fn start_transmit(&mut self, frame: &LoraFrame, ctx: &mut SimContext) -> Result<(), SimError> {
        if let RadioState::Transmitting { frame: active, .. } = &self.state {
            return Err(RadioError::Busy {
                requested: frame.id,
                active: active.id,
            }
            .into());
        }

        let now = ctx.time();
        let airtime = time_on_air(frame.data_rate, frame.len());
        let end = now + airtime;
        debug!(
            radio = %self.name,
            frame = frame.id.0,
            kind = frame.kind.as_str(),
            frequency = %frame.frequency,
            airtime = %airtime,
            "tx start"
        );

        self.prune_history(now);
        self.tx_history.push_back((now, end));
        self.state = RadioState::Transmitting {
            frame: frame.clone(),
            end,
        };

        ctx.post_immediate(
            vec![self.medium],
            EventPayload::TransmitAir(TransmitAirEvent {
                radio_id: self.id,
                frame: frame.clone(),
                start_time: now,
                end_time: end,
            }),
        );
        ctx.post_event(
            airtime,
            vec![self.id],
            EventPayload::Timer {
                timer_id: TX_END_TIMER,
            },
        );
        Ok(())
    }

    fn finish_transmit(&mut self, ctx: &mut SimContext) {
        let state = std::mem::replace(&mut self.state, RadioState::Idle);
        if let RadioState::Transmitting { frame, .. } = state {
            debug!(radio = %self.name, frame = frame.id.0, "tx complete");
            ctx.post_immediate(
                vec![self.mac],
                EventPayload::RadioTxComplete(RadioTxCompleteEvent { frame }),
            );
        }
    }

    fn receive(&mut self, air: &ReceiveAirEvent, ctx: &mut SimContext) {
        let rx = RadioRxEvent {
            frame: air.frame.clone(),
            source_radio_id: air.source_radio_id,
        };

        let failure = if self.transmitted_during(air.start_time, air.end_time) {
            Some(RxFailure::HalfDuplex)
        } else if self.config.rx_loss_probability > 0.0
            && self.rng.gen::<f64>() < self.config.rx_loss_probability
        {
            Some(RxFailure::Lost)
        } else {
            None
        };

        let payload = match failure {
            Some(reason) => {
                trace!(radio = %self.name, frame = rx.frame.id.0, reason = reason.as_str(), "rx failed");
                EventPayload::RadioRxFailed { event: rx, reason }
            }
            None => {
                trace!(radio = %self.name, frame = rx.frame.id.0, "rx ok");
                EventPayload::RadioRxPacket(rx)
            }
        };
        ctx.post_immediate(vec![self.mac], payload);
    }

    /// Id of the frame currently on the air.
    pub fn active_frame(&self) -> Option<FrameId> {
        match &self.state {
            RadioState::Transmitting { frame, .. } => Some(frame.id),
            RadioState::Idle => None,
        }
    }
}

impl Entity for SimulatedRadio {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::RadioTxRequest(req) => self.start_transmit(&req.frame, ctx),
            EventPayload::Timer {
                timer_id: TX_END_TIMER,
            } => {
                self.finish_transmit(ctx);
                Ok(())
            }
            EventPayload::ReceiveAir(air) => {
                self.receive(air, ctx);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
