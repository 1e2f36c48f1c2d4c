//! Broadcast medium connecting simulated radios.

use beaconsim_common::{Entity, EntityId, Event, EventPayload, ReceiveAirEvent, SimContext, SimError};
use tracing::trace;

/// Delivers every transmission to every other attached radio at the end of
/// its air interval.
#[derive(Debug)]
pub struct BroadcastMedium {
    id: EntityId,
    radios: Vec<EntityId>,
}

impl BroadcastMedium {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            radios: Vec::new(),
        }
    }

    /// Attach a radio. Attaching twice has no effect.
    pub fn attach(&mut self, radio: EntityId) {
        if !self.radios.contains(&radio) {
            self.radios.push(radio);
        }
    }

    pub fn radios(&self) -> &[EntityId] {
        &self.radios
    }
}

impl Entity for BroadcastMedium {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        let EventPayload::TransmitAir(tx) = &event.payload else {
            return Ok(());
        };

        let receivers: Vec<EntityId> = self
            .radios
            .iter()
            .copied()
            .filter(|&r| r != tx.radio_id)
            .collect();
        if receivers.is_empty() {
            return Ok(());
        }

        trace!(
            from = %tx.radio_id,
            frame = tx.frame.id.0,
            receivers = receivers.len(),
            "broadcast"
        );
        ctx.post_at(
            tx.end_time,
            receivers,
            EventPayload::ReceiveAir(ReceiveAirEvent {
                source_radio_id: tx.radio_id,
                frame: tx.frame.clone(),
                start_time: tx.start_time,
                end_time: tx.end_time,
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_frame::{BeaconFrame, DataRate, FrameId, Frequency, LoraFrame, NetworkTime};
    use beaconsim_common::{SimTime, TransmitAirEvent};

    #[test]
    fn test_broadcast_skips_sender() {
        let mut medium = BroadcastMedium::new(EntityId(100));
        medium.attach(EntityId(1));
        medium.attach(EntityId(2));
        medium.attach(EntityId(3));
        medium.attach(EntityId(2));
        assert_eq!(medium.radios().len(), 3);

        let beacon = BeaconFrame::new(NetworkTime::ZERO, DataRate::Dr8, Frequency::from_mhz(923.3));
        let mut ctx = SimContext::new();
        ctx.post_immediate(
            vec![EntityId(100)],
            EventPayload::TransmitAir(TransmitAirEvent {
                radio_id: EntityId(2),
                frame: LoraFrame::beacon(FrameId(1), &beacon),
                start_time: SimTime::ZERO,
                end_time: SimTime::from_millis(250),
            }),
        );
        let event = ctx.next_event().unwrap();
        medium.handle_event(&event, &mut ctx).unwrap();

        let delivered = ctx.next_event().unwrap();
        assert_eq!(delivered.time, SimTime::from_millis(250));
        assert_eq!(delivered.targets, vec![EntityId(1), EntityId(3)]);
        assert!(matches!(delivered.payload, EventPayload::ReceiveAir(_)));
    }
}
