//! The MAC side of the radio boundary.

use beacon_frame::LoraFrame;
use beaconsim_common::{EntityId, EventClock, EventPayload, RadioTxRequestEvent, SimTime};

use crate::GatewayError;

/// Transmit primitive the arbiter hands frames to.
///
/// Completion and reception are reported back to the owning MAC as events
/// (`RadioTxComplete`, `RadioRxPacket`, `RadioRxFailed`).
pub trait RadioLink {
    fn transmit(&mut self, frame: LoraFrame, clock: &mut dyn EventClock) -> Result<(), GatewayError>;
}

/// Link to a radio entity in the same simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachedRadio {
    radio: EntityId,
}

impl AttachedRadio {
    pub fn new(radio: EntityId) -> Self {
        Self { radio }
    }

    pub fn radio_id(&self) -> EntityId {
        self.radio
    }
}

impl RadioLink for AttachedRadio {
    fn transmit(&mut self, frame: LoraFrame, clock: &mut dyn EventClock) -> Result<(), GatewayError> {
        clock.schedule_after(
            SimTime::ZERO,
            vec![self.radio],
            EventPayload::RadioTxRequest(RadioTxRequestEvent { frame }),
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Link that records what it was asked to transmit.
    #[derive(Debug, Default)]
    pub struct RecordingLink {
        pub sent: Vec<LoraFrame>,
    }

    impl RadioLink for RecordingLink {
        fn transmit(
            &mut self,
            frame: LoraFrame,
            _clock: &mut dyn EventClock,
        ) -> Result<(), GatewayError> {
            self.sent.push(frame);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_frame::{BeaconFrame, DataRate, FrameId, Frequency, NetworkTime};
    use beaconsim_common::SimContext;

    #[test]
    fn test_attached_radio_posts_request() {
        let mut link = AttachedRadio::new(EntityId(7));
        let mut ctx = SimContext::new();
        let beacon = BeaconFrame::new(NetworkTime::ZERO, DataRate::Dr3, Frequency::from_mhz(923.3));
        link.transmit(LoraFrame::beacon(FrameId(1), &beacon), &mut ctx)
            .unwrap();

        let event = ctx.next_event().unwrap();
        assert_eq!(event.targets, vec![EntityId(7)]);
        assert_eq!(event.time, SimTime::ZERO);
        assert!(matches!(event.payload, EventPayload::RadioTxRequest(_)));
    }
}
