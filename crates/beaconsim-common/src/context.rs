//! Execution context handed to entities while they handle an event.

use crate::{EntityId, Event, EventId, EventPayload, EventQueue, SimTime};
use tracing::trace;

/// Scheduling boundary used by MAC components.
///
/// Implemented by [`SimContext`]; components take `&mut impl EventClock`
/// so they can be driven by a test clock as well.
pub trait EventClock {
    /// Current virtual time.
    fn now(&self) -> SimTime;

    /// Schedule `payload` for `targets`, `delay` after now.
    fn schedule_after(
        &mut self,
        delay: SimTime,
        targets: Vec<EntityId>,
        payload: EventPayload,
    ) -> EventId;

    /// Withdraw a scheduled event. A no-op returning `false` if it already fired.
    fn cancel(&mut self, id: EventId) -> bool;
}

/// The simulation context: virtual clock plus the future event list.
#[derive(Debug, Default)]
pub struct SimContext {
    time: SimTime,
    source: EntityId,
    queue: EventQueue,
}

impl SimContext {
    /// Create a context at time zero with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Entity currently handling an event; recorded as the source of
    /// any event it schedules.
    pub fn source(&self) -> EntityId {
        self.source
    }

    /// Set the entity on whose behalf events are scheduled.
    pub fn set_source(&mut self, source: EntityId) {
        self.source = source;
    }

    /// Schedule an event `delay` after the current time.
    pub fn post_event(
        &mut self,
        delay: SimTime,
        targets: Vec<EntityId>,
        payload: EventPayload,
    ) -> EventId {
        self.post_at(self.time + delay, targets, payload)
    }

    /// Schedule an event at the current time, after everything already
    /// scheduled for this instant.
    pub fn post_immediate(&mut self, targets: Vec<EntityId>, payload: EventPayload) -> EventId {
        self.post_at(self.time, targets, payload)
    }

    /// Schedule an event at an absolute time.
    ///
    /// Times in the past are clamped to now so virtual time never goes backwards.
    pub fn post_at(
        &mut self,
        time: SimTime,
        targets: Vec<EntityId>,
        payload: EventPayload,
    ) -> EventId {
        let time = time.max(self.time);
        trace!(
            source = %self.source,
            at = %time,
            payload = payload.name(),
            "schedule event"
        );
        self.queue.push(time, self.source, targets, payload)
    }

    /// Withdraw a scheduled event.
    pub fn cancel_event(&mut self, id: EventId) -> bool {
        self.queue.cancel(id)
    }

    /// Whether an event is still pending.
    pub fn is_pending(&self, id: EventId) -> bool {
        self.queue.is_pending(id)
    }

    /// Pop the next event and advance the clock to its time.
    pub fn next_event(&mut self) -> Option<Event> {
        let event = self.queue.pop()?;
        self.time = event.time;
        Some(event)
    }

    /// Time of the next pending event.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.queue.peek_time()
    }

    /// Number of pending events.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}

impl EventClock for SimContext {
    fn now(&self) -> SimTime {
        self.time
    }

    fn schedule_after(
        &mut self,
        delay: SimTime,
        targets: Vec<EntityId>,
        payload: EventPayload,
    ) -> EventId {
        self.post_event(delay, targets, payload)
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.cancel_event(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_with_events() {
        let mut ctx = SimContext::new();
        let me = EntityId::new(7);
        ctx.set_source(me);
        ctx.schedule_after(SimTime::from_secs(128), vec![me], EventPayload::BeaconTick);
        ctx.post_immediate(vec![me], EventPayload::StatsTick);

        let first = ctx.next_event().unwrap();
        assert!(matches!(first.payload, EventPayload::StatsTick));
        assert_eq!(first.source, me);
        assert_eq!(ctx.now(), SimTime::ZERO);

        let second = ctx.next_event().unwrap();
        assert!(matches!(second.payload, EventPayload::BeaconTick));
        assert_eq!(ctx.now(), SimTime::from_secs(128));
        assert!(ctx.next_event().is_none());
    }

    #[test]
    fn test_cancel_through_clock() {
        let mut ctx = SimContext::new();
        let id = ctx.schedule_after(SimTime::from_secs(1), vec![], EventPayload::BeaconTick);
        assert!(ctx.is_pending(id));
        assert!(EventClock::cancel(&mut ctx, id));
        assert!(!EventClock::cancel(&mut ctx, id));
        assert_eq!(ctx.pending_events(), 0);
    }

    #[test]
    fn test_past_times_are_clamped() {
        let mut ctx = SimContext::new();
        ctx.post_at(SimTime::from_secs(10), vec![], EventPayload::StatsTick);
        ctx.next_event();
        ctx.post_at(SimTime::from_secs(5), vec![], EventPayload::StatsTick);
        assert_eq!(ctx.peek_time(), Some(SimTime::from_secs(10)));
    }
}
