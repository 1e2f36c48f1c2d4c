//! Future event list.

use crate::{EntityId, Event, EventId, EventPayload, SimTime};
use std::collections::{BinaryHeap, HashSet};

/// Min-heap of pending events with cancellation.
///
/// Events at the same instant pop in the order they were scheduled.
/// Cancelled events stay in the heap until they reach the top and are then
/// discarded.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    live: HashSet<EventId>,
    next_id: u64,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event at an absolute time.
    pub fn push(
        &mut self,
        time: SimTime,
        source: EntityId,
        targets: Vec<EntityId>,
        payload: EventPayload,
    ) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.live.insert(id);
        self.heap.push(Event {
            id,
            time,
            source,
            targets,
            payload,
        });
        id
    }

    /// Withdraw a pending event.
    ///
    /// Returns `false` if the event already fired, was already cancelled,
    /// or never existed.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.live.remove(&id)
    }

    /// Whether an event is still pending.
    pub fn is_pending(&self, id: EventId) -> bool {
        self.live.contains(&id)
    }

    /// Remove and return the earliest pending event.
    pub fn pop(&mut self) -> Option<Event> {
        while let Some(event) = self.heap.pop() {
            if self.live.remove(&event.id) {
                return Some(event);
            }
        }
        None
    }

    /// Time of the earliest pending event.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        while let Some(event) = self.heap.peek() {
            if self.live.contains(&event.id) {
                return Some(event.time);
            }
            self.heap.pop();
        }
        None
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
