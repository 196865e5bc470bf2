use tracing::trace;

use crate::event::RoomEvent;

/// Result of inserting one event into the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineInsert {
    /// The event was new and now sits at this index.
    Inserted(usize),
    /// An event with the same ID was already stored at this index; its payload
    /// was overwritten in place.
    Replaced(usize),
}

/// Ordered, deduplicated sequence of room events.
///
/// Events arrive from two directions (sync appends at the tail, backfill
/// delivers older history) so placement is decided per event by
/// [`RoomEvent::precedes`] rather than by arrival order.
#[derive(Debug, Clone, Default)]
pub struct TimelineBuffer {
    items: Vec<RoomEvent>,
}

impl TimelineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current events in room order, oldest first.
    pub fn events(&self) -> &[RoomEvent] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find(&self, event_id: &str) -> Option<&RoomEvent> {
        self.position(event_id).map(|idx| &self.items[idx])
    }

    /// ID of the newest event that has one.
    pub fn latest_event_id(&self) -> Option<&str> {
        self.items.iter().rev().find_map(RoomEvent::event_id)
    }

    /// Insert one event.
    ///
    /// Scans from the newest end and places the event right after the last
    /// event it is not known to precede. Events without ordering metadata
    /// therefore land at the tail. A known event ID is replaced in place.
    pub fn insert(&mut self, event: RoomEvent) -> TimelineInsert {
        if let Some(idx) = event.event_id().and_then(|id| self.position(id)) {
            trace!(event_id = ?event.event_id(), idx, "replacing duplicate timeline event");
            self.items[idx] = event;
            return TimelineInsert::Replaced(idx);
        }

        let mut idx = self.items.len();
        while idx > 0 && event.precedes(&self.items[idx - 1]) {
            idx -= 1;
        }
        self.items.insert(idx, event);
        TimelineInsert::Inserted(idx)
    }

    /// Clamp a requested backfill size against safety and server caps.
    ///
    /// The result is always in `1..=100`.
    pub fn bounded_paginate_limit(requested: u16, server_cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.max(1);
        safe_requested.min(safe_cap).min(100)
    }

    fn position(&self, event_id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|it| it.event_id() == Some(event_id))
    }
}
