//! Event queue with lazy chronological ordering.

use crate::event::Event;

/// Pending events plus the single-flight drain flag.
///
/// Events are appended unsorted; the queue is re-sorted only when something
/// was added since the last pop. Equal timestamps run in enqueue order.
#[derive(Debug, Default)]
pub struct EventQueue {
    /// Sorted latest-first when `dirty` is false, so the earliest is last.
    events: Vec<Event>,
    dirty: bool,
    draining: bool,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn push(&mut self, mut event: Event) {
        event.seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(event);
        self.dirty = true;
    }

    /// Append many events, keeping their relative order for ties.
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    fn sort(&mut self) {
        if self.dirty {
            self.events.sort_by(|a, b| b.order(a));
            self.dirty = false;
        }
    }

    /// Time of the earliest pending event.
    pub fn peek_at(&mut self) -> Option<f64> {
        self.sort();
        self.events.last().map(Event::at)
    }

    /// Remove and return the earliest pending event.
    pub fn pop_earliest(&mut self) -> Option<Event> {
        self.sort();
        self.events.pop()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Claim the drain. False if a drain is already running.
    pub(crate) fn begin_drain(&mut self) -> bool {
        if self.draining {
            return false;
        }
        self.draining = true;
        true
    }

    pub(crate) fn end_drain(&mut self) {
        self.draining = false;
    }
}
