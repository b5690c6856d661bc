//! Events on the simulation timeline.

use std::cmp::Ordering;

use crate::context::SimContext;
use crate::error::Result;
use crate::packet::Packet;

/// A function scheduled to run against the simulation context.
pub type Callback = Box<dyn FnOnce(&mut SimContext) -> Result<()> + Send>;

/// A labelled scheduled call.
pub struct FunctionCall {
    pub(crate) label: &'static str,
    pub(crate) call: Callback,
}

impl std::fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCall")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// The closed set of things that can happen at a point in time.
#[derive(Debug)]
pub enum EventKind {
    /// Run a function (admission, discovery, ...)
    Call(FunctionCall),
    /// Hand a packet to its receiver
    Deliver(Packet),
}

/// A timestamped event.
#[derive(Debug)]
pub struct Event {
    pub(crate) at: f64,
    pub(crate) seq: u64,
    pub(crate) kind: EventKind,
}

impl Event {
    /// Schedule `call` at logical time `at`.
    pub fn call<F>(at: f64, label: &'static str, call: F) -> Self
    where
        F: FnOnce(&mut SimContext) -> Result<()> + Send + 'static,
    {
        Self {
            at,
            seq: 0,
            kind: EventKind::Call(FunctionCall {
                label,
                call: Box::new(call),
            }),
        }
    }

    /// Deliver `packet` at logical time `at`.
    pub fn deliver(at: f64, packet: Packet) -> Self {
        Self {
            at,
            seq: 0,
            kind: EventKind::Deliver(packet),
        }
    }

    pub fn at(&self) -> f64 {
        self.at
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Short description for logs.
    pub fn label(&self) -> String {
        match &self.kind {
            EventKind::Call(call) => call.label.to_string(),
            EventKind::Deliver(packet) => packet.summary(),
        }
    }

    /// Timeline order: time first, then enqueue order.
    pub(crate) fn order(&self, other: &Event) -> Ordering {
        self.at
            .total_cmp(&other.at)
            .then(self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Address;
    use crate::packet::Payload;

    fn gossip(at: f64) -> Event {
        Event::deliver(
            at,
            Packet::internal(Address(0), Payload::AddressGossip { peers: Vec::new() }),
        )
    }

    #[test]
    fn earlier_time_first() {
        let mut a = gossip(5.0);
        let mut b = gossip(10.0);
        a.seq = 2;
        b.seq = 1;
        assert_eq!(a.order(&b), Ordering::Less);
    }

    #[test]
    fn ties_break_by_sequence() {
        let mut a = gossip(5.0);
        let mut b = gossip(5.0);
        a.seq = 1;
        b.seq = 2;
        assert_eq!(a.order(&b), Ordering::Less);
        assert_eq!(b.order(&a), Ordering::Greater);
    }

    #[test]
    fn call_label() {
        let event = Event::call(0.0, "admission", |_| Ok(()));
        assert_eq!(event.label(), "admission");
        assert!(format!("{event:?}").contains("admission"));
    }
}
