//! Events flowing through the dispatcher queue.

use crate::{
    trace::TrailId,
    transport::InboundMessage,
    util_time::Stopwatch,
};
use std::{
    fmt::{self, Debug},
    time::Instant,
};


// method names the classifier treats specially
pub(crate) const METHOD_OPTIONS: &str = "OPTIONS";
pub(crate) const METHOD_SUBSCRIBE: &str = "SUBSCRIBE";


/// Priority level of a queued event. Variants increase in priority; higher priority events are
/// returned sooner by the queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EventPriority {
    /// Everything with no special claim to urgency.
    Standard = 0,
    /// OPTIONS polls, which carry keepalive semantics and must survive overload.
    High = 1,
}

impl EventPriority {
    /// Priority assigned to an inbound message: OPTIONS requests jump the queue, everything else
    /// (responses included) takes the default.
    pub fn for_message(rdata: &dyn InboundMessage) -> Self {
        if !rdata.is_response() && rdata.method() == METHOD_OPTIONS {
            EventPriority::High
        } else {
            EventPriority::Standard
        }
    }
}

/// A deferred unit of work runnable on any worker thread.
///
/// `run` consumes the callback, so its destructor runs once `run` returns. Dropping without
/// running is the destruct-only path taken for callbacks still queued at shutdown.
pub trait Callback: Send + 'static {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send + 'static> Callback for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// A received SIP message awaiting processing.
pub struct MessageEvent {
    /// The parsed inbound message. Owned by the dispatcher until released back to the transport.
    pub rdata: Box<dyn InboundMessage>,
    /// Trail identifier threaded through for tracing.
    pub trail: TrailId,
    /// Started at enqueue, read at dispatch start and completion.
    pub stopwatch: Stopwatch,
    /// Priority the classifier assigned.
    pub priority: EventPriority,
    /// Whether this message was admitted subject to admission control.
    pub admission_controlled: bool,
    /// Instant after which the message is late-dropped rather than dispatched.
    pub deadline: Instant,
}

/// An event on the dispatcher queue.
pub enum SipEvent {
    /// A received SIP message awaiting processing.
    Message(MessageEvent),
    /// A deferred unit of work. No deadline, default priority.
    Callback(Box<dyn Callback>),
}

impl SipEvent {
    /// Priority this event is queued at.
    pub fn priority(&self) -> EventPriority {
        match self {
            SipEvent::Message(message) => message.priority,
            SipEvent::Callback(_) => EventPriority::Standard,
        }
    }
}

impl Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("call_id", &self.rdata.call_id())
            .field("method", &self.rdata.method())
            .field("is_response", &self.rdata.is_response())
            .field("trail", &self.trail)
            .field("priority", &self.priority)
            .field("admission_controlled", &self.admission_controlled)
            .finish_non_exhaustive()
    }
}

impl Debug for SipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipEvent::Message(message) => Debug::fmt(message, f),
            SipEvent::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}


#[cfg(test)]
use crate::test_mocks::MockMessage;

#[test]
fn test_options_requests_jump_the_queue() {
    let options = MockMessage::request("OPTIONS", "a");
    let invite = MockMessage::request("INVITE", "b");
    // an OPTIONS response is still just a response
    let options_response = MockMessage::response("OPTIONS", "c");

    assert_eq!(EventPriority::for_message(&*options), EventPriority::High);
    assert_eq!(EventPriority::for_message(&*invite), EventPriority::Standard);
    assert_eq!(EventPriority::for_message(&*options_response), EventPriority::Standard);
}
