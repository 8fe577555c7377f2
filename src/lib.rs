//! Thread dispatcher at the heart of a SIP signaling node.
//!
//! Receives parsed SIP messages off the transport layer, admits or rejects them under load,
//! prioritizes them, hands them to a pool of worker threads for application processing, and
//! measures their service latency. SIP parsing, transactions, routing, and sockets all live in
//! collaborators; this crate owns the hot path between "bytes parsed into a SIP message" and
//! "application logic invoked", and with it the node's overload behavior.

#[macro_use]
extern crate tracing;

pub mod logging;
pub mod util_time;
pub mod event;
pub mod queue;
pub mod transport;
pub mod load_monitor;
pub mod trace;
pub mod admission;
pub mod config;
pub mod dispatcher;
#[cfg(test)]
mod test_mocks;


pub use crate::{
    config::DispatcherConfig,
    dispatcher::{
        Dispatcher,
        DispatcherHandle,
        init_dispatcher,
        shutdown_dispatcher,
        dispatcher_handle,
    },
    event::{
        Callback,
        EventPriority,
    },
    load_monitor::LoadMonitor,
    trace::{
        TrailId,
        SlowTransactionSink,
    },
    transport::{
        InboundMessage,
        OutboundMessage,
        SipTransport,
    },
    util_time::{
        Clock,
        SystemClock,
    },
};
