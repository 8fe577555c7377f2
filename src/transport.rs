//! Contracts consumed from the transport collaborator.
//!
//! The dispatcher core does not parse or emit SIP wire bytes and does not own sockets. It knows
//! the transport layer only as a capability set: something that hands it parsed messages, can
//! synthesize and send responses, and accepts messages for downstream application processing.

/// A parsed inbound SIP message handle (an "rdata").
///
/// Owned by the transport layer until handed to the dispatcher, then by the dispatcher until it
/// goes back through [`SipTransport::release`].
pub trait InboundMessage: Send + 'static {
    /// SIP method name of the request, or of the request the response answers.
    fn method(&self) -> &str;

    /// Whether this is a response rather than a request.
    fn is_response(&self) -> bool;

    /// Call-ID, for tracing only.
    fn call_id(&self) -> &str;
}

/// An outbound SIP message handle ready for transmission (a "tdata").
pub trait OutboundMessage: Send + 'static {
    /// Status code of the response.
    fn status(&self) -> u16;
}

/// The transport collaborator: response synthesis and transmission, message release, and the
/// downstream application entry points.
///
/// Every method must be callable from any worker thread.
pub trait SipTransport: Send + Sync + 'static {
    /// Build a 503 Service Unavailable response to the given request.
    fn synthesize_503(&self, rdata: &dyn InboundMessage) -> Box<dyn OutboundMessage>;

    /// Send a synthesized response.
    fn transmit(&self, tdata: Box<dyn OutboundMessage>);

    /// Return an inbound message to the transport layer.
    fn release(&self, rdata: Box<dyn InboundMessage>);

    /// Downstream application entry point for requests. May block on application logic; the
    /// calling worker is dedicated to it for its duration.
    fn on_rx_request(&self, rdata: &dyn InboundMessage);

    /// Downstream application entry point for responses.
    fn on_rx_response(&self, rdata: &dyn InboundMessage);
}
