//! Admission control over inbound messages.

use crate::{
    event::{METHOD_OPTIONS, METHOD_SUBSCRIBE},
    load_monitor::LoadMonitor,
    trace::TrailId,
    transport::InboundMessage,
};
use std::sync::Arc;


/// Admission decision for one inbound message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Admission {
    /// Admitted subject to admission control; the load monitor hears back about it.
    Controlled,
    /// Admitted unconditionally, without consulting the load monitor.
    Uncontrolled,
    /// Rejected; answer with a 503 and do not process.
    Reject,
}

/// Thin policy layer over the injected load monitor.
///
/// OPTIONS carries keepalive semantics that must survive overload, SUBSCRIBE failures would
/// corrupt subscription state in the wider system, and responses close out already-committed
/// upstream work, so none of those ever reach the load monitor's admit decision.
pub struct AdmissionControl {
    load_monitor: Arc<dyn LoadMonitor>,
}

impl AdmissionControl {
    pub fn new(load_monitor: Arc<dyn LoadMonitor>) -> Self {
        AdmissionControl { load_monitor }
    }

    /// Whether this message is admitted unconditionally, bypassing the load monitor.
    pub fn is_uncontrolled(&self, rdata: &dyn InboundMessage) -> bool {
        rdata.is_response()
            || rdata.method() == METHOD_OPTIONS
            || rdata.method() == METHOD_SUBSCRIBE
    }

    /// Decide whether to accept an inbound message into the queue.
    pub fn classify(&self, rdata: &dyn InboundMessage, trail: TrailId) -> Admission {
        if self.is_uncontrolled(rdata) {
            Admission::Uncontrolled
        } else if self.load_monitor.admit_request(trail) {
            Admission::Controlled
        } else {
            Admission::Reject
        }
    }

    /// Completion report, forwarded verbatim to the load monitor.
    pub fn report_complete(&self, trail: TrailId, latency_us: u64) {
        self.load_monitor.request_complete(trail, latency_us);
    }

    /// Snapshot of the load monitor's target latency.
    pub fn target_latency_us(&self) -> u64 {
        self.load_monitor.target_latency_us()
    }
}


#[cfg(test)]
use crate::test_mocks::{MockLoadMonitor, MockMessage};
#[cfg(test)]
use std::sync::atomic::Ordering;

#[cfg(test)]
fn control(admit: bool) -> (AdmissionControl, Arc<MockLoadMonitor>) {
    let load_monitor = MockLoadMonitor::new(admit, 100_000);
    (AdmissionControl::new(load_monitor.clone() as Arc<dyn LoadMonitor>), load_monitor)
}

#[test]
fn test_responses_bypass_load_monitor() {
    let (control, load_monitor) = control(false);
    let rdata = MockMessage::response("INVITE", "call-1");
    assert_eq!(control.classify(&*rdata, 1), Admission::Uncontrolled);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_options_bypass_load_monitor() {
    let (control, load_monitor) = control(false);
    let rdata = MockMessage::request("OPTIONS", "call-1");
    assert_eq!(control.classify(&*rdata, 1), Admission::Uncontrolled);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_subscribe_bypasses_load_monitor() {
    let (control, load_monitor) = control(false);
    let rdata = MockMessage::request("SUBSCRIBE", "call-1");
    assert_eq!(control.classify(&*rdata, 1), Admission::Uncontrolled);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_other_requests_consult_load_monitor() {
    let (control, load_monitor) = control(true);
    let rdata = MockMessage::request("INVITE", "call-1");
    assert_eq!(control.classify(&*rdata, 1), Admission::Controlled);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reject_when_load_monitor_denies() {
    let (control, load_monitor) = control(false);
    let rdata = MockMessage::request("INVITE", "call-1");
    assert_eq!(control.classify(&*rdata, 1), Admission::Reject);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_report_complete_forwards_verbatim() {
    let (control, load_monitor) = control(true);
    control.report_complete(42, 1234);
    assert_eq!(*load_monitor.completions.lock(), [(42, 1234)]);
}
