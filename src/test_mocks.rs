//! Hand-rolled doubles for the dispatcher's collaborators.

use crate::{
    event::Callback,
    load_monitor::LoadMonitor,
    trace::{SlowTransactionSink, TrailId},
    transport::{InboundMessage, OutboundMessage, SipTransport},
    util_time::Clock,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use crossbeam_channel::Sender;
use parking_lot::Mutex;


/// Manually advanced clock.
#[derive(Debug)]
pub struct TestClock(Mutex<Instant>);

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(TestClock(Mutex::new(Instant::now())))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

/// Load monitor double with a scripted admit decision and counted calls.
pub struct MockLoadMonitor {
    pub admit: AtomicBool,
    pub target: AtomicU64,
    pub admit_calls: AtomicU64,
    pub target_calls: AtomicU64,
    pub completions: Mutex<Vec<(TrailId, u64)>>,
    on_admit: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl MockLoadMonitor {
    pub fn new(admit: bool, target_latency_us: u64) -> Arc<Self> {
        Arc::new(MockLoadMonitor {
            admit: AtomicBool::new(admit),
            target: AtomicU64::new(target_latency_us),
            admit_calls: AtomicU64::new(0),
            target_calls: AtomicU64::new(0),
            completions: Mutex::new(Vec::new()),
            on_admit: Mutex::new(None),
        })
    }

    /// Run the given hook inside `admit_request`, for simulating state changes that race the
    /// window between the admission check and the enqueue.
    pub fn set_on_admit(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_admit.lock() = Some(Box::new(hook));
    }
}

impl LoadMonitor for MockLoadMonitor {
    fn admit_request(&self, _trail: TrailId) -> bool {
        self.admit_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_admit.lock();
        if let Some(hook) = &*hook {
            hook();
        }
        self.admit.load(Ordering::SeqCst)
    }

    fn request_complete(&self, trail: TrailId, latency_us: u64) {
        self.completions.lock().push((trail, latency_us));
    }

    fn target_latency_us(&self) -> u64 {
        self.target_calls.fetch_add(1, Ordering::SeqCst);
        self.target.load(Ordering::SeqCst)
    }
}

/// Parsed-message double.
pub struct MockMessage {
    method: String,
    response: bool,
    call_id: String,
}

impl MockMessage {
    pub fn request(method: &str, call_id: &str) -> Box<dyn InboundMessage> {
        Box::new(MockMessage {
            method: method.to_owned(),
            response: false,
            call_id: call_id.to_owned(),
        })
    }

    pub fn response(method: &str, call_id: &str) -> Box<dyn InboundMessage> {
        Box::new(MockMessage {
            method: method.to_owned(),
            response: true,
            call_id: call_id.to_owned(),
        })
    }
}

impl InboundMessage for MockMessage {
    fn method(&self) -> &str {
        &self.method
    }

    fn is_response(&self) -> bool {
        self.response
    }

    fn call_id(&self) -> &str {
        &self.call_id
    }
}

/// Response double carrying only a status code.
pub struct MockResponse(pub u16);

impl OutboundMessage for MockResponse {
    fn status(&self) -> u16 {
        self.0
    }
}

/// Transport double recording transmissions and downstream invocations.
pub struct MockTransport {
    pub transmitted: Mutex<Vec<u16>>,
    pub rx_requests: Mutex<Vec<String>>,
    pub rx_responses: Mutex<Vec<String>>,
    pub released: AtomicU64,
    on_request: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    notify: Mutex<Option<Sender<()>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(MockTransport {
            transmitted: Mutex::new(Vec::new()),
            rx_requests: Mutex::new(Vec::new()),
            rx_responses: Mutex::new(Vec::new()),
            released: AtomicU64::new(0),
            on_request: Mutex::new(None),
            notify: Mutex::new(None),
        })
    }

    /// Run the given hook inside `on_rx_request`, for simulating slow or panicking handlers.
    pub fn set_on_request(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_request.lock() = Some(Box::new(hook));
    }

    pub fn clear_on_request(&self) {
        *self.on_request.lock() = None;
    }

    /// Send on this channel every time a message is released back to the transport.
    pub fn notify_on_release(&self, sender: Sender<()>) {
        *self.notify.lock() = Some(sender);
    }
}

impl SipTransport for MockTransport {
    fn synthesize_503(&self, _rdata: &dyn InboundMessage) -> Box<dyn OutboundMessage> {
        Box::new(MockResponse(503))
    }

    fn transmit(&self, tdata: Box<dyn OutboundMessage>) {
        self.transmitted.lock().push(tdata.status());
    }

    fn release(&self, _rdata: Box<dyn InboundMessage>) {
        self.released.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = &*self.notify.lock() {
            let _ = sender.send(());
        }
    }

    fn on_rx_request(&self, rdata: &dyn InboundMessage) {
        self.rx_requests.lock().push(rdata.call_id().to_owned());
        let hook = self.on_request.lock();
        if let Some(hook) = &*hook {
            hook();
        }
    }

    fn on_rx_response(&self, rdata: &dyn InboundMessage) {
        self.rx_responses.lock().push(rdata.call_id().to_owned());
    }
}

/// Slow-transaction sink that records what it is told.
#[derive(Default)]
pub struct CollectSink(pub Mutex<Vec<(String, u64, u64)>>);

impl SlowTransactionSink for CollectSink {
    fn slow_transaction(&self, call_id: &str, elapsed: Duration, target_latency_us: u64) {
        self.0.lock().push((call_id.to_owned(), elapsed.as_micros() as u64, target_latency_us));
    }
}

/// Callback double that records `run` and its own drop into a shared log.
pub struct MockCallback {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl MockCallback {
    pub fn new(log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        MockCallback { log: Arc::clone(log) }
    }
}

impl Callback for MockCallback {
    fn run(self: Box<Self>) {
        self.log.lock().push("run");
    }
}

impl Drop for MockCallback {
    fn drop(&mut self) {
        self.log.lock().push("drop");
    }
}
