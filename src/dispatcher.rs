//! Worker pool and dispatch loop.
//!
//! This is the integration layer between the collaborators: inbound messages are classified,
//! admitted or answered with a 503, queued, and drained by a pool of worker threads that invoke
//! downstream processing and report service latency back to the load monitor.

use crate::{
    admission::{Admission, AdmissionControl},
    config::DispatcherConfig,
    event::{Callback, EventPriority, MessageEvent, SipEvent},
    load_monitor::LoadMonitor,
    queue::{EventQueue, QueuedEvent},
    trace::TrailId,
    transport::{InboundMessage, SipTransport},
    util_time::Stopwatch,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::JoinHandle,
    thread,
};
use anyhow::{
    Context,
    Result,
    ensure,
};
use parking_lot::Mutex;


/// Owned handle to a running dispatcher: the queue plus its pool of worker threads.
///
/// Terminates the queue and joins the workers when stopped. Dropping without stopping warns and
/// stops anyway.
pub struct Dispatcher {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// Cloneable producer-side handle: the transport collaborator's inbound hook and the callback
/// submission entry point.
#[derive(Clone)]
pub struct DispatcherHandle(Arc<Shared>);

// state shared between handles and workers
struct Shared {
    config: DispatcherConfig,
    queue: EventQueue,
    admission: AdmissionControl,
    transport: Arc<dyn SipTransport>,
}

impl Dispatcher {
    /// Validate the configuration, construct the queue, and spawn the workers.
    pub fn start(
        config: DispatcherConfig,
        load_monitor: Arc<dyn LoadMonitor>,
        transport: Arc<dyn SipTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let num_workers = config.num_workers;
        let shared = Arc::new(Shared {
            queue: EventQueue::new(Arc::clone(&config.clock)),
            admission: AdmissionControl::new(load_monitor),
            transport,
            config,
        });

        let mut workers = Vec::with_capacity(num_workers);
        for n in 0..num_workers {
            let worker = thread::Builder::new()
                .name(format!("sip-dispatch-{}", n))
                .spawn({
                    let shared = Arc::clone(&shared);
                    move || worker_body(&shared)
                })
                .context("error spawning dispatcher worker");
            match worker {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    // unwind the workers spawned so far before surfacing the failure
                    shared.queue.terminate();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(num_workers, "dispatcher started");
        Ok(Dispatcher { shared, workers })
    }

    /// Producer-side handle for the transport collaborator and callback submitters.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle(Arc::clone(&self.shared))
    }

    /// Stop cleanly: terminate the queue, join the workers once they have drained the backlog,
    /// then release anything that still slipped in.
    pub fn stop(mut self) {
        self.inner_stop();
    }

    fn inner_stop(&mut self) {
        self.shared.queue.terminate();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("dispatcher worker panicked");
            }
        }
        for queued in self.shared.queue.drain() {
            self.shared.destroy(queued.event);
        }
        info!("dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!("Dispatcher dropped without being stopped (stopping now)");
            self.inner_stop();
        }
    }
}

impl DispatcherHandle {
    /// Inbound hook for the transport collaborator, callable from its reader threads.
    ///
    /// Takes ownership of `rdata`; exactly one of an enqueue or a 503 transmission results.
    pub fn on_inbound(&self, rdata: Box<dyn InboundMessage>, trail: TrailId) {
        self.0.on_inbound(rdata, trail);
    }

    /// Queue a deferred unit of work to run on some worker thread.
    pub fn submit_callback(&self, callback: Box<dyn Callback>) {
        self.0.submit_callback(callback);
    }
}

impl Shared {
    // classifier and enqueuer: the producer side of the queue
    fn on_inbound(&self, rdata: Box<dyn InboundMessage>, trail: TrailId) {
        if self.queue.is_terminated() {
            debug!(call_id = rdata.call_id(), "dispatcher shutting down, answering 503");
            self.reject_503(rdata);
            return;
        }

        let priority = EventPriority::for_message(&*rdata);

        // an over-mark queue sheds controlled requests up front, without bothering the load
        // monitor; the depth bound itself is enforced again under the queue lock at push time
        let admission = if self.over_high_water() && !self.admission.is_uncontrolled(&*rdata) {
            warn!(
                call_id = rdata.call_id(),
                queued = self.queue.len(),
                "queue over high-water mark, rejecting request",
            );
            Admission::Reject
        } else {
            self.admission.classify(&*rdata, trail)
        };

        match admission {
            Admission::Reject => {
                debug!(
                    call_id = rdata.call_id(),
                    method = rdata.method(),
                    "rejecting request under load",
                );
                self.reject_503(rdata);
            }
            Admission::Controlled | Admission::Uncontrolled => {
                let controlled = admission == Admission::Controlled;
                let stopwatch = Stopwatch::start(&self.config.clock);
                let deadline = self.config.clock.now() + self.config.request_on_queue_timeout;
                let event = SipEvent::Message(MessageEvent {
                    rdata,
                    trail,
                    stopwatch,
                    priority,
                    admission_controlled: controlled,
                    deadline,
                });
                let mark = self.config.queue_high_water_mark;
                let pushed = self.queue.push_if(event, |len| {
                    !controlled || mark.map(|mark| len < mark).unwrap_or(true)
                });
                if let Err(SipEvent::Message(message)) = pushed {
                    self.discard_unqueued(message);
                }
            }
        }
    }

    fn submit_callback(&self, callback: Box<dyn Callback>) {
        if let Err(event) = self.queue.push(SipEvent::Callback(callback)) {
            warn!("callback submitted to terminated dispatcher, dropping it");
            drop(event);
        }
    }

    fn over_high_water(&self) -> bool {
        self.config.queue_high_water_mark
            .map(|mark| self.queue.len() >= mark)
            .unwrap_or(false)
    }

    // a message the queue would not take (terminated, or the depth bound was hit between the
    // admission check and the insert): answer 503; an admitted request still owes the load
    // monitor exactly one completion report
    fn discard_unqueued(&self, message: MessageEvent) {
        let MessageEvent { rdata, trail, stopwatch, admission_controlled, .. } = message;
        if self.queue.is_terminated() {
            debug!(call_id = rdata.call_id(), "dispatcher terminated during enqueue, answering 503");
        } else {
            warn!(
                call_id = rdata.call_id(),
                "queue hit high-water mark during enqueue, rejecting request",
            );
        }
        self.reject_503(rdata);
        if admission_controlled {
            self.admission.report_complete(trail, stopwatch.elapsed().as_micros() as u64);
        }
    }

    // answer a message with a 503 and hand it back to the transport layer
    fn reject_503(&self, rdata: Box<dyn InboundMessage>) {
        let tdata = self.transport.synthesize_503(&*rdata);
        self.transport.transmit(tdata);
        self.transport.release(rdata);
    }

    // dispatch one popped event
    fn process(&self, queued: QueuedEvent) {
        match queued.event {
            SipEvent::Callback(callback) => callback.run(),
            SipEvent::Message(message) => self.process_message(message),
        }
    }

    fn process_message(&self, message: MessageEvent) {
        let MessageEvent {
            rdata,
            trail,
            stopwatch,
            priority: _,
            admission_controlled,
            deadline,
        } = message;

        // a message popped exactly at its deadline is not yet expired
        if self.config.clock.now() > deadline {
            let queue_latency = stopwatch.elapsed();
            warn!(
                call_id = rdata.call_id(),
                queued_ms = queue_latency.as_millis() as u64,
                "message timed out on the queue",
            );
            if admission_controlled {
                self.reject_503(rdata);
                self.admission.report_complete(trail, queue_latency.as_micros() as u64);
            } else {
                self.transport.release(rdata);
            }
            return;
        }

        // single snapshot per dispatch
        let target_latency_us = self.admission.target_latency_us();

        let is_response = rdata.is_response();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if is_response {
                self.transport.on_rx_response(&*rdata);
            } else {
                self.transport.on_rx_request(&*rdata);
            }
        }));

        let elapsed = stopwatch.elapsed();
        match outcome {
            Ok(()) => {
                // a zero target means no slow check, and no divide anywhere
                if target_latency_us > 0
                    && elapsed.as_micros()
                        > self.config.slow_multiplier as u128 * target_latency_us as u128
                {
                    warn!(
                        call_id = rdata.call_id(),
                        elapsed_us = elapsed.as_micros() as u64,
                        target_latency_us,
                        "slow transaction",
                    );
                    if let Some(sink) = &self.config.slow_sink {
                        sink.slow_transaction(rdata.call_id(), elapsed, target_latency_us);
                    }
                }
            }
            Err(_) => {
                error!(
                    call_id = rdata.call_id(),
                    "downstream processing panicked, abandoning message",
                );
            }
        }

        self.admission.report_complete(trail, elapsed.as_micros() as u64);
        self.transport.release(rdata);
    }

    // tear down an event without processing it, calling its release hook (shutdown path)
    fn destroy(&self, event: SipEvent) {
        match event {
            SipEvent::Message(message) => self.transport.release(message.rdata),
            SipEvent::Callback(callback) => drop(callback),
        }
    }
}

// body of a worker thread: drain the queue until terminated
fn worker_body(shared: &Shared) {
    trace!("dispatcher worker starting");
    while let Some(queued) = shared.queue.pop() {
        shared.process(queued);
    }
    trace!("dispatcher worker exiting");
}


// process-wide dispatcher slot behind init/shutdown
static DISPATCHER: Mutex<Option<Dispatcher>> = Mutex::new(None);

/// Start the process-wide dispatcher and register its handle for [`dispatcher_handle`].
///
/// Fails if the configuration is invalid or a dispatcher is already running, in which case
/// nothing is registered.
pub fn init_dispatcher(
    config: DispatcherConfig,
    load_monitor: Arc<dyn LoadMonitor>,
    transport: Arc<dyn SipTransport>,
) -> Result<()> {
    let mut slot = DISPATCHER.lock();
    ensure!(slot.is_none(), "dispatcher is already initialized");
    *slot = Some(Dispatcher::start(config, load_monitor, transport)?);
    Ok(())
}

/// Producer-side handle to the process-wide dispatcher, for the transport collaborator to use as
/// its inbound hook. `None` before init or after shutdown.
pub fn dispatcher_handle() -> Option<DispatcherHandle> {
    DISPATCHER.lock().as_ref().map(Dispatcher::handle)
}

/// Unregister and stop the process-wide dispatcher. Idempotent.
pub fn shutdown_dispatcher() {
    let dispatcher = DISPATCHER.lock().take();
    if let Some(dispatcher) = dispatcher {
        dispatcher.stop();
    }
}


#[cfg(test)]
use crate::test_mocks::{
    CollectSink,
    MockCallback,
    MockLoadMonitor,
    MockMessage,
    MockTransport,
    TestClock,
};
#[cfg(test)]
use std::{
    sync::atomic::Ordering,
    time::Duration,
};

#[cfg(test)]
fn rig_with(
    admit: bool,
    target_latency_us: u64,
    tweak: impl FnOnce(&mut DispatcherConfig),
) -> (Arc<Shared>, Arc<TestClock>, Arc<MockLoadMonitor>, Arc<MockTransport>) {
    let clock = TestClock::new();
    let load_monitor = MockLoadMonitor::new(admit, target_latency_us);
    let transport = MockTransport::new();
    let mut config = DispatcherConfig {
        num_workers: 1,
        request_on_queue_timeout: Duration::from_millis(10),
        clock: clock.clone(),
        ..Default::default()
    };
    tweak(&mut config);
    let shared = Arc::new(Shared {
        queue: EventQueue::new(Arc::clone(&config.clock)),
        admission: AdmissionControl::new(load_monitor.clone()),
        transport: transport.clone(),
        config,
    });
    (shared, clock, load_monitor, transport)
}

#[cfg(test)]
fn rig(
    admit: bool,
    target_latency_us: u64,
) -> (Arc<Shared>, Arc<TestClock>, Arc<MockLoadMonitor>, Arc<MockTransport>) {
    rig_with(admit, target_latency_us, |_| {})
}

// one worker loop iteration, driven synchronously
#[cfg(test)]
fn process_one(shared: &Shared) {
    let queued = shared.queue.pop().expect("queue unexpectedly terminated");
    shared.process(queued);
}

#[test]
fn test_standard_invite() {
    let (shared, _clock, load_monitor, transport) = rig(true, 100_000);

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    process_one(&shared);

    assert_eq!(*transport.rx_requests.lock(), ["call-1"]);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 1);
    assert_eq!(load_monitor.completions.lock().len(), 1);
    assert!(transport.transmitted.lock().is_empty());
    assert_eq!(transport.released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_slow_invite_emits_slow_transaction() {
    let sink = Arc::new(CollectSink::default());
    let (shared, clock, load_monitor, transport) = rig_with(true, 10, {
        let sink = sink.clone();
        move |config| config.slow_sink = Some(sink)
    });
    // slow means > slow_multiplier * target latency; the handler burns 6 seconds against a
    // 10 us target
    transport.set_on_request({
        let clock = clock.clone();
        move || clock.advance(Duration::from_millis(6000))
    });

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    process_one(&shared);

    assert_eq!(*transport.rx_requests.lock(), ["call-1"]);
    assert_eq!(load_monitor.completions.lock().len(), 1);
    let slow = sink.0.lock();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].0, "call-1");
    assert_eq!(slow[0].1, 6_000_000);
    assert_eq!(slow[0].2, 10);
}

#[test]
fn test_fast_invite_is_not_slow() {
    let sink = Arc::new(CollectSink::default());
    let (shared, _clock, _load_monitor, transport) = rig_with(true, 100_000, {
        let sink = sink.clone();
        move |config| config.slow_sink = Some(sink)
    });

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    process_one(&shared);

    assert_eq!(*transport.rx_requests.lock(), ["call-1"]);
    assert!(sink.0.lock().is_empty());
}

#[test]
fn test_zero_target_latency_skips_slow_check() {
    let sink = Arc::new(CollectSink::default());
    let (shared, clock, load_monitor, transport) = rig_with(true, 0, {
        let sink = sink.clone();
        move |config| config.slow_sink = Some(sink)
    });
    transport.set_on_request({
        let clock = clock.clone();
        move || clock.advance(Duration::from_millis(6000))
    });

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    process_one(&shared);

    assert!(sink.0.lock().is_empty());
    assert_eq!(load_monitor.completions.lock().len(), 1);
}

#[test]
fn test_overloaded_invite_rejected() {
    let (shared, _clock, load_monitor, transport) = rig(false, 100_000);

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);

    assert_eq!(*transport.transmitted.lock(), [503]);
    assert!(transport.rx_requests.lock().is_empty());
    assert!(load_monitor.completions.lock().is_empty());
    assert!(shared.queue.is_empty());
    assert_eq!(transport.released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reject_old_invite() {
    let (shared, clock, load_monitor, transport) = rig(true, 100_000);

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 7);
    clock.advance(Duration::from_millis(15));
    process_one(&shared);

    assert_eq!(*transport.transmitted.lock(), [503]);
    assert!(transport.rx_requests.lock().is_empty());
    assert_eq!(transport.released.load(Ordering::SeqCst), 1);
    // completion still reported, with the queue latency
    assert_eq!(*load_monitor.completions.lock(), [(7, 15_000)]);
}

#[test]
fn test_message_at_exact_deadline_not_expired() {
    let (shared, clock, _load_monitor, transport) = rig(true, 100_000);

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    clock.advance(Duration::from_millis(10));
    process_one(&shared);

    assert_eq!(*transport.rx_requests.lock(), ["call-1"]);
    assert!(transport.transmitted.lock().is_empty());
}

#[test]
fn test_expired_uncontrolled_message_released_without_503() {
    let (shared, clock, load_monitor, transport) = rig(false, 100_000);

    shared.on_inbound(MockMessage::request("OPTIONS", "call-1"), 1);
    clock.advance(Duration::from_millis(15));
    process_one(&shared);

    assert!(transport.transmitted.lock().is_empty());
    assert!(transport.rx_requests.lock().is_empty());
    assert_eq!(transport.released.load(Ordering::SeqCst), 1);
    assert!(load_monitor.completions.lock().is_empty());
}

#[test]
fn test_never_reject_options() {
    // an admit_request call would deny, but OPTIONS must never ask
    let (shared, _clock, load_monitor, transport) = rig(false, 100_000);

    shared.on_inbound(MockMessage::request("OPTIONS", "call-1"), 1);
    process_one(&shared);

    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*transport.rx_requests.lock(), ["call-1"]);
    assert!(transport.transmitted.lock().is_empty());
    assert_eq!(load_monitor.completions.lock().len(), 1);
}

#[test]
fn test_never_reject_subscribe() {
    let (shared, _clock, load_monitor, transport) = rig(false, 100_000);

    shared.on_inbound(MockMessage::request("SUBSCRIBE", "call-1"), 1);
    process_one(&shared);

    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*transport.rx_requests.lock(), ["call-1"]);
    assert!(transport.transmitted.lock().is_empty());
    assert_eq!(load_monitor.completions.lock().len(), 1);
}

#[test]
fn test_never_reject_response() {
    let (shared, _clock, load_monitor, transport) = rig(false, 100_000);

    shared.on_inbound(MockMessage::response("INVITE", "call-1"), 1);
    process_one(&shared);

    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*transport.rx_responses.lock(), ["call-1"]);
    assert!(transport.rx_requests.lock().is_empty());
    assert_eq!(load_monitor.completions.lock().len(), 1);
}

#[test]
fn test_callback_run_then_destroyed() {
    let (shared, _clock, load_monitor, _transport) = rig(true, 100_000);
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    shared.submit_callback(Box::new(MockCallback::new(&log)));
    process_one(&shared);

    assert_eq!(*log.lock(), ["run", "drop"]);
    assert!(load_monitor.completions.lock().is_empty());
}

#[test]
fn test_closure_callback_runs() {
    let (shared, _clock, _load_monitor, _transport) = rig(true, 100_000);
    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));

    shared.submit_callback(Box::new({
        let ran = ran.clone();
        move || ran.store(true, Ordering::SeqCst)
    }));
    process_one(&shared);

    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_prioritise_options_over_older_invite() {
    let (shared, clock, _load_monitor, transport) = rig(true, 100_000);

    shared.on_inbound(MockMessage::request("INVITE", "invite"), 1);
    clock.advance(Duration::from_millis(1));
    shared.on_inbound(MockMessage::request("OPTIONS", "options"), 2);

    process_one(&shared);
    process_one(&shared);

    assert_eq!(*transport.rx_requests.lock(), ["options", "invite"]);
}

#[test]
fn test_prioritise_older_invite() {
    let (shared, clock, load_monitor, transport) = rig(true, 100_000);

    shared.on_inbound(MockMessage::request("INVITE", "older"), 1);
    clock.advance(Duration::from_millis(1));
    shared.on_inbound(MockMessage::request("INVITE", "newer"), 2);

    process_one(&shared);
    process_one(&shared);

    assert_eq!(*transport.rx_requests.lock(), ["older", "newer"]);
    assert_eq!(load_monitor.completions.lock().len(), 2);
}

#[test]
fn test_target_latency_sampled_once_per_dispatch() {
    let (shared, _clock, load_monitor, _transport) = rig(true, 100_000);

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    process_one(&shared);

    assert_eq!(load_monitor.target_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_downstream_panic_still_reports_completion() {
    let (shared, _clock, load_monitor, transport) = rig(true, 100_000);
    transport.set_on_request(|| panic!("handler exploded"));

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    process_one(&shared);

    assert_eq!(load_monitor.completions.lock().len(), 1);
    assert_eq!(transport.released.load(Ordering::SeqCst), 1);

    // the worker loop survives and keeps dispatching
    transport.clear_on_request();
    shared.on_inbound(MockMessage::request("INVITE", "call-2"), 2);
    process_one(&shared);
    assert_eq!(load_monitor.completions.lock().len(), 2);
    assert_eq!(*transport.rx_requests.lock(), ["call-1", "call-2"]);
}

#[test]
fn test_high_water_mark_sheds_controlled_requests() {
    let (shared, _clock, load_monitor, transport) =
        rig_with(true, 100_000, |config| config.queue_high_water_mark = Some(1));

    shared.on_inbound(MockMessage::request("INVITE", "a"), 1);
    shared.on_inbound(MockMessage::request("INVITE", "b"), 2);

    // the second INVITE is shed without consulting the load monitor
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*transport.transmitted.lock(), [503]);
    assert_eq!(shared.queue.len(), 1);

    // uncontrolled traffic still flows
    shared.on_inbound(MockMessage::request("OPTIONS", "c"), 3);
    assert_eq!(shared.queue.len(), 2);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_inbound_after_terminate_answered_503() {
    let (shared, _clock, _load_monitor, transport) = rig(true, 100_000);
    shared.queue.terminate();

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    assert_eq!(*transport.transmitted.lock(), [503]);
    assert_eq!(transport.released.load(Ordering::SeqCst), 1);

    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    shared.submit_callback(Box::new(MockCallback::new(&log)));
    assert_eq!(*log.lock(), ["drop"]);
}

#[test]
fn test_terminate_between_admission_and_enqueue_still_reports_completion() {
    let (shared, _clock, load_monitor, transport) = rig(true, 100_000);
    // terminate inside the admission check, after the entry check has already passed
    load_monitor.set_on_admit({
        let shared = shared.clone();
        move || shared.queue.terminate()
    });

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 9);

    assert_eq!(*transport.transmitted.lock(), [503]);
    assert!(transport.rx_requests.lock().is_empty());
    assert_eq!(transport.released.load(Ordering::SeqCst), 1);
    // the load monitor admitted the request, so it still hears exactly one completion
    assert_eq!(*load_monitor.completions.lock(), [(9, 0)]);
}

#[test]
fn test_high_water_mark_enforced_under_queue_lock() {
    let (shared, _clock, load_monitor, transport) =
        rig_with(true, 100_000, |config| config.queue_high_water_mark = Some(1));
    // fill the queue to the mark inside the admission check, after the early depth check has
    // already passed
    load_monitor.set_on_admit({
        let shared = shared.clone();
        move || shared.on_inbound(MockMessage::request("OPTIONS", "filler"), 2)
    });

    shared.on_inbound(MockMessage::request("INVITE", "call-1"), 1);

    // the INVITE is shed at push time rather than pushed past the mark
    assert_eq!(shared.queue.len(), 1);
    assert_eq!(*transport.transmitted.lock(), [503]);
    assert_eq!(load_monitor.admit_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*load_monitor.completions.lock(), [(1, 0)]);

    // the uncontrolled filler is still queued and dispatchable
    process_one(&shared);
    assert_eq!(*transport.rx_requests.lock(), ["filler"]);
}

#[test]
fn test_worker_pool_end_to_end() {
    let load_monitor = MockLoadMonitor::new(true, 100_000);
    let transport = MockTransport::new();
    let (send_done, recv_done) = crossbeam_channel::unbounded();
    transport.notify_on_release(send_done);
    let config = DispatcherConfig {
        num_workers: 4,
        request_on_queue_timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let dispatcher = Dispatcher::start(config, load_monitor.clone(), transport.clone()).unwrap();
    let handle = dispatcher.handle();
    for n in 0..32u64 {
        handle.on_inbound(MockMessage::request("INVITE", &format!("call-{}", n)), n);
    }
    for _ in 0..32 {
        recv_done.recv_timeout(Duration::from_secs(5)).expect("dispatch did not complete");
    }
    dispatcher.stop();

    assert_eq!(load_monitor.completions.lock().len(), 32);
    assert_eq!(transport.rx_requests.lock().len(), 32);
    assert_eq!(transport.released.load(Ordering::SeqCst), 32);
}

#[test]
fn test_stop_drains_backlog() {
    let load_monitor = MockLoadMonitor::new(true, 100_000);
    let transport = MockTransport::new();
    let config = DispatcherConfig {
        num_workers: 1,
        request_on_queue_timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let dispatcher = Dispatcher::start(config, load_monitor.clone(), transport.clone()).unwrap();
    let handle = dispatcher.handle();
    for n in 0..8u64 {
        handle.on_inbound(MockMessage::request("INVITE", &format!("call-{}", n)), n);
    }
    // stop joins the worker only after it drains the backlog
    dispatcher.stop();

    assert_eq!(transport.rx_requests.lock().len(), 8);
    assert_eq!(load_monitor.completions.lock().len(), 8);
    assert_eq!(transport.released.load(Ordering::SeqCst), 8);
}

#[test]
fn test_start_rejects_zero_workers() {
    let load_monitor = MockLoadMonitor::new(true, 100_000);
    let transport = MockTransport::new();
    let config = DispatcherConfig {
        num_workers: 0,
        ..Default::default()
    };
    assert!(Dispatcher::start(config, load_monitor, transport).is_err());
}

#[test]
fn test_global_lifecycle() {
    assert!(dispatcher_handle().is_none());

    let load_monitor = MockLoadMonitor::new(true, 100_000);
    let transport = MockTransport::new();
    let (send_done, recv_done) = crossbeam_channel::unbounded();
    transport.notify_on_release(send_done);
    let config = DispatcherConfig {
        num_workers: 1,
        ..Default::default()
    };
    init_dispatcher(config, load_monitor.clone(), transport.clone()).unwrap();

    // double init is refused while one is running
    let second = init_dispatcher(
        DispatcherConfig::default(),
        MockLoadMonitor::new(true, 100_000),
        MockTransport::new(),
    );
    assert!(second.is_err());

    let handle = dispatcher_handle().expect("handle registered");
    handle.on_inbound(MockMessage::request("INVITE", "call-1"), 1);
    recv_done.recv_timeout(Duration::from_secs(5)).expect("dispatch did not complete");

    shutdown_dispatcher();
    assert!(dispatcher_handle().is_none());
    // idempotent
    shutdown_dispatcher();

    assert_eq!(load_monitor.completions.lock().len(), 1);
}
