//! Priority event queue between the classifier and the worker pool.

use crate::{
    event::{EventPriority, SipEvent},
    util_time::Clock,
};
use std::{
    cmp::{self, Reverse},
    collections::BinaryHeap,
    sync::Arc,
    time::Instant,
};
use parking_lot::{Mutex, Condvar};


/// Unbounded multi-producer/multi-consumer queue ordered by priority, then age.
///
/// `pop` blocks while the queue is empty; `terminate` wakes all waiters, after which the
/// remaining events are drained in order before `pop` reports closure.
pub struct EventQueue {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    available: Condvar,
}

// queue state under the lock
struct State {
    heap: BinaryHeap<QueuedEvent>,
    // stamped onto events while the lock is held, so that enqueue-time ties on fast clocks still
    // pop in insertion order
    next_seq: u64,
    terminated: bool,
}

/// An event plus the ordering stamps `push` applied to it under the queue lock.
pub struct QueuedEvent {
    pub event: SipEvent,
    pub priority: EventPriority,
    pub enqueued_at: Instant,
    seq: u64,
}

impl QueuedEvent {
    // greater means popped sooner: priority first, then age, then insertion order
    fn key(&self) -> (EventPriority, Reverse<Instant>, Reverse<u64>) {
        (self.priority, Reverse(self.enqueued_at), Reverse(self.seq))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedEvent {}

impl EventQueue {
    /// Construct open and empty.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        EventQueue {
            clock,
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                next_seq: 0,
                terminated: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an event, stamping its enqueue time under the lock, and wake one consumer.
    ///
    /// Fails only once the queue is terminated, handing the event back so the caller can wind it
    /// down properly.
    pub fn push(&self, event: SipEvent) -> Result<(), SipEvent> {
        self.push_if(event, |_| true)
    }

    /// Enqueue an event if `admit` approves of the current queue depth.
    ///
    /// The depth check and the insert happen under the one lock acquisition, so concurrent
    /// producers cannot all observe the same depth and push past a bound. Fails once the queue
    /// is terminated or when `admit` declines, handing the event back either way.
    pub fn push_if(
        &self,
        event: SipEvent,
        admit: impl FnOnce(usize) -> bool,
    ) -> Result<(), SipEvent> {
        let mut state = self.state.lock();
        if state.terminated || !admit(state.heap.len()) {
            return Err(event);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueuedEvent {
            priority: event.priority(),
            enqueued_at: self.clock.now(),
            seq,
            event,
        });
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Dequeue the highest-priority, oldest event, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been terminated and fully drained.
    pub fn pop(&self) -> Option<QueuedEvent> {
        let mut state = self.state.lock();
        loop {
            if let Some(queued) = state.heap.pop() {
                return Some(queued);
            }
            if state.terminated {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Whether nothing is currently queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the queue closed and wake all waiters.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        drop(state);
        self.available.notify_all();
    }

    /// Whether `terminate` has been called.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Take everything still queued, in pop order. Teardown path for events that outlived the
    /// workers.
    pub fn drain(&self) -> Vec<QueuedEvent> {
        let mut state = self.state.lock();
        let mut drained = Vec::with_capacity(state.heap.len());
        while let Some(queued) = state.heap.pop() {
            drained.push(queued);
        }
        drained
    }
}


#[cfg(test)]
use crate::{
    event::MessageEvent,
    test_mocks::{MockMessage, TestClock},
    util_time::Stopwatch,
};
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn test_queue() -> (EventQueue, Arc<TestClock>) {
    let clock = TestClock::new();
    (EventQueue::new(clock.clone() as Arc<dyn Clock>), clock)
}

#[cfg(test)]
fn message(queue: &EventQueue, call_id: &str, priority: EventPriority) -> SipEvent {
    SipEvent::Message(MessageEvent {
        rdata: MockMessage::request("INVITE", call_id),
        trail: 0,
        stopwatch: Stopwatch::start(&queue.clock),
        priority,
        admission_controlled: true,
        deadline: queue.clock.now() + Duration::from_secs(10),
    })
}

#[cfg(test)]
fn popped_call_id(queue: &EventQueue) -> String {
    match queue.pop().expect("queue unexpectedly closed").event {
        SipEvent::Message(message) => message.rdata.call_id().to_owned(),
        SipEvent::Callback(_) => panic!("expected message event"),
    }
}

#[test]
fn test_queue_priority_ordering() {
    let (queue, _clock) = test_queue();
    queue.push(message(&queue, "standard", EventPriority::Standard)).unwrap();
    queue.push(message(&queue, "high", EventPriority::High)).unwrap();

    assert_eq!(popped_call_id(&queue), "high");
    assert_eq!(popped_call_id(&queue), "standard");
}

#[test]
fn test_queue_time_ordering() {
    let (queue, clock) = test_queue();
    queue.push(message(&queue, "older", EventPriority::Standard)).unwrap();
    clock.advance(Duration::from_millis(1));
    queue.push(message(&queue, "newer", EventPriority::Standard)).unwrap();

    assert_eq!(popped_call_id(&queue), "older");
    assert_eq!(popped_call_id(&queue), "newer");
}

#[test]
fn test_queue_priority_before_time() {
    let (queue, clock) = test_queue();
    queue.push(message(&queue, "older-standard", EventPriority::Standard)).unwrap();
    clock.advance(Duration::from_millis(1));
    queue.push(message(&queue, "newer-high", EventPriority::High)).unwrap();

    // higher priority wins despite being younger
    assert_eq!(popped_call_id(&queue), "newer-high");
    assert_eq!(popped_call_id(&queue), "older-standard");
}

#[test]
fn test_queue_insertion_order_tie_break() {
    // the test clock doesn't move between pushes, so enqueue times are exactly equal
    let (queue, _clock) = test_queue();
    for n in 0..10 {
        queue.push(message(&queue, &format!("call-{}", n), EventPriority::Standard)).unwrap();
    }
    for n in 0..10 {
        assert_eq!(popped_call_id(&queue), format!("call-{}", n));
    }
}

#[test]
fn test_pop_after_terminate_drains_in_order() {
    let (queue, clock) = test_queue();
    queue.push(message(&queue, "first", EventPriority::Standard)).unwrap();
    clock.advance(Duration::from_millis(1));
    queue.push(message(&queue, "second", EventPriority::Standard)).unwrap();
    queue.terminate();

    assert_eq!(popped_call_id(&queue), "first");
    assert_eq!(popped_call_id(&queue), "second");
    assert!(queue.pop().is_none());
}

#[test]
fn test_push_if_declines_at_depth_bound() {
    let (queue, _clock) = test_queue();
    queue.push_if(message(&queue, "a", EventPriority::Standard), |len| len < 1).unwrap();
    assert!(queue.push_if(message(&queue, "b", EventPriority::Standard), |len| len < 1).is_err());
    assert_eq!(queue.len(), 1);
    assert_eq!(popped_call_id(&queue), "a");
}

#[test]
fn test_push_after_terminate_hands_event_back() {
    let (queue, _clock) = test_queue();
    queue.terminate();
    assert!(queue.push(message(&queue, "late", EventPriority::Standard)).is_err());
    assert!(queue.is_empty());
}

#[test]
fn test_terminate_wakes_blocked_pop() {
    let (queue, _clock) = test_queue();
    let queue = Arc::new(queue);
    let popper = std::thread::spawn({
        let queue = Arc::clone(&queue);
        move || queue.pop().is_none()
    });
    // give the popper a moment to block
    std::thread::sleep(Duration::from_millis(10));
    queue.terminate();
    assert!(popper.join().unwrap());
}
