// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded FIFO of segments shared by concurrent readers and writers.
//!
//! Occupancy is tracked with a lock-free counter; the segment list is only
//! touched under `segments`, for a single push or pop at a time. Two wait
//! conditions hang off every flow:
//! - `readable` is paired with the `segments` lock, so "list is empty" is
//!   checked and slept on atomically by readers.
//! - `writable` is paired with `space_gate`. Admitters check their room
//!   predicate under the gate and everyone who frees space takes the gate
//!   before notifying, which rules out lost wakeups.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::admission::BlockingPolicy;
use super::priority::FlowPriority;
use crate::device::DeviceId;
use crate::error::{MultiflowError, Result};
use crate::segment::Segment;

/// Point-in-time view of one flow, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub priority: FlowPriority,
    pub capacity: usize,
    pub occupancy: usize,
    pub segments: usize,
    pub waiting: usize,
}

pub struct FlowQueue {
    device: DeviceId,
    priority: FlowPriority,
    capacity: usize,
    /// Bytes linked into `segments` plus reservations not yet linked.
    occupancy: AtomicUsize,
    /// Callers currently inside a blocking operation on this flow.
    waiting: AtomicUsize,
    segments: Mutex<VecDeque<Segment>>,
    readable: Condvar,
    space_gate: Mutex<()>,
    writable: Condvar,
    closed: AtomicBool,
}

/// Keeps `waiting` accurate on every exit path of a blocking operation.
pub(super) struct WaitingGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Result of sleeping on the `writable` condition.
pub(super) enum RoomWait {
    /// Room may have opened up (or the flow closed); try again.
    Retry,
    /// The deadline passed with the predicate still false.
    Elapsed,
}

impl FlowQueue {
    pub fn new(device: DeviceId, priority: FlowPriority, capacity: usize) -> Self {
        Self {
            device,
            priority,
            capacity,
            occupancy: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            segments: Mutex::new(VecDeque::new()),
            readable: Condvar::new(),
            space_gate: Mutex::new(()),
            writable: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn priority(&self) -> FlowPriority {
        self.priority
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy, including in-flight reservations.
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Number of segments physically linked.
    pub fn len(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            priority: self.priority,
            capacity: self.capacity,
            occupancy: self.occupancy(),
            segments: self.len(),
            waiting: self.waiting(),
        }
    }

    /// Remove the head segment, blocking until one is linked.
    ///
    /// Returns `Ok(None)` when the policy's deadline elapses with the flow
    /// still empty, or when the flow is closed. The wait is exclusive: each
    /// linked segment wakes a single reader.
    ///
    /// # Errors
    /// `BufferTooSmall` if the head segment is longer than `max_len`. The
    /// segment stays at the head and the wakeup is handed to another reader.
    pub fn dequeue(&self, max_len: usize, policy: BlockingPolicy) -> Result<Option<Segment>> {
        let waiting = self.enter_wait();
        let deadline = policy.deadline();

        let mut segments = self.segments.lock();
        loop {
            if let Some(needed) = segments.front().map(Segment::len) {
                if needed > max_len {
                    drop(segments);
                    self.readable.notify_one();
                    return Err(MultiflowError::BufferTooSmall {
                        needed,
                        available: max_len,
                    });
                }
                break;
            }

            if self.is_closed() {
                return Ok(None);
            }

            match deadline {
                None => self.readable.wait(&mut segments),
                Some(deadline) => {
                    if self.readable.wait_until(&mut segments, deadline).timed_out()
                        && segments.is_empty()
                    {
                        tracing::trace!(
                            "[multiflow][{}][{}] Read wait elapsed",
                            self.device,
                            self.priority
                        );
                        return Ok(None);
                    }
                }
            }
        }

        let Some(segment) = segments.pop_front() else {
            return Ok(None);
        };
        drop(segments);

        drop(waiting);
        self.release(segment.len());
        Ok(Some(segment))
    }

    /// Wake every blocked caller and make further waits return immediately.
    ///
    /// Used at table teardown so no worker stays parked on a flow that will
    /// never drain.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _segments = self.segments.lock();
            self.readable.notify_all();
        }
        {
            let _gate = self.space_gate.lock();
            self.writable.notify_all();
        }
        tracing::debug!(
            "[multiflow][{}][{}] Flow closed",
            self.device,
            self.priority
        );
    }

    pub(super) fn enter_wait(&self) -> WaitingGuard<'_> {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        WaitingGuard {
            waiting: &self.waiting,
        }
    }

    /// Commit `len` bytes of occupancy only if they fit.
    ///
    /// A failed attempt leaves the counter untouched, so readers of the
    /// counter never see an overcommitted value.
    pub(super) fn try_reserve(&self, len: usize) -> bool {
        self.occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(len)
                    .filter(|next| *next <= self.capacity)
            })
            .is_ok()
    }

    fn has_room(&self, len: usize) -> bool {
        self.occupancy()
            .checked_add(len)
            .is_some_and(|next| next <= self.capacity)
    }

    /// Sleep until `len` bytes could fit, the deadline passes, or the flow closes.
    pub(super) fn wait_for_room(&self, len: usize, deadline: Option<Instant>) -> RoomWait {
        let mut gate = self.space_gate.lock();
        while !self.is_closed() && !self.has_room(len) {
            match deadline {
                None => self.writable.wait(&mut gate),
                Some(deadline) => {
                    if self.writable.wait_until(&mut gate, deadline).timed_out() {
                        return RoomWait::Elapsed;
                    }
                }
            }
        }
        RoomWait::Retry
    }

    /// Append a reserved segment at the tail and wake one reader.
    pub(super) fn link(&self, segment: Segment) {
        self.segments.lock().push_back(segment);
        self.readable.notify_one();
    }

    /// Admission succeeded: let one blocked admitter re-check.
    pub(super) fn notify_admitted(&self) {
        let _gate = self.space_gate.lock();
        self.writable.notify_one();
    }

    /// Give back `len` bytes and wake every admitter, since the freed space
    /// may satisfy several smaller writers at once.
    fn release(&self, len: usize) {
        self.occupancy.fetch_sub(len, Ordering::AcqRel);
        let _gate = self.space_gate.lock();
        self.writable.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::AdmissionOutcome;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn segment(bytes: &[u8]) -> Segment {
        Segment::copy_from_slice(bytes, 1024).unwrap()
    }

    fn short() -> BlockingPolicy {
        BlockingPolicy::WaitWithTimeout(Duration::from_millis(50))
    }

    #[test]
    fn test_new_flow_is_empty() {
        let flow = FlowQueue::new(0, FlowPriority::High, 64);
        assert_eq!(flow.capacity(), 64);
        assert_eq!(flow.occupancy(), 0);
        assert_eq!(flow.waiting(), 0);
        assert!(flow.is_empty());
        assert!(!flow.is_closed());
    }

    #[test]
    fn test_dequeue_returns_head_and_releases_space() {
        let flow = FlowQueue::new(0, FlowPriority::High, 64);
        flow.try_admit_and_enqueue(segment(b"first"), short());
        flow.try_admit_and_enqueue(segment(b"second"), short());
        assert_eq!(flow.occupancy(), 11);

        let head = flow.dequeue(1024, short()).unwrap().unwrap();
        assert_eq!(head.as_bytes(), b"first");
        assert_eq!(flow.occupancy(), 6);
        assert_eq!(flow.len(), 1);
    }

    #[test]
    fn test_dequeue_times_out_on_empty_flow() {
        let flow = FlowQueue::new(1, FlowPriority::Low, 64);
        let started = Instant::now();
        assert!(flow.dequeue(1024, short()).unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(flow.waiting(), 0);
    }

    #[test]
    fn test_buffer_too_small_keeps_segment() {
        let flow = FlowQueue::new(0, FlowPriority::High, 64);
        flow.try_admit_and_enqueue(segment(b"0123456789"), short());

        let err = flow.dequeue(4, short()).unwrap_err();
        assert!(matches!(
            err,
            MultiflowError::BufferTooSmall {
                needed: 10,
                available: 4
            }
        ));
        assert_eq!(flow.len(), 1);
        assert_eq!(flow.occupancy(), 10);

        let head = flow.dequeue(10, short()).unwrap().unwrap();
        assert_eq!(head.as_bytes(), b"0123456789");
    }

    #[test]
    fn test_blocked_reader_wakes_on_link() {
        let flow = Arc::new(FlowQueue::new(0, FlowPriority::High, 64));
        let reader_flow = Arc::clone(&flow);
        let reader = thread::spawn(move || {
            reader_flow
                .dequeue(1024, BlockingPolicy::WaitWithTimeout(Duration::from_secs(5)))
                .unwrap()
        });

        thread::sleep(Duration::from_millis(50));
        let outcome = flow.try_admit_and_enqueue(segment(b"wake"), short());
        assert_eq!(outcome, AdmissionOutcome::Admitted { bytes: 4 });

        let received = reader.join().unwrap().unwrap();
        assert_eq!(received.as_bytes(), b"wake");
        assert_eq!(flow.occupancy(), 0);
    }

    #[test]
    fn test_reservation_never_overcommits() {
        let flow = FlowQueue::new(0, FlowPriority::Low, 10);
        assert!(flow.try_reserve(6));
        assert!(!flow.try_reserve(5));
        assert_eq!(flow.occupancy(), 6);
        assert!(flow.try_reserve(4));
        assert_eq!(flow.occupancy(), 10);
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let flow = Arc::new(FlowQueue::new(0, FlowPriority::Low, 64));
        let reader_flow = Arc::clone(&flow);
        let reader =
            thread::spawn(move || reader_flow.dequeue(1024, BlockingPolicy::WaitForever));

        thread::sleep(Duration::from_millis(50));
        flow.close();

        assert!(reader.join().unwrap().unwrap().is_none());
        assert!(flow.is_closed());
        assert_eq!(flow.waiting(), 0);
    }

    #[test]
    fn test_snapshot_reports_counters() {
        let flow = FlowQueue::new(3, FlowPriority::High, 64);
        flow.try_admit_and_enqueue(segment(b"abc"), short());
        let snapshot = flow.snapshot();
        assert_eq!(
            snapshot,
            FlowSnapshot {
                priority: FlowPriority::High,
                capacity: 64,
                occupancy: 3,
                segments: 1,
                waiting: 0,
            }
        );
    }
}
