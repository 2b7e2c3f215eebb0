// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared worker pool completing low-priority writes off the caller's thread.
//!
//! Submission hands an owned segment to an unbounded channel and returns.
//! A worker later runs admission with no deadline; it may sit inside a single
//! unit for as long as the flow stays full.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::{MultiflowError, Result};
use crate::flow::{AdmissionOutcome, BlockingPolicy, FlowQueue};
use crate::segment::Segment;

/// A segment waiting for a worker to admit it into its flow.
struct DeferredWrite {
    flow: Arc<FlowQueue>,
    segment: Segment,
}

pub struct DeferredWritePool {
    /// Submitters share the read side; only shutdown takes the write side.
    sender: RwLock<Option<Sender<DeferredWrite>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Units submitted but not yet finished by a worker.
    in_flight: Arc<AtomicUsize>,
}

impl DeferredWritePool {
    /// Start `threads` workers (at least one).
    ///
    /// # Errors
    /// `Io` if a worker thread cannot be spawned. Workers already started
    /// are stopped before returning.
    pub fn start(threads: usize) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<DeferredWrite>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let pool = Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(Vec::new()),
            in_flight: Arc::clone(&in_flight),
        };

        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("multiflow-worker-{}", index))
                .spawn(move || worker_loop(index, receiver, in_flight));
            match handle {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e.into());
                }
            }
        }

        tracing::debug!("[DeferredWritePool] Started {} workers", threads.max(1));
        Ok(pool)
    }

    /// Queue `segment` for admission into `flow`. Never blocks.
    ///
    /// # Errors
    /// `ShuttingDown` once [`DeferredWritePool::shutdown`] has run.
    pub fn submit(&self, flow: Arc<FlowQueue>, segment: Segment) -> Result<()> {
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            return Err(MultiflowError::ShuttingDown);
        };
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if sender.send(DeferredWrite { flow, segment }).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(MultiflowError::ShuttingDown);
        }
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop accepting work and join every worker once the queue drains.
    ///
    /// Workers blocked inside admission only return once their flow frees
    /// space or is closed, so close the flows first.
    pub fn shutdown(&self) {
        drop(self.sender.write().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("[DeferredWritePool] Worker panicked");
            }
        }
        tracing::debug!("[DeferredWritePool] All workers joined");
    }
}

impl Drop for DeferredWritePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, receiver: Receiver<DeferredWrite>, in_flight: Arc<AtomicUsize>) {
    tracing::trace!("[DeferredWritePool] Worker {} started", index);
    while let Ok(DeferredWrite { flow, segment }) = receiver.recv() {
        let len = segment.len();
        let preview = segment.audit_preview();
        match flow.try_admit_and_enqueue(segment, BlockingPolicy::WaitForever) {
            AdmissionOutcome::Admitted { bytes } => {
                if let Some(preview) = preview {
                    tracing::info!(
                        "[multiflow][{}][{}] Written {} bytes: {}",
                        flow.device(),
                        flow.priority(),
                        bytes,
                        preview
                    );
                }
            }
            AdmissionOutcome::TimedOut => {
                tracing::warn!(
                    "[multiflow][{}][{}] Deferred write of {} bytes dropped, segment can never fit",
                    flow.device(),
                    flow.priority(),
                    len
                );
            }
            AdmissionOutcome::Closed => {
                tracing::warn!(
                    "[multiflow][{}][{}] Deferred write of {} bytes dropped at teardown",
                    flow.device(),
                    flow.priority(),
                    len
                );
            }
        }
        in_flight.fetch_sub(1, Ordering::AcqRel);
    }
    tracing::trace!("[DeferredWritePool] Worker {} exiting", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowPriority;
    use std::time::{Duration, Instant};

    fn segment(bytes: &[u8]) -> Segment {
        Segment::copy_from_slice(bytes, 1024).unwrap()
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_submitted_segment_is_admitted() {
        let pool = DeferredWritePool::start(2).unwrap();
        assert_eq!(pool.worker_count(), 2);
        let flow = Arc::new(FlowQueue::new(0, FlowPriority::Low, 64));

        pool.submit(Arc::clone(&flow), segment(b"deferred")).unwrap();
        assert!(wait_until(|| flow.len() == 1));
        assert_eq!(flow.occupancy(), 8);
        assert!(wait_until(|| pool.in_flight() == 0));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = DeferredWritePool::start(1).unwrap();
        pool.shutdown();
        let flow = Arc::new(FlowQueue::new(0, FlowPriority::Low, 64));
        assert!(matches!(
            pool.submit(flow, segment(b"late")),
            Err(MultiflowError::ShuttingDown)
        ));
        assert_eq!(pool.worker_count(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_worker_blocks_until_space_frees() {
        let pool = DeferredWritePool::start(1).unwrap();
        let flow = Arc::new(FlowQueue::new(0, FlowPriority::Low, 16));
        pool.submit(Arc::clone(&flow), segment(&[b'a'; 16])).unwrap();
        pool.submit(Arc::clone(&flow), segment(&[b'b'; 8])).unwrap();

        assert!(wait_until(|| flow.waiting() == 1));
        assert_eq!(flow.len(), 1);
        assert_eq!(pool.in_flight(), 1);

        let first = flow
            .dequeue(1024, BlockingPolicy::WaitWithTimeout(Duration::from_secs(1)))
            .unwrap()
            .unwrap();
        assert_eq!(first.as_bytes(), &[b'a'; 16]);
        assert!(wait_until(|| flow.len() == 1 && pool.in_flight() == 0));
        assert_eq!(flow.occupancy(), 8);
    }

    #[test]
    fn test_close_releases_blocked_worker_for_shutdown() {
        let pool = DeferredWritePool::start(1).unwrap();
        let flow = Arc::new(FlowQueue::new(0, FlowPriority::Low, 8));
        pool.submit(Arc::clone(&flow), segment(&[b'a'; 8])).unwrap();
        pool.submit(Arc::clone(&flow), segment(&[b'b'; 8])).unwrap();
        assert!(wait_until(|| flow.waiting() == 1));

        flow.close();
        pool.shutdown();
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(flow.len(), 1);
    }

    #[test]
    fn test_submit_does_not_wait_for_other_submitters() {
        let pool = DeferredWritePool::start(1).unwrap();
        let flow = Arc::new(FlowQueue::new(1, FlowPriority::Low, 64));

        // Stand in for a submitter paused mid-send.
        let parked = pool.sender.read();
        thread::scope(|scope| {
            let submitter = scope.spawn(|| pool.submit(Arc::clone(&flow), segment(b"other")));
            assert!(wait_until(|| submitter.is_finished()));
            submitter.join().unwrap().unwrap();
        });
        drop(parked);

        assert!(wait_until(|| flow.len() == 1));
    }

    #[test]
    fn test_concurrent_submits_progress_while_worker_parked() {
        let pool = DeferredWritePool::start(2).unwrap();
        let full = Arc::new(FlowQueue::new(0, FlowPriority::Low, 8));
        pool.submit(Arc::clone(&full), segment(&[b'a'; 8])).unwrap();
        pool.submit(Arc::clone(&full), segment(&[b'b'; 8])).unwrap();
        assert!(wait_until(|| full.waiting() == 1));

        let flows: Vec<Arc<FlowQueue>> = (1..=8)
            .map(|device| Arc::new(FlowQueue::new(device, FlowPriority::Low, 64)))
            .collect();
        thread::scope(|scope| {
            for flow in &flows {
                let pool = &pool;
                scope.spawn(move || pool.submit(Arc::clone(flow), segment(b"parallel")).unwrap());
            }
        });

        assert!(wait_until(|| flows.iter().all(|flow| flow.len() == 1)));
        assert_eq!(full.waiting(), 1);
        assert_eq!(pool.in_flight(), 1);

        full.close();
        pool.shutdown();
    }
}
