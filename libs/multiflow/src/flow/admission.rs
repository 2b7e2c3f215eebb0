// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Admission protocol: decides when a segment may enter a flow.
//!
//! Shared verbatim by the synchronous writer (bounded wait) and the deferred
//! writer pool (unbounded wait). Every wakeup re-attempts the reservation;
//! space seen while sleeping may be taken by a concurrent admitter before the
//! woken caller gets to it.

use std::time::{Duration, Instant};

use super::queue::{FlowQueue, RoomWait};
use crate::segment::Segment;

/// How long an admitter (or reader) may stay blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingPolicy {
    WaitForever,
    WaitWithTimeout(Duration),
}

impl BlockingPolicy {
    /// Absolute deadline for this policy, fixed when the operation starts.
    ///
    /// A timeout too large to represent is treated as waiting forever.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            BlockingPolicy::WaitForever => None,
            BlockingPolicy::WaitWithTimeout(timeout) => Instant::now().checked_add(timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The segment is linked at the tail of the flow.
    Admitted { bytes: usize },
    /// No room before the deadline; the segment was dropped unlinked.
    TimedOut,
    /// The flow was closed while waiting; the segment was dropped unlinked.
    Closed,
}

impl AdmissionOutcome {
    /// Bytes accepted by the flow, zero unless admitted.
    pub fn bytes(self) -> usize {
        match self {
            AdmissionOutcome::Admitted { bytes } => bytes,
            AdmissionOutcome::TimedOut | AdmissionOutcome::Closed => 0,
        }
    }
}

impl FlowQueue {
    /// Reserve room for `segment`, waiting per `policy`, then link it.
    ///
    /// A segment longer than the flow capacity can never fit and is refused
    /// with `TimedOut` right away, whatever the policy.
    pub fn try_admit_and_enqueue(
        &self,
        segment: Segment,
        policy: BlockingPolicy,
    ) -> AdmissionOutcome {
        let len = segment.len();
        if len > self.capacity() {
            tracing::warn!(
                "[multiflow][{}][{}] Segment of {} bytes can never fit a {} byte flow",
                self.device(),
                self.priority(),
                len,
                self.capacity()
            );
            return AdmissionOutcome::TimedOut;
        }

        let waiting = self.enter_wait();
        let deadline = policy.deadline();

        loop {
            if self.is_closed() {
                return AdmissionOutcome::Closed;
            }
            if self.try_reserve(len) {
                break;
            }

            tracing::trace!(
                "[multiflow][{}][{}] Flow full ({}/{}), waiting for {} bytes",
                self.device(),
                self.priority(),
                self.occupancy(),
                self.capacity(),
                len
            );

            match self.wait_for_room(len, deadline) {
                RoomWait::Retry => continue,
                RoomWait::Elapsed => {
                    // One last look: space may have opened right at the deadline.
                    if !self.is_closed() && self.try_reserve(len) {
                        break;
                    }
                    return if self.is_closed() {
                        AdmissionOutcome::Closed
                    } else {
                        AdmissionOutcome::TimedOut
                    };
                }
            }
        }

        self.link(segment);
        drop(waiting);
        self.notify_admitted();

        AdmissionOutcome::Admitted { bytes: len }
    }
}
