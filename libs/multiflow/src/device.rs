// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! A single addressable device: two flows plus the shared per-device settings.
//!
//! The flow selector and timeout live on the device, not on a session, so
//! every session attached to the same device observes the last control call
//! made by any of them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MultiflowError, Result};
use crate::flow::{FlowPriority, FlowQueue, FlowSnapshot};

pub type DeviceId = usize;

/// Conversion between wall-clock durations and the device's tick counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    hz: u64,
}

impl TickRate {
    pub const fn new(hz: u64) -> Self {
        Self { hz }
    }

    pub const fn hz(self) -> u64 {
        self.hz
    }

    /// Ticks for `secs` whole seconds, `None` on overflow.
    pub fn ticks_for_secs(self, secs: u64) -> Option<u64> {
        secs.checked_mul(self.hz)
    }

    pub fn to_duration(self, ticks: u64) -> Duration {
        let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(self.hz.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Point-in-time view of one device, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub enabled: bool,
    /// `None` when the stored selector is corrupt.
    pub selector: Option<FlowPriority>,
    pub timeout_ticks: u64,
    pub low: FlowSnapshot,
    pub high: FlowSnapshot,
}

pub struct Device {
    id: DeviceId,
    enabled: AtomicBool,
    selector: AtomicU8,
    timeout_ticks: AtomicU64,
    tick_rate: TickRate,
    flows: [Arc<FlowQueue>; 2],
}

impl Device {
    pub fn new(id: DeviceId, capacity: usize, timeout_ticks: u64, tick_rate: TickRate) -> Self {
        Self {
            id,
            enabled: AtomicBool::new(true),
            selector: AtomicU8::new(FlowPriority::Low.as_raw()),
            timeout_ticks: AtomicU64::new(timeout_ticks),
            tick_rate,
            flows: [
                Arc::new(FlowQueue::new(id, FlowPriority::Low, capacity)),
                Arc::new(FlowQueue::new(id, FlowPriority::High, capacity)),
            ],
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Currently selected default flow.
    ///
    /// # Errors
    /// `InvalidState` if the stored selector is neither HIGH nor LOW.
    pub fn flow_selector(&self) -> Result<FlowPriority> {
        let raw = self.selector.load(Ordering::Acquire);
        FlowPriority::from_raw(raw).ok_or_else(|| {
            tracing::warn!(
                "[multiflow][{}] Default Flow is in a Bad State ({}). Update it.",
                self.id,
                raw
            );
            MultiflowError::InvalidState {
                device: self.id,
                raw,
            }
        })
    }

    pub fn select_flow(&self, priority: FlowPriority) {
        self.selector.store(priority.as_raw(), Ordering::Release);
    }

    pub fn timeout_ticks(&self) -> u64 {
        self.timeout_ticks.load(Ordering::Acquire)
    }

    pub fn set_timeout_ticks(&self, ticks: u64) {
        self.timeout_ticks.store(ticks, Ordering::Release);
    }

    /// Store a timeout given in whole seconds; returns the stored tick count.
    ///
    /// # Errors
    /// `InvalidRequest` for zero seconds or a tick count that overflows.
    pub fn set_timeout_secs(&self, secs: u64) -> Result<u64> {
        if secs == 0 {
            return Err(MultiflowError::InvalidRequest(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }
        let ticks = self.tick_rate.ticks_for_secs(secs).ok_or_else(|| {
            MultiflowError::InvalidRequest(format!("timeout of {} seconds is too large", secs))
        })?;
        self.set_timeout_ticks(ticks);
        Ok(ticks)
    }

    /// Timeout applied to synchronous reads and writes.
    pub fn timeout(&self) -> Duration {
        self.tick_rate.to_duration(self.timeout_ticks())
    }

    pub fn flow(&self, priority: FlowPriority) -> &Arc<FlowQueue> {
        &self.flows[priority.index()]
    }

    pub fn flows(&self) -> &[Arc<FlowQueue>; 2] {
        &self.flows
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id,
            enabled: self.is_enabled(),
            selector: FlowPriority::from_raw(self.selector.load(Ordering::Acquire)),
            timeout_ticks: self.timeout_ticks(),
            low: self.flow(FlowPriority::Low).snapshot(),
            high: self.flow(FlowPriority::High).snapshot(),
        }
    }

    /// Overwrite the raw selector, bypassing validation.
    #[cfg(test)]
    pub(crate) fn store_raw_selector(&self, raw: u8) {
        self.selector.store(raw, Ordering::Release);
    }
}
