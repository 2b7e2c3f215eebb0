// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! An attached handle on one device: the read, write and control entry points.

use std::io::Read;
use std::sync::Arc;

use crate::control::ControlCommand;
use crate::deferred::DeferredWritePool;
use crate::device::{Device, DeviceId};
use crate::error::{MultiflowError, Result};
use crate::flow::{AdmissionOutcome, BlockingPolicy, FlowPriority, FlowQueue};
use crate::segment::Segment;

/// Obtained from [`crate::DeviceTable::open`]. Holds no state of its own:
/// the selected flow and timeout belong to the device and are shared with
/// every other session on it.
pub struct Session<'a> {
    device: &'a Device,
    pool: &'a DeferredWritePool,
    max_segment_size: usize,
}

impl<'a> Session<'a> {
    pub(crate) fn new(device: &'a Device, pool: &'a DeferredWritePool, max_segment_size: usize) -> Self {
        Self {
            device,
            pool,
            max_segment_size,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn device(&self) -> &Device {
        self.device
    }

    /// Write one segment to the selected flow.
    ///
    /// HIGH writes wait up to the device timeout and return `Ok(0)` if no
    /// room opened up. LOW writes are handed to the deferred pool and return
    /// the full length right away.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        let priority = self.device.flow_selector()?;
        let segment = Segment::copy_from_slice(bytes, self.max_segment_size)
            .inspect_err(|e| self.log_segment_error(e))?;
        self.dispatch(priority, segment)
    }

    /// Like [`Session::write`], pulling exactly `len` bytes from `reader`.
    pub fn write_from<R: Read>(&self, reader: &mut R, len: usize) -> Result<usize> {
        let priority = self.device.flow_selector()?;
        let segment = Segment::read_from(reader, len, self.max_segment_size)
            .inspect_err(|e| self.log_segment_error(e))?;
        self.dispatch(priority, segment)
    }

    fn dispatch(&self, priority: FlowPriority, segment: Segment) -> Result<usize> {
        let id = self.device.id();
        let flow = self.device.flow(priority);
        match priority {
            FlowPriority::Low => {
                let len = segment.len();
                tracing::info!("[multiflow][{}][LOW] Write Deferred - {}", id, segment);
                self.pool.submit(Arc::clone(flow), segment)?;
                Ok(len)
            }
            FlowPriority::High => {
                let preview = segment.audit_preview();
                let policy = BlockingPolicy::WaitWithTimeout(self.device.timeout());
                match flow.try_admit_and_enqueue(segment, policy) {
                    AdmissionOutcome::Admitted { bytes } => {
                        if let Some(preview) = preview {
                            tracing::info!("[multiflow][{}][HIGH] Written {}", id, preview);
                        }
                        Ok(bytes)
                    }
                    AdmissionOutcome::TimedOut => {
                        tracing::info!("[multiflow][{}][HIGH] Write - Timeout Expired", id);
                        Ok(0)
                    }
                    AdmissionOutcome::Closed => Err(MultiflowError::ShuttingDown),
                }
            }
        }
    }

    /// Read the head segment of the selected flow into `buf`.
    ///
    /// Returns `Ok(0)` if the device timeout elapsed with the flow empty.
    ///
    /// # Errors
    /// `BufferTooSmall` if the head segment does not fit in `buf`; the
    /// segment stays queued.
    pub fn read_into(&self, buf: &mut [u8]) -> Result<usize> {
        match self.take_segment(buf.len())? {
            Some(segment) => {
                let len = segment.len();
                buf[..len].copy_from_slice(segment.as_bytes());
                Ok(len)
            }
            None => Ok(0),
        }
    }

    /// Read the head segment of the selected flow as an owned buffer, empty
    /// on timeout.
    pub fn read(&self, capacity: usize) -> Result<Vec<u8>> {
        Ok(self
            .take_segment(capacity)?
            .map(Segment::into_vec)
            .unwrap_or_default())
    }

    fn take_segment(&self, capacity: usize) -> Result<Option<Segment>> {
        let id = self.device.id();
        let priority = self.device.flow_selector()?;
        let flow: &FlowQueue = self.device.flow(priority);
        let policy = BlockingPolicy::WaitWithTimeout(self.device.timeout());

        let segment = flow.dequeue(capacity, policy).inspect_err(|e| {
            tracing::warn!("[multiflow][{}][{}] Read rejected: {}", id, priority, e);
        })?;
        match &segment {
            Some(segment) => tracing::info!("[multiflow][{}][{}] Read {}", id, priority, segment),
            None => tracing::info!("[multiflow][{}][{}] Read - Timeout Expired", id, priority),
        }
        Ok(segment)
    }

    /// Apply a control command to the device.
    ///
    /// # Errors
    /// `Unsupported` for execution modes the selected flow cannot provide,
    /// `InvalidRequest` for a timeout that overflows the tick counter,
    /// `InvalidState` if the selector is corrupt and the command depends on it.
    pub fn control(&self, command: ControlCommand) -> Result<()> {
        let id = self.device.id();
        match command {
            ControlCommand::SelectHighPriorityFlow => {
                self.device.select_flow(FlowPriority::High);
                tracing::info!("[multiflow][{}] Set High Priority Flow", id);
            }
            ControlCommand::SelectLowPriorityFlow => {
                self.device.select_flow(FlowPriority::Low);
                tracing::info!("[multiflow][{}] Set Low Priority Flow", id);
            }
            ControlCommand::RequestAsyncRead => {
                tracing::warn!("[multiflow][{}] Asynchronous Read not implemented", id);
                return Err(MultiflowError::Unsupported(
                    "asynchronous read".to_string(),
                ));
            }
            ControlCommand::RequestSyncRead => {
                tracing::info!("[multiflow][{}] Synchronous Read Set", id);
            }
            ControlCommand::RequestAsyncWrite => match self.device.flow_selector()? {
                FlowPriority::Low => {
                    tracing::info!("[multiflow][{}][LOW] Asynchronous Write Set", id);
                }
                FlowPriority::High => {
                    tracing::warn!("[multiflow][{}][HIGH] Asynchronous Write not implemented", id);
                    return Err(MultiflowError::Unsupported(
                        "asynchronous write on the high priority flow".to_string(),
                    ));
                }
            },
            ControlCommand::RequestSyncWrite => match self.device.flow_selector()? {
                FlowPriority::High => {
                    tracing::info!("[multiflow][{}][HIGH] Synchronous Write Set", id);
                }
                FlowPriority::Low => {
                    tracing::warn!("[multiflow][{}][LOW] Synchronous Write not implemented", id);
                    return Err(MultiflowError::Unsupported(
                        "synchronous write on the low priority flow".to_string(),
                    ));
                }
            },
            ControlCommand::SetTimeout { secs } => {
                let ticks = self.device.set_timeout_secs(secs)?;
                tracing::info!("[multiflow][{}] New Timeout Set: {} ticks", id, ticks);
            }
        }
        Ok(())
    }

    /// Decode a raw opcode and argument, then apply it.
    pub fn control_raw(&self, opcode: u32, arg: i64) -> Result<()> {
        let command = ControlCommand::from_raw(opcode, arg).inspect_err(|_| {
            tracing::warn!(
                "[multiflow][{}] Invalid I/O Ctl CMD={:#x}",
                self.device.id(),
                opcode
            );
        })?;
        self.control(command)
    }

    fn log_segment_error(&self, err: &MultiflowError) {
        let id = self.device.id();
        match err {
            MultiflowError::ResourceExhausted(_) => {
                tracing::warn!("[multiflow][{}] No Space Left on Device", id);
            }
            MultiflowError::TransferFault(_) => {
                tracing::warn!("[multiflow][{}] Failed to copy write value from caller", id);
            }
            other => {
                tracing::warn!("[multiflow][{}] Write rejected: {}", id, other);
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        tracing::debug!("[multiflow][{}] Device Closed", self.device.id());
    }
}
