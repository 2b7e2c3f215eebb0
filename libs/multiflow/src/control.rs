// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Control-plane commands and their fixed numeric opcodes.
//!
//! Opcodes use the classic `_IO`/`_IOW` layout with type `'D'`, so tools
//! built against the numeric values keep working.

use std::fmt;
use std::str::FromStr;

use crate::error::{MultiflowError, Result};

const MAGIC: u32 = b'D' as u32;
const TYPE_SHIFT: u32 = 8;
const SIZE_SHIFT: u32 = 16;
const DIR_SHIFT: u32 = 30;
const DIR_WRITE: u32 = 1;

const fn io(nr: u32) -> u32 {
    (MAGIC << TYPE_SHIFT) | nr
}

const fn iow(nr: u32, size: u32) -> u32 {
    (DIR_WRITE << DIR_SHIFT) | (size << SIZE_SHIFT) | io(nr)
}

pub const SET_HIGH_PRIORITY_FLOW: u32 = io(1);
pub const SET_LOW_PRIORITY_FLOW: u32 = io(2);
pub const SET_READ_ASYNC: u32 = io(3);
pub const SET_READ_SYNC: u32 = io(4);
pub const SET_WRITE_ASYNC: u32 = io(5);
pub const SET_WRITE_SYNC: u32 = io(6);
pub const SET_TIMEOUT: u32 = iow(6, size_of::<i64>() as u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SelectHighPriorityFlow,
    SelectLowPriorityFlow,
    RequestAsyncRead,
    RequestSyncRead,
    RequestAsyncWrite,
    RequestSyncWrite,
    SetTimeout { secs: u64 },
}

impl ControlCommand {
    /// Decode a raw opcode and argument.
    ///
    /// # Errors
    /// `InvalidRequest` for an unknown opcode or a non-positive timeout.
    pub fn from_raw(opcode: u32, arg: i64) -> Result<Self> {
        let command = match opcode {
            SET_HIGH_PRIORITY_FLOW => ControlCommand::SelectHighPriorityFlow,
            SET_LOW_PRIORITY_FLOW => ControlCommand::SelectLowPriorityFlow,
            SET_READ_ASYNC => ControlCommand::RequestAsyncRead,
            SET_READ_SYNC => ControlCommand::RequestSyncRead,
            SET_WRITE_ASYNC => ControlCommand::RequestAsyncWrite,
            SET_WRITE_SYNC => ControlCommand::RequestSyncWrite,
            SET_TIMEOUT => {
                let secs = u64::try_from(arg).ok().filter(|secs| *secs > 0).ok_or_else(|| {
                    MultiflowError::InvalidRequest(format!(
                        "set_timeout needs a positive number of seconds, got {}",
                        arg
                    ))
                })?;
                ControlCommand::SetTimeout { secs }
            }
            other => {
                return Err(MultiflowError::InvalidRequest(format!(
                    "unknown control opcode {:#x}",
                    other
                )));
            }
        };
        Ok(command)
    }

    pub fn opcode(self) -> u32 {
        match self {
            ControlCommand::SelectHighPriorityFlow => SET_HIGH_PRIORITY_FLOW,
            ControlCommand::SelectLowPriorityFlow => SET_LOW_PRIORITY_FLOW,
            ControlCommand::RequestAsyncRead => SET_READ_ASYNC,
            ControlCommand::RequestSyncRead => SET_READ_SYNC,
            ControlCommand::RequestAsyncWrite => SET_WRITE_ASYNC,
            ControlCommand::RequestSyncWrite => SET_WRITE_SYNC,
            ControlCommand::SetTimeout { .. } => SET_TIMEOUT,
        }
    }

    /// Raw argument to send alongside [`ControlCommand::opcode`].
    pub fn arg(self) -> i64 {
        match self {
            ControlCommand::SetTimeout { secs } => i64::try_from(secs).unwrap_or(i64::MAX),
            _ => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlCommand::SelectHighPriorityFlow => "set_high_priority_flow",
            ControlCommand::SelectLowPriorityFlow => "set_low_priority_flow",
            ControlCommand::RequestAsyncRead => "set_read_async",
            ControlCommand::RequestSyncRead => "set_read_sync",
            ControlCommand::RequestAsyncWrite => "set_write_async",
            ControlCommand::RequestSyncWrite => "set_write_sync",
            ControlCommand::SetTimeout { .. } => "set_timeout",
        }
    }

    /// Build a command from its name and optional value, as typed on a
    /// command line.
    ///
    /// # Errors
    /// `InvalidRequest` for an unknown name, or `set_timeout` without a
    /// positive value.
    pub fn parse_with_value(name: &str, value: Option<i64>) -> Result<Self> {
        match name {
            "set_timeout" => {
                let value = value.ok_or_else(|| {
                    MultiflowError::InvalidRequest("set_timeout requires a value".to_string())
                })?;
                Self::from_raw(SET_TIMEOUT, value)
            }
            other => other.parse(),
        }
    }
}

impl FromStr for ControlCommand {
    type Err = MultiflowError;

    /// Parses the argument-less commands; `set_timeout` needs
    /// [`ControlCommand::parse_with_value`].
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set_high_priority_flow" => Ok(ControlCommand::SelectHighPriorityFlow),
            "set_low_priority_flow" => Ok(ControlCommand::SelectLowPriorityFlow),
            "set_read_async" => Ok(ControlCommand::RequestAsyncRead),
            "set_read_sync" => Ok(ControlCommand::RequestSyncRead),
            "set_write_async" => Ok(ControlCommand::RequestAsyncWrite),
            "set_write_sync" => Ok(ControlCommand::RequestSyncWrite),
            "set_timeout" => Err(MultiflowError::InvalidRequest(
                "set_timeout requires a value".to_string(),
            )),
            other => Err(MultiflowError::InvalidRequest(format!(
                "unknown control command '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::SetTimeout { secs } => write!(f, "set_timeout({})", secs),
            other => f.write_str(other.name()),
        }
    }
}
