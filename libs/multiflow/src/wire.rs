// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Newline-delimited JSON messages exchanged with a device host.

use serde::{Deserialize, Serialize};

use crate::device::DeviceSnapshot;
use crate::error::{MultiflowError, Result};

/// One request line. `device` accepts anything [`crate::DeviceTable::resolve`] does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Write {
        device: String,
        data: Vec<u8>,
    },
    Read {
        device: String,
        capacity: usize,
    },
    Control {
        device: String,
        opcode: u32,
        #[serde(default)]
        arg: i64,
    },
    SetEnabled {
        device: String,
        enabled: bool,
    },
    Stats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Written { bytes: usize },
    Data { bytes: Vec<u8> },
    Done,
    Stats { devices: Vec<DeviceSnapshot> },
    Error { code: String, message: String },
}

impl Response {
    pub fn from_error(err: &MultiflowError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Turn an `error` response into [`MultiflowError::Remote`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            Response::Error { code, message } => Err(MultiflowError::Remote { code, message }),
            other => Ok(other),
        }
    }
}

/// Room in a request line for everything but the payload bytes.
const REQUEST_ENVELOPE_BYTES: usize = 4096;

/// Longest request line a host accepts when segments are capped at
/// `max_segment_size` bytes. Each payload byte costs at most four bytes of
/// JSON (`255,`).
pub fn max_request_line(max_segment_size: usize) -> usize {
    max_segment_size
        .saturating_mul(4)
        .saturating_add(REQUEST_ENVELOPE_BYTES)
}

/// Serialize `message` as a single line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| MultiflowError::TransferFault(format!("failed to encode message: {}", e)))?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (trailing newline optional).
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &[u8]) -> Result<T> {
    serde_json::from_slice(line.trim_ascii_end())
        .map_err(|e| MultiflowError::TransferFault(format!("malformed message: {}", e)))
}
