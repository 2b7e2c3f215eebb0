// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use crate::device::DeviceId;

#[derive(Error, Debug)]
pub enum MultiflowError {
    #[error("device {0} is disabled")]
    Permission(DeviceId),

    #[error("no space left on device: {0}")]
    ResourceExhausted(String),

    #[error("transfer failed: {0}")]
    TransferFault(String),

    #[error("device {device} flow selector is in a bad state ({raw})")]
    InvalidState { device: DeviceId, raw: u8 },

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("buffer too small: segment needs {needed} bytes, buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("deferred writer pool is shut down")]
    ShuttingDown,

    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MultiflowError {
    /// Stable identifier used on the wire and in CLI output.
    pub fn code(&self) -> &str {
        match self {
            MultiflowError::Permission(_) => "permission",
            MultiflowError::ResourceExhausted(_) => "resource_exhausted",
            MultiflowError::TransferFault(_) => "transfer_fault",
            MultiflowError::InvalidState { .. } => "invalid_state",
            MultiflowError::Unsupported(_) => "unsupported",
            MultiflowError::InvalidRequest(_) => "invalid_request",
            MultiflowError::BufferTooSmall { .. } => "buffer_too_small",
            MultiflowError::DeviceNotFound(_) => "device_not_found",
            MultiflowError::Configuration(_) => "configuration",
            MultiflowError::ShuttingDown => "shutting_down",
            MultiflowError::Remote { code, .. } => code.as_str(),
            MultiflowError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, MultiflowError>;
