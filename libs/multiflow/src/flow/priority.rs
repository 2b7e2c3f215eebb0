// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of a device's two flows an operation targets.
///
/// HIGH is written synchronously by the caller, LOW through the deferred
/// writer pool. Both are read synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowPriority {
    Low,
    High,
}

impl FlowPriority {
    pub const ALL: [FlowPriority; 2] = [FlowPriority::Low, FlowPriority::High];

    /// Slot of this flow inside a device.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            FlowPriority::Low => 0,
            FlowPriority::High => 1,
        }
    }

    /// Raw selector value as stored in the device.
    #[inline]
    pub const fn as_raw(self) -> u8 {
        self.index() as u8
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(FlowPriority::Low),
            1 => Some(FlowPriority::High),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            FlowPriority::Low => "LOW",
            FlowPriority::High => "HIGH",
        }
    }
}

impl fmt::Display for FlowPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
