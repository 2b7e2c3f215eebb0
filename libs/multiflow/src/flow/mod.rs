// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded segment flows and the admission protocol guarding them.

pub mod admission;
pub mod priority;
pub mod queue;

pub use admission::{AdmissionOutcome, BlockingPolicy};
pub use priority::FlowPriority;
pub use queue::{FlowQueue, FlowSnapshot};
