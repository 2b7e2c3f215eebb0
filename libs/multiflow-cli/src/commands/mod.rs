// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod device;
pub mod serve;
pub mod stats;
pub mod stress;
