// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Multiflow - per-device, dual-priority bounded segment queues.
//!
//! A [`DeviceTable`] holds a fixed set of devices. Each device carries a
//! HIGH and a LOW flow: bounded FIFOs of byte segments shared by any number
//! of concurrent readers and writers. HIGH writes are admitted on the
//! caller's thread with a timeout; LOW writes are handed to a shared worker
//! pool that admits them without a deadline. Reads are synchronous on both.
//!
//! ```no_run
//! use multiflow::{ControlCommand, DeviceTable};
//!
//! let table = DeviceTable::with_defaults()?;
//! let session = table.open_path("/dev/multiflow0")?;
//! session.control(ControlCommand::SelectHighPriorityFlow)?;
//! session.write(b"hello")?;
//! let bytes = session.read(1024)?;
//! assert_eq!(bytes, b"hello");
//! # Ok::<(), multiflow::MultiflowError>(())
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod deferred;
pub mod device;
pub mod error;
pub mod flow;
pub mod registry;
pub mod segment;
pub mod server;
pub mod session;
pub mod wire;

pub use client::DeviceClient;
pub use config::MultiflowConfig;
pub use control::ControlCommand;
pub use device::{Device, DeviceId, DeviceSnapshot, TickRate};
pub use error::{MultiflowError, Result};
pub use flow::{AdmissionOutcome, BlockingPolicy, FlowPriority, FlowQueue, FlowSnapshot};
pub use registry::DeviceTable;
pub use segment::Segment;
pub use server::DeviceServer;
pub use session::Session;

/// Default socket path of the device host.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/multiflow.sock";

/// Crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
