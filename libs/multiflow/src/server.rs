// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Device host: serves a [`DeviceTable`] over a Unix domain socket.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{MultiflowError, Result};
use crate::registry::DeviceTable;
use crate::wire::{self, Request, Response};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct DeviceServer {
    listener: UnixListener,
    socket_path: PathBuf,
    table: Arc<DeviceTable>,
}

impl DeviceServer {
    /// Bind `socket_path`, replacing a stale socket file left by a previous run.
    pub fn bind(socket_path: impl AsRef<Path>, table: Arc<DeviceTable>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if socket_path.exists() {
            tracing::debug!("[DeviceServer] Removing stale socket {}", socket_path.display());
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        tracing::info!("[DeviceServer] Listening on {}", socket_path.display());
        Ok(Self {
            listener,
            socket_path,
            table,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn table(&self) -> &Arc<DeviceTable> {
        &self.table
    }

    /// Accept connections until `shutdown` is set, then wait for the
    /// connection handlers and remove the socket file.
    pub fn run_until(self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();
        let mut next_connection = 0usize;

        let result = loop {
            if shutdown.load(Ordering::Acquire) {
                break Ok(());
            }
            match self.listener.accept() {
                Ok((stream, _)) => {
                    let index = next_connection;
                    next_connection += 1;
                    let table = Arc::clone(&self.table);
                    let shutdown = Arc::clone(&shutdown);
                    let spawned = thread::Builder::new()
                        .name(format!("multiflow-conn-{}", index))
                        .spawn(move || {
                            if let Err(e) = handle_connection(stream, &table, &shutdown) {
                                tracing::warn!("[DeviceServer] Connection {} failed: {}", index, e);
                            }
                        });
                    match spawned {
                        Ok(handle) => handlers.push(handle),
                        Err(e) => tracing::error!("[DeviceServer] Failed to spawn handler: {}", e),
                    }
                    handlers.retain(|handle| !handle.is_finished());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            }
        };

        tracing::info!("[DeviceServer] Shutting down, {} open connections", handlers.len());
        for handle in handlers {
            if handle.join().is_err() {
                tracing::error!("[DeviceServer] Connection handler panicked");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::warn!(
                "[DeviceServer] Failed to remove {}: {}",
                self.socket_path.display(),
                e
            );
        }
        result
    }
}

fn handle_connection(stream: UnixStream, table: &DeviceTable, shutdown: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CONNECTION_POLL_INTERVAL))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let limit = wire::max_request_line(table.config().flow.max_segment_size);
    let mut line = Vec::new();

    loop {
        // A timed-out read keeps whatever it consumed in `line`.
        let remaining = limit.saturating_sub(line.len()) as u64;
        match (&mut reader).take(remaining).read_until(b'\n', &mut line) {
            Ok(0) if line.is_empty() => return Ok(()),
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if shutdown.load(Ordering::Acquire) {
                    return Ok(());
                }
                continue;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        if line.len() >= limit && line.last() != Some(&b'\n') {
            let err = MultiflowError::TransferFault(format!(
                "request line exceeds the {} byte limit",
                limit
            ));
            tracing::warn!("[DeviceServer] Dropping connection: {}", err);
            writer.write_all(wire::encode_line(&Response::from_error(&err))?.as_bytes())?;
            writer.flush()?;
            return Ok(());
        }

        let response = match wire::decode_line::<Request>(&line) {
            Ok(request) => dispatch(table, request),
            Err(e) => {
                tracing::warn!("[DeviceServer] Rejected request: {}", e);
                Response::from_error(&e)
            }
        };
        line.clear();

        writer.write_all(wire::encode_line(&response)?.as_bytes())?;
        writer.flush()?;
    }
}

/// Execute one request against `table`, attaching to the device first.
pub fn dispatch(table: &DeviceTable, request: Request) -> Response {
    let outcome = match request {
        Request::Write { device, data } => table
            .open_path(&device)
            .and_then(|session| session.write(&data))
            .map(|bytes| Response::Written { bytes }),
        Request::Read { device, capacity } => table
            .open_path(&device)
            .and_then(|session| session.read(capacity))
            .map(|bytes| Response::Data { bytes }),
        Request::Control {
            device,
            opcode,
            arg,
        } => table
            .open_path(&device)
            .and_then(|session| session.control_raw(opcode, arg))
            .map(|()| Response::Done),
        Request::SetEnabled { device, enabled } => table
            .resolve(&device)
            .and_then(|id| table.set_enabled(id, enabled))
            .map(|()| Response::Done),
        Request::Stats => Ok(Response::Stats {
            devices: table.snapshot(),
        }),
    };
    outcome.unwrap_or_else(|e| Response::from_error(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MultiflowConfig;
    use crate::control::{SET_HIGH_PRIORITY_FLOW, SET_TIMEOUT};

    fn table() -> DeviceTable {
        let mut config = MultiflowConfig::default();
        config.devices.count = 2;
        config.devices.disabled = vec![1];
        config.workers.threads = Some(1);
        DeviceTable::new(config).unwrap()
    }

    fn control(device: &str, opcode: u32, arg: i64) -> Request {
        Request::Control {
            device: device.to_string(),
            opcode,
            arg,
        }
    }

    #[test]
    fn test_dispatch_write_and_read() {
        let table = table();
        assert_eq!(
            dispatch(&table, control("0", SET_HIGH_PRIORITY_FLOW, 0)),
            Response::Done
        );
        assert_eq!(
            dispatch(
                &table,
                Request::Write {
                    device: "/dev/multiflow0".to_string(),
                    data: b"abc".to_vec(),
                }
            ),
            Response::Written { bytes: 3 }
        );
        assert_eq!(
            dispatch(
                &table,
                Request::Read {
                    device: "multiflow0".to_string(),
                    capacity: 16,
                }
            ),
            Response::Data {
                bytes: b"abc".to_vec()
            }
        );
    }

    #[test]
    fn test_dispatch_reports_error_codes() {
        let table = table();
        let disabled = dispatch(
            &table,
            Request::Read {
                device: "1".to_string(),
                capacity: 16,
            },
        );
        assert!(matches!(disabled, Response::Error { ref code, .. } if code == "permission"));

        let missing = dispatch(&table, control("9", SET_HIGH_PRIORITY_FLOW, 0));
        assert!(matches!(missing, Response::Error { ref code, .. } if code == "device_not_found"));

        let bad_timeout = dispatch(&table, control("0", SET_TIMEOUT, 0));
        assert!(matches!(bad_timeout, Response::Error { ref code, .. } if code == "invalid_request"));
    }

    #[test]
    fn test_dispatch_enable_and_stats() {
        let table = table();
        assert_eq!(
            dispatch(
                &table,
                Request::SetEnabled {
                    device: "1".to_string(),
                    enabled: true,
                }
            ),
            Response::Done
        );
        match dispatch(&table, Request::Stats) {
            Response::Stats { devices } => {
                assert_eq!(devices.len(), 2);
                assert!(devices[1].enabled);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
}
