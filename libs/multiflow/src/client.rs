// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Synchronous client for a [`crate::server::DeviceServer`].

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::control::ControlCommand;
use crate::device::DeviceSnapshot;
use crate::error::{MultiflowError, Result};
use crate::wire::{self, Request, Response};

pub struct DeviceClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl DeviceClient {
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path.as_ref())?;
        let writer = stream.try_clone()?;
        tracing::debug!("[DeviceClient] Connected to {}", socket_path.as_ref().display());
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Write `data` to `device`; `Ok(0)` means a synchronous write timed out.
    pub fn write(&mut self, device: &str, data: &[u8]) -> Result<usize> {
        match self.call(&Request::Write {
            device: device.to_string(),
            data: data.to_vec(),
        })? {
            Response::Written { bytes } => Ok(bytes),
            other => Err(unexpected(&other)),
        }
    }

    /// Read one segment of at most `capacity` bytes; empty on timeout.
    pub fn read(&mut self, device: &str, capacity: usize) -> Result<Vec<u8>> {
        match self.call(&Request::Read {
            device: device.to_string(),
            capacity,
        })? {
            Response::Data { bytes } => Ok(bytes),
            other => Err(unexpected(&other)),
        }
    }

    pub fn control(&mut self, device: &str, command: ControlCommand) -> Result<()> {
        self.expect_done(&Request::Control {
            device: device.to_string(),
            opcode: command.opcode(),
            arg: command.arg(),
        })
    }

    pub fn set_enabled(&mut self, device: &str, enabled: bool) -> Result<()> {
        self.expect_done(&Request::SetEnabled {
            device: device.to_string(),
            enabled,
        })
    }

    pub fn stats(&mut self) -> Result<Vec<DeviceSnapshot>> {
        match self.call(&Request::Stats)? {
            Response::Stats { devices } => Ok(devices),
            other => Err(unexpected(&other)),
        }
    }

    fn expect_done(&mut self, request: &Request) -> Result<()> {
        match self.call(request)? {
            Response::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Send one request and wait for its response line.
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        self.writer
            .write_all(wire::encode_line(request)?.as_bytes())?;
        self.writer.flush()?;

        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Err(MultiflowError::TransferFault(
                "device host closed the connection".to_string(),
            ));
        }
        wire::decode_line::<Response>(&line)?.into_result()
    }
}

fn unexpected(response: &Response) -> MultiflowError {
    MultiflowError::TransferFault(format!("unexpected response {:?}", response))
}
