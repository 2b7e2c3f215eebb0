// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Data-plane and control commands against a running device host.

use std::path::Path;

use anyhow::{Context, Result};
use multiflow::{ControlCommand, DeviceClient};

fn connect(socket: &Path) -> Result<DeviceClient> {
    DeviceClient::connect(socket)
        .with_context(|| format!("Failed to connect to device host at {}", socket.display()))
}

pub fn write(socket: &Path, device: &str, data: &str) -> Result<()> {
    let mut client = connect(socket)?;
    let written = client
        .write(device, data.as_bytes())
        .with_context(|| format!("Failed to write() to device {}", device))?;
    if written == 0 {
        println!("Write timed out, 0 bytes written");
    } else {
        println!("Written {} bytes", written);
    }
    Ok(())
}

pub fn read(socket: &Path, device: &str, capacity: usize) -> Result<()> {
    let mut client = connect(socket)?;
    let data = client
        .read(device, capacity)
        .with_context(|| format!("Failed to read() from device {}", device))?;
    println!("{}", String::from_utf8_lossy(&data).trim_end());
    Ok(())
}

pub fn ioctl(socket: &Path, device: &str, command: &str, value: Option<i64>) -> Result<()> {
    let command = ControlCommand::parse_with_value(command, value)
        .context("Invalid ioctl() command")?;
    let mut client = connect(socket)?;
    client
        .control(device, command)
        .with_context(|| format!("Failed to ioctl() {} on device {}", command, device))?;
    println!("{} applied to {}", command, device);
    Ok(())
}

pub fn set_enabled(socket: &Path, device: &str, enabled: bool) -> Result<()> {
    let action = if enabled { "enable" } else { "disable" };
    let mut client = connect(socket)?;
    client
        .set_enabled(device, enabled)
        .with_context(|| format!("Failed to {} device {}", action, device))?;
    println!("Device {} {}d", device, action);
    Ok(())
}
