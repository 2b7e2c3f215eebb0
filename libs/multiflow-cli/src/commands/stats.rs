// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! `multiflow stats`: per-device state of a running host.

use std::path::Path;

use anyhow::{Context, Result};
use multiflow::{DeviceClient, DeviceSnapshot, FlowSnapshot};

pub fn show(socket: &Path, json: bool, all: bool) -> Result<()> {
    let mut client = DeviceClient::connect(socket)
        .with_context(|| format!("Failed to connect to device host at {}", socket.display()))?;
    let devices = client.stats().context("Failed to fetch device stats")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&devices).context("Failed to encode stats")?
        );
        return Ok(());
    }

    println!(
        "{:<6} {:<8} {:<8} {:>8}  {:<20} {:<20}",
        "DEVICE", "ENABLED", "FLOW", "TIMEOUT", "HIGH (bytes/segs/wait)", "LOW (bytes/segs/wait)"
    );
    let shown: Vec<&DeviceSnapshot> = devices
        .iter()
        .filter(|device| all || !is_idle(device))
        .collect();
    for device in &shown {
        println!(
            "{:<6} {:<8} {:<8} {:>8}  {:<20} {:<20}",
            device.id,
            if device.enabled { "yes" } else { "no" },
            device
                .selector
                .map(|selector| selector.label())
                .unwrap_or("BAD"),
            device.timeout_ticks,
            format_flow(&device.high),
            format_flow(&device.low),
        );
    }
    if shown.len() < devices.len() {
        println!(
            "({} idle devices hidden, use --all to show them)",
            devices.len() - shown.len()
        );
    }
    Ok(())
}

fn is_idle(device: &DeviceSnapshot) -> bool {
    device.enabled
        && [&device.high, &device.low]
            .iter()
            .all(|flow| flow.occupancy == 0 && flow.waiting == 0)
}

fn format_flow(flow: &FlowSnapshot) -> String {
    format!(
        "{}/{} {}/{}",
        flow.occupancy, flow.capacity, flow.segments, flow.waiting
    )
}
