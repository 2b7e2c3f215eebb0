// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! `multiflow serve`: host a device table on a Unix socket.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use multiflow::{DeviceServer, DeviceTable, MultiflowConfig};

pub fn run(socket: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => MultiflowConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MultiflowConfig::load_or_default(Path::new(MultiflowConfig::FILE_NAME)),
    };

    let table = Arc::new(DeviceTable::new(config).context("Failed to create device table")?);
    let server = DeviceServer::bind(socket, Arc::clone(&table))
        .with_context(|| format!("Failed to bind {}", socket.display()))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            tracing::info!("Ctrl+C received, shutting down device host");
            shutdown.store(true, Ordering::Release);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    println!(
        "Serving {} devices on {} (Ctrl+C to stop)",
        table.len(),
        socket.display()
    );
    server
        .run_until(shutdown)
        .context("Device host stopped with an error")?;

    let pending = table.pending_deferred();
    if pending > 0 {
        tracing::warn!("{} deferred writes still pending, dropping them", pending);
    }
    table.shutdown();
    Ok(())
}
