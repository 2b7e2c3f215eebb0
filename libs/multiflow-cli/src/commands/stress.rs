// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! `multiflow stress`: many uncoordinated readers and writers on one table.
//!
//! Each thread flips a coin to become a reader (16 byte buffer) or a writer
//! of `"thread <n>\n"`, then attaches to device `n % devices`, does one
//! operation and detaches.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use multiflow::{DeviceTable, MultiflowConfig, MultiflowError};

const READ_BUFFER: usize = 16;

#[derive(Default)]
struct Tally {
    reads: AtomicUsize,
    empty_reads: AtomicUsize,
    writes: AtomicUsize,
    timed_out_writes: AtomicUsize,
    errors: AtomicUsize,
}

pub fn run(threads: usize, devices: usize, read_probability: u8, timeout: Option<u64>) -> Result<()> {
    if threads == 0 || devices == 0 {
        bail!("--threads and --devices must be greater than zero");
    }

    let mut config = MultiflowConfig::default();
    config.devices.count = devices;
    let table = Arc::new(DeviceTable::new(config).context("Failed to create device table")?);
    if let Some(secs) = timeout {
        for id in 0..devices {
            table
                .device(id)?
                .set_timeout_secs(secs)
                .context("Invalid --timeout")?;
        }
    }

    let tally = Arc::new(Tally::default());
    let started = Instant::now();
    let mut handles = Vec::with_capacity(threads);

    for n in 0..threads {
        let reader = fastrand::u8(..100) < read_probability;
        let table = Arc::clone(&table);
        let tally = Arc::clone(&tally);
        let handle = thread::Builder::new()
            .name(format!("stress-{}", n))
            .spawn(move || {
                if let Err(e) = exercise(&table, n, reader, &tally) {
                    tally.errors.fetch_add(1, Ordering::Relaxed);
                    let role = if reader { "reading from" } else { "writing to" };
                    tracing::warn!("Error {} device {}: {}", role, n % table.len(), e);
                }
            })
            .with_context(|| format!("Error creating thread {}", n))?;
        handles.push(handle);
    }

    for (n, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            bail!("Error joining thread {}", n);
        }
    }

    let elapsed = started.elapsed();
    let pending = table.pending_deferred();
    table.shutdown();

    println!("Stress run finished in {:.2?}", elapsed);
    println!(
        "  reads:  {} with data, {} timed out",
        tally.reads.load(Ordering::Relaxed),
        tally.empty_reads.load(Ordering::Relaxed)
    );
    println!(
        "  writes: {} accepted, {} timed out",
        tally.writes.load(Ordering::Relaxed),
        tally.timed_out_writes.load(Ordering::Relaxed)
    );
    println!("  deferred writes still queued at exit: {}", pending);
    println!("  errors: {}", tally.errors.load(Ordering::Relaxed));
    Ok(())
}

fn exercise(table: &DeviceTable, n: usize, reader: bool, tally: &Tally) -> Result<(), MultiflowError> {
    let session = table.open(n % table.len())?;
    if reader {
        let mut buf = [0u8; READ_BUFFER];
        let counter = if session.read_into(&mut buf)? > 0 {
            &tally.reads
        } else {
            &tally.empty_reads
        };
        counter.fetch_add(1, Ordering::Relaxed);
    } else {
        let payload = format!("thread {}\n", n);
        let counter = if session.write(payload.as_bytes())? > 0 {
            &tally.writes
        } else {
            &tally.timed_out_writes
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}
