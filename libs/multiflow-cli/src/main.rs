// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Multiflow CLI
//!
//! Hosts a device table, talks to a running host, and stress-tests the flows.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "multiflow")]
#[command(author, version, about = "Multiflow device CLI", long_about = None)]
struct Cli {
    /// Socket of the device host
    #[arg(long, global = true, env = "MULTIFLOW_SOCKET", default_value = multiflow::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the device table until Ctrl+C
    Serve {
        /// Configuration file (default: ./multiflow.toml if present)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Write one segment to a device
    Write {
        /// Device path or id (e.g. /dev/multiflow3)
        device: String,
        /// Data to write
        data: String,
    },

    /// Read one segment from a device
    Read {
        /// Device path or id
        device: String,
        /// Read buffer size in bytes
        #[arg(long, default_value = "1024")]
        capacity: usize,
    },

    /// Send a control command to a device
    Ioctl {
        /// Device path or id
        device: String,
        /// set_high_priority_flow, set_low_priority_flow, set_read_async,
        /// set_read_sync, set_write_async, set_write_sync or set_timeout
        command: String,
        /// Timeout in seconds, for set_timeout
        #[arg(allow_negative_numbers = true)]
        value: Option<i64>,
    },

    /// Enable a device
    Enable {
        /// Device path or id
        device: String,
    },

    /// Disable a device
    Disable {
        /// Device path or id
        device: String,
    },

    /// Show per-device state of a running host
    Stats {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
        /// Include idle devices
        #[arg(long)]
        all: bool,
    },

    /// Hammer an in-process device table with random readers and writers
    Stress {
        /// Number of threads
        #[arg(long, default_value = "600")]
        threads: usize,
        /// Number of devices; thread n uses device n % devices
        #[arg(long, default_value = "128")]
        devices: usize,
        /// Percent chance that a thread is a reader
        #[arg(long, default_value = "50", value_parser = clap::value_parser!(u8).range(0..=100))]
        read_probability: u8,
        /// Per-device timeout in seconds (default: configured timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let socket = cli.socket;
    match cli.command {
        Commands::Serve { config } => commands::serve::run(&socket, config.as_deref()),
        Commands::Write { device, data } => commands::device::write(&socket, &device, &data),
        Commands::Read { device, capacity } => commands::device::read(&socket, &device, capacity),
        Commands::Ioctl {
            device,
            command,
            value,
        } => commands::device::ioctl(&socket, &device, &command, value),
        Commands::Enable { device } => commands::device::set_enabled(&socket, &device, true),
        Commands::Disable { device } => commands::device::set_enabled(&socket, &device, false),
        Commands::Stats { json, all } => commands::stats::show(&socket, json, all),
        Commands::Stress {
            threads,
            devices,
            read_probability,
            timeout,
        } => commands::stress::run(threads, devices, read_probability, timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ioctl_with_value() {
        let cli = Cli::parse_from(["multiflow", "ioctl", "/dev/multiflow2", "set_timeout", "3"]);
        match cli.command {
            Commands::Ioctl {
                device,
                command,
                value,
            } => {
                assert_eq!(device, "/dev/multiflow2");
                assert_eq!(command, "set_timeout");
                assert_eq!(value, Some(3));
            }
            _ => panic!("expected ioctl"),
        }
    }

    #[test]
    fn test_stress_defaults() {
        let cli = Cli::parse_from(["multiflow", "stress"]);
        match cli.command {
            Commands::Stress {
                threads,
                devices,
                read_probability,
                timeout,
            } => {
                assert_eq!(threads, 600);
                assert_eq!(devices, 128);
                assert_eq!(read_probability, 50);
                assert_eq!(timeout, None);
            }
            _ => panic!("expected stress"),
        }
        assert!(Cli::try_parse_from(["multiflow", "stress", "--read-probability", "101"]).is_err());
    }
}
