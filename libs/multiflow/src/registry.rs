// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The device table: every device, the deferred writer pool, and the
//! attach/teardown bookkeeping around them.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::MultiflowConfig;
use crate::deferred::DeferredWritePool;
use crate::device::{Device, DeviceId, DeviceSnapshot};
use crate::error::{MultiflowError, Result};
use crate::session::Session;

/// Owns every device for its whole lifetime.
///
/// Devices are created for all ids at construction and destroyed together
/// at [`DeviceTable::shutdown`] (or drop).
pub struct DeviceTable {
    config: MultiflowConfig,
    devices: Vec<Device>,
    pool: DeferredWritePool,
    shut_down: AtomicBool,
}

impl DeviceTable {
    /// Build a table from a validated configuration.
    ///
    /// # Errors
    /// `Configuration` if the configuration is invalid, `Io` if the worker
    /// pool cannot start.
    pub fn new(config: MultiflowConfig) -> Result<Self> {
        config.validate()?;
        let timeout_ticks = config.default_timeout_ticks().ok_or_else(|| {
            MultiflowError::Configuration("default timeout overflows the tick counter".to_string())
        })?;
        let tick_rate = config.tick_rate();

        let devices: Vec<Device> = (0..config.devices.count)
            .map(|id| Device::new(id, config.flow.capacity, timeout_ticks, tick_rate))
            .collect();
        for id in &config.devices.disabled {
            devices[*id].set_enabled(false);
        }

        let pool = DeferredWritePool::start(config.worker_threads())?;

        tracing::info!(
            "[multiflow] Device table ready: {} devices, {} byte flows, {} workers",
            devices.len(),
            config.flow.capacity,
            pool.worker_count()
        );

        Ok(Self {
            config,
            devices,
            pool,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(MultiflowConfig::default())
    }

    pub fn config(&self) -> &MultiflowConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device> {
        self.devices
            .get(id)
            .ok_or_else(|| MultiflowError::DeviceNotFound(id.to_string()))
    }

    /// Path of device `id`, e.g. `/dev/multiflow3`.
    pub fn path_of(&self, id: DeviceId) -> String {
        format!("/dev/{}{}", self.config.devices.name, id)
    }

    /// Map `/dev/<name><id>`, `<name><id>` or a bare id to a device id.
    pub fn resolve(&self, path: &str) -> Result<DeviceId> {
        let not_found = || MultiflowError::DeviceNotFound(path.to_string());
        let name = path.strip_prefix("/dev/").unwrap_or(path);
        let digits = name
            .strip_prefix(self.config.devices.name.as_str())
            .unwrap_or(name);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(not_found());
        }
        let id: DeviceId = digits.parse().map_err(|_| not_found())?;
        if id >= self.devices.len() {
            return Err(not_found());
        }
        Ok(id)
    }

    /// Attach to device `id`.
    ///
    /// # Errors
    /// `DeviceNotFound` for an unknown id, `Permission` if the device is
    /// disabled.
    pub fn open(&self, id: DeviceId) -> Result<Session<'_>> {
        let device = self.device(id)?;
        if !device.is_enabled() {
            tracing::warn!("[multiflow][{}] Cannot Open Disabled Device", id);
            return Err(MultiflowError::Permission(id));
        }
        tracing::info!("[multiflow][{}] Device Opened", id);
        Ok(Session::new(device, &self.pool, self.config.flow.max_segment_size))
    }

    pub fn open_path(&self, path: &str) -> Result<Session<'_>> {
        self.open(self.resolve(path)?)
    }

    /// Enable or disable a device. Existing sessions are unaffected.
    pub fn set_enabled(&self, id: DeviceId, enabled: bool) -> Result<()> {
        self.device(id)?.set_enabled(enabled);
        tracing::info!(
            "[multiflow][{}] Device {}",
            id,
            if enabled { "Enabled" } else { "Disabled" }
        );
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices.iter().map(Device::snapshot).collect()
    }

    /// Deferred writes submitted but not yet admitted or dropped.
    pub fn pending_deferred(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Close every flow, then stop and join the deferred writers.
    ///
    /// Blocked reads return empty and blocked admissions give up; queued
    /// deferred writes are dropped. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for device in &self.devices {
            for flow in device.flows() {
                flow.close();
            }
        }
        self.pool.shutdown();
        tracing::info!("[multiflow] Device table shut down");
    }
}

impl Drop for DeviceTable {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowPriority;

    fn table(count: usize) -> DeviceTable {
        let mut config = MultiflowConfig::default();
        config.devices.count = count;
        config.workers.threads = Some(1);
        DeviceTable::new(config).unwrap()
    }

    #[test]
    fn test_every_device_created() {
        let table = table(8);
        assert_eq!(table.len(), 8);
        assert!(!table.is_empty());
        assert!(table.device(7).is_ok());
        assert!(matches!(
            table.device(8),
            Err(MultiflowError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_paths() {
        let table = table(8);
        assert_eq!(table.resolve("/dev/multiflow3").unwrap(), 3);
        assert_eq!(table.resolve("multiflow0").unwrap(), 0);
        assert_eq!(table.resolve("7").unwrap(), 7);
        assert_eq!(table.path_of(5), "/dev/multiflow5");
        for bad in ["/dev/multiflow8", "/dev/other1", "multiflow", "", "-1", "/dev/multiflow+2"] {
            assert!(
                matches!(table.resolve(bad), Err(MultiflowError::DeviceNotFound(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_disabled_devices_refuse_open() {
        let mut config = MultiflowConfig::default();
        config.devices.count = 4;
        config.devices.disabled = vec![1];
        config.workers.threads = Some(1);
        let table = DeviceTable::new(config).unwrap();

        assert!(matches!(table.open(1), Err(MultiflowError::Permission(1))));
        assert!(table.open(0).is_ok());

        table.set_enabled(1, true).unwrap();
        assert!(table.open(1).is_ok());
        table.set_enabled(0, false).unwrap();
        assert!(matches!(
            table.open_path("/dev/multiflow0"),
            Err(MultiflowError::Permission(0))
        ));
        assert!(table.set_enabled(9, true).is_err());
    }

    #[test]
    fn test_snapshot_covers_all_devices() {
        let table = table(3);
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[2].id, 2);
        assert_eq!(snapshot[0].selector, Some(FlowPriority::Low));
        assert_eq!(snapshot[0].timeout_ticks, 1000);
        assert_eq!(snapshot[1].high.capacity, 64);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let table = table(2);
        table.shutdown();
        assert!(table.is_shut_down());
        assert!(table.device(0).unwrap().flow(FlowPriority::Low).is_closed());
        table.shutdown();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MultiflowConfig::default();
        config.flow.capacity = 0;
        assert!(matches!(
            DeviceTable::new(config),
            Err(MultiflowError::Configuration(_))
        ));
    }
}
