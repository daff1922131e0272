// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device registry.
//
// Attached devices keyed by name. Attaching queries the device once and keeps
// the resulting capabilities behind an `Arc`; handles share that record and
// never see it change. Re-attaching replaces the record with a fresh query.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scanwerk_core::{EngineConfig, Result, ScanError};
use scanwerk_transport::Transport;
use tracing::info;

use crate::capabilities::{AreaPolicy, DeviceCapabilities, DeviceQuirks};

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub name: String,
    pub caps: Arc<DeviceCapabilities>,
    pub attached_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the device behind `t` and record it under `name`.
    pub fn attach(
        &mut self,
        name: &str,
        t: &mut dyn Transport,
        quirks: &DeviceQuirks,
        config: &EngineConfig,
    ) -> Result<Arc<DeviceCapabilities>> {
        let caps = Arc::new(DeviceCapabilities::query(t, quirks, AreaPolicy::from(config))?);
        let record = DeviceRecord {
            name: name.to_string(),
            caps: Arc::clone(&caps),
            attached_at: Utc::now(),
        };
        let replaced = self.devices.insert(name.to_string(), record).is_some();
        info!(device = name, model = %caps.model, replaced, "device attached");
        Ok(caps)
    }

    pub fn detach(&mut self, name: &str) -> Result<DeviceRecord> {
        let record = self
            .devices
            .remove(name)
            .ok_or_else(|| ScanError::InvalidParameter(format!("no device named {name:?}")))?;
        info!(device = name, "device detached");
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Option<&DeviceRecord> {
        self.devices.get(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::ErrorKind;
    use scanwerk_sim::{SimProfile, VirtualScanner};

    fn attach(reg: &mut DeviceRegistry, name: &str, profile: SimProfile) -> Arc<DeviceCapabilities> {
        let cfg = EngineConfig::default();
        let sim = VirtualScanner::new(profile);
        let mut t = sim.block_transport(&cfg.transport);
        reg.attach(name, &mut *t, &DeviceQuirks::default(), &cfg).unwrap()
    }

    #[test]
    fn attach_records_queried_capabilities() {
        let mut reg = DeviceRegistry::new();
        let caps = attach(&mut reg, "sim:0", SimProfile::flatbed());
        assert_eq!(reg.len(), 1);
        let record = reg.get("sim:0").unwrap();
        assert!(Arc::ptr_eq(&record.caps, &caps));
        assert_eq!(caps.model, SimProfile::flatbed().model);
    }

    #[test]
    fn reattach_replaces_the_record() {
        let mut reg = DeviceRegistry::new();
        let first = attach(&mut reg, "sim:0", SimProfile::flatbed());
        let second = attach(&mut reg, "sim:0", SimProfile::sheetfed_duplex());
        assert_eq!(reg.len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.features.adf);
        // The old record is untouched for anyone still holding it.
        assert!(!first.features.adf);
    }

    #[test]
    fn detach_removes_and_reports_unknown_names() {
        let mut reg = DeviceRegistry::new();
        attach(&mut reg, "a", SimProfile::flatbed());
        attach(&mut reg, "b", SimProfile::flatbed());
        let names: Vec<_> = reg.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        reg.detach("a").unwrap();
        assert!(reg.get("a").is_none());
        assert_eq!(reg.detach("a").unwrap_err().kind(), ErrorKind::InvalidParameter);
    }
}
