use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    MAX_RECENT_DEVICES, RECENT_DEVICES_KEY, StoreError, reconcile::ConnectTarget,
    store::KeyValueStore,
};

/// A peer we connected to successfully, kept for prefill and quick-connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentDevice {
    pub id: String,
    pub password: String,
    #[serde(rename = "lastConnected", alias = "lastConnectedAt")]
    pub last_connected_at: DateTime<Utc>,
}

impl RecentDevice {
    pub fn new(target: ConnectTarget, last_connected_at: DateTime<Utc>) -> Self {
        Self {
            id: target.id,
            password: target.password,
            last_connected_at,
        }
    }
}

pub fn find_recent<'a>(devices: &'a [RecentDevice], id: &str) -> Option<&'a RecentDevice> {
    devices.iter().find(|d| d.id == id)
}

/// Bounded most-recent-first cache of [`RecentDevice`]s.
///
/// The store holds no list of its own: every operation takes the current
/// sequence and returns the next one, persisting it as a side effect. Persist
/// failures are logged; the caller still gets the updated sequence.
#[derive(Debug)]
pub struct RecentDeviceStore<S> {
    backend: S,
    capacity: usize,
}

impl<S: KeyValueStore> RecentDeviceStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            capacity: MAX_RECENT_DEVICES,
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Reads the persisted list. Absent or unreadable data yields an empty list.
    pub fn load(&self) -> Vec<RecentDevice> {
        let raw = match self.backend.get(RECENT_DEVICES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(key = RECENT_DEVICES_KEY, "failed to read recent devices: {err}");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<RecentDevice>>(&raw) {
            Ok(devices) => self.normalize(devices),
            Err(err) => {
                warn!(key = RECENT_DEVICES_KEY, "discarding corrupt recent devices: {err}");
                Vec::new()
            }
        }
    }

    pub fn add(&self, existing: &[RecentDevice], device: RecentDevice) -> Vec<RecentDevice> {
        let mut updated = Vec::with_capacity(self.capacity);
        let id = device.id.clone();
        updated.push(device);
        updated.extend(existing.iter().filter(|d| d.id != id).cloned());
        updated.truncate(self.capacity);
        self.persist(&updated);
        updated
    }

    pub fn remove(&self, existing: &[RecentDevice], id: &str) -> Vec<RecentDevice> {
        let updated: Vec<RecentDevice> = existing.iter().filter(|d| d.id != id).cloned().collect();
        self.persist(&updated);
        updated
    }

    fn normalize(&self, devices: Vec<RecentDevice>) -> Vec<RecentDevice> {
        let mut seen = HashSet::new();
        let mut out: Vec<RecentDevice> = devices
            .into_iter()
            .filter(|d| seen.insert(d.id.clone()))
            .collect();
        out.truncate(self.capacity);
        out
    }

    fn persist(&self, devices: &[RecentDevice]) {
        let result = serde_json::to_string(devices)
            .map_err(|err| StoreError::Serialize(err.to_string()))
            .and_then(|payload| self.backend.set(RECENT_DEVICES_KEY, &payload));
        match result {
            Ok(()) => debug!(count = devices.len(), "recent devices saved"),
            Err(err) => warn!("failed to save recent devices: {err}"),
        }
    }
}
