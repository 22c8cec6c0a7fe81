use std::sync::Arc;
use std::time::Duration;

use fleetwise::value::Attributes;

use hashbrown::{DefaultHashBuilder, HashMap};

use indexmap::{IndexMap, IndexSet};

use parking_lot::Mutex;

use serde::Serialize;

use tokio::time::Instant;

use tracing::{debug, info};

use crate::device::{DeviceRecord, DeviceStatus, DeviceUpdate};
use crate::event_log::EventLog;
use crate::liveness;

/// Device counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    /// Number of known devices.
    pub total: usize,
    /// Number of devices currently online.
    pub online: usize,
    /// Number of connected devices for each device type.
    pub by_type: IndexMap<String, usize, DefaultHashBuilder>,
}

// The main map and the type index, always mutated together.
#[derive(Debug, Default)]
pub(crate) struct Devices {
    records: HashMap<String, DeviceRecord>,
    by_type: HashMap<String, IndexSet<String, DefaultHashBuilder>>,
}

impl Devices {
    pub(crate) fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.records.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut DeviceRecord> {
        self.records.get_mut(id)
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    // Flips stale devices to disconnected.
    pub(crate) fn refresh_liveness(&mut self, now: Instant, window: Duration) {
        for record in self.records.values_mut() {
            refresh_record(record, now, window);
        }
    }

    fn index(&mut self, device_type: &str, id: &str) {
        let _ = self
            .by_type
            .entry_ref(device_type)
            .or_default()
            .insert(id.into());
    }

    fn unindex(&mut self, device_type: &str, id: &str) {
        if let Some(bucket) = self.by_type.get_mut(device_type) {
            let _ = bucket.swap_remove(id);
            if bucket.is_empty() {
                let _ = self.by_type.remove(device_type);
            }
        }
    }
}

fn refresh_record(record: &mut DeviceRecord, now: Instant, window: Duration) {
    if liveness::evaluate(record.last_seen, now, window) == DeviceStatus::Disconnected {
        record.status = DeviceStatus::Disconnected;
    }
}

/// The authoritative store of all known devices.
///
/// A single lock covers both the device map and the index of devices by
/// type, so concurrent readers never observe one without the other.
#[derive(Debug)]
pub struct Registry {
    devices: Mutex<Devices>,
    events: Arc<EventLog>,
    window: Duration,
}

impl Registry {
    /// Creates an empty [`Registry`].
    ///
    /// Devices silent for `window` or longer are reported as disconnected.
    #[must_use]
    pub fn new(window: Duration, events: Arc<EventLog>) -> Self {
        Self {
            devices: Mutex::new(Devices::default()),
            events,
            window,
        }
    }

    /// Returns the liveness window.
    #[must_use]
    #[inline]
    pub const fn liveness_window(&self) -> Duration {
        self.window
    }

    /// Registers a device, or refreshes an already registered one.
    ///
    /// The device is marked as connected. For a known device, the type and
    /// IP address are overwritten while attributes are merged and the
    /// creation time is preserved. A device whose type changes is moved to
    /// the index of its new type.
    pub fn register(
        &self,
        id: &str,
        device_type: &str,
        ip_address: &str,
        attributes: Attributes,
    ) -> DeviceRecord {
        let now = Instant::now();
        let update = DeviceUpdate::coordination(&attributes).attributes(attributes);

        let (record, previous_type) = {
            let mut devices = self.devices.lock();

            let previous_type = devices
                .records
                .get(id)
                .map(|record| record.device_type.clone());

            if let Some(previous_type) = previous_type.as_deref()
                && previous_type != device_type
            {
                devices.unindex(previous_type, id);
            }
            devices.index(device_type, id);

            let record = devices
                .records
                .entry_ref(id)
                .or_insert_with(|| DeviceRecord::new(id, device_type, ip_address, now));
            device_type.clone_into(&mut record.device_type);
            ip_address.clone_into(&mut record.ip_address);
            record.apply(update, now);

            (record.clone(), previous_type)
        };

        match previous_type {
            None => {
                info!(device = id, device_type, "Device registered");
                self.events
                    .info(format!("Device connected: {id} ({device_type})"));
            }
            Some(previous_type) if previous_type != device_type => {
                info!(
                    device = id,
                    previous_type = %previous_type,
                    device_type,
                    "Device type changed"
                );
                self.events.info(format!(
                    "Device {id} changed type: {previous_type} -> {device_type}"
                ));
            }
            Some(_) => {
                debug!(device = id, "Device refreshed");
                self.events
                    .info(format!("Device connected: {id} ({device_type})"));
            }
        }

        record
    }

    /// Updates a known device and refreshes its liveness.
    ///
    /// Returns `false`, without any effect, when the device is unknown.
    pub fn update(&self, id: &str, update: DeviceUpdate) -> bool {
        let mut devices = self.devices.lock();
        let Some(record) = devices.get_mut(id) else {
            debug!(device = id, "Update for an unknown device, discard it");
            return false;
        };
        record.apply(update, Instant::now());
        true
    }

    /// Removes a device.
    ///
    /// Returns the removed [`DeviceRecord`], or [`None`] when the device is
    /// unknown.
    pub fn remove(&self, id: &str) -> Option<DeviceRecord> {
        let removed = {
            let mut devices = self.devices.lock();
            let device_type = devices.get(id).map(|record| record.device_type.clone())?;
            devices.unindex(&device_type, id);
            devices.records.remove(id)
        };

        if removed.is_some() {
            info!(device = id, "Device removed");
            self.events.info(format!("Device disconnected: {id}"));
        }

        removed
    }

    /// Returns all devices currently online, in no particular order.
    ///
    /// Devices found stale are marked as disconnected along the way.
    #[must_use]
    pub fn online_snapshot(&self) -> Vec<DeviceRecord> {
        let now = Instant::now();
        let mut devices = self.devices.lock();
        online_records(&mut devices, now, self.window)
    }

    /// Returns the [`DeviceStats`].
    ///
    /// The per-type counts rely on the stored status, which has just been
    /// refreshed for every device.
    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        let now = Instant::now();
        let mut devices = self.devices.lock();
        let online = online_records(&mut devices, now, self.window).len();

        let by_type = devices
            .by_type
            .iter()
            .map(|(device_type, ids)| {
                let connected = ids
                    .iter()
                    .filter_map(|id| devices.records.get(id))
                    .filter(|record| record.status == DeviceStatus::Connected)
                    .count();
                (device_type.clone(), connected)
            })
            .collect();

        DeviceStats {
            total: devices.records.len(),
            online,
            by_type,
        }
    }

    /// Returns a device, with its liveness refreshed.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        let now = Instant::now();
        let mut devices = self.devices.lock();
        let record = devices.get_mut(id)?;
        refresh_record(record, now, self.window);
        Some(record.clone())
    }

    /// Whether a device is known.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.devices.lock().records.contains_key(id)
    }

    /// Returns the number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.lock().records.len()
    }

    /// Whether no device is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.lock().records.is_empty()
    }

    /// Returns the ids of the devices of a type, in registration order.
    #[must_use]
    pub fn ids_by_type(&self, device_type: &str) -> Vec<String> {
        self.devices
            .lock()
            .by_type
            .get(device_type)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    // Runs `f` while holding the registry lock.
    pub(crate) fn with_devices<R>(&self, f: impl FnOnce(&mut Devices, Instant, Duration) -> R) -> R {
        let now = Instant::now();
        let mut devices = self.devices.lock();
        f(&mut devices, now, self.window)
    }

    #[cfg(test)]
    pub(crate) fn index_is_consistent(&self) -> bool {
        let devices = self.devices.lock();

        let indexed: usize = devices.by_type.values().map(IndexSet::len).sum();
        indexed == devices.records.len()
            && devices.by_type.iter().all(|(device_type, ids)| {
                ids.iter().all(|id| {
                    devices
                        .records
                        .get(id)
                        .is_some_and(|record| &record.device_type == device_type)
                })
            })
    }
}

fn online_records(devices: &mut Devices, now: Instant, window: Duration) -> Vec<DeviceRecord> {
    devices.refresh_liveness(now, window);
    devices
        .records
        .values()
        .filter(|record| record.status == DeviceStatus::Connected)
        .cloned()
        .collect()
}
