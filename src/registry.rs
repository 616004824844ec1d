//! Registry of known, discovered and connected devices.
//!
//! The registry is the one structure shared by all device connections. It
//! is guarded by a short-held mutex that is never held across I/O or while
//! events are dispatched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::{Event, EventDispatcher};
use crate::types::{DeviceId, DeviceIdentity};

/// Device list kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Attached external accessories.
    ExternalAccessory,
    /// BLE peripherals seen by the current scan.
    ScannedPeripheral,
    /// Devices with an open connection.
    ConnectedPeripheral,
    /// Devices connected at least once.
    KnownPeripheral,
}

#[derive(Debug, Default)]
struct RegistryInner {
    identities: HashMap<DeviceId, Arc<DeviceIdentity>>,
    lists: HashMap<ListKind, Vec<DeviceId>>,
}

impl RegistryInner {
    /// Returns the shared identity, inserting it if unknown.
    fn intern(&mut self, identity: DeviceIdentity) -> Arc<DeviceIdentity> {
        Arc::clone(
            self.identities
                .entry(identity.id.clone())
                .or_insert_with(|| Arc::new(identity)),
        )
    }

    /// Adds `id` to a list; returns true if it was not there.
    fn add(&mut self, kind: ListKind, id: &DeviceId) -> bool {
        let list = self.lists.entry(kind).or_default();
        if list.contains(id) {
            return false;
        }
        list.push(id.clone());
        true
    }

    /// Removes `id` from a list; returns true if it was there.
    fn remove(&mut self, kind: ListKind, id: &DeviceId) -> bool {
        let Some(list) = self.lists.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|d| d != id);
        list.len() != before
    }
}

/// Tracks devices per list kind, de-duplicated by identifier.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    dispatcher: EventDispatcher,
}

impl DeviceRegistry {
    /// Creates a registry publishing membership events to `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            dispatcher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an identity without adding it to any list.
    ///
    /// An identity already known under the same identifier is kept as is.
    pub fn register(&self, identity: DeviceIdentity) -> Arc<DeviceIdentity> {
        self.lock().intern(identity)
    }

    /// Records a peripheral found by a scan.
    pub fn record_scanned(&self, identity: DeviceIdentity) -> Arc<DeviceIdentity> {
        let (device, added) = {
            let mut inner = self.lock();
            let device = inner.intern(identity);
            let added = inner.add(ListKind::ScannedPeripheral, &device.id);
            (device, added)
        };
        if added {
            tracing::debug!("scanned {}", device);
            self.dispatcher.dispatch(Event::DeviceScanned(Arc::clone(&device)));
        }
        device
    }

    /// Forgets the current scan results.
    pub fn clear_scanned(&self) {
        self.lock().lists.remove(&ListKind::ScannedPeripheral);
    }

    /// Records an attached external accessory.
    pub fn accessory_attached(&self, identity: DeviceIdentity) -> Arc<DeviceIdentity> {
        let (device, added) = {
            let mut inner = self.lock();
            let device = inner.intern(identity);
            let added = inner.add(ListKind::ExternalAccessory, &device.id);
            (device, added)
        };
        if added {
            tracing::info!("accessory attached: {}", device);
            self.dispatcher.dispatch(Event::DeviceArrived(Arc::clone(&device)));
        }
        device
    }

    /// Records a detached external accessory.
    pub fn accessory_detached(&self, id: &DeviceId) {
        let device = {
            let mut inner = self.lock();
            if inner.remove(ListKind::ExternalAccessory, id) {
                inner.identities.get(id).cloned()
            } else {
                None
            }
        };
        if let Some(device) = device {
            tracing::info!("accessory detached: {}", device);
            self.dispatcher.dispatch(Event::DeviceLeft(device));
        }
    }

    /// Marks a device connected; it also becomes known.
    pub fn mark_connected(&self, device: &Arc<DeviceIdentity>) {
        let mut inner = self.lock();
        inner
            .identities
            .entry(device.id.clone())
            .or_insert_with(|| Arc::clone(device));
        inner.add(ListKind::ConnectedPeripheral, &device.id);
        inner.add(ListKind::KnownPeripheral, &device.id);
    }

    /// Marks a device no longer connected.
    pub fn mark_disconnected(&self, id: &DeviceId) {
        self.lock().remove(ListKind::ConnectedPeripheral, id);
    }

    /// Removes a device from every list and forgets its identity.
    ///
    /// Returns true if the device was known.
    pub fn evict(&self, id: &DeviceId) -> bool {
        let mut inner = self.lock();
        for list in inner.lists.values_mut() {
            list.retain(|d| d != id);
        }
        inner.identities.remove(id).is_some()
    }

    /// Looks up an identity.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<Arc<DeviceIdentity>> {
        self.lock().identities.get(id).cloned()
    }

    /// Returns true if the device is in the list.
    #[must_use]
    pub fn contains(&self, kind: ListKind, id: &DeviceId) -> bool {
        self.lock().lists.get(&kind).is_some_and(|l| l.contains(id))
    }

    /// Lists devices of one kind in insertion order.
    ///
    /// With `only`, the result is restricted to those identifiers.
    #[must_use]
    pub fn devices(&self, kind: ListKind, only: Option<&[DeviceId]>) -> Vec<Arc<DeviceIdentity>> {
        let inner = self.lock();
        let Some(list) = inner.lists.get(&kind) else {
            return Vec::new();
        };
        list.iter()
            .filter(|id| only.is_none_or(|keys| keys.contains(id)))
            .filter_map(|id| inner.identities.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::types::DeviceSubtype;

    fn peripheral(id: &str) -> DeviceIdentity {
        DeviceIdentity::ble(id, format!("KDC-{id}"), id)
    }

    #[test]
    fn test_scan_deduplicates_by_id() {
        let dispatcher = EventDispatcher::new();
        let mut sub = dispatcher.subscribe(None);
        let registry = DeviceRegistry::new(dispatcher);

        let first = registry.record_scanned(peripheral("p1"));
        let mut renamed = peripheral("p1");
        renamed.name = "other".into();
        let second = registry.record_scanned(renamed);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.name, "KDC-p1");
        assert_eq!(registry.devices(ListKind::ScannedPeripheral, None).len(), 1);
        assert_eq!(sub.try_recv().map(|e| e.kind()), Some(EventKind::DeviceScanned));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_filtered_enumeration_keeps_order() {
        let registry = DeviceRegistry::new(EventDispatcher::new());
        for id in ["a", "b", "c"] {
            registry.record_scanned(peripheral(id));
        }
        let keys = [DeviceId::new("c"), DeviceId::new("a"), DeviceId::new("zz")];
        let ids: Vec<String> = registry
            .devices(ListKind::ScannedPeripheral, Some(&keys))
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_accessory_arrival_and_departure() {
        let dispatcher = EventDispatcher::new();
        let mut sub = dispatcher.subscribe(None);
        let registry = DeviceRegistry::new(dispatcher);

        let acc = registry.accessory_attached(DeviceIdentity::accessory("SN1", "KDC200"));
        registry.accessory_detached(&acc.id);
        registry.accessory_detached(&acc.id);

        assert_eq!(sub.try_recv().map(|e| e.kind()), Some(EventKind::DeviceArrived));
        assert_eq!(sub.try_recv().map(|e| e.kind()), Some(EventKind::DeviceLeft));
        assert!(sub.try_recv().is_none());
        assert!(registry.get(&acc.id).is_some());
    }

    #[test]
    fn test_connected_and_known_lists() {
        let registry = DeviceRegistry::new(EventDispatcher::new());
        let dev = registry.register(DeviceIdentity::serial("/dev/rfcomm0", DeviceSubtype::Spp, "KDC"));

        registry.mark_connected(&dev);
        assert!(registry.contains(ListKind::ConnectedPeripheral, &dev.id));
        assert!(registry.contains(ListKind::KnownPeripheral, &dev.id));

        registry.mark_disconnected(&dev.id);
        assert!(!registry.contains(ListKind::ConnectedPeripheral, &dev.id));
        assert!(registry.contains(ListKind::KnownPeripheral, &dev.id));

        assert!(registry.evict(&dev.id));
        assert!(!registry.contains(ListKind::KnownPeripheral, &dev.id));
        assert!(registry.get(&dev.id).is_none());
        assert!(!registry.evict(&dev.id));
    }
}
