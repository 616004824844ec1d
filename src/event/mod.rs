//! Event system for reader notifications.
//!
//! Every subscriber owns an unbounded queue, so no event is dropped while
//! the [`Subscription`] is alive and events from one device arrive in the
//! order they were dispatched. Dropping the subscription unsubscribes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::error::Error;
use crate::types::{ConnectionState, DataType, DeviceId, DeviceIdentity, DeviceInfo, DeviceRecord};

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connection state changed.
    ConnectionChanged {
        device: Arc<DeviceIdentity>,
        old: ConnectionState,
        new: ConnectionState,
    },
    /// External accessory attached.
    DeviceArrived(Arc<DeviceIdentity>),
    /// External accessory detached.
    DeviceLeft(Arc<DeviceIdentity>),
    /// BLE peripheral discovered by a scan.
    DeviceScanned(Arc<DeviceIdentity>),
    /// Data record pushed by the reader.
    DataArrived {
        device: Arc<DeviceIdentity>,
        record: Arc<DeviceRecord>,
    },
    /// Link or decode error recovered by the reader.
    ErrorReceived {
        device: Arc<DeviceIdentity>,
        error: Arc<Error>,
    },
    /// Device information read by the post-connect handshake.
    InfoUpdated {
        device: Arc<DeviceIdentity>,
        info: DeviceInfo,
    },
}

/// Kind of an event, used for filtering.
///
/// Data records report a per-type kind; [`EventKind::Data`] in a filter
/// matches every data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionChanged,
    DeviceArrived,
    DeviceLeft,
    DeviceScanned,
    Data,
    BarcodeData,
    MsrData,
    GpsData,
    NfcData,
    ErrorReceived,
    InfoUpdated,
}

impl Event {
    /// Returns the most specific kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionChanged { .. } => EventKind::ConnectionChanged,
            Self::DeviceArrived(_) => EventKind::DeviceArrived,
            Self::DeviceLeft(_) => EventKind::DeviceLeft,
            Self::DeviceScanned(_) => EventKind::DeviceScanned,
            Self::DataArrived { record, .. } => match record.data_type() {
                DataType::Barcode => EventKind::BarcodeData,
                DataType::Msr => EventKind::MsrData,
                DataType::Gps => EventKind::GpsData,
                DataType::Nfc | DataType::NfcOld | DataType::NfcNew => EventKind::NfcData,
                _ => EventKind::Data,
            },
            Self::ErrorReceived { .. } => EventKind::ErrorReceived,
            Self::InfoUpdated { .. } => EventKind::InfoUpdated,
        }
    }

    /// Returns the device this event concerns.
    #[must_use]
    pub fn device(&self) -> &DeviceIdentity {
        match self {
            Self::ConnectionChanged { device, .. }
            | Self::DataArrived { device, .. }
            | Self::ErrorReceived { device, .. }
            | Self::InfoUpdated { device, .. }
            | Self::DeviceArrived(device)
            | Self::DeviceLeft(device)
            | Self::DeviceScanned(device) => device,
        }
    }
}

/// Subscription filter for specific event kinds and devices.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by device.
    pub device: Option<DeviceId>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            device: None,
        }
    }

    /// Restricts the filter to one device.
    #[must_use]
    pub fn for_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref device) = self.device {
            if event.device().id != *device {
                return false;
            }
        }

        if let Some(ref kinds) = self.kinds {
            let kind = event.kind();
            let is_data = matches!(event, Event::DataArrived { .. });
            if !kinds.contains(&kind) && !(is_data && kinds.contains(&EventKind::Data)) {
                return false;
            }
        }

        true
    }
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct EventDispatcherInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventDispatcherInner {
    fn remove(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|s| s.id != id);
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Event>,
    dispatcher: Weak<EventDispatcherInner>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.remove(self.id);
        }
    }
}

/// Dispatches events to subscribers.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches an event to all matching subscribers.
    pub fn dispatch(&self, event: Event) {
        let Ok(mut subscribers) = self.inner.subscribers.lock() else {
            return;
        };
        subscribers.retain(|s| !s.filter.matches(&event) || s.sender.send(event.clone()).is_ok());
    }

    /// Subscribes to events with an optional filter.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(Subscriber {
                id,
                filter: filter.unwrap_or_default(),
                sender,
            });
        }
        Subscription {
            id,
            receiver,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().map_or(0, |s| s.len())
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe(Some(filter));
        tokio::time::timeout(timeout, subscription.recv())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::types::{BarcodeData, DeviceSubtype, GpsData, RecordPayload, Timestamp};

    fn device(name: &str) -> Arc<DeviceIdentity> {
        Arc::new(DeviceIdentity::serial(name, DeviceSubtype::Spp, "KDC"))
    }

    fn data(device: Arc<DeviceIdentity>, payload: RecordPayload) -> Event {
        Event::DataArrived {
            device,
            record: Arc::new(DeviceRecord {
                timestamp: Timestamp::default(),
                raw: Bytes::new(),
                text: String::new(),
                payload,
            }),
        }
    }

    fn barcode(device: Arc<DeviceIdentity>) -> Event {
        data(
            device,
            RecordPayload::Barcode(BarcodeData {
                symbology: 0,
                data: Bytes::new(),
            }),
        )
    }

    #[tokio::test]
    async fn test_event_dispatch_in_order() {
        let dispatcher = EventDispatcher::new();
        let mut sub = dispatcher.subscribe(None);
        let dev = device("a");

        dispatcher.dispatch(Event::DeviceArrived(Arc::clone(&dev)));
        dispatcher.dispatch(Event::DeviceLeft(dev));

        assert!(matches!(sub.recv().await, Some(Event::DeviceArrived(_))));
        assert!(matches!(sub.recv().await, Some(Event::DeviceLeft(_))));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_kind_filter() {
        let dev = device("a");
        let barcodes = EventFilter::kinds(vec![EventKind::BarcodeData]);
        let any_data = EventFilter::kinds(vec![EventKind::Data]);
        let gps = data(
            Arc::clone(&dev),
            RecordPayload::Gps(GpsData {
                sentence: String::new(),
            }),
        );

        assert!(barcodes.matches(&barcode(Arc::clone(&dev))));
        assert!(!barcodes.matches(&gps));
        assert!(any_data.matches(&gps));
        assert!(any_data.matches(&barcode(Arc::clone(&dev))));
        assert!(!any_data.matches(&Event::DeviceScanned(dev)));
    }

    #[test]
    fn test_device_filter() {
        let filter = EventFilter::default().for_device(DeviceId::new("a"));
        assert!(filter.matches(&barcode(device("a"))));
        assert!(!filter.matches(&barcode(device("b"))));
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips_other_events() {
        let dispatcher = EventDispatcher::new();
        let mut sub = dispatcher.subscribe(Some(EventFilter::kinds(vec![EventKind::DeviceLeft])));
        let dev = device("a");
        dispatcher.dispatch(Event::DeviceArrived(Arc::clone(&dev)));
        dispatcher.dispatch(Event::DeviceLeft(dev));
        assert!(matches!(sub.recv().await, Some(Event::DeviceLeft(_))));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let dispatcher = EventDispatcher::new();
        let sub = dispatcher.subscribe(None);
        assert_eq!(dispatcher.subscriber_count(), 1);
        drop(sub);
        assert_eq!(dispatcher.subscriber_count(), 0);
        dispatcher.dispatch(Event::DeviceScanned(device("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .wait_for(
                EventFilter::kinds(vec![EventKind::InfoUpdated]),
                std::time::Duration::from_millis(100),
            )
            .await;
        assert!(result.is_none());
    }
}
