//! Main [`KdcReader`] client implementation.
//!
//! A reader owns one device's connection lifecycle: the transport, a
//! background read task that decodes frames in arrival order, the command
//! correlator and the UHF engine. Every lifecycle change is published as
//! [`Event::ConnectionChanged`]; re-entering the current state publishes
//! nothing.
//!
//! ```text
//! None -> Listening -> Connecting -> Connected -> Initializing -> Connected
//!                          |             |              |
//!                        Failed        Lost      InitializingFailed
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::commands::{CommandHandler, Correlator, InventoryReport, UhfEngine};
use crate::crypto::Decryptor;
use crate::error::{Error, LinkError, LinkErrorKind, Result};
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::protocol::{CodecTable, DecodeContext, FrameDecoder, Packet};
use crate::registry::DeviceRegistry;
use crate::settings::{DeviceSettings, SettingsStore};
use crate::transport::{ByteFeed, SerialConfig, SerialTransport, SharedTransport, Transport};
use crate::types::{
    BatteryStatus, ConnectionState, DeviceIdentity, DeviceInfo, DeviceSubtype, QueryParameter,
    SelectParameter,
};

/// Automatic reconnection after the link is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up; zero disables reconnection.
    pub max_attempts: u32,
    /// Wait before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ReconnectPolicy {
    /// Creates a policy with bounded attempts.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Never reconnects.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(0, Duration::from_secs(1))
    }

    /// Returns true if reconnection is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }
}

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Time a command may wait for its response.
    pub command_timeout: Duration,
    /// Time an inventory may take from command to end marker.
    pub inventory_timeout: Duration,
    /// Largest accepted frame payload.
    pub max_frame_size: usize,
    /// Most bytes buffered while waiting for a frame to complete.
    pub max_buffer_size: usize,
    /// Read device info after connecting.
    pub handshake: bool,
    /// Reconnection after a lost link.
    pub reconnect: ReconnectPolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command_timeout: crate::commands::DEFAULT_TIMEOUT,
            inventory_timeout: crate::commands::uhf::DEFAULT_INVENTORY_TIMEOUT,
            max_frame_size: crate::protocol::DEFAULT_MAX_FRAME_SIZE,
            max_buffer_size: crate::protocol::DEFAULT_MAX_BUFFER_SIZE,
            handshake: true,
            reconnect: ReconnectPolicy::disabled(),
        }
    }

    /// Sets the command timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the inventory timeout.
    #[must_use]
    pub const fn inventory_timeout(mut self, timeout: Duration) -> Self {
        self.inventory_timeout = timeout;
        self
    }

    /// Sets the frame and buffer limits of the decoder.
    #[must_use]
    pub const fn limits(mut self, max_frame_size: usize, max_buffer_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Enables or disables the post-connect handshake.
    #[must_use]
    pub const fn handshake(mut self, enabled: bool) -> Self {
        self.handshake = enabled;
        self
    }

    /// Sets the reconnect policy.
    #[must_use]
    pub const fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Builder for [`KdcReader`].
pub struct KdcReaderBuilder {
    device: DeviceIdentity,
    transport: Box<dyn Transport>,
    config: ReaderConfig,
    settings: DeviceSettings,
    dispatcher: Option<EventDispatcher>,
    registry: Option<DeviceRegistry>,
    codecs: CodecTable,
    decryptor: Option<Arc<dyn Decryptor>>,
    store: Option<Arc<dyn SettingsStore>>,
}

impl KdcReaderBuilder {
    /// Sets the reader configuration.
    #[must_use]
    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the initial session settings; a settings store overrides them
    /// on connect.
    #[must_use]
    pub fn settings(mut self, settings: DeviceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shares an event dispatcher with other readers.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Shares a device registry with other readers.
    #[must_use]
    pub fn registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the record codec table.
    #[must_use]
    pub fn codecs(mut self, codecs: CodecTable) -> Self {
        self.codecs = codecs;
        self
    }

    /// Sets the MSR decryption collaborator.
    #[must_use]
    pub fn decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Sets the settings persistence collaborator.
    #[must_use]
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the reader (not yet connected).
    #[must_use]
    pub fn build(self) -> KdcReader {
        let dispatcher = self.dispatcher.unwrap_or_default();
        let registry = self
            .registry
            .unwrap_or_else(|| DeviceRegistry::new(dispatcher.clone()));
        let device = registry.register(self.device);

        let transport: SharedTransport = Arc::new(tokio::sync::Mutex::new(self.transport));
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&transport),
            self.config.command_timeout,
        ));
        let settings = Arc::new(RwLock::new(self.settings));
        let commands = CommandHandler::new(Arc::clone(&correlator), Arc::clone(&settings));
        let uhf = UhfEngine::new(
            commands.clone(),
            dispatcher.clone(),
            Arc::clone(&device),
            self.config.inventory_timeout,
        );

        KdcReader {
            inner: Arc::new(ReaderInner {
                device,
                config: self.config,
                transport,
                correlator,
                commands,
                uhf,
                dispatcher,
                registry,
                codecs: self.codecs,
                decryptor: self.decryptor,
                store: self.store,
                settings,
                state: Mutex::new(ConnectionState::None),
                info: RwLock::new(None),
                session: AtomicU64::new(0),
                read_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

/// Client for one KDC reader.
///
/// Cloning yields another handle to the same reader.
#[derive(Clone)]
pub struct KdcReader {
    inner: Arc<ReaderInner>,
}

impl std::fmt::Debug for KdcReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdcReader")
            .field("device", &self.inner.device)
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

impl KdcReader {
    /// Creates a reader for a serial port (Bluetooth SPP or USB CDC).
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/rfcomm0")
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        let port = port.into();
        let device = DeviceIdentity::serial(port.clone(), DeviceSubtype::Spp, port);
        Self::builder(device, SerialTransport::new(SerialConfig::new())).build()
    }

    /// Starts building a reader for `device` over `transport`.
    #[must_use]
    pub fn builder(device: DeviceIdentity, transport: impl Transport + 'static) -> KdcReaderBuilder {
        KdcReaderBuilder {
            device,
            transport: Box::new(transport),
            config: ReaderConfig::new(),
            settings: DeviceSettings::default(),
            dispatcher: None,
            registry: None,
            codecs: CodecTable::default(),
            decryptor: None,
            store: None,
        }
    }

    /// Returns the device identity.
    #[must_use]
    pub fn device(&self) -> &Arc<DeviceIdentity> {
        &self.inner.device
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Returns true while the link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_linked()
    }

    /// Returns the device info read by the last handshake.
    #[must_use]
    pub fn info(&self) -> Option<DeviceInfo> {
        self.inner
            .info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a snapshot of the session settings.
    #[must_use]
    pub fn settings(&self) -> DeviceSettings {
        self.inner.commands.settings()
    }

    /// Changes session settings and persists them.
    ///
    /// # Errors
    ///
    /// Returns `Settings` if the store rejects the blob; the change stays
    /// in effect for this session.
    pub fn update_settings(&self, update: impl FnOnce(&mut DeviceSettings)) -> Result<()> {
        self.inner.commands.update_settings(update);
        self.inner.save_settings()
    }

    /// Returns the command handler for direct command access.
    #[must_use]
    pub fn commands(&self) -> &CommandHandler {
        &self.inner.commands
    }

    /// Returns the UHF engine.
    #[must_use]
    pub fn uhf(&self) -> &UhfEngine {
        &self.inner.uhf
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Returns the device registry.
    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        self.inner.dispatcher.subscribe(filter)
    }

    /// Marks the reader as waiting for an incoming connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the reader is idle.
    pub fn listen(&self) -> Result<()> {
        self.inner.transition(ConnectionState::Listening)
    }

    /// Connects to the device and runs the post-connect handshake.
    ///
    /// This will:
    /// 1. Open the transport (`Connecting`, then `Connected` or `Failed`)
    /// 2. Restore persisted settings
    /// 3. Start the background read task
    /// 4. Read device info (`Initializing`, then `Connected` or
    ///    `InitializingFailed`) if the handshake is enabled
    ///
    /// Connecting an already connected reader does nothing.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the link cannot be opened, or the
    /// handshake command's error.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Disconnects from the device.
    ///
    /// A command waiting for its response fails with `Disconnected`. Any
    /// pending reconnection is cancelled.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    // ==================== High-Level Device Methods ====================

    /// Reads the battery level.
    pub async fn get_battery(&self) -> Result<BatteryStatus> {
        self.inner.commands.get_battery().await
    }

    /// Reads device info without changing the lifecycle state.
    pub async fn get_device_info(&self) -> Result<DeviceInfo> {
        self.inner.commands.get_device_info().await
    }

    /// Runs one UHF inventory round.
    pub async fn inventory(
        &self,
        select: Option<SelectParameter>,
        query: QueryParameter,
    ) -> Result<InventoryReport> {
        self.inner.uhf.inventory(select, query).await
    }
}

struct ReaderInner {
    device: Arc<DeviceIdentity>,
    config: ReaderConfig,
    transport: SharedTransport,
    correlator: Arc<Correlator>,
    commands: CommandHandler,
    uhf: UhfEngine,
    dispatcher: EventDispatcher,
    registry: DeviceRegistry,
    codecs: CodecTable,
    decryptor: Option<Arc<dyn Decryptor>>,
    store: Option<Arc<dyn SettingsStore>>,
    settings: Arc<RwLock<DeviceSettings>>,
    state: Mutex<ConnectionState>,
    info: RwLock<Option<DeviceInfo>>,
    /// Bumped on every new link and teardown; a read task acts only on the
    /// session it was started for.
    session: AtomicU64,
    read_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copy of a connect failure for the error event; the caller keeps the
/// original.
fn link_failure(err: &Error) -> Error {
    match err {
        Error::Link(link) => Error::Link(link.clone()),
        other => Error::Link(LinkError::new(
            LinkErrorKind::ConnectFailed,
            other.to_string(),
        )),
    }
}

impl ReaderInner {
    fn state(&self) -> ConnectionState {
        *locked(&self.state)
    }

    /// Moves to `to`, updating the registry and publishing the change.
    fn transition(&self, to: ConnectionState) -> Result<()> {
        let mut state = locked(&self.state);
        let from = *state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        *state = to;
        self.publish(from, to);
        Ok(())
    }

    /// Moves from `from` to `to`; returns false if the state was not `from`.
    fn transition_if(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = locked(&self.state);
        if *state != from {
            return false;
        }
        *state = to;
        self.publish(from, to);
        true
    }

    /// Must be called with the state lock held so events keep their order.
    fn publish(&self, from: ConnectionState, to: ConnectionState) {
        tracing::info!("{}: {:?} -> {:?}", self.device, from, to);
        if to.is_linked() && !from.is_linked() {
            self.registry.mark_connected(&self.device);
        } else if from.is_linked() && !to.is_linked() {
            self.registry.mark_disconnected(&self.device.id);
        }
        self.dispatcher.dispatch(Event::ConnectionChanged {
            device: Arc::clone(&self.device),
            old: from,
            new: to,
        });
    }

    fn advance(&self, to: ConnectionState) {
        if let Err(e) = self.transition(to) {
            tracing::warn!("{}: {}", self.device, e);
        }
    }

    fn report(&self, error: Error) {
        self.dispatcher.dispatch(Event::ErrorReceived {
            device: Arc::clone(&self.device),
            error: Arc::new(error),
        });
    }

    fn load_settings(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match DeviceSettings::load(store.as_ref(), &self.device.id) {
            Ok(settings) => {
                *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
            }
            Err(e) => tracing::warn!("{}: keeping current settings: {}", self.device, e),
        }
    }

    fn save_settings(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        self.commands.settings().save(store.as_ref(), &self.device.id)
    }

    async fn connect(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state().is_linked() {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting)?;
        let opened = {
            let mut transport = self.transport.lock().await;
            transport.connect(&self.device).await
        };
        let feed = match opened {
            Ok(feed) => feed,
            Err(e) => {
                tracing::error!("{}: connect failed: {}", self.device, e);
                self.advance(ConnectionState::Failed);
                self.report(link_failure(&e));
                return Err(e);
            }
        };

        self.load_settings();
        let session = self.session.fetch_add(1, Ordering::AcqRel) + 1;
        self.correlator.open();
        self.transition(ConnectionState::Connected)?;

        let task = tokio::spawn(read_loop(Arc::downgrade(self), feed, session));
        if let Some(old) = locked(&self.read_task).replace(task) {
            old.abort();
        }

        if self.config.handshake {
            self.handshake().await?;
        }
        Ok(())
    }

    async fn handshake(&self) -> Result<()> {
        if !self.transition_if(ConnectionState::Connected, ConnectionState::Initializing) {
            return Err(Error::Disconnected);
        }

        match self.commands.get_device_info().await {
            Ok(info) => {
                tracing::info!(
                    "{}: {} firmware {} ({:?})",
                    self.device,
                    info.model,
                    info.firmware(),
                    info.error_space
                );
                self.commands
                    .update_settings(|s| s.error_space = info.error_space);
                if let Err(e) = self.save_settings() {
                    tracing::warn!("{}: failed to persist settings: {}", self.device, e);
                }
                *self.info.write().unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
                self.dispatcher.dispatch(Event::InfoUpdated {
                    device: Arc::clone(&self.device),
                    info,
                });
                if !self.transition_if(ConnectionState::Initializing, ConnectionState::Connected) {
                    return Err(Error::Disconnected);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{}: handshake failed: {}", self.device, e);
                self.transition_if(
                    ConnectionState::Initializing,
                    ConnectionState::InitializingFailed,
                );
                if let Err(teardown) = self.teardown().await {
                    tracing::warn!("{}: {}", self.device, teardown);
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(task) = locked(&self.reconnect_task).take() {
            task.abort();
        }
        let _lifecycle = self.lifecycle.lock().await;
        self.advance(ConnectionState::None);
        self.teardown().await
    }

    /// Ends the current session and closes the transport.
    async fn teardown(&self) -> Result<()> {
        self.session.fetch_add(1, Ordering::AcqRel);
        self.correlator.close();
        if let Some(task) = locked(&self.read_task).take() {
            task.abort();
        }
        let mut transport = self.transport.lock().await;
        transport.disconnect().await.map_err(|e| match e {
            Error::Link(link) => Error::Link(link),
            other => Error::Link(LinkError::new(
                LinkErrorKind::DisconnectFailed,
                other.to_string(),
            )),
        })
    }

    fn decoder(&self) -> FrameDecoder {
        FrameDecoder::with_limits(self.config.max_frame_size, self.config.max_buffer_size)
    }

    fn handle_payload(&self, payload: Bytes) {
        match Packet::parse(payload) {
            Ok(Packet::Response(response)) => {
                if !self.correlator.resolve(response) {
                    tracing::debug!("{}: stale response dropped", self.device);
                }
            }
            Ok(Packet::Record(raw)) => {
                let encoding = self
                    .settings
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .text_encoding;
                let ctx = DecodeContext {
                    encoding,
                    decryptor: self.decryptor.as_deref(),
                };
                match self.codecs.decode(raw, &ctx) {
                    Ok(record) => {
                        tracing::trace!("{}: {:?} record", self.device, record.data_type());
                        self.dispatcher.dispatch(Event::DataArrived {
                            device: Arc::clone(&self.device),
                            record: Arc::new(record),
                        });
                    }
                    Err(e) => {
                        tracing::warn!("{}: record decode failed: {}", self.device, e);
                        self.report(Error::Frame(e));
                    }
                }
            }
            Err(e) => {
                tracing::warn!("{}: unclassifiable frame: {}", self.device, e);
                self.report(Error::Frame(e));
            }
        }
    }

    /// Handles the end of the byte feed for `session`.
    async fn link_dropped(self: &Arc<Self>, session: u64) {
        if self.session.load(Ordering::Acquire) != session {
            return;
        }
        self.correlator.close();
        let lost = {
            let current = self.state();
            current.is_linked() && self.transition_if(current, ConnectionState::Lost)
        };
        if !lost {
            return;
        }
        {
            let mut transport = self.transport.lock().await;
            if let Err(e) = transport.disconnect().await {
                tracing::debug!("{}: closing lost link: {}", self.device, e);
            }
        }
        if self.config.reconnect.is_enabled() {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let mut slot = locked(&self.reconnect_task);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(reconnect_loop(
            Arc::downgrade(self),
            self.config.reconnect,
        )));
    }
}

impl Drop for ReaderInner {
    fn drop(&mut self) {
        // Abort background tasks
        if let Some(task) = locked(&self.read_task).take() {
            task.abort();
        }
        if let Some(task) = locked(&self.reconnect_task).take() {
            task.abort();
        }
    }
}

/// Decodes the byte feed of one session, one frame at a time.
async fn read_loop(reader: Weak<ReaderInner>, mut feed: ByteFeed, session: u64) {
    let Some(mut decoder) = reader.upgrade().map(|r| r.decoder()) else {
        return;
    };

    while let Some(item) = feed.recv().await {
        let Some(inner) = reader.upgrade() else {
            return;
        };
        if inner.session.load(Ordering::Acquire) != session {
            return;
        }
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!("{}: {}", inner.device, e);
                inner.report(Error::Link(e));
                break;
            }
        };
        decoder.feed(&chunk);
        loop {
            match decoder.decode() {
                Ok(Some(payload)) => inner.handle_payload(payload),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("{}: {}", inner.device, e);
                    inner.report(Error::Frame(e));
                }
            }
        }
    }

    if let Some(inner) = reader.upgrade() {
        tracing::debug!("{}: byte feed closed", inner.device);
        inner.link_dropped(session).await;
    }
}

/// Retries the connection until it succeeds, the attempts run out or
/// someone else changes the state.
async fn reconnect_loop(reader: Weak<ReaderInner>, policy: ReconnectPolicy) {
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.delay).await;
        let Some(inner) = reader.upgrade() else {
            return;
        };
        if !matches!(
            inner.state(),
            ConnectionState::Lost | ConnectionState::Failed | ConnectionState::InitializingFailed
        ) {
            return;
        }
        tracing::info!(
            "{}: reconnect attempt {}/{}",
            inner.device,
            attempt,
            policy.max_attempts
        );
        match inner.connect().await {
            Ok(()) => return,
            Err(e) => tracing::warn!("{}: reconnect attempt {} failed: {}", inner.device, attempt, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::registry::ListKind;
    use crate::transport::mock::BrokenStream;
    use crate::transport::{QueuedConnector, StreamTransport};
    use tokio::io::DuplexStream;

    fn device() -> DeviceIdentity {
        DeviceIdentity::serial("mem0", DeviceSubtype::Spp, "KDC270")
    }

    fn unreachable_reader() -> KdcReader {
        let transport = StreamTransport::new(QueuedConnector::<DuplexStream>::default());
        KdcReader::builder(device(), transport).build()
    }

    fn state_change(event: &Event) -> (ConnectionState, ConnectionState) {
        match event {
            Event::ConnectionChanged { old, new, .. } => (*old, *new),
            other => panic!("expected state change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let reader = unreachable_reader();
        let mut events = reader.subscribe(None);

        let err = reader.connect().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Link(LinkError {
                kind: LinkErrorKind::ConnectFailed,
                ..
            })
        ));
        assert_eq!(reader.state(), ConnectionState::Failed);

        let first = events.try_recv().unwrap();
        assert_eq!(
            state_change(&first),
            (ConnectionState::None, ConnectionState::Connecting)
        );
        let second = events.try_recv().unwrap();
        assert_eq!(
            state_change(&second),
            (ConnectionState::Connecting, ConnectionState::Failed)
        );
        let third = events.try_recv().unwrap();
        assert_eq!(third.kind(), EventKind::ErrorReceived);
        assert!(events.try_recv().is_none());

        // The identity stays registered for a retry.
        assert!(reader.registry().get(&reader.device().id).is_some());
        assert!(!reader
            .registry()
            .contains(ListKind::ConnectedPeripheral, &reader.device().id));
    }

    #[tokio::test]
    async fn test_listen_is_idempotent() {
        let reader = unreachable_reader();
        let mut events = reader.subscribe(None);

        reader.listen().unwrap();
        reader.listen().unwrap();
        assert_eq!(reader.state(), ConnectionState::Listening);
        assert!(events.try_recv().is_some());
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_rejects_invalid_transition() {
        let reader = unreachable_reader();
        let err = reader
            .inner
            .transition(ConnectionState::Connected)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: ConnectionState::None,
                to: ConnectionState::Connected,
            }
        ));
        assert_eq!(reader.state(), ConnectionState::None);
    }

    #[tokio::test]
    async fn test_commands_fail_when_not_connected() {
        let reader = unreachable_reader();
        assert!(matches!(
            reader.get_battery().await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle() {
        let reader = unreachable_reader();
        let mut events = reader.subscribe(None);
        reader.disconnect().await.unwrap();
        assert_eq!(reader.state(), ConnectionState::None);
        assert!(events.try_recv().is_none());
    }

    async fn next(events: &mut Subscription) -> Event {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_failure_is_reported_before_lost() {
        let transport = StreamTransport::new(QueuedConnector::new([BrokenStream]));
        let reader = KdcReader::builder(device(), transport)
            .config(ReaderConfig::new().handshake(false))
            .build();
        let mut events = reader.subscribe(None);

        reader.connect().await.unwrap();

        assert_eq!(
            state_change(&next(&mut events).await),
            (ConnectionState::None, ConnectionState::Connecting)
        );
        assert_eq!(
            state_change(&next(&mut events).await),
            (ConnectionState::Connecting, ConnectionState::Connected)
        );
        match next(&mut events).await {
            Event::ErrorReceived { error, .. } => assert!(matches!(
                error.as_ref(),
                Error::Link(LinkError {
                    kind: LinkErrorKind::ReadValue,
                    ..
                })
            )),
            other => panic!("expected link error, got {other:?}"),
        }
        assert_eq!(
            state_change(&next(&mut events).await),
            (ConnectionState::Connected, ConnectionState::Lost)
        );
    }

    #[test]
    fn test_config_builder() {
        let config = ReaderConfig::new()
            .command_timeout(Duration::from_millis(500))
            .handshake(false)
            .reconnect(ReconnectPolicy::new(3, Duration::from_millis(100)));
        assert_eq!(config.command_timeout, Duration::from_millis(500));
        assert!(!config.handshake);
        assert!(config.reconnect.is_enabled());
        assert!(!ReaderConfig::default().reconnect.is_enabled());
        assert_eq!(config.max_frame_size, 4096);
    }
}
