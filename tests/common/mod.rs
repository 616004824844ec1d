//! Common test utilities for integration tests.
//!
//! A [`FakeDevice`] plays the reader's side of an in-memory duplex pipe:
//! it decodes the commands the library sends and writes back framed
//! responses and records.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use kdc::protocol::{FrameDecoder, RESPONSE_MARKER, encode_frame};
use kdc::transport::{QueuedConnector, StreamTransport};
use kdc::{
    ConnectionState, DeviceIdentity, DeviceSubtype, Event, KdcReader, KdcReaderBuilder,
    ReaderConfig, Subscription,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// How long a test waits for the other side before failing.
pub const WAIT: Duration = Duration::from_secs(5);

/// Device clock stamped on every record: 2026-10-19 09:30:00.
pub const RECORD_CLOCK: [u8; 6] = [26, 10, 19, 9, 30, 0];

/// Connector handing the reader one pipe end per connect.
pub type Connector = Arc<QueuedConnector<DuplexStream>>;

/// Installs a tracing subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Identity used by every test reader.
pub fn device() -> DeviceIdentity {
    DeviceIdentity::serial("mem0", DeviceSubtype::Spp, "KDC475")
}

/// Creates a pipe; the stream goes to the reader.
pub fn pipe() -> (DuplexStream, FakeDevice) {
    let (host, remote) = tokio::io::duplex(4096);
    (host, FakeDevice::new(remote))
}

/// Creates a reader builder whose first connect reaches the returned fake.
pub fn reader(config: ReaderConfig) -> (KdcReaderBuilder, FakeDevice, Connector) {
    init_tracing();
    let (host, fake) = pipe();
    let connector = Arc::new(QueuedConnector::new([host]));
    let builder =
        KdcReader::builder(device(), StreamTransport::new(Arc::clone(&connector))).config(config);
    (builder, fake, connector)
}

/// Receives the next event or fails the test.
pub async fn next_event(events: &mut Subscription) -> Event {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("dispatcher closed")
}

/// Unpacks a connection change.
pub fn state_change(event: &Event) -> (ConnectionState, ConnectionState) {
    match event {
        Event::ConnectionChanged { old, new, .. } => (*old, *new),
        other => panic!("expected a connection change, got {other:?}"),
    }
}

/// The reader's side of the link.
pub struct FakeDevice {
    stream: DuplexStream,
    decoder: FrameDecoder,
}

impl FakeDevice {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    /// Writes bytes as they are, without framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Writes one framed payload.
    pub async fn send_payload(&mut self, payload: &[u8]) {
        let frame = encode_frame(payload).unwrap();
        self.send_raw(&frame).await;
    }

    /// Pushes a data record.
    pub async fn send_record(&mut self, data_type: u8, body: &[u8]) {
        let mut payload = BytesMut::new();
        payload.put_u8(data_type);
        payload.put_slice(&RECORD_CLOCK);
        payload.put_slice(body);
        self.send_payload(&payload).await;
    }

    /// Sends a successful response.
    pub async fn respond(&mut self, opcode: u8, body: &[u8]) {
        let mut payload = BytesMut::new();
        payload.put_u8(RESPONSE_MARKER);
        payload.put_u8(opcode);
        payload.put_u8(0);
        payload.put_slice(body);
        self.send_payload(&payload).await;
    }

    /// Sends a failed response with a vendor code.
    pub async fn fail(&mut self, opcode: u8, code: u16) {
        let mut payload = BytesMut::new();
        payload.put_u8(RESPONSE_MARKER);
        payload.put_u8(opcode);
        payload.put_u8(1);
        payload.put_u16_le(code);
        self.send_payload(&payload).await;
    }

    /// Reads the next command payload (`[opcode][params...]`).
    pub async fn next_command(&mut self) -> Bytes {
        loop {
            if let Some(payload) = self.decoder.decode().unwrap() {
                return payload;
            }
            let mut buf = [0u8; 512];
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a command")
                .unwrap();
            assert!(n > 0, "reader closed the link");
            self.decoder.feed(&buf[..n]);
        }
    }

    /// Answers the next command successfully and returns it.
    pub async fn answer(&mut self, body: &[u8]) -> Bytes {
        let command = self.next_command().await;
        self.respond(command[0], body).await;
        command
    }
}
