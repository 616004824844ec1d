//! Frame encoding and decoding for the KDC wire protocol.
//!
//! The wire format uses a simple framing protocol:
//! ```text
//! ┌──────────┬──────────────┬─────────────────┐
//! │  0x3c    │  size (LE)   │    payload      │
//! │  1 byte  │   2 bytes    │   size bytes    │
//! └──────────┴──────────────┴─────────────────┘
//! ```
//!
//! The decoder is incremental: bytes may arrive split at any point, or
//! several frames may arrive in one read. Garbage before a header is
//! skipped and reported once per run.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Frame header byte.
pub const FRAME_HEADER: u8 = 0x3c;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Default maximum number of buffered bytes.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 16 * 1024;

/// Minimum frame size (header + 2-byte length).
pub const MIN_FRAME_SIZE: usize = 3;

/// Encodes a payload into a framed message.
///
/// # Errors
///
/// Returns `FrameError::TooLarge` if the payload does not fit the 16-bit
/// length field.
pub fn encode(payload: &[u8]) -> Result<Bytes, FrameError> {
    let length = u16::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        size: payload.len(),
        max: usize::from(u16::MAX),
    })?;

    let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len());
    buf.put_u8(FRAME_HEADER);
    buf.put_u16_le(length);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Frame decoder that handles partial data.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
    max_buffer_size: usize,
    resyncing: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a new frame decoder with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Creates a decoder with explicit frame and buffer limits.
    #[must_use]
    pub fn with_limits(max_frame_size: usize, max_buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
            max_buffer_size,
            resyncing: false,
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(payload))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed. An error reports bytes that were
    /// discarded; decoding can continue by calling `decode` again.
    ///
    /// # Errors
    ///
    /// - `BadHeader` when garbage was skipped (once per run of garbage)
    /// - `TooLarge` when a header declares an oversized payload; the header
    ///   byte is dropped and the decoder resyncs
    /// - `BufferOverflow` when buffered bytes exceed the limit; the buffer
    ///   is reset
    pub fn decode(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            if self.buffer.is_empty() {
                return Ok(None);
            }

            if self.buffer[0] != FRAME_HEADER {
                let skipped = self
                    .buffer
                    .iter()
                    .position(|&b| b == FRAME_HEADER)
                    .unwrap_or(self.buffer.len());
                self.buffer.advance(skipped);
                tracing::trace!("skipped {} bytes before frame header", skipped);
                if !self.resyncing {
                    self.resyncing = true;
                    return Err(FrameError::BadHeader { skipped });
                }
                continue;
            }
            self.resyncing = false;

            if self.buffer.len() < MIN_FRAME_SIZE {
                return self.need_more();
            }

            let length = usize::from(u16::from_le_bytes([self.buffer[1], self.buffer[2]]));
            if length > self.max_frame_size {
                self.buffer.advance(1);
                self.resyncing = true;
                return Err(FrameError::TooLarge {
                    size: length,
                    max: self.max_frame_size,
                });
            }

            if self.buffer.len() < MIN_FRAME_SIZE + length {
                return self.need_more();
            }

            self.buffer.advance(MIN_FRAME_SIZE);
            return Ok(Some(self.buffer.split_to(length).freeze()));
        }
    }

    fn need_more(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buffer.len() > self.max_buffer_size {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(FrameError::BufferOverflow {
                size,
                max: self.max_buffer_size,
            });
        }
        Ok(None)
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.resyncing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple() {
        let frame = encode(b"hello").unwrap();

        assert_eq!(frame[0], FRAME_HEADER);
        assert_eq!(frame[1], 5);
        assert_eq!(frame[2], 0);
        assert_eq!(&frame[3..], b"hello");
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; 70_000];
        assert!(matches!(
            encode(&payload),
            Err(FrameError::TooLarge { size: 70_000, .. })
        ));
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut decoder = FrameDecoder::new();

        decoder.feed(&[0x3c, 0x05, 0x00, b'h', b'e']);
        assert_eq!(decoder.decode().unwrap(), None);

        decoder.feed(b"llo");
        assert_eq!(decoder.decode().unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[
            0x3c, 0x02, 0x00, b'h', b'i', // first frame
            0x3c, 0x03, 0x00, b'b', b'y', b'e', // second frame
        ]);

        assert_eq!(decoder.decode().unwrap(), Some(Bytes::from_static(b"hi")));
        assert_eq!(decoder.decode().unwrap(), Some(Bytes::from_static(b"bye")));
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_garbage_reported_once_per_run() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x01, 0x02, 0x03]);
        assert_eq!(
            decoder.decode(),
            Err(FrameError::BadHeader { skipped: 3 })
        );
        decoder.feed(&[0x04, 0x3c, 0x02, 0x00, b'o', b'k']);
        assert_eq!(decoder.decode().unwrap(), Some(Bytes::from_static(b"ok")));

        decoder.feed(&[0xff, 0x3c, 0x00, 0x00]);
        assert_eq!(
            decoder.decode(),
            Err(FrameError::BadHeader { skipped: 1 })
        );
        assert_eq!(decoder.decode().unwrap(), Some(Bytes::new()));
    }

    #[test]
    fn test_oversized_frame_resyncs() {
        let mut decoder = FrameDecoder::with_limits(4, 64);
        decoder.feed(&[0x3c, 0x10, 0x00, 0xaa, 0x3c, 0x01, 0x00, b'x']);
        assert!(matches!(
            decoder.decode(),
            Err(FrameError::TooLarge { size: 16, max: 4 })
        ));
        assert_eq!(decoder.decode().unwrap(), Some(Bytes::from_static(b"x")));
    }

    #[test]
    fn test_buffer_overflow_resets() {
        let mut decoder = FrameDecoder::with_limits(64, 8);
        decoder.feed(&[0x3c, 0x20, 0x00]);
        decoder.feed(&[0u8; 8]);
        assert!(matches!(
            decoder.decode(),
            Err(FrameError::BufferOverflow { size: 11, max: 8 })
        ));
        assert_eq!(decoder.buffered(), 0);
    }
}
