//! Property tests for incremental decoding.
//!
//! The reader sees bytes in whatever chunks the transport delivers. The
//! decoded record sequence must not depend on where those boundaries fall.

mod common;

use bytes::{BufMut, Bytes, BytesMut};
use kdc::protocol::{DecodeContext, FrameDecoder, Packet, encode_frame};
use kdc::{CodecTable, DataType, DeviceRecord};
use proptest::prelude::*;

/// Barcode bodies: symbology byte then printable data.
fn barcode_body() -> impl Strategy<Value = Vec<u8>> {
    (any::<u8>(), prop::string::string_regex("[0-9A-Z]{1,24}").expect("regex"))
        .prop_map(|(symbology, data)| {
            let mut body = vec![symbology];
            body.extend_from_slice(data.as_bytes());
            body
        })
}

fn stream_of(bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut stream = Vec::new();
    for body in bodies {
        let mut payload = BytesMut::new();
        payload.put_u8(DataType::Barcode as u8);
        payload.put_slice(&common::RECORD_CLOCK);
        payload.put_slice(body);
        stream.extend_from_slice(&encode_frame(&payload).unwrap());
    }
    stream
}

fn drain(decoder: &mut FrameDecoder, codecs: &CodecTable, out: &mut Vec<DeviceRecord>) {
    while let Some(payload) = decoder.decode().unwrap() {
        match Packet::parse(payload).unwrap() {
            Packet::Record(raw) => out.push(codecs.decode(raw, &DecodeContext::default()).unwrap()),
            Packet::Response(r) => panic!("unexpected response {r:?}"),
        }
    }
}

fn decode_in_chunks(stream: &[u8], cuts: &[usize]) -> Vec<DeviceRecord> {
    let codecs = CodecTable::default();
    let mut decoder = FrameDecoder::new();
    let mut records = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        decoder.feed(&stream[start..cut]);
        drain(&mut decoder, &codecs, &mut records);
        start = cut;
    }
    decoder.feed(&stream[start..]);
    drain(&mut decoder, &codecs, &mut records);
    records
}

proptest! {
    #[test]
    fn split_points_do_not_change_records(
        bodies in prop::collection::vec(barcode_body(), 1..8),
        raw_cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let stream = stream_of(&bodies);
        let whole = decode_in_chunks(&stream, &[]);
        prop_assert_eq!(whole.len(), bodies.len());

        let mut cuts: Vec<usize> = raw_cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
        cuts.sort_unstable();
        let chunked = decode_in_chunks(&stream, &cuts);
        prop_assert_eq!(chunked, whole);
    }

    #[test]
    fn one_byte_at_a_time(bodies in prop::collection::vec(barcode_body(), 1..4)) {
        let stream = stream_of(&bodies);
        let cuts: Vec<usize> = (1..stream.len()).collect();
        let records = decode_in_chunks(&stream, &cuts);

        prop_assert_eq!(records.len(), bodies.len());
        for (record, body) in records.iter().zip(&bodies) {
            let barcode = record.barcode().unwrap();
            prop_assert_eq!(barcode.symbology, body[0]);
            prop_assert_eq!(&barcode.data, &Bytes::copy_from_slice(&body[1..]));
            prop_assert_eq!(record.timestamp.year, 2026);
        }
    }
}
