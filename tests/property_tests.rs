//! Property-based tests for rust_tcp_engine using proptest

use bytes::Bytes;
use proptest::prelude::*;
use rust_tcp_engine::codec::FrameAssembler;
use rust_tcp_engine::{
    Codec, FixedSizeCodec, LengthPrefixedCodec, Message, MessageCodec, NetworkError, Settings,
};
use std::sync::Arc;

/// Feed `wire` to `assembler` in chunks whose sizes cycle through `splits`
fn feed_in_chunks<C: Codec>(
    assembler: &mut FrameAssembler<C>,
    wire: &[u8],
    splits: &[usize],
) -> Vec<C::Item> {
    let mut items = Vec::new();
    let mut offset = 0;
    let mut sizes = splits.iter().cycle();
    while offset < wire.len() {
        let size = (*sizes.next().unwrap()).min(wire.len() - offset);
        let (decoded, error) = assembler.feed(&wire[offset..offset + size]);
        assert!(error.is_none(), "Unexpected decode error: {:?}", error);
        items.extend(decoded);
        offset += size;
    }
    items
}

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..16)
}

fn splits() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..64, 1..8)
}

// ============================================================================
// Reassembly Under Arbitrary Chunking
// ============================================================================

proptest! {
    /// Length-prefixed frames come out whole and in order however the
    /// stream is split
    #[test]
    fn test_length_prefixed_any_chunking(frames in payloads(), splits in splits()) {
        let codec = LengthPrefixedCodec::new();
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&codec.encode(&Bytes::from(frame.clone())).unwrap());
        }

        let mut assembler = FrameAssembler::new(Arc::new(codec), 64 * 1024);
        let items = feed_in_chunks(&mut assembler, &wire, &splits);

        prop_assert_eq!(items.len(), frames.len());
        for (item, frame) in items.iter().zip(&frames) {
            prop_assert_eq!(item.as_ref(), frame.as_slice());
        }
        prop_assert_eq!(assembler.buffered(), 0);
    }

    /// Identified messages survive arbitrary chunking with ids intact
    #[test]
    fn test_message_any_chunking(
        bodies in payloads(),
        ids in prop::collection::vec(any::<u32>(), 16),
        splits in splits(),
    ) {
        let messages: Vec<Message> = bodies
            .iter()
            .zip(&ids)
            .map(|(body, id)| Message::new(*id, body.clone()))
            .collect();
        let mut wire = Vec::new();
        for message in &messages {
            wire.extend_from_slice(&message.encode().unwrap());
        }

        let mut assembler = FrameAssembler::new(Arc::new(MessageCodec::new()), 64 * 1024);
        let decoded = feed_in_chunks(&mut assembler, &wire, &splits);

        prop_assert_eq!(decoded, messages);
    }

    /// Fixed-size units are emitted only once complete; the remainder stays
    /// buffered
    #[test]
    fn test_fixed_size_any_chunking(
        size in 1usize..16,
        data in prop::collection::vec(any::<u8>(), 0..512),
        splits in splits(),
    ) {
        let mut assembler = FrameAssembler::new(Arc::new(FixedSizeCodec::new(size)), 64 * 1024);
        let units = feed_in_chunks(&mut assembler, &data, &splits);

        prop_assert_eq!(units.len(), data.len() / size);
        for (unit, chunk) in units.iter().zip(data.chunks_exact(size)) {
            prop_assert_eq!(unit.as_ref(), chunk);
        }
        prop_assert_eq!(assembler.buffered(), data.len() % size);
    }
}

// ============================================================================
// Decoding Arbitrary Input (DoS Protection)
// ============================================================================

proptest! {
    /// Arbitrary bytes never panic the message decoder and never yield a
    /// payload above the limit
    #[test]
    fn test_message_decode_arbitrary_bytes(
        data in prop::collection::vec(any::<u8>(), 0..128),
        max_size in 0usize..64,
    ) {
        match Message::decode(&data, max_size) {
            Ok(Some((message, consumed))) => {
                prop_assert!(message.size() <= max_size);
                prop_assert_eq!(consumed, 8 + message.size());
                prop_assert!(consumed <= data.len());
            }
            Ok(None) => {}
            Err(e) => prop_assert!(matches!(e, NetworkError::MessageTooLarge(_, _))),
        }
    }

    /// An oversized length header is rejected as soon as it is visible,
    /// before any payload arrives
    #[test]
    fn test_oversized_frame_rejected_early(max in 1usize..1024, excess in 1usize..1024) {
        let codec = LengthPrefixedCodec::new().with_max_frame_size(max);
        let header = ((max + excess) as u32).to_be_bytes();

        let mut assembler = FrameAssembler::new(Arc::new(codec), 64 * 1024);
        let (items, error) = assembler.feed(&header);

        prop_assert!(items.is_empty());
        prop_assert!(matches!(error, Some(NetworkError::MessageTooLarge(_, _))));
    }

    /// A value that never completes trips the buffering limit
    #[test]
    fn test_assembler_buffer_limit(limit in 8usize..256) {
        let mut assembler = FrameAssembler::new(Arc::new(FixedSizeCodec::new(limit * 4)), limit);
        let (items, error) = assembler.feed(&vec![0u8; limit + 1]);

        prop_assert!(items.is_empty());
        prop_assert!(matches!(error, Some(NetworkError::MessageTooLarge(_, _))));
    }
}

// ============================================================================
// Settings Validation
// ============================================================================

proptest! {
    /// Any non-zero limits validate and survive a JSON round trip
    #[test]
    fn test_settings_json_roundtrip(
        buffer_size in 1usize..1_000_000,
        max_connections in 1usize..10_000,
        max_writes in 1usize..1_000,
    ) {
        let settings = Settings::default()
            .with_buffer_size(buffer_size)
            .with_max_connections(max_connections)
            .with_max_simultaneous_writes(max_writes);
        prop_assert!(settings.validate().is_ok());

        let restored = Settings::from_json(&settings.to_json().unwrap()).unwrap();
        prop_assert_eq!(restored.buffer_size, buffer_size);
        prop_assert_eq!(restored.max_connections, max_connections);
        prop_assert_eq!(restored.max_simultaneous_writes, max_writes);
    }
}
