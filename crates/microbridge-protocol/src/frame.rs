//! Decoding of inbound sensor readings.
//!
//! The transport gives no message boundaries. Each successful read on a
//! connection is one "chunk" of however many bytes the kernel had ready.
//! Two framing modes are supported:
//!
//! - [`FrameMode::Chunk`]: the board sends each reading in a single
//!   write and the chunk boundary is trusted. The first two bytes of every
//!   chunk of length >= 2 form a reading, and the rest is ignored. Shorter
//!   chunks are dropped. This is what deployed firmware expects.
//! - [`FrameMode::Stream`]: the byte stream is cut into consecutive 2-byte
//!   frames regardless of how reads split it. A trailing odd byte is kept
//!   until the next chunk completes it. When one chunk carries several
//!   frames the newest wins.

use microbridge_core::SensorValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one encoded reading in bytes.
pub const SENSOR_FRAME_LEN: usize = 2;

/// Decodes the reading carried by a single receive chunk.
///
/// Returns `None` if the chunk holds fewer than two bytes. Bytes after the
/// first two never influence the result.
pub fn decode_sensor_chunk(chunk: &[u8]) -> Option<SensorValue> {
    match chunk {
        [low, high, ..] => Some(SensorValue::from_le_pair(*low, *high)),
        _ => None,
    }
}

/// How receive chunks are turned into readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// One reading per chunk, taken from its first two bytes
    #[default]
    Chunk,

    /// Continuous stream of 2-byte frames, reassembled across chunks
    Stream,
}

impl FrameMode {
    /// Parses a mode name as used in config files and CLI flags.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chunk" => Some(Self::Chunk),
            "stream" => Some(Self::Stream),
            _ => None,
        }
    }
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk => write!(f, "chunk"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// Per-connection decoder state.
///
/// Keep one decoder per connection: in stream mode it carries a pending
/// byte between chunks, and mixing connections would splice their streams.
#[derive(Debug, Clone, Default)]
pub struct SensorDecoder {
    mode: FrameMode,
    pending: Option<u8>,
}

impl SensorDecoder {
    /// Creates a decoder for the given framing mode.
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            pending: None,
        }
    }

    /// Returns the framing mode.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Returns true if a partial frame is waiting for its second byte.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feeds one receive chunk and returns the reading it completes, if any.
    pub fn push(&mut self, chunk: &[u8]) -> Option<SensorValue> {
        match self.mode {
            FrameMode::Chunk => decode_sensor_chunk(chunk),
            FrameMode::Stream => self.push_stream(chunk),
        }
    }

    fn push_stream(&mut self, chunk: &[u8]) -> Option<SensorValue> {
        let mut latest = None;
        let mut rest = chunk;

        if let Some(low) = self.pending {
            match rest.split_first() {
                Some((high, tail)) => {
                    latest = Some(SensorValue::from_le_pair(low, *high));
                    self.pending = None;
                    rest = tail;
                }
                None => return None,
            }
        }

        let mut frames = rest.chunks_exact(SENSOR_FRAME_LEN);
        for frame in frames.by_ref() {
            if let Some(value) = decode_sensor_chunk(frame) {
                latest = Some(value);
            }
        }
        self.pending = frames.remainder().first().copied();

        latest
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_low_byte_first() {
        assert_eq!(decode_sensor_chunk(&[0x0A, 0x00]), Some(SensorValue::new(10)));
        assert_eq!(decode_sensor_chunk(&[0x34, 0x12]), Some(SensorValue::new(0x1234)));
        assert_eq!(decode_sensor_chunk(&[0xFF, 0xFF]), Some(SensorValue::new(u16::MAX)));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let tails: [&[u8]; 3] = [&[], &[0x00], &[0xFF, 0xEE, 0xDD]];
        for tail in tails {
            let mut chunk = vec![0x01, 0x02];
            chunk.extend_from_slice(tail);
            assert_eq!(decode_sensor_chunk(&chunk), Some(SensorValue::new(0x0201)));
        }
    }

    #[test]
    fn test_decode_short_chunks() {
        assert_eq!(decode_sensor_chunk(&[]), None);
        assert_eq!(decode_sensor_chunk(&[0xFF]), None);
    }

    #[test]
    fn test_chunk_mode_matches_single_chunk_decoding() {
        let mut decoder = SensorDecoder::new(FrameMode::Chunk);
        assert_eq!(decoder.push(&[0x0A]), None);
        // A split reading is lost in chunk mode.
        assert_eq!(decoder.push(&[0x00]), None);
        assert_eq!(decoder.push(&[0x0A, 0x00, 0x05]), Some(SensorValue::new(10)));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_stream_mode_reassembles_split_frame() {
        let mut decoder = SensorDecoder::new(FrameMode::Stream);
        assert_eq!(decoder.push(&[0x0A]), None);
        assert!(decoder.has_pending());
        assert_eq!(decoder.push(&[0x00]), Some(SensorValue::new(10)));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_stream_mode_latest_frame_wins() {
        let mut decoder = SensorDecoder::new(FrameMode::Stream);
        // Three frames plus one dangling byte.
        let value = decoder.push(&[0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04]);
        assert_eq!(value, Some(SensorValue::new(3)));
        assert!(decoder.has_pending());
        assert_eq!(decoder.push(&[0x01]), Some(SensorValue::new(0x0104)));
    }

    #[test]
    fn test_stream_mode_empty_chunk_keeps_pending() {
        let mut decoder = SensorDecoder::new(FrameMode::Stream);
        decoder.push(&[0x07]);
        assert_eq!(decoder.push(&[]), None);
        assert!(decoder.has_pending());
        decoder.reset();
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_frame_mode_parse() {
        assert_eq!(FrameMode::parse("Stream"), Some(FrameMode::Stream));
        assert_eq!(FrameMode::parse(" chunk "), Some(FrameMode::Chunk));
        assert_eq!(FrameMode::parse("lines"), None);
        assert_eq!(FrameMode::default(), FrameMode::Chunk);
    }

    #[test]
    fn test_frame_mode_deserialize() {
        #[derive(Deserialize)]
        struct Section {
            framing: FrameMode,
        }

        let section: Section = toml::from_str("framing = \"stream\"").unwrap();
        assert_eq!(section.framing, FrameMode::Stream);
    }
}
