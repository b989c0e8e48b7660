//! Decoder for the multiplexed stdout/stderr stream a container backend returns.
//!
//! Each frame is an 8-byte header followed by its payload:
//!
//! ```text
//! +--------+-----------+---------------------------+-----------------+
//! | stream | 3 × 0x00  | payload length (u32, BE)  | payload ...     |
//! +--------+-----------+---------------------------+-----------------+
//! ```
//!
//! Stream 1 is stdout, stream 2 is stderr. Frames follow each other with no
//! separator.

use thiserror::Error;

use crate::sandbox::types::{LogEntry, StreamTag};

pub const HEADER_LEN: usize = 8;

/// Why decoding stopped before the end of the buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown stream tag {tag} at byte {offset}")]
    UnknownStream { offset: usize, tag: u8 },

    #[error("truncated frame header at byte {offset}: {available} of {header} bytes available", header = HEADER_LEN)]
    TruncatedHeader { offset: usize, available: usize },

    #[error("frame at byte {offset} declares {declared} payload bytes but only {available} remain")]
    TruncatedPayload {
        offset: usize,
        declared: usize,
        available: usize,
    },
}

/// Entries decoded from a buffer, plus the error that cut decoding short.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Demuxed {
    pub entries: Vec<LogEntry>,
    pub error: Option<DecodeError>,
}

/// Split `raw` into log entries. Never fails: a bad frame ends decoding and the
/// entries before it are kept.
pub fn demux(raw: &[u8]) -> Demuxed {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < raw.len() {
        match decode_frame(raw, offset) {
            Ok((entry, next)) => {
                entries.push(entry);
                offset = next;
            }
            Err(error) => {
                return Demuxed {
                    entries,
                    error: Some(error),
                }
            }
        }
    }

    Demuxed {
        entries,
        error: None,
    }
}

fn decode_frame(raw: &[u8], offset: usize) -> Result<(LogEntry, usize), DecodeError> {
    let rest = &raw[offset..];
    if rest.len() < HEADER_LEN {
        return Err(DecodeError::TruncatedHeader {
            offset,
            available: rest.len(),
        });
    }

    let stream =
        StreamTag::from_byte(rest[0]).ok_or(DecodeError::UnknownStream { offset, tag: rest[0] })?;
    let declared = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;

    let body = &rest[HEADER_LEN..];
    if declared > body.len() {
        return Err(DecodeError::TruncatedPayload {
            offset,
            declared,
            available: body.len(),
        });
    }

    let entry = LogEntry::new(stream, &body[..declared]);
    Ok((entry, offset + HEADER_LEN + declared))
}

/// Append one frame to `out`.
///
/// # Panics
///
/// If `payload` is longer than `u32::MAX` bytes.
pub fn encode_frame(stream: StreamTag, payload: &[u8], out: &mut Vec<u8>) {
    let len = u32::try_from(payload.len()).expect("frame payload exceeds u32::MAX bytes");
    out.reserve(HEADER_LEN + payload.len());
    out.extend_from_slice(&[stream.as_byte(), 0, 0, 0]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[(StreamTag, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (stream, payload) in parts {
            encode_frame(*stream, payload.as_bytes(), &mut out);
        }
        out
    }

    #[test]
    fn test_single_stdout_frame() {
        let raw = [0x01, 0, 0, 0, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'];
        let decoded = demux(&raw);
        assert_eq!(decoded.error, None);
        assert_eq!(decoded.entries, vec![LogEntry::new(StreamTag::Stdout, b"hello".to_vec())]);
    }

    #[test]
    fn test_declared_length_past_end() {
        let raw = [0x01, 0, 0, 0, 0, 0, 0, 10, b'h', b'e', b'l', b'l', b'o'];
        let decoded = demux(&raw);
        assert!(decoded.entries.is_empty());
        assert_eq!(
            decoded.error,
            Some(DecodeError::TruncatedPayload {
                offset: 0,
                declared: 10,
                available: 5,
            })
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(demux(&[]), Demuxed::default());
    }

    #[test]
    fn test_interleaved_streams_keep_arrival_order() {
        let raw = frames(&[
            (StreamTag::Stdout, "hello\n"),
            (StreamTag::Stderr, "world\n"),
            (StreamTag::Stdout, "hello\n"),
        ]);
        let decoded = demux(&raw);
        assert_eq!(decoded.error, None);
        let streams: Vec<_> = decoded.entries.iter().map(|e| e.stream).collect();
        assert_eq!(streams, [StreamTag::Stdout, StreamTag::Stderr, StreamTag::Stdout]);
        assert_eq!(decoded.entries[1].text(), "world\n");
    }

    #[test]
    fn test_zero_length_frames() {
        let raw = frames(&[
            (StreamTag::Stdout, ""),
            (StreamTag::Stderr, "x"),
            (StreamTag::Stderr, ""),
        ]);
        assert_eq!(raw.len(), 3 * HEADER_LEN + 1);

        let decoded = demux(&raw);
        assert_eq!(decoded.error, None);
        assert_eq!(decoded.entries.len(), 3);
        assert!(decoded.entries[0].payload.is_empty());
        assert_eq!(decoded.entries[1].payload, b"x");
        assert!(decoded.entries[2].payload.is_empty());
    }

    #[test]
    fn test_payload_ending_exactly_at_buffer_edge() {
        let raw = frames(&[(StreamTag::Stdout, "ab"), (StreamTag::Stderr, "cde")]);
        let decoded = demux(&raw);
        assert_eq!(decoded.error, None);
        assert_eq!(decoded.entries.len(), 2);

        // One byte short of the last payload.
        let decoded = demux(&raw[..raw.len() - 1]);
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(
            decoded.error,
            Some(DecodeError::TruncatedPayload {
                offset: HEADER_LEN + 2,
                declared: 3,
                available: 2,
            })
        );
    }

    #[test]
    fn test_truncated_header_after_valid_frame() {
        let mut raw = frames(&[(StreamTag::Stdout, "ok")]);
        raw.extend_from_slice(&[0x02, 0, 0]);
        let decoded = demux(&raw);
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(
            decoded.error,
            Some(DecodeError::TruncatedHeader {
                offset: HEADER_LEN + 2,
                available: 3,
            })
        );
    }

    #[test]
    fn test_unknown_stream_keeps_prior_entries() {
        let mut raw = frames(&[(StreamTag::Stderr, "first")]);
        let bad_at = raw.len();
        raw.extend_from_slice(&[0x03, 0, 0, 0, 0, 0, 0, 1, b'z']);
        raw.extend(frames(&[(StreamTag::Stdout, "never")]));

        let decoded = demux(&raw);
        assert_eq!(decoded.entries, vec![LogEntry::new(StreamTag::Stderr, b"first".to_vec())]);
        assert_eq!(
            decoded.error,
            Some(DecodeError::UnknownStream {
                offset: bad_at,
                tag: 3,
            })
        );
    }

    #[test]
    fn test_stdin_tag_is_rejected() {
        let raw = [0x00, 0, 0, 0, 0, 0, 0, 0];
        let decoded = demux(&raw);
        assert!(matches!(decoded.error, Some(DecodeError::UnknownStream { tag: 0, .. })));
    }

    #[test]
    fn test_non_utf8_payload_is_kept_verbatim() {
        let payload = [0xff, 0xfe, b'\n', 0x00];
        let mut raw = Vec::new();
        encode_frame(StreamTag::Stdout, &payload, &mut raw);
        let decoded = demux(&raw);
        assert_eq!(decoded.entries[0].payload, payload);
    }

    #[test]
    fn test_round_trip_preserves_count_and_order() {
        let parts: Vec<(StreamTag, Vec<u8>)> = (0..50)
            .map(|i| {
                let stream = if i % 3 == 0 { StreamTag::Stderr } else { StreamTag::Stdout };
                (stream, vec![b'a' + (i % 26) as u8; i])
            })
            .collect();
        let mut raw = Vec::new();
        for (stream, payload) in &parts {
            encode_frame(*stream, payload, &mut raw);
        }

        let decoded = demux(&raw);
        assert_eq!(decoded.error, None);
        let expected: Vec<_> = parts
            .into_iter()
            .map(|(stream, payload)| LogEntry::new(stream, payload))
            .collect();
        assert_eq!(decoded.entries, expected);
    }

    #[test]
    fn test_reserved_bytes_are_ignored() {
        let raw = [0x02, 0xaa, 0xbb, 0xcc, 0, 0, 0, 1, b'!'];
        let decoded = demux(&raw);
        assert_eq!(decoded.error, None);
        assert_eq!(decoded.entries, vec![LogEntry::new(StreamTag::Stderr, b"!".to_vec())]);
    }

    #[test]
    fn test_decode_error_messages() {
        let header = DecodeError::TruncatedHeader {
            offset: 14,
            available: 3,
        };
        assert_eq!(
            header.to_string(),
            "truncated frame header at byte 14: 3 of 8 bytes available"
        );

        let tag = DecodeError::UnknownStream { offset: 0, tag: 9 };
        assert_eq!(tag.to_string(), "unknown stream tag 9 at byte 0");

        let source: &dyn std::error::Error = &tag;
        assert!(source.source().is_none());
    }
}
