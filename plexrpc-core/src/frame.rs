//! Length-prefixed message framing.
//!
//! Every message on the wire is prefixed by a five-byte header:
//!
//! ```text
//! [compressed:1][length:4, big-endian][payload:length]
//! ```
//!
//! The compressed flag is `0` or `1`; any other value is a protocol error.

use bytes::{BufMut, Bytes, BytesMut};

use crate::status::RpcError;

/// Size of the message frame header.
pub const FRAME_HEADER_LEN: usize = 5;

/// A decoded message frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub compressed: bool,
    pub payload: Bytes,
}

/// Prefix `payload` with the five-byte frame header.
pub fn encode_frame(payload: &[u8], compressed: bool) -> Bytes {
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u8(compressed as u8);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

/// Parse a frame header, returning `(compressed, payload_length)`.
pub fn decode_frame_header(header: &[u8]) -> Result<(bool, u32), RpcError> {
    if header.len() < FRAME_HEADER_LEN {
        return Err(RpcError::internal(format!(
            "incomplete frame header: expected {FRAME_HEADER_LEN} bytes, got {}",
            header.len()
        )));
    }
    let compressed = match header[0] {
        0 => false,
        1 => true,
        flag => {
            return Err(RpcError::internal(format!(
                "invalid frame compression flag 0x{flag:02x}"
            )));
        }
    };
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    Ok((compressed, length))
}

/// Incremental frame decoder over a chunked byte stream.
///
/// Push transport chunks in with [`push`](FrameDecoder::push) and drain
/// complete frames with [`next_frame`](FrameDecoder::next_frame).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_bytes: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject frames whose payload exceeds `limit` uncompressed bytes.
    pub fn with_max_message_bytes(limit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_bytes: Some(limit),
        }
    }

    /// Append a chunk read from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet drained as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to parse one complete frame.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, RpcError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let (compressed, length) = decode_frame_header(&self.buffer)?;
        let length = length as usize;
        if let Some(limit) = self.max_message_bytes {
            if length > limit {
                return Err(RpcError::resource_exhausted(format!(
                    "message of {length} bytes exceeds the {limit} byte limit"
                )));
            }
        }
        if self.buffer.len() < FRAME_HEADER_LEN + length {
            return Ok(None);
        }
        let mut frame = self.buffer.split_to(FRAME_HEADER_LEN + length);
        let payload = frame.split_off(FRAME_HEADER_LEN).freeze();
        Ok(Some(Frame {
            compressed,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(b"hello", false);
        assert_eq!(frame[0], 0);
        assert_eq!(&frame[1..5], &5u32.to_be_bytes());
        assert_eq!(&frame[5..], b"hello");

        let frame = encode_frame(b"hello", true);
        assert_eq!(frame[0], 1);
    }

    #[test]
    fn test_decode_header_rejects_bad_flag() {
        let mut bytes = encode_frame(b"x", false).to_vec();
        bytes[0] = 0x02;
        assert!(decode_frame_header(&bytes).is_err());
    }

    #[test]
    fn test_decoder_single_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_frame(b"hello", false));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(!frame.compressed);
        assert_eq!(frame.payload.as_ref(), b"hello");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let encoded = encode_frame(b"split across chunks", false);
        let mut decoder = FrameDecoder::new();

        decoder.push(&encoded[..3]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.push(&encoded[3..10]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.push(&encoded[10..]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"split across chunks");
    }

    #[test]
    fn test_decoder_multiple_frames_in_one_chunk() {
        let mut bytes = encode_frame(b"one", false).to_vec();
        bytes.extend_from_slice(&encode_frame(b"two", true));

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame().unwrap().unwrap().payload.as_ref(), b"one");
        let second = decoder.next_frame().unwrap().unwrap();
        assert!(second.compressed);
        assert_eq!(second.payload.as_ref(), b"two");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_enforces_message_limit() {
        let mut decoder = FrameDecoder::with_max_message_bytes(4);
        decoder.push(&encode_frame(b"hello", false));
        let err = decoder.next_frame().unwrap_err();
        assert_eq!(err.code(), crate::Code::ResourceExhausted);
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_frame(b"", false));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(frame.payload.is_empty());
    }
}
