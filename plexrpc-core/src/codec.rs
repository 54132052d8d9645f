//! Message serialization seams.
//!
//! The runtime never interprets message contents; it moves payloads between
//! the caller and the transport through the [`Serializer`] and
//! [`Deserializer`] traits. [`ProstCodec`] is the protobuf implementation
//! generated stubs use.

use std::marker::PhantomData;

use bytes::Bytes;

use crate::status::RpcError;

/// Converts messages into wire payloads.
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, message: &T) -> Result<Bytes, RpcError>;
}

/// Converts wire payloads back into messages.
pub trait Deserializer<T>: Send + Sync {
    fn deserialize(&self, payload: Bytes) -> Result<T, RpcError>;
}

/// Protobuf codec backed by `prost`.
pub struct ProstCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ProstCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ProstCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ProstCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ProstCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProstCodec")
    }
}

impl<T: prost::Message> Serializer<T> for ProstCodec<T> {
    fn serialize(&self, message: &T) -> Result<Bytes, RpcError> {
        Ok(Bytes::from(message.encode_to_vec()))
    }
}

impl<T: prost::Message + Default> Deserializer<T> for ProstCodec<T> {
    fn deserialize(&self, payload: Bytes) -> Result<T, RpcError> {
        T::decode(payload)
            .map_err(|e| RpcError::internal(format!("failed to decode message: {e}")).with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Code;

    #[derive(Clone, PartialEq, Debug, Default)]
    struct Ping {
        text: String,
    }

    impl prost::Message for Ping {
        fn encode_raw(&self, buf: &mut impl bytes::BufMut)
        where
            Self: Sized,
        {
            if !self.text.is_empty() {
                prost::encoding::string::encode(1, &self.text, buf);
            }
        }

        fn merge_field(
            &mut self,
            tag: u32,
            wire_type: prost::encoding::WireType,
            buf: &mut impl bytes::Buf,
            ctx: prost::encoding::DecodeContext,
        ) -> Result<(), prost::DecodeError>
        where
            Self: Sized,
        {
            if tag == 1 {
                prost::encoding::string::merge(wire_type, &mut self.text, buf, ctx)
            } else {
                prost::encoding::skip_field(wire_type, tag, buf, ctx)
            }
        }

        fn encoded_len(&self) -> usize {
            if self.text.is_empty() {
                0
            } else {
                prost::encoding::string::encoded_len(1, &self.text)
            }
        }

        fn clear(&mut self) {
            self.text.clear();
        }
    }

    #[test]
    fn test_prost_round_trip() {
        let codec = ProstCodec::<Ping>::new();
        let message = Ping {
            text: "hello".into(),
        };
        let bytes = codec.serialize(&message).unwrap();
        let decoded = codec.deserialize(bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_prost_decode_failure_is_internal() {
        let codec = ProstCodec::<Ping>::new();
        // Field 1 with wire type 2 but a length running past the buffer.
        let err = codec
            .deserialize(Bytes::from_static(&[0x0A, 0xFF, 0x01]))
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(std::error::Error::source(&err).is_some());
    }
}
