//! Shared pieces for the call-execution suites.

use bytes::Bytes;
use plexrpc_core::{Metadata, RequestPart, ResponsePart, RpcError, ServerStream, Status};

/// A one-field protobuf message for driving the prost codec in tests.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Echo {
    pub text: String,
}

impl prost::Message for Echo {
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

pub fn encode(text: &str) -> Bytes {
    use prost::Message;
    Bytes::from(
        Echo {
            text: text.to_string(),
        }
        .encode_to_vec(),
    )
}

pub fn decode(payload: &Bytes) -> Echo {
    use prost::Message;
    Echo::decode(payload.clone()).expect("valid echo payload")
}

/// Read a whole request off a server stream.
pub async fn read_request(stream: &mut ServerStream) -> (Metadata, Vec<Bytes>) {
    let metadata = match stream.inbound.next().await.expect("a request part") {
        Ok(RequestPart::Metadata(metadata)) => metadata,
        other => panic!("expected request metadata, got {other:?}"),
    };
    let mut messages = Vec::new();
    while let Some(part) = stream.inbound.next().await {
        match part.expect("request part") {
            RequestPart::Message(payload) => messages.push(payload),
            RequestPart::Metadata(_) => panic!("duplicate request metadata"),
        }
    }
    (metadata, messages)
}

/// Answer with initial metadata, one message, and an ok status.
pub async fn respond_with_message(
    stream: &mut ServerStream,
    initial_metadata: Metadata,
    payload: Bytes,
    trailing_metadata: Metadata,
) {
    stream
        .outbound
        .send(ResponsePart::Metadata(initial_metadata))
        .await
        .unwrap();
    stream
        .outbound
        .send(ResponsePart::Message(payload))
        .await
        .unwrap();
    stream
        .outbound
        .send(ResponsePart::Status(Status::ok(), trailing_metadata))
        .await
        .unwrap();
    stream.outbound.finish();
}

/// Answer trailers-only with an error status.
pub async fn respond_trailers_only(stream: &mut ServerStream, error: RpcError) {
    let trailers = error.metadata().clone();
    stream
        .outbound
        .send(ResponsePart::Status(error.to_status(), trailers))
        .await
        .unwrap();
    stream.outbound.finish();
}
