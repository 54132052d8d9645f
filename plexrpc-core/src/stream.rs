//! Transport stream primitives.
//!
//! A transport exposes each RPC as an [`RpcStream`]: an ordered [`Inbound`]
//! sequence of parts and a closable [`Outbound`] writer. The part grammars
//! are sum types: a request is one metadata part followed by message parts,
//! a response is either metadata then messages then a terminal status, or a
//! lone status (trailers-only).
//!
//! Both halves are bounded channels, so the transport blocks once the
//! consumer stalls past the buffer watermark.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use crate::metadata::Metadata;
use crate::method::MethodDescriptor;
use crate::status::{RpcError, Status};

/// A wire item sent by the client.
#[derive(Clone, Debug)]
pub enum RequestPart {
    /// Request headers. Sent first and exactly once.
    Metadata(Metadata),
    /// One serialized message.
    Message(Bytes),
}

/// A wire item sent by the server.
#[derive(Clone, Debug)]
pub enum ResponsePart {
    /// Initial response headers. The server accepted the RPC.
    Metadata(Metadata),
    /// One serialized message.
    Message(Bytes),
    /// The terminal status with trailing metadata. Ends the sequence.
    Status(Status, Metadata),
}

/// Default bound on the per-stream part buffer.
pub const DEFAULT_STREAM_BUFFER: usize = 32;

/// The receive half of a stream: an ordered sequence of parts.
#[derive(Debug)]
pub struct Inbound<T> {
    rx: mpsc::Receiver<Result<T, RpcError>>,
}

impl<T> Inbound<T> {
    pub fn from_receiver(rx: mpsc::Receiver<Result<T, RpcError>>) -> Self {
        Self { rx }
    }

    /// The next part, or `None` once the peer has finished the stream.
    pub async fn next(&mut self) -> Option<Result<T, RpcError>> {
        self.rx.recv().await
    }
}

impl<T> Stream for Inbound<T> {
    type Item = Result<T, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The send half of a stream: a closable ordered writer.
#[derive(Debug)]
pub struct Outbound<T> {
    tx: Option<mpsc::Sender<Result<T, RpcError>>>,
}

impl<T> Outbound<T> {
    pub fn from_sender(tx: mpsc::Sender<Result<T, RpcError>>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Write one part, waiting for buffer space.
    pub async fn send(&mut self, part: T) -> Result<(), RpcError> {
        let Some(tx) = &self.tx else {
            return Err(RpcError::internal("write after stream was finished"));
        };
        tx.send(Ok(part))
            .await
            .map_err(|_| RpcError::unavailable("stream closed by peer"))
    }

    /// Tear the stream down with an error the peer will observe in place
    /// of further parts. Ends the stream.
    pub async fn fail(&mut self, error: RpcError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error)).await;
        }
    }

    /// Finish the stream. Idempotent; further sends fail.
    pub fn finish(&mut self) {
        self.tx = None;
    }

    pub fn is_finished(&self) -> bool {
        self.tx.is_none()
    }
}

/// A bidirectional stream opened by a transport for one RPC attempt.
#[derive(Debug)]
pub struct RpcStream<In, Out> {
    pub descriptor: MethodDescriptor,
    pub inbound: Inbound<In>,
    pub outbound: Outbound<Out>,
}

/// The client's view: response parts in, request parts out.
pub type ClientStream = RpcStream<ResponsePart, RequestPart>;

/// The server's view: request parts in, response parts out.
pub type ServerStream = RpcStream<RequestPart, ResponsePart>;

/// Wire two stream halves back to back.
///
/// Everything one side writes arrives on the other side's inbound sequence,
/// in order. Used by in-memory transports and tests.
pub fn pair<A, B>(
    descriptor: MethodDescriptor,
    capacity: usize,
) -> (RpcStream<A, B>, RpcStream<B, A>) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    let left = RpcStream {
        descriptor: descriptor.clone(),
        inbound: Inbound::from_receiver(a_rx),
        outbound: Outbound::from_sender(b_tx),
    };
    let right = RpcStream {
        descriptor,
        inbound: Inbound::from_receiver(b_rx),
        outbound: Outbound::from_sender(a_tx),
    };
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MethodDescriptor {
        MethodDescriptor::new("test.Service", "Method")
    }

    #[tokio::test]
    async fn test_pair_delivers_parts_in_order() {
        let (mut client, mut server): (ClientStream, ServerStream) = pair(descriptor(), 8);

        client
            .outbound
            .send(RequestPart::Metadata(Metadata::new()))
            .await
            .unwrap();
        client
            .outbound
            .send(RequestPart::Message(Bytes::from_static(b"one")))
            .await
            .unwrap();
        client.outbound.finish();

        match server.inbound.next().await.unwrap().unwrap() {
            RequestPart::Metadata(_) => {}
            other => panic!("expected metadata first, got {other:?}"),
        }
        match server.inbound.next().await.unwrap().unwrap() {
            RequestPart::Message(bytes) => assert_eq!(bytes.as_ref(), b"one"),
            other => panic!("expected message, got {other:?}"),
        }
        assert!(server.inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_and_send_after_finish_fails() {
        let (mut client, _server): (ClientStream, ServerStream) = pair(descriptor(), 8);
        client.outbound.finish();
        client.outbound.finish();
        assert!(client.outbound.is_finished());
        let err = client
            .outbound
            .send(RequestPart::Message(Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::Code::Internal);
    }

    #[tokio::test]
    async fn test_send_fails_once_peer_is_gone() {
        let (mut client, server): (ClientStream, ServerStream) = pair(descriptor(), 1);
        drop(server);
        let err = client
            .outbound
            .send(RequestPart::Metadata(Metadata::new()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_status_part_terminates_response() {
        let (mut client, mut server): (ClientStream, ServerStream) = pair(descriptor(), 8);
        server
            .outbound
            .send(ResponsePart::Status(
                Status::new(crate::Code::Aborted, "nope"),
                Metadata::new(),
            ))
            .await
            .unwrap();
        server.outbound.finish();

        match client.inbound.next().await.unwrap().unwrap() {
            ResponsePart::Status(status, _) => assert_eq!(status.code(), crate::Code::Aborted),
            other => panic!("expected status, got {other:?}"),
        }
        assert!(client.inbound.next().await.is_none());
    }
}
