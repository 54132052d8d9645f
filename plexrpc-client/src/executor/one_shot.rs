//! The one-shot executor: a single attempt, no retries.
//!
//! The call's structure is three cooperating pieces: the request writer
//! task (owned by the stream processor), the stream executor itself, and
//! the caller's response handler, all bounded by the factored
//! [`with_deadline`](super::with_deadline) wrapper at the call layer.
//! Deadline expiry cancels the lot and surfaces `DeadlineExceeded`; caller
//! cancellation drops the future before the handler ever runs.

use plexrpc_core::Metadata;

use super::AttemptEnv;
use crate::interceptor::{MessageStream, RawResponse};
use crate::transport::Transport;

/// Run the call's only attempt.
pub(crate) async fn execute<T: Transport>(
    env: AttemptEnv<T>,
    metadata: Metadata,
    messages: MessageStream,
) -> RawResponse {
    env.run(metadata, messages, 1).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InterceptorChain;
    use crate::transport::MemoryTransport;
    use bytes::Bytes;
    use plexrpc_core::{
        Code, Metadata, MethodDescriptor, RequestPart, ResponsePart, Status,
    };
    use std::sync::Arc;

    fn env(transport: MemoryTransport) -> AttemptEnv<MemoryTransport> {
        AttemptEnv {
            transport: Arc::new(transport),
            descriptor: MethodDescriptor::new("echo.Echo", "Get"),
            interceptors: InterceptorChain::new(),
            deadline: None,
            max_request_message_bytes: None,
            max_response_message_bytes: None,
            wait_for_ready: false,
        }
    }

    #[tokio::test]
    async fn test_one_shot_round_trip() {
        let (transport, mut listener) = MemoryTransport::new();

        tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap();
            // Metadata, one message, then end of requests.
            assert!(matches!(
                stream.inbound.next().await.unwrap().unwrap(),
                RequestPart::Metadata(_)
            ));
            let payload = match stream.inbound.next().await.unwrap().unwrap() {
                RequestPart::Message(payload) => payload,
                other => panic!("unexpected part {other:?}"),
            };
            assert!(stream.inbound.next().await.is_none());

            stream
                .outbound
                .send(ResponsePart::Metadata(Metadata::new()))
                .await
                .unwrap();
            stream
                .outbound
                .send(ResponsePart::Message(payload))
                .await
                .unwrap();
            stream
                .outbound
                .send(ResponsePart::Status(Status::ok(), Metadata::new()))
                .await
                .unwrap();
            stream.outbound.finish();
        });

        let messages: MessageStream = Box::pin(futures::stream::iter(vec![Ok(
            Bytes::from_static(b"echo me"),
        )]));
        let response = execute(env(transport), Metadata::new(), messages).await;

        let mut body = response.accepted.unwrap().body;
        assert_eq!(body.next().await.unwrap().unwrap().as_ref(), b"echo me");
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_one_shot_transport_open_failure() {
        let (transport, listener) = MemoryTransport::new();
        drop(listener);

        let messages: MessageStream = Box::pin(futures::stream::empty());
        let response = execute(env(transport), Metadata::new(), messages).await;
        assert_eq!(response.accepted.unwrap_err().code(), Code::Unavailable);
    }
}
