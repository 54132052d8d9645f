//! The per-attempt stream processor.
//!
//! [`StreamProcessor::execute`] drives a single opened stream to completion:
//! a writer task pushes the request metadata and serialized messages onto
//! the outbound half, while the inbound half is classified by its first
//! part into an accepted response (metadata first) or a trailers-only
//! rejection (status first). Everything after the first part is projected
//! lazily into the response body as the caller consumes it.

use std::sync::{Arc, Mutex};

use plexrpc_core::{ClientStream, Metadata, Outbound, RequestPart, ResponsePart, RpcError};
use tokio_stream::StreamExt;

use crate::interceptor::{ClientContext, MessageStream, RawResponse, RpcRequest};
use crate::response::{Body, ResponseContents, StreamingResponse};
use crate::task::TaskGuard;

/// Emit the request part sequence: one metadata part, the serialized
/// messages in producer order, then the end of the stream.
async fn write_request(
    outbound: &mut Outbound<RequestPart>,
    metadata: Metadata,
    messages: &mut MessageStream,
    max_message_bytes: Option<usize>,
) -> Result<(), RpcError> {
    outbound.send(RequestPart::Metadata(metadata)).await?;
    while let Some(message) = messages.next().await {
        let message = message?;
        if let Some(limit) = max_message_bytes {
            if message.len() > limit {
                return Err(RpcError::resource_exhausted(format!(
                    "request message of {} bytes exceeds the {limit} byte limit",
                    message.len()
                )));
            }
        }
        outbound.send(RequestPart::Message(message)).await?;
    }
    Ok(())
}

/// Drives one stream for one attempt.
pub struct StreamProcessor;

impl StreamProcessor {
    /// Execute one attempt against an opened stream.
    ///
    /// Called once per attempt. Attempt numbers above one are recorded in
    /// the request metadata as `grpc-previous-rpc-attempts`.
    pub async fn execute(
        request: RpcRequest,
        context: &ClientContext,
        stream: ClientStream,
    ) -> RawResponse {
        let RpcRequest {
            mut metadata,
            mut messages,
        } = request;
        if context.attempt > 1 {
            metadata.set_previous_rpc_attempts(context.attempt - 1);
        }

        let ClientStream {
            descriptor: _,
            mut inbound,
            mut outbound,
        } = stream;

        // The writer runs concurrently with response handling. Its failures
        // are stashed rather than surfaced directly: a peer that already
        // rejected the RPC closes its receive half, and the rejection on
        // the inbound side is the authoritative outcome.
        let write_error: Arc<Mutex<Option<RpcError>>> = Arc::default();
        let write_error_slot = write_error.clone();
        let max_request = context.max_request_message_bytes;
        let writer = TaskGuard::spawn(async move {
            match write_request(&mut outbound, metadata, &mut messages, max_request).await {
                Ok(()) => outbound.finish(),
                Err(error) => {
                    tracing::debug!(%error, "request stream ended early");
                    // Tear the stream down so the peer sees the abort.
                    outbound.fail(error.clone()).await;
                    *write_error_slot.lock().unwrap() = Some(error);
                }
            }
        });

        match inbound.next().await {
            Some(Ok(ResponsePart::Metadata(initial_metadata))) => {
                let trailing: Arc<Mutex<Option<Metadata>>> = Arc::default();
                let trailing_slot = trailing.clone();
                let max_response = context.max_response_message_bytes;
                let parts = Box::pin(async_stream::stream! {
                    let mut inbound = inbound;
                    loop {
                        match inbound.next().await {
                            Some(Ok(ResponsePart::Message(payload))) => {
                                if let Some(limit) = max_response {
                                    if payload.len() > limit {
                                        yield Err(RpcError::resource_exhausted(format!(
                                            "response message of {} bytes exceeds the {limit} byte limit",
                                            payload.len()
                                        )));
                                        break;
                                    }
                                }
                                yield Ok(payload);
                            }
                            Some(Ok(ResponsePart::Status(status, trailers))) => {
                                match RpcError::from_status(status, trailers.clone()) {
                                    None => {
                                        *trailing_slot.lock().unwrap() = Some(trailers);
                                    }
                                    Some(error) => yield Err(error),
                                }
                                break;
                            }
                            Some(Ok(ResponsePart::Metadata(_))) => {
                                yield Err(RpcError::internal(
                                    "transport bug: second metadata part in response",
                                ));
                                break;
                            }
                            Some(Err(error)) => {
                                yield Err(error);
                                break;
                            }
                            None => {
                                yield Err(RpcError::internal(
                                    "response stream ended without a status",
                                ));
                                break;
                            }
                        }
                    }
                });
                let mut body = Body::new(parts, trailing);
                body.push_guard(writer);
                StreamingResponse::accepted(ResponseContents {
                    metadata: initial_metadata,
                    body,
                })
            }
            Some(Ok(ResponsePart::Status(status, trailers))) => {
                // Trailers-only: no initial metadata was sent.
                match RpcError::from_status(status, trailers.clone()) {
                    Some(error) => StreamingResponse::rejected(error),
                    None => StreamingResponse::accepted(ResponseContents {
                        metadata: Metadata::new(),
                        body: Body::empty(trailers),
                    }),
                }
            }
            Some(Ok(ResponsePart::Message(_))) => StreamingResponse::rejected(RpcError::internal(
                "transport bug: message part before metadata",
            )),
            Some(Err(error)) => StreamingResponse::rejected(error),
            None => {
                let stashed = write_error.lock().unwrap().take();
                StreamingResponse::rejected(stashed.unwrap_or_else(|| {
                    RpcError::internal("response stream closed without a response")
                }))
            }
        }
    }
}
