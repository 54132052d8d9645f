//! Caller-facing responses.
//!
//! A [`StreamingResponse`] is either accepted (the server sent initial
//! metadata) or rejected with an [`RpcError`]. An accepted response carries a
//! lazy [`Body`]: messages stream as the caller consumes them, and the
//! trailing metadata becomes available once the body is drained, the way
//! trailers always do.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use plexrpc_core::{Metadata, RpcError};

use crate::task::TaskGuard;

type BoxMessageStream<T> = Pin<Box<dyn Stream<Item = Result<T, RpcError>> + Send + 'static>>;

/// The lazy message body of an accepted response.
///
/// Yields each message in transport order and ends with exactly one terminal
/// event: a clean end (after which [`trailing_metadata`](Body::trailing_metadata)
/// is populated) or a single error.
pub struct Body<T> {
    stream: BoxMessageStream<T>,
    trailing: Arc<Mutex<Option<Metadata>>>,
    guards: Vec<TaskGuard>,
}

impl<T> Body<T> {
    pub(crate) fn new(stream: BoxMessageStream<T>, trailing: Arc<Mutex<Option<Metadata>>>) -> Self {
        Self {
            stream,
            trailing,
            guards: Vec::new(),
        }
    }

    /// An already-terminated body with no messages.
    pub(crate) fn empty(trailing_metadata: Metadata) -> Self
    where
        T: Send + 'static,
    {
        Self {
            stream: Box::pin(futures::stream::empty()),
            trailing: Arc::new(Mutex::new(Some(trailing_metadata))),
            guards: Vec::new(),
        }
    }

    /// The next message, or `None` at the end of the body.
    pub async fn next(&mut self) -> Option<Result<T, RpcError>> {
        self.stream.next().await
    }

    /// The trailing metadata, available after the body ended cleanly.
    pub fn trailing_metadata(&self) -> Option<Metadata> {
        self.trailing.lock().unwrap().clone()
    }

    /// Keep `guard`'s task alive for as long as this body exists.
    pub(crate) fn push_guard(&mut self, guard: TaskGuard) {
        self.guards.push(guard);
    }

    /// Map each message, terminating the body on the first mapping error.
    pub fn map_messages<U, F>(self, mut map: F) -> Body<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> Result<U, RpcError> + Send + 'static,
    {
        let Body {
            stream,
            trailing,
            guards,
        } = self;
        let mapped = Box::pin(async_stream::stream! {
            let mut stream = stream;
            while let Some(item) = stream.next().await {
                match item.and_then(&mut map) {
                    Ok(message) => yield Ok(message),
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        });
        Body {
            stream: mapped,
            trailing,
            guards,
        }
    }
}

impl<T> Stream for Body<T> {
    type Item = Result<T, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl<T> std::fmt::Debug for Body<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("trailing", &self.trailing.lock().unwrap().is_some())
            .finish_non_exhaustive()
    }
}

/// The contents of an accepted response.
#[derive(Debug)]
pub struct ResponseContents<T> {
    /// Initial metadata the server answered with.
    pub metadata: Metadata,
    /// The message body.
    pub body: Body<T>,
}

/// A streaming response: accepted contents or a rejection.
#[derive(Debug)]
pub struct StreamingResponse<T> {
    pub accepted: Result<ResponseContents<T>, RpcError>,
}

impl<T> StreamingResponse<T> {
    pub fn accepted(contents: ResponseContents<T>) -> Self {
        Self {
            accepted: Ok(contents),
        }
    }

    pub fn rejected(error: RpcError) -> Self {
        Self {
            accepted: Err(error),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted.is_ok()
    }

    /// The initial metadata; empty for a rejected (trailers-only) response.
    pub fn metadata(&self) -> Metadata {
        match &self.accepted {
            Ok(contents) => contents.metadata.clone(),
            Err(_) => Metadata::new(),
        }
    }

    /// Collapse into a single-message response.
    ///
    /// Fails with `Internal` unless the body holds exactly one message.
    pub async fn into_single(self) -> Result<ClientResponse<T>, RpcError> {
        let contents = self.accepted?;
        let mut body = contents.body;
        let message = match body.next().await {
            Some(Ok(message)) => message,
            Some(Err(error)) => return Err(error),
            None => {
                return Err(RpcError::internal(
                    "expected one response message, got none",
                ));
            }
        };
        match body.next().await {
            None => {}
            Some(Err(error)) => return Err(error),
            Some(Ok(_)) => {
                return Err(RpcError::internal(
                    "expected one response message, got more",
                ));
            }
        }
        Ok(ClientResponse {
            metadata: contents.metadata,
            message,
            trailing_metadata: body.trailing_metadata().unwrap_or_default(),
        })
    }
}

/// A fully-received single-message response.
#[derive(Debug)]
pub struct ClientResponse<T> {
    pub metadata: Metadata,
    pub message: T,
    pub trailing_metadata: Metadata,
}
