//! The transport seam.
//!
//! Everything below the executors (connection management, framing onto the
//! wire, TLS, name resolution, load balancing) lives behind [`Transport`].
//! The runtime only ever asks a transport to open one ordered bidirectional
//! stream per attempt.
//!
//! [`MemoryTransport`] is the in-process implementation: streams are wired
//! straight to an acceptor. The integration suites are built on it, and it
//! doubles as the reference for the transport contract.

use std::sync::Arc;

use plexrpc_core::{stream, ClientStream, MethodDescriptor, RpcError, ServerStream};
use tokio::sync::mpsc;

use crate::throttle::RetryThrottle;

/// A client transport: opens one stream per RPC attempt.
pub trait Transport: Send + Sync + 'static {
    /// Open a stream for `descriptor`.
    fn open_stream(
        &self,
        descriptor: &MethodDescriptor,
    ) -> impl Future<Output = Result<ClientStream, RpcError>> + Send;

    /// The retry throttle shared by every call on this transport, if the
    /// transport carries one.
    fn retry_throttle(&self) -> Option<Arc<RetryThrottle>> {
        None
    }
}

/// Scoped stream acquisition: the stream is closed when `body` returns,
/// whatever the outcome.
pub async fn with_stream<T, F, Fut, R>(
    transport: &T,
    descriptor: &MethodDescriptor,
    body: F,
) -> Result<R, RpcError>
where
    T: Transport,
    F: FnOnce(ClientStream) -> Fut,
    Fut: Future<Output = Result<R, RpcError>>,
{
    let stream = transport.open_stream(descriptor).await?;
    body(stream).await
}

/// An in-process transport delivering streams to a [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<ServerStream>,
    throttle: Option<Arc<RetryThrottle>>,
    buffer: usize,
}

impl MemoryTransport {
    /// Create a connected transport/listener pair.
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                throttle: None,
                buffer: plexrpc_core::DEFAULT_STREAM_BUFFER,
            },
            MemoryListener { accept_rx },
        )
    }

    /// Attach a shared retry throttle.
    pub fn with_retry_throttle(mut self, throttle: Arc<RetryThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Override the per-stream part buffer size.
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

impl Transport for MemoryTransport {
    async fn open_stream(&self, descriptor: &MethodDescriptor) -> Result<ClientStream, RpcError> {
        let (client, server) = stream::pair(descriptor.clone(), self.buffer);
        self.accept_tx
            .send(server)
            .map_err(|_| RpcError::unavailable("transport is closed"))?;
        Ok(client)
    }

    fn retry_throttle(&self) -> Option<Arc<RetryThrottle>> {
        self.throttle.clone()
    }
}

/// The accepting end of a [`MemoryTransport`].
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<ServerStream>,
}

impl MemoryListener {
    /// The next inbound stream, or `None` once every transport handle is
    /// gone.
    pub async fn accept(&mut self) -> Option<ServerStream> {
        self.accept_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexrpc_core::{Metadata, RequestPart};

    #[tokio::test]
    async fn test_open_stream_reaches_listener() {
        let (transport, mut listener) = MemoryTransport::new();
        let descriptor = MethodDescriptor::new("svc.S", "M");

        let mut client = transport.open_stream(&descriptor).await.unwrap();
        client
            .outbound
            .send(RequestPart::Metadata(Metadata::new()))
            .await
            .unwrap();

        let mut server = listener.accept().await.unwrap();
        assert_eq!(server.descriptor, descriptor);
        assert!(matches!(
            server.inbound.next().await.unwrap().unwrap(),
            RequestPart::Metadata(_)
        ));
    }

    #[tokio::test]
    async fn test_open_stream_fails_after_listener_drop() {
        let (transport, listener) = MemoryTransport::new();
        drop(listener);
        let err = transport
            .open_stream(&MethodDescriptor::new("svc.S", "M"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), plexrpc_core::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_with_stream_closes_on_exit() {
        let (transport, mut listener) = MemoryTransport::new();
        let descriptor = MethodDescriptor::new("svc.S", "M");

        with_stream(&transport, &descriptor, |_stream| async move {
            Ok::<_, RpcError>(())
        })
        .await
        .unwrap();

        let mut server = listener.accept().await.unwrap();
        // The client half was dropped when the body returned.
        assert!(server.inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_throttle_is_shared() {
        let throttle = Arc::new(RetryThrottle::new(10, 0.5));
        let (transport, _listener) = MemoryTransport::new();
        let transport = transport.with_retry_throttle(throttle.clone());
        transport.retry_throttle().unwrap().record_failure();
        assert_eq!(throttle.tokens(), 9.0);
    }
}
