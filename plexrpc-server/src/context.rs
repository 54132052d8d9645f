//! Per-RPC server context.

use plexrpc_core::MethodDescriptor;

use crate::cancellation::RpcCancellationHandle;

/// Context handed to interceptors and handlers for one inbound RPC.
#[derive(Clone, Debug)]
pub struct ServerContext {
    descriptor: MethodDescriptor,
    cancellation: RpcCancellationHandle,
}

impl ServerContext {
    /// A context with a fresh cancellation handle.
    pub fn new(descriptor: MethodDescriptor) -> Self {
        Self {
            descriptor,
            cancellation: RpcCancellationHandle::new(),
        }
    }

    /// A context bound to a transport-owned cancellation handle.
    pub fn with_cancellation(
        descriptor: MethodDescriptor,
        cancellation: RpcCancellationHandle,
    ) -> Self {
        Self {
            descriptor,
            cancellation,
        }
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn cancellation(&self) -> &RpcCancellationHandle {
        &self.cancellation
    }
}
