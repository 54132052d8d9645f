//! The retry executor.
//!
//! Attempts run strictly one after another. The request producer runs once
//! into the replay buffer; every attempt replays the sequence from position
//! zero through its own subscriber. A failed attempt is retried only when
//! all of the following hold:
//!
//! - the error code is in the policy's retryable set,
//! - another attempt is allowed by `max_attempts`,
//! - the shared throttle (if any) still permits retries,
//! - the server did not push back with "stop retrying",
//! - the replay buffer still holds the sequence from position zero.
//!
//! Server pushback with a delay overrides the sampled backoff and resets
//! the backoff sequence. Anything else surfaces the response unchanged.

use std::sync::Arc;

use plexrpc_core::{Metadata, RetryPushback, RpcError, Serializer};

use super::{spawn_pump, subscriber_stream, AttemptEnv};
use crate::backoff::Backoff;
use crate::config::RetryPolicy;
use crate::interceptor::RawResponse;
use crate::replay::ReplayBuffer;
use crate::request::MessageProducer;
use crate::response::StreamingResponse;
use crate::throttle::RetryThrottle;
use crate::transport::Transport;

/// Run sequential attempts under `policy`.
pub(crate) async fn execute<T, Req>(
    env: AttemptEnv<T>,
    policy: &RetryPolicy,
    throttle: Option<Arc<RetryThrottle>>,
    metadata: Metadata,
    producer: MessageProducer<Req>,
    serializer: Arc<dyn Serializer<Req>>,
    replay_capacity: usize,
) -> RawResponse
where
    T: Transport,
    Req: Send + 'static,
{
    let buffer = ReplayBuffer::new(replay_capacity);
    let Some(mut subscriber) = buffer.subscribe() else {
        return StreamingResponse::rejected(RpcError::internal("fresh replay buffer was unusable"));
    };
    let pump = spawn_pump(producer, serializer, buffer.clone());

    let mut backoff = Backoff::new(
        policy.initial_backoff,
        policy.max_backoff,
        policy.backoff_multiplier,
    );
    let mut attempt: u32 = 1;

    loop {
        let mut response = env
            .run(metadata.clone(), subscriber_stream(subscriber), attempt)
            .await;

        if let Ok(contents) = &mut response.accepted {
            if let Some(throttle) = &throttle {
                throttle.record_success();
            }
            // The winning body may still be draining the replay buffer.
            contents.body.push_guard(pump);
            return response;
        }

        let (code, pushback) = {
            let error = response.accepted.as_ref().expect_err("checked above");
            (error.code(), error.metadata().retry_pushback())
        };

        if !policy.is_retryable(code) {
            // Terminal for this call; the budget is not charged.
            if let Some(throttle) = &throttle {
                throttle.record_success();
            }
            return response;
        }
        if let Some(throttle) = &throttle {
            throttle.record_failure();
        }

        if attempt >= policy.max_attempts {
            tracing::debug!(attempt, %code, "retry attempts exhausted");
            return response;
        }
        if let Some(throttle) = &throttle {
            if !throttle.permits() {
                tracing::debug!(attempt, %code, "retry suppressed by throttle");
                return response;
            }
        }

        let delay = match pushback {
            RetryPushback::StopRetrying => {
                tracing::debug!(attempt, %code, "server asked to stop retrying");
                return response;
            }
            RetryPushback::RetryAfter(delay) => {
                backoff.reset();
                delay
            }
            RetryPushback::None => backoff.next_delay(),
        };

        buffer.invalidate_subscribers();
        if !buffer.safe_for_new_subscriber() {
            tracing::debug!(attempt, "request is no longer replayable");
            return response;
        }

        tracing::debug!(attempt, %code, delay_ms = delay.as_millis() as u64, "retrying");
        tokio::time::sleep(delay).await;

        subscriber = match buffer.subscribe() {
            Some(subscriber) => subscriber,
            None => return response,
        };
        attempt += 1;
    }
}
