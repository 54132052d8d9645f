//! The hedging executor.
//!
//! Attempt one launches immediately; while no attempt has been accepted,
//! another launches every `hedgingDelay`, up to `maxAttempts`. All attempts
//! share the replay buffer and the throttle. The first attempt whose
//! response is accepted wins and every other outstanding attempt is
//! cancelled. A failure with a non-fatal status code leaves the others
//! running; a fatal failure cancels them all and surfaces immediately.
//!
//! Server pushback applies per attempt: "stop retrying" disables further
//! launches without touching the attempts already in flight, and a
//! retry-after delay pushes back the next launch and resets the stagger
//! schedule.

use std::sync::Arc;

use plexrpc_core::{Metadata, RetryPushback, RpcError, Serializer};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::{spawn_pump, subscriber_stream, AttemptEnv};
use crate::config::HedgingPolicy;
use crate::interceptor::RawResponse;
use crate::replay::ReplayBuffer;
use crate::request::MessageProducer;
use crate::response::StreamingResponse;
use crate::throttle::RetryThrottle;
use crate::transport::Transport;

/// Run staggered concurrent attempts under `policy`.
pub(crate) async fn execute<T, Req>(
    env: AttemptEnv<T>,
    policy: &HedgingPolicy,
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
    let Some(first) = buffer.subscribe() else {
        return StreamingResponse::rejected(RpcError::internal("fresh replay buffer was unusable"));
    };
    let pump = spawn_pump(producer, serializer, buffer.clone());

    let mut attempts: JoinSet<(u32, RawResponse)> = JoinSet::new();
    spawn_attempt(&mut attempts, env.clone(), metadata.clone(), 1, first);

    let delay = policy.delay();
    let mut launched: u32 = 1;
    let mut launches_stopped = false;
    let mut next_launch = Instant::now() + delay;
    let mut last_response: Option<RawResponse> = None;

    loop {
        let may_launch = !launches_stopped && launched < policy.max_attempts;
        if attempts.is_empty() && !may_launch {
            break;
        }

        tokio::select! {
            Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                let (attempt, mut response) = match joined {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        tracing::warn!(%join_error, "hedged attempt task failed");
                        continue;
                    }
                };
                if let Ok(contents) = &mut response.accepted {
                    // First accepted response wins; dropping the join set
                    // cancels every other outstanding attempt.
                    tracing::debug!(attempt, "hedged attempt accepted");
                    if let Some(throttle) = &throttle {
                        throttle.record_success();
                    }
                    contents.body.push_guard(pump);
                    return response;
                }

                let (code, pushback) = {
                    let error = response.accepted.as_ref().expect_err("checked above");
                    (error.code(), error.metadata().retry_pushback())
                };
                if !policy.is_non_fatal(code) {
                    tracing::debug!(attempt, %code, "hedged attempt failed fatally");
                    if let Some(throttle) = &throttle {
                        throttle.record_success();
                    }
                    return response;
                }
                tracing::debug!(attempt, %code, "hedged attempt failed, siblings continue");
                if let Some(throttle) = &throttle {
                    throttle.record_failure();
                }
                match pushback {
                    RetryPushback::StopRetrying => launches_stopped = true,
                    RetryPushback::RetryAfter(after) => next_launch = Instant::now() + after,
                    RetryPushback::None => {}
                }
                last_response = Some(response);
            }
            _ = tokio::time::sleep_until(next_launch), if may_launch => {
                if throttle.as_ref().is_some_and(|throttle| !throttle.permits()) {
                    tracing::debug!("hedging suppressed by throttle");
                    launches_stopped = true;
                    continue;
                }
                let Some(subscriber) = buffer.subscribe() else {
                    tracing::debug!("request is no longer replayable, no more hedges");
                    launches_stopped = true;
                    continue;
                };
                launched += 1;
                tracing::debug!(attempt = launched, "launching hedged attempt");
                spawn_attempt(&mut attempts, env.clone(), metadata.clone(), launched, subscriber);
                next_launch = Instant::now() + delay;
            }
        }
    }

    last_response.unwrap_or_else(|| {
        StreamingResponse::rejected(RpcError::internal("no hedged attempt produced a response"))
    })
}

fn spawn_attempt<T: Transport>(
    attempts: &mut JoinSet<(u32, RawResponse)>,
    env: AttemptEnv<T>,
    metadata: Metadata,
    attempt: u32,
    subscriber: crate::replay::ReplaySubscriber<bytes::Bytes>,
) {
    attempts.spawn(async move {
        let response = env
            .run(metadata, subscriber_stream(subscriber), attempt)
            .await;
        (attempt, response)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InterceptorChain;
    use crate::transport::MemoryTransport;
    use bytes::Bytes;
    use plexrpc_core::{
        headers, Code, MethodDescriptor, RequestPart, ResponsePart, ServerStream, Status,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(max_attempts: u32, delay_ms: u64) -> HedgingPolicy {
        HedgingPolicy {
            max_attempts,
            hedging_delay: Some(Duration::from_millis(delay_ms)),
            non_fatal_status_codes: vec![Code::Unavailable],
        }
    }

    fn env(transport: MemoryTransport) -> AttemptEnv<MemoryTransport> {
        AttemptEnv {
            transport: Arc::new(transport),
            descriptor: MethodDescriptor::new("race.Race", "Run"),
            interceptors: InterceptorChain::new(),
            deadline: None,
            max_request_message_bytes: None,
            max_response_message_bytes: None,
            wait_for_ready: false,
        }
    }

    struct PlainText;
    impl Serializer<String> for PlainText {
        fn serialize(&self, message: &String) -> Result<Bytes, RpcError> {
            Ok(Bytes::from(message.clone().into_bytes()))
        }
    }

    fn producer() -> MessageProducer<String> {
        Box::new(|mut writer| Box::pin(async move { writer.write("race".to_string()).await }))
    }

    async fn drain_request(stream: &mut ServerStream) {
        while stream.inbound.next().await.is_some() {}
    }

    async fn accept_with_message(stream: &mut ServerStream, payload: &'static [u8]) {
        stream
            .outbound
            .send(ResponsePart::Metadata(plexrpc_core::Metadata::new()))
            .await
            .unwrap();
        stream
            .outbound
            .send(ResponsePart::Message(Bytes::from_static(payload)))
            .await
            .unwrap();
        stream
            .outbound
            .send(ResponsePart::Status(Status::ok(), plexrpc_core::Metadata::new()))
            .await
            .unwrap();
        stream.outbound.finish();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_hedge_wins_while_first_hangs() {
        let (transport, mut listener) = MemoryTransport::new();
        let served = Arc::new(AtomicU32::new(0));
        let seen = served.clone();

        tokio::spawn(async move {
            // Attempt 1 hangs: read the request, never answer.
            let mut first = listener.accept().await.unwrap();
            seen.fetch_add(1, Ordering::SeqCst);
            drain_request(&mut first).await;

            // Attempt 2 answers fast.
            let mut second = listener.accept().await.unwrap();
            seen.fetch_add(1, Ordering::SeqCst);
            drain_request(&mut second).await;
            accept_with_message(&mut second, b"fast").await;

            // A third attempt must never arrive.
            assert!(listener.accept().await.is_none());
            // Keep the hanging stream alive until the listener closes.
            drop(first);
        });

        let response = execute(
            env(transport),
            &policy(3, 50),
            None,
            plexrpc_core::Metadata::new(),
            producer(),
            Arc::new(PlainText),
            64,
        )
        .await;

        let mut body = response.accepted.unwrap().body;
        assert_eq!(body.next().await.unwrap().unwrap().as_ref(), b"fast");
        assert!(body.next().await.is_none());
        drop(body);
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_cancels_everything() {
        let (transport, mut listener) = MemoryTransport::new();

        tokio::spawn(async move {
            let mut first = listener.accept().await.unwrap();
            drain_request(&mut first).await;
            first
                .outbound
                .send(ResponsePart::Status(
                    Status::new(Code::PermissionDenied, "no entry"),
                    plexrpc_core::Metadata::new(),
                ))
                .await
                .unwrap();
            first.outbound.finish();
        });

        let response = execute(
            env(transport),
            &policy(3, 50),
            None,
            plexrpc_core::Metadata::new(),
            producer(),
            Arc::new(PlainText),
            64,
        )
        .await;

        assert_eq!(
            response.accepted.unwrap_err().code(),
            Code::PermissionDenied
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_non_fatal_failures_surface_last() {
        let (transport, mut listener) = MemoryTransport::new();
        let served = Arc::new(AtomicU32::new(0));
        let seen = served.clone();

        tokio::spawn(async move {
            while let Some(mut stream) = listener.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                drain_request(&mut stream).await;
                stream
                    .outbound
                    .send(ResponsePart::Status(
                        Status::new(Code::Unavailable, "busy"),
                        plexrpc_core::Metadata::new(),
                    ))
                    .await
                    .unwrap();
                stream.outbound.finish();
            }
        });

        let response = execute(
            env(transport),
            &policy(3, 10),
            None,
            plexrpc_core::Metadata::new(),
            producer(),
            Arc::new(PlainText),
            64,
        )
        .await;

        assert_eq!(response.accepted.unwrap_err().code(), Code::Unavailable);
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushback_stop_disables_new_launches_only() {
        let (transport, mut listener) = MemoryTransport::new();
        let served = Arc::new(AtomicU32::new(0));
        let seen = served.clone();

        tokio::spawn(async move {
            // Attempt 1: non-fatal failure with stop pushback, delivered
            // after a short delay so attempt 2 is already running.
            let mut first = listener.accept().await.unwrap();
            seen.fetch_add(1, Ordering::SeqCst);
            let mut second = listener.accept().await.unwrap();
            seen.fetch_add(1, Ordering::SeqCst);

            drain_request(&mut first).await;
            let mut trailers = plexrpc_core::Metadata::new();
            trailers.add(headers::GRPC_RETRY_PUSHBACK_MS, "-1");
            first
                .outbound
                .send(ResponsePart::Status(
                    Status::new(Code::Unavailable, "stop hedging"),
                    trailers,
                ))
                .await
                .unwrap();
            first.outbound.finish();

            // Attempt 2 keeps running and eventually succeeds.
            drain_request(&mut second).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            accept_with_message(&mut second, b"late but fine").await;

            // No third launch.
            assert!(listener.accept().await.is_none());
        });

        let response = execute(
            env(transport),
            &policy(3, 10),
            None,
            plexrpc_core::Metadata::new(),
            producer(),
            Arc::new(PlainText),
            64,
        )
        .await;

        let mut body = response.accepted.unwrap().body;
        assert_eq!(
            body.next().await.unwrap().unwrap().as_ref(),
            b"late but fine"
        );
        drop(body);
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushback_delay_postpones_next_launch() {
        let (transport, mut listener) = MemoryTransport::new();

        let server = tokio::spawn(async move {
            let mut stamps = Vec::new();

            let mut first = listener.accept().await.unwrap();
            stamps.push(tokio::time::Instant::now());
            drain_request(&mut first).await;
            let mut trailers = plexrpc_core::Metadata::new();
            trailers.add(headers::GRPC_RETRY_PUSHBACK_MS, "300");
            first
                .outbound
                .send(ResponsePart::Status(
                    Status::new(Code::Unavailable, "wait a bit"),
                    trailers,
                ))
                .await
                .unwrap();
            first.outbound.finish();

            let mut second = listener.accept().await.unwrap();
            stamps.push(tokio::time::Instant::now());
            drain_request(&mut second).await;
            accept_with_message(&mut second, b"ok").await;
            stamps
        });

        let response = execute(
            env(transport),
            &policy(3, 10),
            None,
            plexrpc_core::Metadata::new(),
            producer(),
            Arc::new(PlainText),
            64,
        )
        .await;
        assert!(response.is_accepted());

        let stamps = server.await.unwrap();
        assert!(stamps[1] - stamps[0] >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_blocks_additional_hedges() {
        let (transport, mut listener) = MemoryTransport::new();
        let served = Arc::new(AtomicU32::new(0));
        let seen = served.clone();

        tokio::spawn(async move {
            while let Some(mut stream) = listener.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                drain_request(&mut stream).await;
                stream
                    .outbound
                    .send(ResponsePart::Status(
                        Status::new(Code::Unavailable, "busy"),
                        plexrpc_core::Metadata::new(),
                    ))
                    .await
                    .unwrap();
                stream.outbound.finish();
            }
        });

        // Drained under half: no additional hedges may launch.
        let throttle = Arc::new(RetryThrottle::new(4, 1.0));
        throttle.record_failure();
        throttle.record_failure();
        throttle.record_failure();

        let response = execute(
            env(transport),
            &policy(3, 10),
            Some(throttle),
            plexrpc_core::Metadata::new(),
            producer(),
            Arc::new(PlainText),
            64,
        )
        .await;

        assert_eq!(response.accepted.unwrap_err().code(), Code::Unavailable);
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }
}
