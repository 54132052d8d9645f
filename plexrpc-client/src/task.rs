//! Small helpers for structured task ownership.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::task::JoinHandle;

/// A join handle that aborts its task when dropped.
///
/// Attempt subtasks (request writers, replay pumps) are owned by the value
/// that needs them; dropping the owner tears the task down with it.
#[derive(Debug)]
pub(crate) struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pin_project_lite::pin_project! {
    /// A stream that keeps a set of task guards alive while it is polled.
    pub(crate) struct Guarded<S> {
        #[pin]
        stream: S,
        guards: Vec<TaskGuard>,
    }
}

impl<S> Guarded<S> {
    pub(crate) fn new(stream: S, guards: Vec<TaskGuard>) -> Self {
        Self { stream, guards }
    }
}

impl<S: Stream> Stream for Guarded<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().stream.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}
