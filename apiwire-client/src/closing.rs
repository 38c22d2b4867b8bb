//! Graceful shutdown for an HTTP executor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use apiwire_core::Body;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use http::{Request, Response};
use tokio::sync::Notify;

use crate::ClientError;
use crate::exec::HttpExec;

/// Wraps an [`HttpExec`] with call tracking and graceful shutdown.
///
/// Every call in flight is registered with an abort handle.
/// [`close`](ClosingClient::close) refuses new calls, aborts the running
/// ones, releases idle connections on the inner executor, waits until
/// every aborted call has unwound and then closes the inner executor.
///
/// ```
/// use apiwire_client::{ClientError, ClosingClient, HttpExec};
/// use apiwire_core::Body;
/// use futures::future::BoxFuture;
///
/// struct Unreachable;
///
/// impl HttpExec for Unreachable {
///     fn execute(
///         &self,
///         _request: http::Request<Body>,
///     ) -> BoxFuture<'static, Result<http::Response<Body>, ClientError>> {
///         Box::pin(futures::future::pending())
///     }
///
///     fn release_idle(&self) {}
/// }
///
/// # futures::executor::block_on(async {
/// let client = ClosingClient::new(Unreachable);
/// client.close().await;
/// let result = client.execute(http::Request::new(Body::empty())).await;
/// assert!(matches!(result, Err(ClientError::Closing)));
/// # });
/// ```
pub struct ClosingClient<E> {
    inner: E,
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    drained: Notify,
}

#[derive(Default)]
struct State {
    closing: bool,
    next_id: u64,
    calls: HashMap<u64, AbortHandle>,
    outstanding: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deregisters a call on every exit path.
struct InFlight {
    id: u64,
    shared: Arc<Shared>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.calls.remove(&self.id);
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.shared.drained.notify_waiters();
        }
    }
}

impl<E: HttpExec> ClosingClient<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                drained: Notify::new(),
            }),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closing(&self) -> bool {
        self.shared.lock().closing
    }

    /// Number of calls currently running.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    /// Abort every running call, wait for all of them to finish, then close
    /// the inner executor.
    ///
    /// Calls started after `close` fail with [`ClientError::Closing`].
    /// Calling `close` again does not abort anything new.
    pub async fn close(&self) {
        {
            let mut state = self.shared.lock();
            if !state.closing {
                state.closing = true;
                for (_, handle) in state.calls.drain() {
                    handle.abort();
                }
            }
        }

        self.inner.release_idle();

        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            // register before checking, so a wakeup in between is not lost
            notified.as_mut().enable();
            if self.shared.lock().outstanding == 0 {
                break;
            }
            notified.await;
        }

        self.inner.close().await;
    }
}

impl<E: HttpExec> HttpExec for ClosingClient<E> {
    fn execute(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ClientError>> {
        let (handle, registration) = AbortHandle::new_pair();
        let guard = {
            let mut state = self.shared.lock();
            if state.closing {
                return Box::pin(async { Err(ClientError::Closing) });
            }
            let id = state.next_id;
            state.next_id += 1;
            state.calls.insert(id, handle);
            state.outstanding += 1;
            InFlight {
                id,
                shared: Arc::clone(&self.shared),
            }
        };

        let call = Abortable::new(self.inner.execute(request), registration);
        Box::pin(async move {
            let _guard = guard;
            match call.await {
                Ok(result) => result,
                Err(_aborted) => Err(ClientError::Canceled),
            }
        })
    }

    fn release_idle(&self) {
        self.inner.release_idle();
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(ClosingClient::close(self))
    }
}

impl<E> std::fmt::Debug for ClosingClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ClosingClient")
            .field("closing", &state.closing)
            .field("outstanding", &state.outstanding)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Answers after a fixed delay and counts what it was asked to do.
    #[derive(Default)]
    struct SlowExec {
        delay: Duration,
        executed: AtomicUsize,
        released: AtomicUsize,
        closed: AtomicUsize,
    }

    impl SlowExec {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    impl HttpExec for SlowExec {
        fn execute(&self, _request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ClientError>> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(Response::new(Body::empty()))
            })
        }

        fn release_idle(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn request() -> Request<Body> {
        Request::new(Body::empty())
    }

    #[tokio::test]
    async fn test_calls_pass_through() {
        let exec = Arc::new(SlowExec::new(Duration::from_millis(1)));
        let client = ClosingClient::new(exec.clone());

        let response = client.execute(request()).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(exec.executed.load(Ordering::SeqCst), 1);
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_under_load() {
        let exec = Arc::new(SlowExec::new(Duration::from_secs(30)));
        let client = Arc::new(ClosingClient::new(exec.clone()));

        let calls: Vec<_> = (0..10)
            .map(|_| tokio::spawn(client.execute(request())))
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.outstanding(), 10);

        let started = Instant::now();
        client.close().await;
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(client.outstanding(), 0);
        assert_eq!(exec.released.load(Ordering::SeqCst), 1);
        assert_eq!(exec.closed.load(Ordering::SeqCst), 1);

        for call in calls {
            let result = tokio::time::timeout(Duration::from_millis(50), call)
                .await
                .expect("aborted call still running")
                .unwrap();
            assert!(matches!(result, Err(ClientError::Canceled)));
        }
    }

    #[tokio::test]
    async fn test_closing_rejects_new_calls() {
        let exec = Arc::new(SlowExec::new(Duration::from_millis(1)));
        let client = ClosingClient::new(exec.clone());
        client.close().await;
        assert!(client.is_closing());

        let result = client.execute(request()).await;
        assert!(matches!(result, Err(ClientError::Closing)));
        // rejected before reaching the executor
        assert_eq!(exec.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_twice() {
        let exec = Arc::new(SlowExec::new(Duration::from_millis(1)));
        let client = ClosingClient::new(exec.clone());
        client.close().await;
        client.close().await;
        assert!(client.is_closing());
        assert_eq!(exec.released.load(Ordering::SeqCst), 2);
        assert_eq!(exec.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_call_deregisters() {
        let exec = Arc::new(SlowExec::new(Duration::from_secs(30)));
        let client = ClosingClient::new(exec);

        let call = client.execute(request());
        assert_eq!(client.outstanding(), 1);
        drop(call);
        assert_eq!(client.outstanding(), 0);
        client.close().await;
    }
}
