//! Single-value handoff between the pump thread and the caller.
//!
//! A [`Promise`] is resolved exactly once, by the call object that owns it.
//! The matching [`RpcFuture`] can be waited on synchronously with
//! [`RpcFuture::wait`], awaited from async code, or turned into a cloneable
//! shared handle.

use futures::future::{FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::{codes, Result, Status};

/// Write side of a call result.
#[derive(Debug)]
pub struct Promise<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Promise<T> {
    /// Resolve the promise. Consumes it, so a second resolution cannot happen.
    ///
    /// Returns false if the future side was already dropped.
    pub fn set(self, value: Result<T>) -> bool {
        self.tx.send(value).is_ok()
    }
}

/// Create a connected promise/future pair.
pub fn promise<T>() -> (Promise<T>, RpcFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx }, RpcFuture { rx })
}

/// Read side of a call result.
#[derive(Debug)]
pub struct RpcFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> RpcFuture<T> {
    /// A future that is already resolved with `value`.
    pub fn ready(value: Result<T>) -> Self {
        let (promise, future) = promise();
        promise.set(value);
        future
    }

    /// Block the calling thread until the result is available.
    ///
    /// # Panics
    ///
    /// Panics when called on a tokio runtime thread, for example from a
    /// synchronous wrapper invoked inside a `#[tokio::main]` task. Async
    /// callers `.await` the future instead.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(dropped()))
    }

    /// Non-blocking check. Returns `None` while the call is still running.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }

    /// Convert into a cloneable handle that any number of waiters can await.
    pub fn shared(self) -> Shared<Self>
    where
        T: Clone,
    {
        FutureExt::shared(self)
    }
}

impl<T> Future for RpcFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(dropped())))
    }
}

fn dropped() -> Status {
    Status::client(
        codes::client::PROMISE_DROPPED,
        "Call was released without producing a result",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDomain;

    #[test]
    fn test_wait_returns_value() {
        let (promise, future) = promise::<u32>();
        std::thread::spawn(move || {
            promise.set(Ok(7));
        });
        assert_eq!(future.wait(), Ok(7));
    }

    #[test]
    fn test_dropped_promise_never_hangs() {
        let (promise, future) = promise::<u32>();
        drop(promise);
        let err = future.wait().unwrap_err();
        assert!(err.is(ErrorDomain::Client, codes::client::PROMISE_DROPPED));
    }

    #[test]
    fn test_try_take() {
        let (promise, mut future) = promise::<&'static str>();
        assert!(future.try_take().is_none());
        promise.set(Ok("done"));
        assert_eq!(future.try_take(), Some(Ok("done")));
    }

    #[tokio::test]
    #[should_panic]
    async fn test_wait_on_runtime_thread_panics() {
        let _ = RpcFuture::ready(Ok(1u32)).wait();
    }

    #[tokio::test]
    async fn test_await_and_shared() {
        let future = RpcFuture::ready(Ok(String::from("hello")));
        let shared = future.shared();
        let other = shared.clone();
        assert_eq!(shared.await, Ok("hello".to_string()));
        assert_eq!(other.await, Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn test_await_error() {
        let future: RpcFuture<()> = RpcFuture::ready(Err(Status::cancelled()));
        assert!(future.await.unwrap_err().is_cancelled());
    }
}
