//! Call objects: one state machine per in-flight RPC.
//!
//! There are exactly four kinds, all driven by the message pump through the
//! sealed [`CallObject`] trait:
//!
//! | Kind                        | Writes          | Reads            |
//! |-----------------------------|-----------------|------------------|
//! | [`UnaryCall`]               | one request     | one response     |
//! | [`RequestStreamCall`]       | many requests   | one response     |
//! | [`ResponseStreamCall`]      | one request     | many responses   |
//! | [`RequestResponseStreamCall`] | many requests, then | many responses |
//!
//! Every call moves `NotStarted -> Called -> Completed`; `Cancelled` is
//! reachable from `NotStarted` or `Called` and is terminal. Each call
//! re-arms its next transport operation only after the completion of the
//! previous one was dispatched, so the events of one call are processed in
//! issue order.

mod bidi;
mod request_stream;
mod response_stream;
mod unary;

pub use bidi::RequestResponseStreamCall;
pub use request_stream::RequestStreamCall;
pub use response_stream::ResponseStreamCall;
pub use unary::UnaryCall;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, error};

use crate::error::{codes, Result, Status};
use crate::future::Promise;
use crate::queue::Payload;

/// Stable handle of a call object inside its pump. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotStarted,
    Called,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    RequestStream,
    ResponseStream,
    RequestResponseStream,
}

mod sealed {
    pub trait Sealed {}
}

/// Uniform view of the four call kinds, used by the pump and the tracker.
pub trait CallObject: sealed::Sealed + Send + Sync {
    fn id(&self) -> CallId;

    fn kind(&self) -> CallKind;

    fn state(&self) -> CallState;

    /// Stop the call from producing a result.
    ///
    /// The promise resolves with a cancellation status and the callback is
    /// dropped. A call that is already running is not aborted at the
    /// transport; its remaining completions are ignored. No-op once the call
    /// is cancelled or completed.
    fn cancel(&self);

    /// Advance the state machine with one completion from the queue.
    ///
    /// Returns true when the call is finished with the queue and may be
    /// released. Only the message pump calls this.
    #[doc(hidden)]
    fn on_completion_queue_event(&self, ok: bool, payload: Payload) -> bool;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of trying to start a call.
pub(crate) enum Begin {
    /// The call moved to `Called`; issue the first operation.
    Started,
    /// The call was cancelled before it started; let the pump reap it.
    Reap,
}

/// State, callback and promise shared by every call kind.
pub(crate) struct Resolver<Cb, T> {
    state: CallState,
    callback: Option<Cb>,
    promise: Option<Promise<T>>,
}

impl<Cb, T> Resolver<Cb, T> {
    pub(crate) fn new(promise: Promise<T>) -> Self {
        Self {
            state: CallState::NotStarted,
            callback: None,
            promise: Some(promise),
        }
    }

    pub(crate) fn state(&self) -> CallState {
        self.state
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state == CallState::Cancelled
    }

    pub(crate) fn begin(&mut self, id: CallId, callback: Cb) -> Result<Begin> {
        match self.state {
            CallState::NotStarted => {
                self.state = CallState::Called;
                self.callback = Some(callback);
                Ok(Begin::Started)
            }
            CallState::Cancelled => Ok(Begin::Reap),
            CallState::Called | CallState::Completed => Err(Status::client(
                codes::client::ALREADY_STARTED,
                format!("{} was already started", id),
            )),
        }
    }

    /// Move to `Cancelled`, handing back the promise to resolve.
    pub(crate) fn cancel(&mut self) -> Option<Promise<T>> {
        match self.state {
            CallState::NotStarted | CallState::Called => {
                self.state = CallState::Cancelled;
                self.callback = None;
                self.promise.take()
            }
            CallState::Cancelled | CallState::Completed => None,
        }
    }

    /// Move to `Completed`, handing back what is needed to resolve the call.
    pub(crate) fn complete(&mut self) -> Option<(Cb, Promise<T>)> {
        if self.state != CallState::Called {
            return None;
        }
        self.state = CallState::Completed;
        match (self.callback.take(), self.promise.take()) {
            (Some(callback), Some(promise)) => Some((callback, promise)),
            _ => None,
        }
    }

    /// The transport refused the first operation: complete with `status`.
    pub(crate) fn fail(&mut self, status: Status) -> Option<(Promise<T>, Status)> {
        if self.state != CallState::Called {
            return None;
        }
        self.state = CallState::Completed;
        self.callback = None;
        self.promise.take().map(|promise| (promise, status))
    }
}

/// Run a user callback and resolve the promise with its result.
///
/// A panicking callback is contained here so it never unwinds into the pump.
pub(crate) fn resolve<T>(id: CallId, promise: Promise<T>, callback: impl FnOnce() -> Result<T>) {
    let result = match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(call_id = %id, panic = %message, "Call callback panicked");
            Err(Status::client(
                codes::client::CALLBACK_PANICKED,
                format!("Callback panicked: {}", message),
            ))
        }
    };

    if !promise.set(result) {
        debug!(call_id = %id, "Result dropped, nobody is waiting on the call");
    }
}

/// Resolve a promise that never reaches the callback.
pub(crate) fn reject<T>(id: CallId, promise: Promise<T>, status: Status) {
    debug!(call_id = %id, status = %status, "Resolving call without callback");
    promise.set(Err(status));
}

/// Fail `fut` with `DEADLINE_EXCEEDED` once `deadline` passes.
pub(crate) async fn with_deadline<F, R>(
    deadline: Option<Instant>,
    fut: F,
) -> std::result::Result<R, tonic::Status>
where
    F: Future<Output = std::result::Result<R, tonic::Status>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.into(), fut)
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded())),
        None => fut.await,
    }
}

pub(crate) fn deadline_exceeded() -> tonic::Status {
    tonic::Status::deadline_exceeded("Deadline exceeded")
}

/// Downcast a completion payload to the type the current step expects.
pub(crate) fn take_payload<P: 'static>(id: CallId, payload: Payload) -> std::result::Result<P, tonic::Status> {
    payload.downcast::<P>().map(|boxed| *boxed).map_err(|_| {
        error!(call_id = %id, "Completion payload does not match the call step");
        tonic::Status::internal("Unexpected completion payload")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDomain;
    use crate::future::promise;

    type Cb = Box<dyn FnOnce() -> Result<u32> + Send>;

    #[test]
    fn test_resolver_forward_path() {
        let (promise, future) = promise::<u32>();
        let mut resolver: Resolver<Cb, u32> = Resolver::new(promise);
        assert_eq!(resolver.state(), CallState::NotStarted);

        assert!(matches!(resolver.begin(CallId(1), Box::new(|| Ok(5))), Ok(Begin::Started)));
        assert_eq!(resolver.state(), CallState::Called);

        let (callback, promise) = resolver.complete().unwrap();
        assert_eq!(resolver.state(), CallState::Completed);
        resolve(CallId(1), promise, callback);
        assert_eq!(future.wait(), Ok(5));

        // Cancel after completion is a no-op.
        assert!(resolver.cancel().is_none());
        assert_eq!(resolver.state(), CallState::Completed);
    }

    #[test]
    fn test_resolver_double_begin_fails() {
        let (promise, _future) = promise::<u32>();
        let mut resolver: Resolver<Cb, u32> = Resolver::new(promise);
        resolver.begin(CallId(2), Box::new(|| Ok(1))).ok();
        let err = resolver.begin(CallId(2), Box::new(|| Ok(2))).err().unwrap();
        assert!(err.is(ErrorDomain::Client, codes::client::ALREADY_STARTED));
        assert_eq!(resolver.state(), CallState::Called);
    }

    #[test]
    fn test_resolver_cancel_before_start() {
        let (promise, future) = promise::<u32>();
        let mut resolver: Resolver<Cb, u32> = Resolver::new(promise);
        let promise = resolver.cancel().unwrap();
        reject(CallId(3), promise, Status::cancelled());
        assert!(future.wait().unwrap_err().is_cancelled());

        assert!(resolver.cancel().is_none());
        assert!(matches!(resolver.begin(CallId(3), Box::new(|| Ok(1))), Ok(Begin::Reap)));
        assert!(resolver.complete().is_none());
    }

    #[test]
    fn test_resolve_contains_panics() {
        let (promise, future) = promise::<u32>();
        resolve(CallId(4), promise, || panic!("handler exploded"));
        let err = future.wait().unwrap_err();
        assert!(err.is(ErrorDomain::Client, codes::client::CALLBACK_PANICKED));
        assert!(err.message().contains("handler exploded"));
    }

    #[test]
    fn test_take_payload_mismatch() {
        let payload: Payload = Box::new(17u8);
        let err = take_payload::<String>(CallId(5), payload).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }
}
