//! Message pump: owns one completion queue and every call issued on it.
//!
//! ```text
//!  issuing threads                       pump thread
//!  ───────────────                       ───────────
//!  create_*_call ──► tracker.add_call
//!  call.start    ──► queue.post ──► ... ──► complete_one
//!                                              │ dispatch by CallId
//!                                              ▼
//!                                  call.on_completion_queue_event
//!                                              │ true
//!                                              ▼
//!                                   tracker.remove_call (frees it)
//! ```
//!
//! Exactly one thread may run [`MessagePump::complete_one`] at a time: either
//! the thread started by [`MessagePump::auto_update`] or a caller that drives
//! the pump itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, TryLockError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::call::{
    lock, CallId, CallObject, RequestResponseStreamCall, RequestStreamCall, ResponseStreamCall,
    UnaryCall,
};
use crate::config::ClientConfig;
use crate::queue::{Completion, CompletionQueue, QueueEvent};
use crate::tracker::OutstandingCallTracker;

/// Outcome of one [`MessagePump::complete_one`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Shutdown was requested; stop polling.
    Shutdown,
    /// An event was dispatched or the wait timed out.
    Complete,
}

pub struct MessagePump {
    queue: Arc<CompletionQueue>,
    tracker: OutstandingCallTracker,
    next_id: AtomicU64,
    /// Set first during shutdown; guards call creation against racing it.
    shutdown_requested: Mutex<bool>,
    /// Held for the whole shutdown sequence; true once it finished.
    shutdown_done: Mutex<bool>,
    auto_update: Mutex<Option<JoinHandle<()>>>,
    pump_thread: OnceLock<ThreadId>,
}

impl MessagePump {
    /// Pump with its own two-thread transport runtime.
    pub fn new() -> std::io::Result<Self> {
        Self::with_worker_threads(2)
    }

    pub fn with_worker_threads(worker_threads: usize) -> std::io::Result<Self> {
        Ok(Self::with_queue(CompletionQueue::new(worker_threads)?))
    }

    /// Pump that drives transport futures on an existing runtime.
    pub fn with_runtime_handle(handle: Handle) -> Self {
        Self::with_queue(CompletionQueue::with_handle(handle))
    }

    pub fn with_config(config: &ClientConfig) -> std::io::Result<Self> {
        Self::with_worker_threads(config.runtime_worker_threads)
    }

    fn with_queue(queue: CompletionQueue) -> Self {
        Self {
            queue: Arc::new(queue),
            tracker: OutstandingCallTracker::new(),
            next_id: AtomicU64::new(1),
            shutdown_requested: Mutex::new(false),
            shutdown_done: Mutex::new(false),
            auto_update: Mutex::new(None),
            pump_thread: OnceLock::new(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *lock(&self.shutdown_requested)
    }

    /// Number of calls the pump still owns.
    pub fn active_calls(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `timeout` for one completion and dispatch it.
    pub fn complete_one(&self, timeout: Duration) -> CompletionStatus {
        if self.is_shutdown() {
            return CompletionStatus::Shutdown;
        }

        match self.queue.next(timeout) {
            QueueEvent::Ready(completion) => {
                self.dispatch(completion);
                CompletionStatus::Complete
            }
            QueueEvent::Timeout => CompletionStatus::Complete,
            QueueEvent::Shutdown => CompletionStatus::Shutdown,
        }
    }

    fn dispatch(&self, completion: Completion) {
        let Completion { tag, ok, payload } = completion;
        let Some(call) = self.tracker.get(tag) else {
            warn!(call_id = %tag, ok, "Completion for an unknown call dropped");
            return;
        };

        trace!(call_id = %tag, kind = ?call.kind(), ok, "Dispatching completion");
        if call.on_completion_queue_event(ok, payload) {
            debug!(call_id = %tag, state = ?call.state(), "Call released");
            self.tracker.remove_call(tag);
        }
    }

    /// Start a thread that runs `complete_one(poll)` until shutdown.
    ///
    /// Only the first call starts a thread; later calls are no-ops.
    pub fn auto_update(self: &Arc<Self>, poll: Duration) -> std::io::Result<()> {
        let mut slot = lock(&self.auto_update);
        if slot.is_some() || self.is_shutdown() {
            return Ok(());
        }

        let pump = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("spotkit-pump".to_string())
            .spawn(move || {
                if let Some(pump) = pump.upgrade() {
                    let _ = pump.pump_thread.set(thread::current().id());
                }
                loop {
                    let Some(pump) = pump.upgrade() else {
                        break;
                    };
                    if pump.complete_one(poll) == CompletionStatus::Shutdown {
                        break;
                    }
                }
                debug!("Message pump thread exiting");
            })?;

        info!(poll_ms = poll.as_millis() as u64, "Message pump thread started");
        *slot = Some(handle);
        Ok(())
    }

    /// Shut the pump down. Idempotent and safe to call concurrently.
    ///
    /// When this returns, every call issued on the pump has resolved its
    /// future and been released.
    pub fn request_shutdown(&self) {
        let on_pump_thread = self.pump_thread.get() == Some(&thread::current().id());

        let mut done = if on_pump_thread {
            match self.shutdown_done.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // Another thread is shutting down and may be joining this one.
                Err(TryLockError::WouldBlock) => {
                    *lock(&self.shutdown_requested) = true;
                    return;
                }
            }
        } else {
            lock(&self.shutdown_done)
        };
        if *done {
            return;
        }

        *lock(&self.shutdown_requested) = true;
        info!(active_calls = self.tracker.len(), "Shutting down message pump");

        self.tracker.cancel_all();
        self.queue.shutdown();

        let handle = lock(&self.auto_update).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("Shutdown requested from the pump thread, not joining it");
            } else if handle.join().is_err() {
                error!("Message pump thread panicked");
            }
        }

        // Completions queued before the queue stopped still reach their
        // (now cancelled) calls.
        while let QueueEvent::Ready(completion) = self.queue.next(Duration::ZERO) {
            self.dispatch(completion);
        }

        let released = self.tracker.remove_all_calls();
        debug!(released, "Message pump shut down");
        *done = true;
    }

    fn next_call_id(&self) -> CallId {
        CallId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a new call unless shutdown was requested.
    fn track<C, F>(&self, build: F) -> Option<Arc<C>>
    where
        C: CallObject + 'static,
        F: FnOnce(CallId, Arc<CompletionQueue>) -> C,
    {
        let requested = lock(&self.shutdown_requested);
        if *requested {
            debug!("Message pump is shut down, call not created");
            return None;
        }

        let call = Arc::new(build(self.next_call_id(), self.queue.clone()));
        self.tracker.add_call(call.clone());
        drop(requested);
        Some(call)
    }

    pub fn create_unary_call<Req, Resp, T>(&self) -> Option<Arc<UnaryCall<Req, Resp, T>>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        T: Send + 'static,
    {
        self.track(UnaryCall::new)
    }

    pub fn create_request_stream_call<Req, Resp, T>(
        &self,
    ) -> Option<Arc<RequestStreamCall<Req, Resp, T>>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        T: Send + 'static,
    {
        self.track(RequestStreamCall::new)
    }

    pub fn create_response_stream_call<Req, Resp, T>(
        &self,
    ) -> Option<Arc<ResponseStreamCall<Req, Resp, T>>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        T: Send + 'static,
    {
        self.track(ResponseStreamCall::new)
    }

    pub fn create_request_response_stream_call<Req, Resp, T>(
        &self,
    ) -> Option<Arc<RequestResponseStreamCall<Req, Resp, T>>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        T: Send + 'static,
    {
        self.track(RequestResponseStreamCall::new)
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::context::CallContext;
    use crate::error::Status;
    use crate::transport;

    fn echo() -> transport::UnaryRpc<u32, u32> {
        transport::unary(|_ctx, req: u32| async move { Ok(req * 2) })
    }

    #[test]
    fn test_caller_driven_pump() {
        let pump = MessagePump::new().unwrap();
        let call = pump.create_unary_call::<u32, u32, u32>().unwrap();
        let future = call.future().unwrap();
        assert_eq!(pump.active_calls(), 1);

        call.start(CallContext::new(), 21, echo(), |o| o.map_err(Status::from))
            .unwrap();
        drop(call);

        while pump.active_calls() > 0 {
            assert_eq!(pump.complete_one(Duration::from_secs(5)), CompletionStatus::Complete);
        }
        assert_eq!(future.wait(), Ok(42));
    }

    #[test]
    fn test_call_ids_are_unique() {
        let pump = MessagePump::new().unwrap();
        let first = pump.create_unary_call::<u32, u32, u32>().unwrap();
        let second = pump.create_unary_call::<u32, u32, u32>().unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_auto_update_is_idempotent() {
        let pump = Arc::new(MessagePump::new().unwrap());
        pump.auto_update(Duration::from_millis(10)).unwrap();
        pump.auto_update(Duration::from_millis(10)).unwrap();

        let call = pump.create_unary_call::<u32, u32, u32>().unwrap();
        let future = call.future().unwrap();
        call.start(CallContext::new(), 4, echo(), |o| o.map_err(Status::from))
            .unwrap();
        assert_eq!(future.wait(), Ok(8));

        pump.request_shutdown();
    }

    #[test]
    fn test_shutdown_cancels_and_frees_calls() {
        let pump = MessagePump::new().unwrap();
        let never = transport::unary(|_ctx, req: u32| async move {
            futures::future::pending::<()>().await;
            Ok(req)
        });
        let call = pump.create_unary_call::<u32, u32, u32>().unwrap();
        let future = call.future().unwrap();
        call.start(CallContext::new(), 1, never, |o| o.map_err(Status::from))
            .unwrap();

        pump.request_shutdown();
        assert!(future.wait().unwrap_err().is_cancelled());
        assert_eq!(call.state(), CallState::Cancelled);
        assert_eq!(pump.active_calls(), 0);
        assert!(pump.is_shutdown());
        assert_eq!(pump.complete_one(Duration::from_millis(1)), CompletionStatus::Shutdown);
        assert!(pump.create_unary_call::<u32, u32, u32>().is_none());

        pump.request_shutdown();
    }

    #[test]
    fn test_shutdown_from_callback_on_pump_thread() {
        let pump = Arc::new(MessagePump::new().unwrap());
        pump.auto_update(Duration::from_millis(10)).unwrap();

        let call = pump.create_unary_call::<u32, u32, u32>().unwrap();
        let future = call.future().unwrap();
        let weak = Arc::downgrade(&pump);
        call.start(CallContext::new(), 3, echo(), move |o| {
            if let Some(pump) = weak.upgrade() {
                pump.request_shutdown();
            }
            o.map_err(Status::from)
        })
        .unwrap();

        assert_eq!(future.wait(), Ok(6));
        pump.request_shutdown();
        assert!(pump.is_shutdown());
        assert_eq!(pump.active_calls(), 0);
    }

    #[test]
    fn test_with_runtime_handle() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let pump = MessagePump::with_runtime_handle(runtime.handle().clone());
        let call = pump.create_unary_call::<u32, u32, u32>().unwrap();
        let future = call.future().unwrap();
        call.start(CallContext::new(), 5, echo(), |o| o.map_err(Status::from))
            .unwrap();

        assert_eq!(pump.complete_one(Duration::from_secs(5)), CompletionStatus::Complete);
        assert_eq!(future.wait(), Ok(10));
        assert_eq!(pump.active_calls(), 0);
    }
}
