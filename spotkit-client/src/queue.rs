//! Completion queue.
//!
//! Transport operations run as futures on a tokio runtime. When one
//! finishes, its completion `(tag, ok, payload)` is pushed onto a
//! single-consumer queue that the message pump drains with [`CompletionQueue::next`].
//!
//! ```text
//!   post(tag, op) ──► tokio task ──► op finishes ──► Completion{tag, ok, payload}
//!                                                         │
//!   MessagePump::complete_one ◄── next(timeout) ◄─────────┘
//! ```
//!
//! After [`CompletionQueue::shutdown`], new operations are refused, in-flight
//! ones are abandoned, completions already queued can still be drained and
//! then `next` reports [`QueueEvent::Shutdown`].

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::call::CallId;

/// Operation output carried back to the call object that issued it.
pub type Payload = Box<dyn Any + Send>;

/// One completed transport operation.
pub struct Completion {
    pub tag: CallId,
    /// False when the operation failed at the transport (stream closed,
    /// deadline passed) rather than producing its normal result.
    pub ok: bool,
    pub payload: Payload,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("tag", &self.tag)
            .field("ok", &self.ok)
            .finish_non_exhaustive()
    }
}

/// Result of waiting on the queue.
#[derive(Debug)]
pub enum QueueEvent {
    Ready(Completion),
    Timeout,
    Shutdown,
}

enum QueueMessage {
    Completion(Completion),
    Wake,
}

/// Completion queue backed by a tokio runtime.
pub struct CompletionQueue {
    handle: Handle,
    /// Present only when the queue built its own runtime.
    runtime: Mutex<Option<Runtime>>,
    sender: mpsc::Sender<QueueMessage>,
    receiver: Mutex<mpsc::Receiver<QueueMessage>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown: AtomicBool,
}

impl CompletionQueue {
    /// Build a queue with its own multi-threaded runtime.
    pub fn new(worker_threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("spotkit-transport")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self::build(handle, Some(runtime)))
    }

    /// Build a queue that spawns transport operations on an existing runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self::build(handle, None)
    }

    fn build(handle: Handle, runtime: Option<Runtime>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            handle,
            runtime: Mutex::new(runtime),
            sender,
            receiver: Mutex::new(receiver),
            shutdown_tx,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run `op` and queue its completion under `tag`.
    ///
    /// Returns false (and drops `op`) if the queue is shut down.
    pub fn post<F, P>(&self, tag: CallId, op: F) -> bool
    where
        F: Future<Output = (bool, P)> + Send + 'static,
        P: Any + Send,
    {
        if self.is_shutdown() {
            warn!(call_id = %tag, "Completion queue is shut down, operation dropped");
            return false;
        }

        let sender = self.sender.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown_signalled(shutdown) => {
                    trace!(call_id = %tag, "Operation abandoned at queue shutdown");
                }
                (ok, payload) = op => {
                    let completion = Completion { tag, ok, payload: Box::new(payload) };
                    if sender.send(QueueMessage::Completion(completion)).is_err() {
                        trace!(call_id = %tag, "Completion queue dropped before delivery");
                    }
                }
            }
        });
        true
    }

    /// Run a background transport future (the body of a streaming RPC)
    /// that is not itself a queue operation. Abandoned at shutdown.
    pub fn spawn<F>(&self, fut: F) -> Option<JoinHandle<Option<F::Output>>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_shutdown() {
            return None;
        }
        let shutdown = self.shutdown_tx.subscribe();
        Some(self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown_signalled(shutdown) => None,
                output = fut => Some(output),
            }
        }))
    }

    /// Wait up to `timeout` for the next completion.
    pub fn next(&self, timeout: Duration) -> QueueEvent {
        let receiver = self.receiver.lock().unwrap_or_else(|e| e.into_inner());

        if self.is_shutdown() {
            return Self::drain_one(&receiver);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(left) {
                Ok(QueueMessage::Completion(completion)) => return QueueEvent::Ready(completion),
                Ok(QueueMessage::Wake) => {
                    if self.is_shutdown() {
                        return Self::drain_one(&receiver);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return QueueEvent::Timeout,
                Err(RecvTimeoutError::Disconnected) => return QueueEvent::Shutdown,
            }
        }
    }

    fn drain_one(receiver: &mpsc::Receiver<QueueMessage>) -> QueueEvent {
        loop {
            match receiver.try_recv() {
                Ok(QueueMessage::Completion(completion)) => return QueueEvent::Ready(completion),
                Ok(QueueMessage::Wake) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return QueueEvent::Shutdown
                }
            }
        }
    }

    /// Stop accepting operations and abandon the in-flight ones. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down completion queue");

        self.shutdown_tx.send_replace(true);
        // Unblock a consumer parked in next().
        let _ = self.sender.send(QueueMessage::Wake);

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

/// Resolves once the queue shuts down (or is dropped).
async fn shutdown_signalled(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|down| *down).await;
}

impl Drop for CompletionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
