use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use super::unary::ResponseCallback;
use super::{
    lock, reject, resolve, sealed, take_payload, with_deadline, Begin, CallId,
    CallKind, CallObject, CallState, Resolver,
};
use crate::context::CallContext;
use crate::error::{Result, Status};
use crate::future::{promise, RpcFuture};
use crate::queue::{CompletionQueue, Payload};
use crate::transport::ClientStreamingRpc;

type Finish<Resp> = JoinHandle<Option<std::result::Result<Resp, tonic::Status>>>;

/// Which completion the call is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Call opened or a write finished; write the next request.
    WriteRequest,
    /// The last request was written; signal writes-done.
    CallWritesDone,
    /// Writes-done finished; collect the final status.
    CallFinish,
    /// The final status arrived; run the callback.
    CallCallback,
}

struct Inner<Req, Resp, T> {
    resolver: Resolver<ResponseCallback<Resp, T>, T>,
    step: Step,
    pending: VecDeque<Req>,
    writer: Option<mpsc::Sender<Req>>,
    finish: Option<Finish<Resp>>,
    deadline: Option<Instant>,
}

/// Many requests, one response.
///
/// Writes the requests one at a time in order, then signals writes-done,
/// then waits for the single response. A failed write skips the remaining
/// writes and goes straight to collecting the final status.
pub struct RequestStreamCall<Req, Resp, T> {
    id: CallId,
    queue: Arc<CompletionQueue>,
    future: Mutex<Option<RpcFuture<T>>>,
    inner: Mutex<Inner<Req, Resp, T>>,
}

impl<Req, Resp, T> RequestStreamCall<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(id: CallId, queue: Arc<CompletionQueue>) -> Self {
        let (promise, future) = promise();
        Self {
            id,
            queue,
            future: Mutex::new(Some(future)),
            inner: Mutex::new(Inner {
                resolver: Resolver::new(promise),
                step: Step::WriteRequest,
                pending: VecDeque::new(),
                writer: None,
                finish: None,
                deadline: None,
            }),
        }
    }

    /// Take the future resolved by this call. Available once.
    pub fn future(&self) -> Option<RpcFuture<T>> {
        lock(&self.future).take()
    }

    /// Open the stream through `rpc` and write `requests` to it.
    pub fn start<F>(
        &self,
        context: CallContext,
        requests: Vec<Req>,
        rpc: ClientStreamingRpc<Req, Resp>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(std::result::Result<Resp, tonic::Status>) -> Result<T> + Send + 'static,
    {
        let failed = {
            let mut inner = lock(&self.inner);
            match inner.resolver.begin(self.id, Box::new(callback))? {
                Begin::Reap => {
                    self.queue.post(self.id, async { (false, ()) });
                    return Ok(());
                }
                Begin::Started => {}
            }

            trace!(call_id = %self.id, requests = requests.len(), "Starting request stream call");
            let (writer, stream) = mpsc::channel(1);
            let deadline = context.deadline();
            let finish = self
                .queue
                .spawn(with_deadline(deadline, rpc(context, ReceiverStream::new(stream))));

            inner.deadline = deadline;
            inner.pending = requests.into();
            inner.writer = Some(writer);
            inner.finish = finish;
            inner.step = Step::WriteRequest;

            if inner.finish.is_some() && self.queue.post(self.id, async { (true, ()) }) {
                None
            } else {
                inner.writer = None;
                inner.resolver.fail(Status::shutdown())
            }
        };

        if let Some((promise, status)) = failed {
            reject(self.id, promise, status);
        }
        Ok(())
    }

    fn write_next(&self, inner: &mut Inner<Req, Resp, T>) {
        let Some(request) = inner.pending.pop_front() else {
            self.writes_done(inner);
            return;
        };
        if inner.pending.is_empty() {
            inner.step = Step::CallWritesDone;
        }

        let writer = inner.writer.clone();
        let deadline = inner.deadline;
        self.post(async move {
            let written = match writer {
                Some(writer) => write_before(deadline, &writer, request).await,
                None => false,
            };
            (written, ())
        });
    }

    fn writes_done(&self, inner: &mut Inner<Req, Resp, T>) {
        trace!(call_id = %self.id, "Request stream writes done");
        inner.writer = None;
        inner.step = Step::CallFinish;
        self.post(async { (true, ()) });
    }

    fn finish(&self, inner: &mut Inner<Req, Resp, T>) {
        inner.writer = None;
        inner.pending.clear();
        inner.step = Step::CallCallback;
        let finish = inner.finish.take();
        self.post(async move {
            let outcome = match finish {
                Some(handle) => join_finish(handle).await,
                None => Err(tonic::Status::internal("Stream was never opened")),
            };
            (true, outcome)
        });
    }

    fn post<F, P>(&self, op: F)
    where
        F: std::future::Future<Output = (bool, P)> + Send + 'static,
        P: std::any::Any + Send,
    {
        if !self.queue.post(self.id, op) {
            warn!(call_id = %self.id, "Request stream call stalled by queue shutdown");
        }
    }
}

/// Send one request, giving up once the deadline passes or the RPC stops reading.
pub(crate) async fn write_before<Req>(
    deadline: Option<Instant>,
    writer: &mpsc::Sender<Req>,
    request: Req,
) -> bool {
    match deadline {
        Some(deadline) => matches!(
            tokio::time::timeout_at(deadline.into(), writer.send(request)).await,
            Ok(Ok(()))
        ),
        None => writer.send(request).await.is_ok(),
    }
}

/// Final status of a transport task spawned on the queue.
pub(crate) async fn join_finish<R>(
    handle: JoinHandle<Option<std::result::Result<R, tonic::Status>>>,
) -> std::result::Result<R, tonic::Status> {
    match handle.await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => Err(tonic::Status::cancelled("Abandoned at shutdown")),
        Err(e) => Err(tonic::Status::internal(format!("Transport task failed: {}", e))),
    }
}

impl<Req, Resp, T> sealed::Sealed for RequestStreamCall<Req, Resp, T> {}

impl<Req, Resp, T> CallObject for RequestStreamCall<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    fn id(&self) -> CallId {
        self.id
    }

    fn kind(&self) -> CallKind {
        CallKind::RequestStream
    }

    fn state(&self) -> CallState {
        lock(&self.inner).resolver.state()
    }

    fn cancel(&self) {
        let promise = {
            let mut inner = lock(&self.inner);
            inner.writer = None;
            inner.pending.clear();
            inner.resolver.cancel()
        };
        if let Some(promise) = promise {
            debug!(call_id = %self.id, "Request stream call cancelled");
            reject(self.id, promise, Status::cancelled());
        }
    }

    fn on_completion_queue_event(&self, ok: bool, payload: Payload) -> bool {
        let mut inner = lock(&self.inner);
        if inner.resolver.state() != CallState::Called {
            return true;
        }

        match inner.step {
            Step::WriteRequest => {
                if ok {
                    self.write_next(&mut inner);
                } else {
                    debug!(call_id = %self.id, "Write failed, finishing request stream");
                    self.finish(&mut inner);
                }
                false
            }
            Step::CallWritesDone => {
                if ok {
                    self.writes_done(&mut inner);
                } else {
                    debug!(call_id = %self.id, "Last write failed, finishing request stream");
                    self.finish(&mut inner);
                }
                false
            }
            Step::CallFinish => {
                self.finish(&mut inner);
                false
            }
            Step::CallCallback => {
                let Some((callback, promise)) = inner.resolver.complete() else {
                    return true;
                };
                drop(inner);

                let outcome = take_payload::<std::result::Result<Resp, tonic::Status>>(self.id, payload)
                    .and_then(|outcome| outcome);
                resolve(self.id, promise, move || callback(outcome));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueEvent;
    use crate::transport;
    use futures::StreamExt;
    use std::time::Duration;

    fn pump(queue: &CompletionQueue, call: &dyn CallObject) {
        loop {
            match queue.next(Duration::from_secs(5)) {
                QueueEvent::Ready(completion) => {
                    if call.on_completion_queue_event(completion.ok, completion.payload) {
                        return;
                    }
                }
                other => panic!("queue stalled: {:?}", other),
            }
        }
    }

    fn concat() -> ClientStreamingRpc<String, String> {
        transport::client_streaming(|_ctx, requests| async move {
            let parts: Vec<String> = requests.collect().await;
            Ok(parts.join(","))
        })
    }

    #[test]
    fn test_requests_written_in_order() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestStreamCall::<String, String, String>::new(CallId(1), queue.clone());
        let future = call.future().unwrap();
        let requests = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        call.start(CallContext::new(), requests, concat(), |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(future.wait(), Ok("a,b,c".to_string()));
    }

    #[test]
    fn test_no_requests_goes_straight_to_writes_done() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestStreamCall::<String, String, String>::new(CallId(2), queue.clone());
        let future = call.future().unwrap();
        call.start(CallContext::new(), Vec::new(), concat(), |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        assert_eq!(future.wait(), Ok(String::new()));
    }

    #[test]
    fn test_server_closing_early_skips_remaining_writes() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestStreamCall::<String, String, String>::new(CallId(3), queue.clone());
        let future = call.future().unwrap();
        let rpc = transport::client_streaming(|_ctx, mut requests: transport::RequestStream<String>| async move {
            let first = requests.next().await.unwrap_or_default();
            Err::<String, _>(tonic::Status::invalid_argument(format!("rejected {}", first)))
        });
        let requests = (0..16).map(|i| i.to_string()).collect();
        call.start(CallContext::new(), requests, rpc, |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::InvalidArgument));
        assert!(err.message().contains("rejected 0"));
    }

    #[test]
    fn test_deadline_while_server_stalls() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestStreamCall::<String, String, String>::new(CallId(4), queue.clone());
        let future = call.future().unwrap();
        let rpc = transport::client_streaming(|_ctx, _requests| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        });
        let mut context = CallContext::new();
        context.set_timeout(Duration::from_millis(30));
        let requests = (0..4).map(|i| i.to_string()).collect();
        call.start(context, requests, rpc, |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_write_before_deadline_gives_up() {
        let (writer, _stream) = mpsc::channel::<u8>(1);
        assert!(write_before(None, &writer, 1).await);
        let deadline = Some(Instant::now() + Duration::from_millis(10));
        assert!(!write_before(deadline, &writer, 2).await);
    }
}
