use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::StreamExt;
use tracing::{debug, trace, warn};

use super::{
    deadline_exceeded, lock, reject, resolve, sealed, take_payload, with_deadline, Begin, CallId,
    CallKind, CallObject, CallState, Resolver,
};
use crate::context::CallContext;
use crate::error::{Result, Status};
use crate::future::{promise, RpcFuture};
use crate::queue::{CompletionQueue, Payload};
use crate::transport::{ResponseStream, ServerStreamingRpc};

/// Invoked once with every response read from the stream, or the error
/// that ended it.
pub type ResponsesCallback<Resp, T> =
    Box<dyn FnOnce(std::result::Result<Vec<Resp>, tonic::Status>) -> Result<T> + Send>;

pub(crate) type Opened<Resp> = std::result::Result<ResponseStream<Resp>, tonic::Status>;

/// Completion payload of one read.
pub(crate) struct Read<Resp> {
    pub(crate) stream: ResponseStream<Resp>,
    /// `None` once the server closed the stream.
    pub(crate) item: Option<std::result::Result<Resp, tonic::Status>>,
}

/// Read `stream` once, failing the read when the deadline passes.
pub(crate) async fn read_before<Resp>(
    deadline: Option<Instant>,
    mut stream: ResponseStream<Resp>,
) -> (bool, Read<Resp>) {
    let item = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.into(), stream.next())
            .await
            .unwrap_or_else(|_| Some(Err(deadline_exceeded()))),
        None => stream.next().await,
    };
    (matches!(item, Some(Ok(_))), Read { stream, item })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Waiting for the call to open; then issue the first read.
    StartRead,
    /// A read finished; keep reading or finish.
    ContinueReadOrFinish,
    /// The final status arrived; run the callback.
    CallCallback,
}

struct Inner<Resp, T> {
    resolver: Resolver<ResponsesCallback<Resp, T>, T>,
    step: Step,
    responses: Vec<Resp>,
    deadline: Option<Instant>,
}

/// One request, many responses.
///
/// Reads responses one at a time until the server closes the stream, then
/// runs the callback with all of them in arrival order.
pub struct ResponseStreamCall<Req, Resp, T> {
    id: CallId,
    queue: Arc<CompletionQueue>,
    future: Mutex<Option<RpcFuture<T>>>,
    inner: Mutex<Inner<Resp, T>>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Resp, T> ResponseStreamCall<Req, Resp, T>
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
                step: Step::StartRead,
                responses: Vec::new(),
                deadline: None,
            }),
            _request: PhantomData,
        }
    }

    /// Take the future resolved by this call. Available once.
    pub fn future(&self) -> Option<RpcFuture<T>> {
        lock(&self.future).take()
    }

    /// Send `request` through `rpc` and read the response stream.
    pub fn start<F>(
        &self,
        context: CallContext,
        request: Req,
        rpc: ServerStreamingRpc<Req, Resp>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(std::result::Result<Vec<Resp>, tonic::Status>) -> Result<T> + Send + 'static,
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

            trace!(call_id = %self.id, "Starting response stream call");
            let deadline = context.deadline();
            inner.deadline = deadline;
            inner.step = Step::StartRead;
            let open = with_deadline(deadline, rpc(context, request));
            let posted = self.queue.post(self.id, async move {
                let opened: Opened<Resp> = open.await;
                (opened.is_ok(), opened)
            });

            if posted {
                None
            } else {
                inner.resolver.fail(Status::shutdown())
            }
        };

        if let Some((promise, status)) = failed {
            reject(self.id, promise, status);
        }
        Ok(())
    }

    fn read(&self, inner: &mut Inner<Resp, T>, stream: ResponseStream<Resp>) {
        inner.step = Step::ContinueReadOrFinish;
        self.post(read_before(inner.deadline, stream));
    }

    fn finish(&self, inner: &mut Inner<Resp, T>, status: std::result::Result<(), tonic::Status>) {
        inner.step = Step::CallCallback;
        self.post(async move { (true, status) });
    }

    fn post<F, P>(&self, op: F)
    where
        F: std::future::Future<Output = (bool, P)> + Send + 'static,
        P: std::any::Any + Send,
    {
        if !self.queue.post(self.id, op) {
            warn!(call_id = %self.id, "Response stream call stalled by queue shutdown");
        }
    }
}

impl<Req, Resp, T> sealed::Sealed for ResponseStreamCall<Req, Resp, T> {}

impl<Req, Resp, T> CallObject for ResponseStreamCall<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    fn id(&self) -> CallId {
        self.id
    }

    fn kind(&self) -> CallKind {
        CallKind::ResponseStream
    }

    fn state(&self) -> CallState {
        lock(&self.inner).resolver.state()
    }

    fn cancel(&self) {
        let promise = {
            let mut inner = lock(&self.inner);
            inner.responses.clear();
            inner.resolver.cancel()
        };
        if let Some(promise) = promise {
            debug!(call_id = %self.id, "Response stream call cancelled");
            reject(self.id, promise, Status::cancelled());
        }
    }

    fn on_completion_queue_event(&self, _ok: bool, payload: Payload) -> bool {
        let mut inner = lock(&self.inner);
        if inner.resolver.state() != CallState::Called {
            return true;
        }

        match inner.step {
            Step::StartRead => {
                match take_payload::<Opened<Resp>>(self.id, payload).and_then(|opened| opened) {
                    Ok(stream) => self.read(&mut inner, stream),
                    Err(status) => self.finish(&mut inner, Err(status)),
                }
                false
            }
            Step::ContinueReadOrFinish => {
                match take_payload::<Read<Resp>>(self.id, payload) {
                    Ok(Read { stream, item: Some(Ok(response)) }) => {
                        inner.responses.push(response);
                        self.read(&mut inner, stream);
                    }
                    Ok(Read { item: Some(Err(status)), .. }) | Err(status) => {
                        self.finish(&mut inner, Err(status));
                    }
                    Ok(Read { item: None, .. }) => {
                        trace!(call_id = %self.id, responses = inner.responses.len(), "Response stream closed");
                        self.finish(&mut inner, Ok(()));
                    }
                }
                false
            }
            Step::CallCallback => {
                let responses = std::mem::take(&mut inner.responses);
                let Some((callback, promise)) = inner.resolver.complete() else {
                    return true;
                };
                drop(inner);

                let outcome = take_payload::<std::result::Result<(), tonic::Status>>(self.id, payload)
                    .and_then(|status| status)
                    .map(|()| responses);
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

    fn repeat(items: Vec<std::result::Result<String, tonic::Status>>) -> ServerStreamingRpc<(), String> {
        transport::server_streaming(move |_ctx, _req: ()| async move {
            Ok(futures::stream::iter(items))
        })
    }

    #[test]
    fn test_responses_collected_in_order() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = ResponseStreamCall::<(), String, Vec<String>>::new(CallId(1), queue.clone());
        let future = call.future().unwrap();
        let rpc = repeat(vec![Ok("R1".to_string()), Ok("R2".to_string())]);
        call.start(CallContext::new(), (), rpc, |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(future.wait(), Ok(vec!["R1".to_string(), "R2".to_string()]));
    }

    #[test]
    fn test_empty_stream() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = ResponseStreamCall::<(), String, usize>::new(CallId(2), queue.clone());
        let future = call.future().unwrap();
        call.start(CallContext::new(), (), repeat(Vec::new()), |o| {
            Ok(o.map_err(Status::from)?.len())
        })
        .unwrap();

        pump(&queue, &call);
        assert_eq!(future.wait(), Ok(0));
    }

    #[test]
    fn test_error_mid_stream_ends_call() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = ResponseStreamCall::<(), String, Vec<String>>::new(CallId(3), queue.clone());
        let future = call.future().unwrap();
        let rpc = repeat(vec![
            Ok("R1".to_string()),
            Err(tonic::Status::aborted("estop")),
            Ok("never read".to_string()),
        ]);
        call.start(CallContext::new(), (), rpc, |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::Aborted));
    }

    #[test]
    fn test_open_failure_reaches_callback() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = ResponseStreamCall::<(), String, Vec<String>>::new(CallId(4), queue.clone());
        let future = call.future().unwrap();
        let rpc = transport::server_streaming(|_ctx, _req: ()| async move {
            Err::<futures::stream::Empty<std::result::Result<String, tonic::Status>>, _>(
                tonic::Status::permission_denied("no token"),
            )
        });
        call.start(CallContext::new(), (), rpc, |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::PermissionDenied));
    }

    #[test]
    fn test_stalled_stream_hits_deadline() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = ResponseStreamCall::<(), String, Vec<String>>::new(CallId(5), queue.clone());
        let future = call.future().unwrap();
        let rpc = transport::server_streaming(|_ctx, _req: ()| async move {
            Ok(futures::stream::iter(vec![Ok("R1".to_string())]).chain(futures::stream::pending()))
        });
        let mut context = CallContext::new();
        context.set_timeout(Duration::from_millis(30));
        call.start(context, (), rpc, |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::DeadlineExceeded));
    }
}
