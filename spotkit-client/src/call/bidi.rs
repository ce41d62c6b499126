use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use super::request_stream::{join_finish, write_before};
use super::response_stream::{read_before, Opened, Read, ResponsesCallback};
use super::{
    lock, reject, resolve, sealed, take_payload, with_deadline, Begin, CallId, CallKind,
    CallObject, CallState, Resolver,
};
use crate::context::CallContext;
use crate::error::{Result, Status};
use crate::future::{promise, RpcFuture};
use crate::queue::{CompletionQueue, Payload};
use crate::transport::{BidiStreamingRpc, ResponseStream};

type Open<Resp> = JoinHandle<Option<Opened<Resp>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    WriteRequest,
    CallWritesDone,
    /// Writes-done finished; wait for the response stream.
    OpenStream,
    /// The response stream is available; issue the first read.
    StartRead,
    ContinueReadOrFinish,
    CallCallback,
}

struct Inner<Req, Resp, T> {
    resolver: Resolver<ResponsesCallback<Resp, T>, T>,
    step: Step,
    pending: VecDeque<Req>,
    writer: Option<mpsc::Sender<Req>>,
    open: Option<Open<Resp>>,
    responses: Vec<Resp>,
    deadline: Option<Instant>,
}

/// Many requests, then many responses.
///
/// All requests are written and writes-done is signalled before the first
/// read is issued. A failed write drops the remaining requests and drains the
/// response stream for its final status.
pub struct RequestResponseStreamCall<Req, Resp, T> {
    id: CallId,
    queue: Arc<CompletionQueue>,
    future: Mutex<Option<RpcFuture<T>>>,
    inner: Mutex<Inner<Req, Resp, T>>,
}

impl<Req, Resp, T> RequestResponseStreamCall<Req, Resp, T>
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
                open: None,
                responses: Vec::new(),
                deadline: None,
            }),
        }
    }

    /// Take the future resolved by this call. Available once.
    pub fn future(&self) -> Option<RpcFuture<T>> {
        lock(&self.future).take()
    }

    pub fn start<F>(
        &self,
        context: CallContext,
        requests: Vec<Req>,
        rpc: BidiStreamingRpc<Req, Resp>,
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

            trace!(call_id = %self.id, requests = requests.len(), "Starting bidi stream call");
            let (writer, stream) = mpsc::channel(1);
            let deadline = context.deadline();
            let open = self
                .queue
                .spawn(with_deadline(deadline, rpc(context, ReceiverStream::new(stream))));

            inner.deadline = deadline;
            inner.pending = requests.into();
            inner.writer = Some(writer);
            inner.open = open;
            inner.step = Step::WriteRequest;

            if inner.open.is_some() && self.queue.post(self.id, async { (true, ()) }) {
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
        inner.writer = None;
        inner.step = Step::OpenStream;
        self.post(async { (true, ()) });
    }

    fn open_stream(&self, inner: &mut Inner<Req, Resp, T>) {
        inner.step = Step::StartRead;
        let open = inner.open.take();
        self.post(async move {
            let opened = match open {
                Some(handle) => join_finish(handle).await,
                None => Err(tonic::Status::internal("Stream was never opened")),
            };
            (opened.is_ok(), opened)
        });
    }

    fn read(&self, inner: &mut Inner<Req, Resp, T>, stream: ResponseStream<Resp>) {
        inner.step = Step::ContinueReadOrFinish;
        self.post(read_before(inner.deadline, stream));
    }

    fn finish(&self, inner: &mut Inner<Req, Resp, T>, status: std::result::Result<(), tonic::Status>) {
        inner.step = Step::CallCallback;
        self.post(async move { (true, status) });
    }

    /// A write failed: skip to the final status, discarding unread responses.
    fn abandon_writes(&self, inner: &mut Inner<Req, Resp, T>) {
        debug!(call_id = %self.id, "Write failed, finishing bidi stream");
        inner.writer = None;
        inner.pending.clear();
        inner.step = Step::CallCallback;
        let open = inner.open.take();
        let deadline = inner.deadline;
        self.post(async move {
            let status = match open {
                Some(handle) => match join_finish(handle).await {
                    Ok(stream) => drain(deadline, stream).await,
                    Err(status) => Err(status),
                },
                None => Err(tonic::Status::internal("Stream was never opened")),
            };
            (true, status)
        });
    }

    fn post<F, P>(&self, op: F)
    where
        F: std::future::Future<Output = (bool, P)> + Send + 'static,
        P: std::any::Any + Send,
    {
        if !self.queue.post(self.id, op) {
            warn!(call_id = %self.id, "Bidi stream call stalled by queue shutdown");
        }
    }
}

/// Read `stream` to its end and keep only the final status.
async fn drain<Resp>(
    deadline: Option<Instant>,
    mut stream: ResponseStream<Resp>,
) -> std::result::Result<(), tonic::Status> {
    let rest = async {
        while let Some(item) = stream.next().await {
            item?;
        }
        Ok::<_, tonic::Status>(())
    };
    with_deadline(deadline, rest).await
}

impl<Req, Resp, T> sealed::Sealed for RequestResponseStreamCall<Req, Resp, T> {}

impl<Req, Resp, T> CallObject for RequestResponseStreamCall<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    fn id(&self) -> CallId {
        self.id
    }

    fn kind(&self) -> CallKind {
        CallKind::RequestResponseStream
    }

    fn state(&self) -> CallState {
        lock(&self.inner).resolver.state()
    }

    fn cancel(&self) {
        let promise = {
            let mut inner = lock(&self.inner);
            inner.writer = None;
            inner.pending.clear();
            inner.responses.clear();
            inner.resolver.cancel()
        };
        if let Some(promise) = promise {
            debug!(call_id = %self.id, "Bidi stream call cancelled");
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
                    self.abandon_writes(&mut inner);
                }
                false
            }
            Step::CallWritesDone => {
                if ok {
                    self.writes_done(&mut inner);
                } else {
                    self.abandon_writes(&mut inner);
                }
                false
            }
            Step::OpenStream => {
                self.open_stream(&mut inner);
                false
            }
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
                    Ok(Read { item: None, .. }) => self.finish(&mut inner, Ok(())),
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

    /// Answers every request with its uppercase form once the client is done writing.
    fn shout() -> BidiStreamingRpc<String, String> {
        transport::bidi_streaming(|_ctx, requests: transport::RequestStream<String>| async move {
            let received: Vec<String> = requests.collect().await;
            Ok(futures::stream::iter(
                received.into_iter().map(|r| Ok(r.to_uppercase())),
            ))
        })
    }

    #[test]
    fn test_write_phase_then_read_phase() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestResponseStreamCall::<String, String, Vec<String>>::new(CallId(1), queue.clone());
        let future = call.future().unwrap();
        let requests = vec!["arm".to_string(), "legs".to_string()];
        call.start(CallContext::new(), requests, shout(), |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(future.wait(), Ok(vec!["ARM".to_string(), "LEGS".to_string()]));
    }

    #[test]
    fn test_no_requests() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestResponseStreamCall::<String, String, usize>::new(CallId(2), queue.clone());
        let future = call.future().unwrap();
        call.start(CallContext::new(), Vec::new(), shout(), |o| {
            Ok(o.map_err(Status::from)?.len())
        })
        .unwrap();

        pump(&queue, &call);
        assert_eq!(future.wait(), Ok(0));
    }

    #[test]
    fn test_write_failure_reports_final_status() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestResponseStreamCall::<String, String, Vec<String>>::new(CallId(3), queue.clone());
        let future = call.future().unwrap();
        let rpc = transport::bidi_streaming(|_ctx, requests: transport::RequestStream<String>| async move {
            drop(requests);
            Ok(futures::stream::iter(vec![
                Ok("partial".to_string()),
                Err(tonic::Status::resource_exhausted("stream closed by server")),
            ]))
        });
        let requests = (0..16).map(|i| i.to_string()).collect();
        call.start(CallContext::new(), requests, rpc, |o| o.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::ResourceExhausted));
    }

    #[test]
    fn test_cancel_before_start_then_start_reaps() {
        let queue = Arc::new(CompletionQueue::new(1).unwrap());
        let call = RequestResponseStreamCall::<String, String, Vec<String>>::new(CallId(4), queue.clone());
        let future = call.future().unwrap();
        call.cancel();
        call.cancel();
        call.start(CallContext::new(), vec!["x".to_string()], shout(), |o| {
            o.map_err(Status::from)
        })
        .unwrap();

        pump(&queue, &call);
        assert_eq!(call.state(), CallState::Cancelled);
        assert!(future.wait().unwrap_err().is_cancelled());
    }
}
