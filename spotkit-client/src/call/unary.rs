use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use super::{
    lock, reject, resolve, sealed, take_payload, with_deadline, Begin, CallId, CallKind,
    CallObject, CallState, Resolver,
};
use crate::context::CallContext;
use crate::error::{Result, Status};
use crate::future::{promise, Promise, RpcFuture};
use crate::queue::{CompletionQueue, Payload};
use crate::transport::UnaryRpc;

/// Invoked once with the transport outcome of a single-response call.
pub type ResponseCallback<Resp, T> =
    Box<dyn FnOnce(std::result::Result<Resp, tonic::Status>) -> Result<T> + Send>;

/// One request, one response.
///
/// Issues the RPC and, when its completion arrives, runs the callback with
/// the response or the transport error.
pub struct UnaryCall<Req, Resp, T> {
    id: CallId,
    queue: Arc<CompletionQueue>,
    future: Mutex<Option<RpcFuture<T>>>,
    inner: Mutex<Resolver<ResponseCallback<Resp, T>, T>>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Resp, T> UnaryCall<Req, Resp, T>
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
            inner: Mutex::new(Resolver::new(promise)),
            _request: PhantomData,
        }
    }

    /// Take the future resolved by this call. Available once.
    pub fn future(&self) -> Option<RpcFuture<T>> {
        lock(&self.future).take()
    }

    /// Send `request` through `rpc`.
    ///
    /// Fails with `ALREADY_STARTED` if the call was started before. Starting
    /// a cancelled call only lets the pump release it.
    pub fn start<F>(
        &self,
        context: CallContext,
        request: Req,
        rpc: UnaryRpc<Req, Resp>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(std::result::Result<Resp, tonic::Status>) -> Result<T> + Send + 'static,
    {
        let failed = {
            let mut inner = lock(&self.inner);
            match inner.begin(self.id, Box::new(callback))? {
                Begin::Reap => {
                    self.queue.post(self.id, async { (false, ()) });
                    return Ok(());
                }
                Begin::Started => {}
            }

            trace!(call_id = %self.id, "Starting unary call");
            let deadline = context.deadline();
            let op = with_deadline(deadline, rpc(context, request));
            let posted = self.queue.post(self.id, async move {
                let outcome = op.await;
                (outcome.is_ok(), outcome)
            });

            if posted {
                None
            } else {
                inner.fail(Status::shutdown())
            }
        };

        if let Some((promise, status)) = failed {
            reject(self.id, promise, status);
        }
        Ok(())
    }

    fn take_completion(&self) -> Option<(ResponseCallback<Resp, T>, Promise<T>)> {
        let mut inner = lock(&self.inner);
        if inner.is_cancelled() {
            return None;
        }
        inner.complete()
    }
}

impl<Req, Resp, T> sealed::Sealed for UnaryCall<Req, Resp, T> {}

impl<Req, Resp, T> CallObject for UnaryCall<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    fn id(&self) -> CallId {
        self.id
    }

    fn kind(&self) -> CallKind {
        CallKind::Unary
    }

    fn state(&self) -> CallState {
        lock(&self.inner).state()
    }

    fn cancel(&self) {
        let promise = lock(&self.inner).cancel();
        if let Some(promise) = promise {
            debug!(call_id = %self.id, "Unary call cancelled");
            reject(self.id, promise, Status::cancelled());
        }
    }

    fn on_completion_queue_event(&self, _ok: bool, payload: Payload) -> bool {
        // Cancelled calls (and reap events) are simply released.
        let Some((callback, promise)) = self.take_completion() else {
            return true;
        };

        let outcome = take_payload::<std::result::Result<Resp, tonic::Status>>(self.id, payload)
            .and_then(|outcome| outcome);
        resolve(self.id, promise, move || callback(outcome));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{codes, ErrorDomain};
    use crate::queue::QueueEvent;
    use crate::transport;
    use std::time::Duration;

    fn queue() -> Arc<CompletionQueue> {
        Arc::new(CompletionQueue::new(1).unwrap())
    }

    /// Feed the call its completions until it asks to be released.
    fn pump(queue: &CompletionQueue, call: &dyn CallObject) {
        loop {
            match queue.next(Duration::from_secs(5)) {
                QueueEvent::Ready(completion) => {
                    assert_eq!(completion.tag, call.id());
                    if call.on_completion_queue_event(completion.ok, completion.payload) {
                        return;
                    }
                }
                other => panic!("queue stalled: {:?}", other),
            }
        }
    }

    fn echo() -> UnaryRpc<String, String> {
        transport::unary(|_ctx, req: String| async move { Ok(format!("echo {}", req)) })
    }

    #[test]
    fn test_unary_success() {
        let queue = queue();
        let call = UnaryCall::<String, String, usize>::new(CallId(1), queue.clone());
        let future = call.future().unwrap();
        call.start(CallContext::new(), "ping".into(), echo(), |outcome| {
            Ok(outcome.map_err(Status::from)?.len())
        })
        .unwrap();
        assert_eq!(call.state(), CallState::Called);

        pump(&queue, &call);
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(future.wait(), Ok("echo ping".len()));
    }

    #[test]
    fn test_transport_error_reaches_callback() {
        let queue = queue();
        let call = UnaryCall::<String, String, String>::new(CallId(2), queue.clone());
        let future = call.future().unwrap();
        let rpc = transport::unary(|_ctx, _req: String| async move {
            Err::<String, _>(tonic::Status::unavailable("robot unreachable"))
        });
        call.start(CallContext::new(), "ping".into(), rpc, |outcome| {
            outcome.map_err(Status::from)
        })
        .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::Unavailable));
    }

    #[test]
    fn test_deadline_exceeded() {
        let queue = queue();
        let call = UnaryCall::<String, String, String>::new(CallId(3), queue.clone());
        let future = call.future().unwrap();
        let rpc = transport::unary(|_ctx, req: String| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(req)
        });
        let mut context = CallContext::new();
        context.set_timeout(Duration::from_millis(20));
        call.start(context, "slow".into(), rpc, |outcome| outcome.map_err(Status::from))
            .unwrap();

        pump(&queue, &call);
        let err = future.wait().unwrap_err();
        assert_eq!(err.transport_code(), Some(tonic::Code::DeadlineExceeded));
    }

    #[test]
    fn test_double_start_rejected() {
        let queue = queue();
        let call = UnaryCall::<String, String, String>::new(CallId(4), queue.clone());
        let _future = call.future().unwrap();
        call.start(CallContext::new(), "a".into(), echo(), |o| o.map_err(Status::from))
            .unwrap();
        let err = call
            .start(CallContext::new(), "b".into(), echo(), |o| o.map_err(Status::from))
            .unwrap_err();
        assert!(err.is(ErrorDomain::Client, codes::client::ALREADY_STARTED));
    }

    #[test]
    fn test_cancel_while_running_skips_callback() {
        let queue = queue();
        let call = UnaryCall::<String, String, String>::new(CallId(5), queue.clone());
        let future = call.future().unwrap();
        call.start(CallContext::new(), "a".into(), echo(), |_| {
            panic!("callback must not run after cancel")
        })
        .unwrap();
        call.cancel();
        assert_eq!(call.state(), CallState::Cancelled);

        pump(&queue, &call);
        assert!(future.wait().unwrap_err().is_cancelled());
        assert_eq!(call.state(), CallState::Cancelled);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let queue = queue();
        let call = UnaryCall::<String, String, String>::new(CallId(6), queue.clone());
        let future = call.future().unwrap();
        call.start(CallContext::new(), "a".into(), echo(), |o| o.map_err(Status::from))
            .unwrap();
        pump(&queue, &call);
        call.cancel();
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(future.wait(), Ok("echo a".to_string()));
    }

    #[test]
    fn test_start_after_cancel_posts_reap() {
        let queue = queue();
        let call = UnaryCall::<String, String, String>::new(CallId(7), queue.clone());
        let future = call.future().unwrap();
        call.cancel();
        call.start(CallContext::new(), "a".into(), echo(), |o| o.map_err(Status::from))
            .unwrap();
        pump(&queue, &call);
        assert!(future.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_start_after_queue_shutdown_fails_promise() {
        let queue = queue();
        let call = UnaryCall::<String, String, String>::new(CallId(8), queue.clone());
        let future = call.future().unwrap();
        queue.shutdown();
        call.start(CallContext::new(), "a".into(), echo(), |o| o.map_err(Status::from))
            .unwrap();
        let err = future.wait().unwrap_err();
        assert!(err.is(ErrorDomain::Client, codes::client::SHUTDOWN));
        assert_eq!(call.state(), CallState::Completed);
    }
}
