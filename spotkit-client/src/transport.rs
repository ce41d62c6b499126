//! Transport binding functions.
//!
//! A per-service client binds one RPC method of its tonic stub into one of
//! these boxed functions. The engine calls it exactly once per call, with
//! the call's context and request (or request stream):
//!
//! ```rust,ignore
//! let stub = self.stub.clone();
//! let rpc = transport::unary(move |ctx: CallContext, req| {
//!     let mut stub = stub.clone();
//!     async move {
//!         stub.list_service_entries(ctx.into_request(req))
//!             .await
//!             .map(tonic::Response::into_inner)
//!     }
//! });
//! ```

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use tokio_stream::wrappers::ReceiverStream;

use crate::context::CallContext;

/// Requests written by a streaming call, in order, ending at writes-done.
pub type RequestStream<Req> = ReceiverStream<Req>;

/// Responses read by a streaming call.
pub type ResponseStream<Resp> = BoxStream<'static, Result<Resp, tonic::Status>>;

pub type UnaryRpc<Req, Resp> =
    Box<dyn FnOnce(CallContext, Req) -> BoxFuture<'static, Result<Resp, tonic::Status>> + Send>;

pub type ClientStreamingRpc<Req, Resp> = Box<
    dyn FnOnce(CallContext, RequestStream<Req>) -> BoxFuture<'static, Result<Resp, tonic::Status>>
        + Send,
>;

pub type ServerStreamingRpc<Req, Resp> = Box<
    dyn FnOnce(CallContext, Req) -> BoxFuture<'static, Result<ResponseStream<Resp>, tonic::Status>>
        + Send,
>;

pub type BidiStreamingRpc<Req, Resp> = Box<
    dyn FnOnce(
            CallContext,
            RequestStream<Req>,
        ) -> BoxFuture<'static, Result<ResponseStream<Resp>, tonic::Status>>
        + Send,
>;

pub fn unary<Req, Resp, F, Fut>(f: F) -> UnaryRpc<Req, Resp>
where
    F: FnOnce(CallContext, Req) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Resp, tonic::Status>> + Send + 'static,
{
    Box::new(move |ctx, req| f(ctx, req).boxed())
}

pub fn client_streaming<Req, Resp, F, Fut>(f: F) -> ClientStreamingRpc<Req, Resp>
where
    F: FnOnce(CallContext, RequestStream<Req>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Resp, tonic::Status>> + Send + 'static,
{
    Box::new(move |ctx, requests| f(ctx, requests).boxed())
}

pub fn server_streaming<Req, Resp, S, F, Fut>(f: F) -> ServerStreamingRpc<Req, Resp>
where
    F: FnOnce(CallContext, Req) -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, tonic::Status>> + Send + 'static,
    S: Stream<Item = Result<Resp, tonic::Status>> + Send + 'static,
{
    Box::new(move |ctx, req| f(ctx, req).map(|opened| opened.map(|stream| stream.boxed())).boxed())
}

pub fn bidi_streaming<Req, Resp, S, F, Fut>(f: F) -> BidiStreamingRpc<Req, Resp>
where
    F: FnOnce(CallContext, RequestStream<Req>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, tonic::Status>> + Send + 'static,
    S: Stream<Item = Result<Resp, tonic::Status>> + Send + 'static,
{
    Box::new(move |ctx, requests| {
        f(ctx, requests)
            .map(|opened| opened.map(|stream| stream.boxed()))
            .boxed()
    })
}
