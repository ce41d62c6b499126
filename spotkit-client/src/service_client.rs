//! Base for per-service clients.
//!
//! A generated service client wraps a [`ServiceClient`] and binds each RPC of
//! its tonic stub into one of the `initiate_*` operations:
//!
//! ```rust,ignore
//! pub fn list_entries_async(&self, request: ListEntriesRequest, params: &RpcParameters)
//!     -> RpcFuture<Vec<Entry>>
//! {
//!     let stub = self.stub.clone();
//!     let rpc = transport::unary(move |ctx, req| {
//!         let mut stub = stub.clone();
//!         async move { stub.list_entries(ctx.into_request(req)).await.map(|r| r.into_inner()) }
//!     });
//!     self.base.initiate_async_call(request, rpc, |resp: ListEntriesResponse| Ok(resp.entries), params)
//! }
//!
//! pub fn list_entries(&self, request: ListEntriesRequest, params: &RpcParameters)
//!     -> Result<Vec<Entry>>
//! {
//!     self.list_entries_async(request, params).wait()
//! }
//! ```
//!
//! Every operation runs the same pipeline:
//!
//! 1. Combine the client defaults with the per-call [`RpcParameters`], apply
//!    the logging control to the request header and set the deadline.
//! 2. Run the request processor chain. A failure resolves the future at once
//!    and nothing is sent.
//! 3. Create the call on the pump and start it.
//! 4. On completion: transport status, then the response processor chain,
//!    then lease handling where applicable, then the handler.

use std::sync::Arc;

use spotkit_proto::{DataChunk, RequestHeader, ResponseHeader};
use tracing::debug;

use crate::chunking::{self, DEFAULT_CHUNK_SIZE};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::error::{codes, Result, Status};
use crate::future::RpcFuture;
use crate::lease::{process_lease_response, LeaseWallet};
use crate::message::{LeaseResponse, RequestMessage, ResponseMessage};
use crate::params::RpcParameters;
use crate::processors::{RequestProcessorChain, ResponseProcessorChain};
use crate::pump::MessagePump;
use crate::transport::{BidiStreamingRpc, ClientStreamingRpc, ServerStreamingRpc, UnaryRpc};

#[derive(Clone)]
pub struct ServiceClient {
    pump: Arc<MessagePump>,
    defaults: RpcParameters,
    request_processors: Arc<RequestProcessorChain>,
    response_processors: Arc<ResponseProcessorChain>,
    lease_wallet: Option<Arc<dyn LeaseWallet>>,
    chunk_size: usize,
}

impl ServiceClient {
    /// Client with empty processor chains.
    pub fn new(pump: Arc<MessagePump>, defaults: RpcParameters) -> Self {
        Self {
            pump,
            defaults,
            request_processors: Arc::new(RequestProcessorChain::new()),
            response_processors: Arc::new(ResponseProcessorChain::new()),
            lease_wallet: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Client with the default processor chains and the configured defaults.
    pub fn from_config(pump: Arc<MessagePump>, config: &ClientConfig) -> Self {
        let client_name = config.effective_client_name();
        debug!(client_name = %client_name, "Creating service client");
        Self {
            pump,
            defaults: config.rpc_parameters(),
            request_processors: Arc::new(RequestProcessorChain::with_defaults(client_name)),
            response_processors: Arc::new(ResponseProcessorChain::with_defaults()),
            lease_wallet: None,
            chunk_size: config.chunk_size,
        }
    }

    pub fn with_lease_wallet(mut self, wallet: Arc<dyn LeaseWallet>) -> Self {
        self.lease_wallet = Some(wallet);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn pump(&self) -> &Arc<MessagePump> {
        &self.pump
    }

    pub fn defaults(&self) -> RpcParameters {
        self.defaults
    }

    pub fn set_defaults(&mut self, defaults: RpcParameters) {
        self.defaults = defaults;
    }

    /// Request chain of this client. Clones the chain if it is shared.
    pub fn request_processors_mut(&mut self) -> &mut RequestProcessorChain {
        Arc::make_mut(&mut self.request_processors)
    }

    /// Response chain of this client. Clones the chain if it is shared.
    pub fn response_processors_mut(&mut self) -> &mut ResponseProcessorChain {
        Arc::make_mut(&mut self.response_processors)
    }

    /// Steps 1 and 2 of the pipeline, for every request of the call.
    ///
    /// A call without requests still runs the chain once, against a scratch
    /// header, so context-level processors (auth) can reject it.
    fn prepare_call<Req: RequestMessage>(
        &self,
        requests: &mut [Req],
        parameters: &RpcParameters,
    ) -> Result<CallContext> {
        let effective = self.defaults.combine(parameters);
        let mut context = CallContext::new();
        context.set_timeout(effective.timeout);

        if requests.is_empty() {
            let mut header = RequestHeader::default();
            effective.apply_logging_control(&mut header);
            if let Err(status) = self.request_processors.process(&mut context, &mut header, &()) {
                debug!(error = %status, "Call rejected before sending");
                return Err(status);
            }
            return Ok(context);
        }

        for request in requests.iter_mut() {
            let mut header = request.header_mut().take().unwrap_or_default();
            effective.apply_logging_control(&mut header);
            let processed = self
                .request_processors
                .process(&mut context, &mut header, &*request);
            *request.header_mut() = Some(header);
            if let Err(status) = processed {
                debug!(error = %status, "Request rejected before sending");
                return Err(status);
            }
        }
        Ok(context)
    }

    /// Single request, single response.
    pub fn initiate_async_call<Req, Resp, T, H>(
        &self,
        mut request: Req,
        rpc: UnaryRpc<Req, Resp>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
        T: Send + 'static,
        H: FnOnce(Resp) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(std::slice::from_mut(&mut request), parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let Some(call) = self.pump.create_unary_call::<Req, Resp, T>() else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let future = call.future();
        let started = call.start(context, request, rpc, move |outcome| {
            let response = outcome?;
            check_response(&chain, &response)?;
            handler(response)
        });
        issued(future, started)
    }

    /// Unary call whose response reports lease use.
    pub fn initiate_leased_async_call<Req, Resp, T, H>(
        &self,
        mut request: Req,
        rpc: UnaryRpc<Req, Resp>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: LeaseResponse,
        T: Send + 'static,
        H: FnOnce(Resp) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(std::slice::from_mut(&mut request), parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let Some(call) = self.pump.create_unary_call::<Req, Resp, T>() else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let wallet = self.lease_wallet.clone();
        let future = call.future();
        let started = call.start(context, request, rpc, move |outcome| {
            let response = outcome?;
            check_response(&chain, &response)?;
            process_lease_response(&response, wallet.as_deref())?;
            handler(response)
        });
        issued(future, started)
    }

    /// Many requests, single response.
    pub fn initiate_request_stream_async_call<Req, Resp, T, H>(
        &self,
        mut requests: Vec<Req>,
        rpc: ClientStreamingRpc<Req, Resp>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
        T: Send + 'static,
        H: FnOnce(Resp) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(&mut requests, parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let Some(call) = self.pump.create_request_stream_call::<Req, Resp, T>() else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let future = call.future();
        let started = call.start(context, requests, rpc, move |outcome| {
            let response = outcome?;
            check_response(&chain, &response)?;
            handler(response)
        });
        issued(future, started)
    }

    /// Single request, many responses.
    pub fn initiate_response_stream_async_call<Req, Resp, T, H>(
        &self,
        mut request: Req,
        rpc: ServerStreamingRpc<Req, Resp>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
        T: Send + 'static,
        H: FnOnce(Vec<Resp>) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(std::slice::from_mut(&mut request), parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let Some(call) = self.pump.create_response_stream_call::<Req, Resp, T>() else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let future = call.future();
        let started = call.start(context, request, rpc, move |outcome| {
            let responses = outcome?;
            for response in &responses {
                check_response(&chain, response)?;
            }
            handler(responses)
        });
        issued(future, started)
    }

    /// Many requests, then many responses.
    pub fn initiate_bidi_stream_async_call<Req, Resp, T, H>(
        &self,
        mut requests: Vec<Req>,
        rpc: BidiStreamingRpc<Req, Resp>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
        T: Send + 'static,
        H: FnOnce(Vec<Resp>) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(&mut requests, parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let Some(call) = self.pump.create_request_response_stream_call::<Req, Resp, T>() else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let future = call.future();
        let started = call.start(context, requests, rpc, move |outcome| {
            let responses = outcome?;
            for response in &responses {
                check_response(&chain, response)?;
            }
            handler(responses)
        });
        issued(future, started)
    }

    /// Typed request sent as chunks, typed response.
    pub fn initiate_request_stream_chunked_async_call<Req, Resp, T, H>(
        &self,
        mut request: Req,
        rpc: ClientStreamingRpc<DataChunk, Resp>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
        T: Send + 'static,
        H: FnOnce(Resp) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(std::slice::from_mut(&mut request), parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let chunks = chunking::encode_with_chunk_size(&request, self.chunk_size);
        let Some(call) = self.pump.create_request_stream_call::<DataChunk, Resp, T>() else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let future = call.future();
        let started = call.start(context, chunks, rpc, move |outcome| {
            let response = outcome?;
            check_response(&chain, &response)?;
            handler(response)
        });
        issued(future, started)
    }

    /// Typed request, chunked response reassembled into a typed message.
    pub fn initiate_response_stream_chunked_async_call<Req, Resp, T, H>(
        &self,
        mut request: Req,
        rpc: ServerStreamingRpc<Req, DataChunk>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
        T: Send + 'static,
        H: FnOnce(Resp) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(std::slice::from_mut(&mut request), parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let Some(call) = self.pump.create_response_stream_call::<Req, DataChunk, T>() else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let future = call.future();
        let started = call.start(context, request, rpc, move |outcome| {
            let response: Resp = reassemble(outcome?)?;
            check_response(&chain, &response)?;
            handler(response)
        });
        issued(future, started)
    }

    /// Typed request sent as chunks, chunked response reassembled.
    pub fn initiate_bidi_stream_chunked_async_call<Req, Resp, T, H>(
        &self,
        mut request: Req,
        rpc: BidiStreamingRpc<DataChunk, DataChunk>,
        handler: H,
        parameters: &RpcParameters,
    ) -> RpcFuture<T>
    where
        Req: RequestMessage,
        Resp: ResponseMessage,
        T: Send + 'static,
        H: FnOnce(Resp) -> Result<T> + Send + 'static,
    {
        let context = match self.prepare_call(std::slice::from_mut(&mut request), parameters) {
            Ok(context) => context,
            Err(status) => return RpcFuture::ready(Err(status)),
        };
        let chunks = chunking::encode_with_chunk_size(&request, self.chunk_size);
        let Some(call) = self
            .pump
            .create_request_response_stream_call::<DataChunk, DataChunk, T>()
        else {
            return not_issued();
        };

        let chain = self.response_processors.clone();
        let future = call.future();
        let started = call.start(context, chunks, rpc, move |outcome| {
            let response: Resp = reassemble(outcome?)?;
            check_response(&chain, &response)?;
            handler(response)
        });
        issued(future, started)
    }
}

/// Run the response chain on one successfully received response.
fn check_response<Resp: ResponseMessage>(
    chain: &ResponseProcessorChain,
    response: &Resp,
) -> Result<()> {
    let missing = ResponseHeader::default();
    let header = response.header().unwrap_or(&missing);
    chain.process(&tonic::Status::new(tonic::Code::Ok, ""), header, response)
}

/// An empty chunk stream decodes to the default message.
fn reassemble<Resp: ResponseMessage>(chunks: Vec<DataChunk>) -> Result<Resp> {
    chunking::decode_message(&chunks)
}

fn not_issued<T>() -> RpcFuture<T> {
    debug!("Call not issued, message pump is shut down");
    RpcFuture::ready(Err(Status::shutdown()))
}

fn issued<T>(future: Option<RpcFuture<T>>, started: Result<()>) -> RpcFuture<T> {
    match (future, started) {
        (_, Err(status)) => RpcFuture::ready(Err(status)),
        (Some(future), Ok(())) => future,
        (None, Ok(())) => RpcFuture::ready(Err(Status::client(
            codes::client::INTERNAL,
            "Call future was already taken",
        ))),
    }
}
