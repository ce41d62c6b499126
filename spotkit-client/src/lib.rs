//! # spotkit Client
//!
//! Asynchronous RPC engine shared by every spotkit service client.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     per-service client                          │
//! │         (binds tonic stub methods into transport::*Rpc)          │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ initiate_*_async_call
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │ ServiceClient                                                    │
//! │   RpcParameters ─► RequestProcessorChain ─► MessagePump::create_* │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ start
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │ Call objects (Unary, RequestStream, ResponseStream, Bidi)        │
//! │        │ post                                  ▲ dispatch         │
//! │        ▼                                       │                  │
//! │ CompletionQueue (tokio runtime) ──► MessagePump::complete_one     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every RPC returns an [`RpcFuture`]: `wait()` blocks for the result,
//! `.await` or `shared()` serve async callers.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = ClientConfig::load("/etc/spotkit/client.yaml")?;
//! config.init_logging()?;
//!
//! let pump = Arc::new(MessagePump::with_config(&config)?);
//! pump.auto_update(config.poll_interval())?;
//!
//! let robot_state = RobotStateClient::new(ServiceClient::from_config(pump.clone(), &config), channel);
//! let state = robot_state.get_robot_state(&RpcParameters::default())?;
//!
//! pump.request_shutdown();
//! ```

pub mod call;
pub mod chunking;
pub mod config;
pub mod context;
pub mod error;
pub mod future;
pub mod lease;
pub mod message;
pub mod params;
pub mod processors;
pub mod pump;
pub mod queue;
pub mod service_client;
pub mod tracker;
pub mod transport;

pub use spotkit_proto as proto;

pub use call::{
    CallId, CallKind, CallObject, CallState, RequestResponseStreamCall, RequestStreamCall,
    ResponseStreamCall, UnaryCall,
};
pub use config::{ClientConfig, ConfigError, LogFormat};
pub use context::CallContext;
pub use error::{codes, ErrorDomain, Result, Status};
pub use future::{promise, Promise, RpcFuture};
pub use lease::{process_lease_response, LeaseWallet};
pub use message::{LeaseResponse, RequestMessage, ResponseMessage};
pub use params::{LoggingControl, RpcParameters, DEFAULT_RPC_TIMEOUT};
pub use processors::{
    AuthTokenProcessor, ClientNameProcessor, CommonErrorProcessor, RequestProcessor,
    RequestProcessorChain, ResponseProcessor, ResponseProcessorChain, TimestampProcessor,
    TokenSource,
};
pub use pump::{CompletionStatus, MessagePump};
pub use service_client::ServiceClient;
pub use tracker::OutstandingCallTracker;
