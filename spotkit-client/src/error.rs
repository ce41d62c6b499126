//! # Status and error codes
//!
//! Every RPC-issuing operation resolves to [`Result<T>`]. A failure is a
//! [`Status`]: an error domain, a numeric code within that domain and a
//! human-readable message.
//!
//! ## Error Domains
//!
//! | Domain           | Raised by                                              |
//! |------------------|--------------------------------------------------------|
//! | `Transport`      | gRPC status of the call (deadline, connection lost)    |
//! | `Request`        | a request processor, before anything is sent           |
//! | `ResponseHeader` | a response processor (header error code)               |
//! | `Lease`          | lease use result attached to a response                |
//! | `Chunking`       | chunk reassembly (size mismatch, parse failure)        |
//! | `Client`         | local cancellation, shutdown, misuse of a call object  |
//!
//! Transport codes are the gRPC status code numbers; the other domains use
//! the constants in [`codes`].

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for all RPC-issuing operations.
pub type Result<T> = std::result::Result<T, Status>;

/// Error domain of a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Transport,
    Request,
    ResponseHeader,
    Lease,
    Chunking,
    Client,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::Transport => write!(f, "transport"),
            ErrorDomain::Request => write!(f, "request"),
            ErrorDomain::ResponseHeader => write!(f, "response_header"),
            ErrorDomain::Lease => write!(f, "lease"),
            ErrorDomain::Chunking => write!(f, "chunking"),
            ErrorDomain::Client => write!(f, "client"),
        }
    }
}

/// A failed outcome anywhere in the call pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{domain} error {code}: {message}")]
pub struct Status {
    domain: ErrorDomain,
    code: i32,
    message: String,
}

impl Status {
    pub fn new(domain: ErrorDomain, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
        }
    }

    pub fn domain(&self) -> ErrorDomain {
        self.domain
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this status is the given domain/code pair.
    pub fn is(&self, domain: ErrorDomain, code: i32) -> bool {
        self.domain == domain && self.code == code
    }

    pub fn transport(code: tonic::Code, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Transport, code as i32, message)
    }

    pub fn request(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Request, code, message)
    }

    pub fn chunking(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Chunking, code, message)
    }

    pub fn client(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Client, code, message)
    }

    /// The call was cancelled locally before it produced a result.
    pub fn cancelled() -> Self {
        Self::client(codes::client::CANCELLED, "Call was cancelled by the client")
    }

    /// The message pump was shut down before the call could be issued.
    pub fn shutdown() -> Self {
        Self::client(
            codes::client::SHUTDOWN,
            "Message pump is shut down, call was not issued",
        )
    }

    /// True for locally produced cancellations (explicit or shutdown).
    pub fn is_cancelled(&self) -> bool {
        self.is(ErrorDomain::Client, codes::client::CANCELLED)
            || self.is(ErrorDomain::Client, codes::client::SHUTDOWN)
    }

    /// The gRPC code when this is a transport failure.
    pub fn transport_code(&self) -> Option<tonic::Code> {
        match self.domain {
            ErrorDomain::Transport => Some(tonic::Code::from_i32(self.code)),
            _ => None,
        }
    }
}

impl From<tonic::Status> for Status {
    fn from(status: tonic::Status) -> Self {
        Self::transport(status.code(), status.message())
    }
}

// ============================================================================
// Error Code Constants
// ============================================================================

pub mod codes {
    /// Request processor failures
    pub mod request {
        pub const MISSING_CLIENT_NAME: i32 = 1;
        pub const MISSING_AUTH_TOKEN: i32 = 2;
        pub const INVALID_AUTH_TOKEN: i32 = 3;
        pub const INVALID_REQUEST: i32 = 4;
    }

    /// Chunked transport failures
    pub mod chunking {
        pub const SIZE_MISMATCH: i32 = 1;
        pub const INCONSISTENT_TOTAL_SIZE: i32 = 2;
        pub const PARSE_FAILED: i32 = 3;
    }

    /// Locally produced failures
    pub mod client {
        pub const CANCELLED: i32 = 1;
        pub const SHUTDOWN: i32 = 2;
        pub const ALREADY_STARTED: i32 = 3;
        pub const PROMISE_DROPPED: i32 = 4;
        pub const CALLBACK_PANICKED: i32 = 5;
        pub const INTERNAL: i32 = 6;
    }
}
