//! Per-client and per-call RPC parameters.

use serde::{Deserialize, Serialize};
use spotkit_proto::RequestHeader;
use std::time::Duration;

/// Default timeout for RPCs issued by a client that does not configure one.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Sentinel meaning "timeout not specified": the client default applies.
/// A zero timeout on the effective parameters means "no deadline".
pub const TIMEOUT_NOT_SPECIFIED: Duration = Duration::ZERO;

/// Whether the server is asked to log an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingControl {
    /// Leave the request header untouched.
    #[default]
    Default,
    Enabled,
    Disabled,
}

/// Timeout and logging behavior for an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcParameters {
    pub timeout: Duration,
    pub logging_control: LoggingControl,
}

impl Default for RpcParameters {
    /// Nothing specified: every field defers to the client-level value.
    fn default() -> Self {
        Self {
            timeout: TIMEOUT_NOT_SPECIFIED,
            logging_control: LoggingControl::Default,
        }
    }
}

impl RpcParameters {
    pub fn new(timeout: Duration, logging_control: LoggingControl) -> Self {
        Self {
            timeout,
            logging_control,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_logging(logging_control: LoggingControl) -> Self {
        Self {
            logging_control,
            ..Self::default()
        }
    }

    /// Combine client-level defaults (`self`) with per-call overrides.
    ///
    /// Any field the call sets explicitly wins; unset fields keep the
    /// client-level value.
    pub fn combine(&self, call: &RpcParameters) -> RpcParameters {
        RpcParameters {
            timeout: if call.timeout != TIMEOUT_NOT_SPECIFIED {
                call.timeout
            } else {
                self.timeout
            },
            logging_control: match call.logging_control {
                LoggingControl::Default => self.logging_control,
                explicit => explicit,
            },
        }
    }

    /// Apply the logging flag to an outgoing request header.
    pub fn apply_logging_control(&self, header: &mut RequestHeader) {
        match self.logging_control {
            LoggingControl::Default => {}
            LoggingControl::Enabled => header.disable_rpc_logging = false,
            LoggingControl::Disabled => header.disable_rpc_logging = true,
        }
    }
}
