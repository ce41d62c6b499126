//! Per-call client context: deadline and request metadata.

use std::time::{Duration, Instant};
use tonic::metadata::MetadataMap;

/// Context attached to one in-flight RPC.
///
/// The deadline is fixed when the call is initiated; every transport
/// operation of the call fails with `DEADLINE_EXCEEDED` once it passes.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    metadata: MetadataMap,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline `timeout` from now. A zero timeout clears it.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = if timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + timeout)
        };
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// Wrap `message` in a tonic request carrying this context's metadata
    /// and remaining time as the gRPC timeout.
    pub fn into_request<T>(self, message: T) -> tonic::Request<T> {
        let remaining = self.remaining();
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.metadata;
        if let Some(timeout) = remaining {
            request.set_timeout(timeout);
        }
        request
    }
}
