//! Built-in request processors.

use std::any::Any;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use spotkit_proto::RequestHeader;
use tonic::metadata::{Ascii, MetadataValue};
use tracing::trace;

use super::RequestProcessor;
use crate::context::CallContext;
use crate::error::{codes, Result, Status};

/// Fills in the client name when the request does not carry one.
#[derive(Debug, Clone)]
pub struct ClientNameProcessor {
    client_name: String,
}

impl ClientNameProcessor {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl RequestProcessor for ClientNameProcessor {
    fn process(&self, _: &mut CallContext, header: &mut RequestHeader, _: &dyn Any) -> Result<()> {
        if !header.client_name.is_empty() {
            return Ok(());
        }
        if self.client_name.is_empty() {
            return Err(Status::request(
                codes::request::MISSING_CLIENT_NAME,
                "Request has no client name and none is configured",
            ));
        }
        header.client_name = self.client_name.clone();
        Ok(())
    }
}

/// Stamps the request with the current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampProcessor;

impl RequestProcessor for TimestampProcessor {
    fn process(&self, _: &mut CallContext, header: &mut RequestHeader, _: &dyn Any) -> Result<()> {
        header.request_timestamp = Some(prost_types::Timestamp::from(SystemTime::now()));
        Ok(())
    }
}

/// Shared, refreshable slot holding the current auth token.
///
/// Clones share the slot, so a token refreshed through one handle is seen
/// by every client using another.
#[derive(Debug, Clone, Default)]
pub struct TokenSource {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let source = Self::new();
        source.set(token);
        source
    }

    pub fn set(&self, token: impl Into<String>) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token.into());
    }

    pub fn clear(&self) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Attaches `authorization: Bearer <token>` metadata to every request.
#[derive(Debug, Clone)]
pub struct AuthTokenProcessor {
    source: TokenSource,
}

impl AuthTokenProcessor {
    pub fn new(source: TokenSource) -> Self {
        Self { source }
    }
}

impl RequestProcessor for AuthTokenProcessor {
    fn process(&self, context: &mut CallContext, _: &mut RequestHeader, _: &dyn Any) -> Result<()> {
        let token = self.source.get().ok_or_else(|| {
            Status::request(
                codes::request::MISSING_AUTH_TOKEN,
                "No auth token available, authenticate first",
            )
        })?;

        let value: MetadataValue<Ascii> = format!("Bearer {}", token).parse().map_err(|_| {
            Status::request(
                codes::request::INVALID_AUTH_TOKEN,
                "Auth token is not valid request metadata",
            )
        })?;

        context.metadata_mut().insert("authorization", value);
        trace!("Attached auth token to request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDomain;

    #[test]
    fn test_client_name_filled_when_empty() {
        let processor = ClientNameProcessor::new("robot-ui");
        let mut header = RequestHeader::default();
        processor.process(&mut CallContext::new(), &mut header, &()).unwrap();
        assert_eq!(header.client_name, "robot-ui");

        // An explicit name on the request is kept.
        header.client_name = "explicit".to_string();
        processor.process(&mut CallContext::new(), &mut header, &()).unwrap();
        assert_eq!(header.client_name, "explicit");
    }

    #[test]
    fn test_client_name_missing() {
        let processor = ClientNameProcessor::new("");
        let err = processor
            .process(&mut CallContext::new(), &mut RequestHeader::default(), &())
            .unwrap_err();
        assert!(err.is(ErrorDomain::Request, codes::request::MISSING_CLIENT_NAME));
    }

    #[test]
    fn test_timestamp_set() {
        let mut header = RequestHeader::default();
        TimestampProcessor.process(&mut CallContext::new(), &mut header, &()).unwrap();
        assert!(header.request_timestamp.unwrap().seconds > 0);
    }

    #[test]
    fn test_auth_token() {
        let source = TokenSource::new();
        let processor = AuthTokenProcessor::new(source.clone());

        let err = processor
            .process(&mut CallContext::new(), &mut RequestHeader::default(), &())
            .unwrap_err();
        assert!(err.is(ErrorDomain::Request, codes::request::MISSING_AUTH_TOKEN));

        source.set("abc123");
        let mut ctx = CallContext::new();
        processor.process(&mut ctx, &mut RequestHeader::default(), &()).unwrap();
        assert_eq!(ctx.metadata().get("authorization").unwrap(), "Bearer abc123");

        source.set("bad\ntoken");
        let err = processor
            .process(&mut CallContext::new(), &mut RequestHeader::default(), &())
            .unwrap_err();
        assert!(err.is(ErrorDomain::Request, codes::request::INVALID_AUTH_TOKEN));
    }
}
