//! Request and response processor chains.
//!
//! A chain runs its processors in the order they were assembled and stops
//! at the first failure. A failing request chain means the request is never
//! sent; a failing response chain decides the final status of a call whose
//! transport status was already OK.

mod request;
mod response;

pub use request::{AuthTokenProcessor, ClientNameProcessor, TimestampProcessor, TokenSource};
pub use response::CommonErrorProcessor;

use std::any::Any;
use std::sync::Arc;

use spotkit_proto::{RequestHeader, ResponseHeader};

use crate::context::CallContext;
use crate::error::Result;

/// Hook applied to every outgoing request before it is sent.
pub trait RequestProcessor: Send + Sync {
    /// `request` is the full typed request, available for downcasting.
    fn process(
        &self,
        context: &mut CallContext,
        header: &mut RequestHeader,
        request: &dyn Any,
    ) -> Result<()>;
}

/// Hook applied to every incoming response after a successful transport status.
pub trait ResponseProcessor: Send + Sync {
    fn process(
        &self,
        status: &tonic::Status,
        header: &ResponseHeader,
        response: &dyn Any,
    ) -> Result<()>;
}

/// Ordered list of request processors.
#[derive(Clone, Default)]
pub struct RequestProcessorChain {
    processors: Vec<Arc<dyn RequestProcessor>>,
}

impl RequestProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client name injection followed by timestamp injection.
    pub fn with_defaults(client_name: impl Into<String>) -> Self {
        let mut chain = Self::new();
        chain.append_processor(Arc::new(ClientNameProcessor::new(client_name)));
        chain.append_processor(Arc::new(TimestampProcessor));
        chain
    }

    pub fn append_processor(&mut self, processor: Arc<dyn RequestProcessor>) {
        self.processors.push(processor);
    }

    pub fn prepend_processor(&mut self, processor: Arc<dyn RequestProcessor>) {
        self.processors.insert(0, processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn process(
        &self,
        context: &mut CallContext,
        header: &mut RequestHeader,
        request: &dyn Any,
    ) -> Result<()> {
        for processor in &self.processors {
            processor.process(context, header, request)?;
        }
        Ok(())
    }
}

/// Ordered list of response processors.
#[derive(Clone, Default)]
pub struct ResponseProcessorChain {
    processors: Vec<Arc<dyn ResponseProcessor>>,
}

impl ResponseProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header error-code check.
    pub fn with_defaults() -> Self {
        let mut chain = Self::new();
        chain.append_processor(Arc::new(CommonErrorProcessor));
        chain
    }

    pub fn append_processor(&mut self, processor: Arc<dyn ResponseProcessor>) {
        self.processors.push(processor);
    }

    pub fn prepend_processor(&mut self, processor: Arc<dyn ResponseProcessor>) {
        self.processors.insert(0, processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn process(
        &self,
        status: &tonic::Status,
        header: &ResponseHeader,
        response: &dyn Any,
    ) -> Result<()> {
        for processor in &self.processors {
            processor.process(status, header, response)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorDomain, Status};
    use std::sync::Mutex;

    /// Records its label when run, optionally failing.
    struct Recorder {
        label: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RequestProcessor for Recorder {
        fn process(&self, _: &mut CallContext, _: &mut RequestHeader, _: &dyn Any) -> Result<()> {
            self.log.lock().unwrap().push(self.label);
            if self.fail {
                return Err(Status::request(99, self.label));
            }
            Ok(())
        }
    }

    impl ResponseProcessor for Recorder {
        fn process(&self, _: &tonic::Status, _: &ResponseHeader, _: &dyn Any) -> Result<()> {
            self.log.lock().unwrap().push(self.label);
            if self.fail {
                return Err(Status::new(ErrorDomain::ResponseHeader, 99, self.label));
            }
            Ok(())
        }
    }

    fn recorder(label: &'static str, fail: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            label,
            fail,
            log: log.clone(),
        })
    }

    #[test]
    fn test_request_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = RequestProcessorChain::new();
        chain.append_processor(recorder("second", false, &log));
        chain.append_processor(recorder("third", false, &log));
        chain.prepend_processor(recorder("first", false, &log));
        assert_eq!(chain.len(), 3);

        let mut ctx = CallContext::new();
        let mut header = RequestHeader::default();
        chain.process(&mut ctx, &mut header, &()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_request_chain_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = RequestProcessorChain::new();
        chain.append_processor(recorder("ok", false, &log));
        chain.append_processor(recorder("fails", true, &log));
        chain.append_processor(recorder("never", false, &log));

        let mut ctx = CallContext::new();
        let mut header = RequestHeader::default();
        let err = chain.process(&mut ctx, &mut header, &()).unwrap_err();
        assert_eq!(err.message(), "fails");
        assert_eq!(*log.lock().unwrap(), vec!["ok", "fails"]);
    }

    #[test]
    fn test_response_chain_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = ResponseProcessorChain::new();
        chain.append_processor(recorder("fails", true, &log));
        chain.append_processor(recorder("never", false, &log));

        let err = chain
            .process(&tonic::Status::new(tonic::Code::Ok, ""), &ResponseHeader::default(), &())
            .unwrap_err();
        assert_eq!(err.domain(), ErrorDomain::ResponseHeader);
        assert_eq!(*log.lock().unwrap(), vec!["fails"]);
    }

    #[test]
    fn test_empty_chains_succeed() {
        let mut ctx = CallContext::new();
        let mut header = RequestHeader::default();
        assert!(RequestProcessorChain::new().is_empty());
        assert!(RequestProcessorChain::new().process(&mut ctx, &mut header, &()).is_ok());
        assert!(ResponseProcessorChain::new()
            .process(&tonic::Status::new(tonic::Code::Ok, ""), &ResponseHeader::default(), &())
            .is_ok());
    }
}
