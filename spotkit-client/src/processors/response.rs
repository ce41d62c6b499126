//! Built-in response processors.

use std::any::Any;

use spotkit_proto::common_error::Code;
use spotkit_proto::ResponseHeader;

use super::ResponseProcessor;
use crate::error::{ErrorDomain, Result, Status};

/// Maps the response header's common error code to a final status.
///
/// `CODE_OK` passes. `CODE_UNSPECIFIED` fails too: the server never filled
/// in the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonErrorProcessor;

impl ResponseProcessor for CommonErrorProcessor {
    fn process(&self, _: &tonic::Status, header: &ResponseHeader, _: &dyn Any) -> Result<()> {
        let error = header.error.clone().unwrap_or_default();
        let code = error.code();
        if code == Code::Ok {
            return Ok(());
        }

        let message = if error.message.is_empty() {
            code.as_str_name().to_string()
        } else {
            format!("{}: {}", code.as_str_name(), error.message)
        };
        Err(Status::new(ErrorDomain::ResponseHeader, code as i32, message))
    }
}
