//! Access to the standard headers embedded in service messages.
//!
//! Generated service messages carry `header` (and, for lease-aware
//! responses, `lease_use_result`) fields. The macros below implement the
//! traits for such prost types:
//!
//! ```rust,ignore
//! spotkit_client::impl_request_message!(ListEntriesRequest);
//! spotkit_client::impl_response_message!(ListEntriesResponse);
//! spotkit_client::impl_lease_response!(PowerCommandResponse);
//! ```

use spotkit_proto::{LeaseUseResult, RequestHeader, ResponseHeader};

/// An outgoing request with a standard request header.
pub trait RequestMessage: prost::Message + Default + Send + 'static {
    fn header_mut(&mut self) -> &mut Option<RequestHeader>;
}

/// An incoming response with a standard response header.
pub trait ResponseMessage: prost::Message + Default + Send + 'static {
    fn header(&self) -> Option<&ResponseHeader>;
}

/// A response that may report how the server treated an attached lease.
pub trait LeaseResponse: ResponseMessage {
    fn lease_use_result(&self) -> Option<&LeaseUseResult>;
}

#[macro_export]
macro_rules! impl_request_message {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::message::RequestMessage for $ty {
                fn header_mut(&mut self) -> &mut ::core::option::Option<$crate::proto::RequestHeader> {
                    &mut self.header
                }
            }
        )+
    };
}

#[macro_export]
macro_rules! impl_response_message {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::message::ResponseMessage for $ty {
                fn header(&self) -> ::core::option::Option<&$crate::proto::ResponseHeader> {
                    self.header.as_ref()
                }
            }
        )+
    };
}

#[macro_export]
macro_rules! impl_lease_response {
    ($($ty:ty),+ $(,)?) => {
        $(
            $crate::impl_response_message!($ty);

            impl $crate::message::LeaseResponse for $ty {
                fn lease_use_result(&self) -> ::core::option::Option<&$crate::proto::LeaseUseResult> {
                    self.lease_use_result.as_ref()
                }
            }
        )+
    };
}
