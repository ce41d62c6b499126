//! # spotkit Proto
//!
//! Generated Rust code from the protobuf definitions shared by every service:
//! request/response headers, the common error, lease types and the
//! `DataChunk` frame used for chunked message transport.
//!
//! Service-specific messages live in the per-service crates; they embed the
//! headers defined here.

// Include generated code
pub mod generated {
    pub mod spotkit {
        pub mod api {
            pub mod v1 {
                include!("generated/spotkit.api.v1.rs");
            }
        }
    }
}

// Re-export for convenience
pub use generated::spotkit::api::v1::*;
