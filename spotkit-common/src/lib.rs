//! # spotkit Common
//!
//! Shared utilities for spotkit clients and the applications that host them.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use spotkit_common::init_logging;
//!
//! // RUST_LOG overrides the level passed here.
//! init_logging("info").unwrap();
//! ```

pub mod logging;

// Re-export logging functions
pub use logging::{init_logging, init_logging_json};
