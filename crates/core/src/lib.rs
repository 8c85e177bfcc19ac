//! Domain core for the local model operations center.
//!
//! Pure, synchronous building blocks shared by the runtime, the workflow
//! pipeline, and the HTTP layer. This crate has no internal dependencies.

pub mod error;
pub mod instance;
pub mod logs;
pub mod model_kind;
pub mod ports;
pub mod readiness;
pub mod types;
pub mod workflow;

pub use error::{CoreError, CoreResult};
