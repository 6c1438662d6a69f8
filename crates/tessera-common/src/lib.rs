//! Tessera Common - Shared types and utilities
//!
//! This crate provides the enumerations, error taxonomy, configuration
//! structures, the encoded model triple and the pending-operation primitive
//! used across all Tessera components.

pub mod config;
pub mod encoded;
pub mod error;
pub mod op;
pub mod types;

pub use config::Config;
pub use encoded::EncodedModel;
pub use error::{Error, Result};
pub use op::PendingOp;
pub use types::*;
