//! Tessera Store - persistence drivers and the model adapter
//!
//! - [`PersistenceDriver`]: backend contract over encoded models
//! - [`InMemoryDriver`]: concurrent map backend, process-wide or scoped
//! - [`EmbeddedDriver`]: durable redb backend
//! - [`ModelAdapter`]: one read/write surface composing a driver with an
//!   optional cache

pub mod adapter;
pub mod driver;
pub mod embedded;
mod error;
pub mod memory;

pub use adapter::{AdapterStats, ModelAdapter};
pub use driver::PersistenceDriver;
pub use embedded::EmbeddedDriver;
pub use memory::InMemoryDriver;
