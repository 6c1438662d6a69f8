//! Tessera Cache - optional front-cache for persistence drivers
//!
//! A [`CacheDriver`] is a cache-only view over models keyed by their key
//! record. It never falls back to storage on its own; the adapter in
//! `tessera-store` decides when to consult it and what to do on a miss.

pub mod driver;
pub mod memory;

pub use driver::CacheDriver;
pub use memory::{CacheStats, InMemoryCache};
