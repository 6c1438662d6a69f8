//! Tessera Model - schema-described records
//!
//! This crate defines how Tessera models are described and handled without
//! touching any store:
//! - Schema descriptor trees, built once per type and cached in a registry
//! - Immutable models with functional field updates
//! - Model metadata: role checks, key/ID resolution, dotted-path pluck/splice
//! - Field masks for read projection
//! - Encoded models and codecs (binary, JSON, text)
//! - Fetch/write/cache option value objects

pub mod codec;
pub mod encoded;
pub mod mask;
pub mod metadata;
pub mod model;
pub mod options;
pub mod schema;
pub mod value;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-exports
pub use codec::{ModelCodec, SchemaCodec};
pub use encoded::{EncodedModel, Inflate};
pub use mask::FieldMask;
pub use metadata::{FieldContainer, FieldPointer};
pub use model::{Model, ModelBuilder};
pub use options::{CacheOptions, FetchOptions, WriteOptions};
pub use schema::{FieldDescriptor, FieldType, Schema, SchemaBuilder, SchemaFile, SchemaRegistry};
pub use value::Value;
