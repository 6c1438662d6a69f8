//! Encoded models
//!
//! The only persisted or transmitted representation of a model: the
//! fully-qualified type name, the encoding mode and the raw payload.

use crate::types::EncodingMode;
use serde::{Deserialize, Serialize};

/// Serialized (type name, mode, bytes) triple
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedModel {
    type_name: String,
    mode: EncodingMode,
    data: Vec<u8>,
}

impl EncodedModel {
    #[must_use]
    pub fn new(type_name: impl Into<String>, mode: EncodingMode, data: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            mode,
            data,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub const fn mode(&self) -> EncodingMode {
        self.mode
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_triple() {
        let encoded = EncodedModel::new("a.B", EncodingMode::Text, b"name: \"x\"".to_vec());
        let bytes = bincode::serialize(&encoded).unwrap();
        let decoded: EncodedModel = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, encoded);
        assert_eq!(decoded.len(), 9);
    }
}
