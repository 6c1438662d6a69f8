//! Decoding encoded models without a codec instance

use crate::codec;
use crate::model::Model;
use crate::schema::Schema;
use std::sync::Arc;
use tessera_common::Result;

pub use tessera_common::EncodedModel;

/// Direct decoding of an [`EncodedModel`]
pub trait Inflate {
    /// Decode the payload as an instance of `schema`, using the recorded mode
    fn inflate(&self, schema: &Arc<Schema>) -> Result<Model>;
}

impl Inflate for EncodedModel {
    fn inflate(&self, schema: &Arc<Schema>) -> Result<Model> {
        codec::decode(schema, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{contact_info_schema, john_doe, person_schema};
    use tessera_common::{EncodingMode, Error};

    #[test]
    fn test_inflate_without_codec() {
        let john = john_doe();
        let encoded = codec::encode(&john, EncodingMode::Json).unwrap();
        assert_eq!(encoded.type_name(), "tessera.test.Person");
        assert_eq!(encoded.mode(), EncodingMode::Json);
        assert_eq!(encoded.inflate(&person_schema()).unwrap(), john);
    }

    #[test]
    fn test_inflate_rejects_other_type() {
        let encoded = codec::encode(&john_doe(), EncodingMode::Binary).unwrap();
        let err = encoded.inflate(&contact_info_schema()).unwrap_err();
        assert!(matches!(err, Error::ModelInflate { .. }));
    }
}
