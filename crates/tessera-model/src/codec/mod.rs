//! Model codecs
//!
//! A codec bridges live [`Model`]s and [`EncodedModel`]s for one schema.
//! Three encodings are supported:
//! - `binary`: bincode over a field-number-tagged record
//! - `json`: object keyed by field name, bytes as base64
//! - `text`: human-readable `name: value` / `name { ... }` blocks
//!
//! Every encoding preserves unset-ness: only set fields are written, and
//! decoding never substitutes zero values.

pub mod binary;
pub mod json;
pub mod text;

use crate::encoded::EncodedModel;
use crate::model::Model;
use crate::schema::Schema;
use std::fmt;
use std::sync::Arc;
use tessera_common::{EncodingMode, Error, Result};

/// Serializer/deserializer bound to one schema and encoding mode
pub trait ModelCodec: Send + Sync + fmt::Debug {
    /// Schema this codec handles
    fn schema(&self) -> &Arc<Schema>;

    /// Mode used when serializing
    fn mode(&self) -> EncodingMode;

    /// Encode a model of this codec's type
    fn serialize(&self, model: &Model) -> Result<EncodedModel>;

    /// Decode an encoded model of this codec's type
    fn deserialize(&self, encoded: &EncodedModel) -> Result<Model>;
}

/// Codec driven by a schema descriptor tree
#[derive(Clone, Debug)]
pub struct SchemaCodec {
    schema: Arc<Schema>,
    mode: EncodingMode,
}

impl SchemaCodec {
    #[must_use]
    pub const fn new(schema: Arc<Schema>, mode: EncodingMode) -> Self {
        Self { schema, mode }
    }

    #[must_use]
    pub const fn binary(schema: Arc<Schema>) -> Self {
        Self::new(schema, EncodingMode::Binary)
    }

    #[must_use]
    pub const fn json(schema: Arc<Schema>) -> Self {
        Self::new(schema, EncodingMode::Json)
    }

    #[must_use]
    pub const fn text(schema: Arc<Schema>) -> Self {
        Self::new(schema, EncodingMode::Text)
    }

    /// Same schema, different output mode
    #[must_use]
    pub fn with_mode(&self, mode: EncodingMode) -> Self {
        Self::new(self.schema.clone(), mode)
    }

    /// Wrap as a shareable trait object
    #[must_use]
    pub fn shared(self) -> Arc<dyn ModelCodec> {
        Arc::new(self)
    }
}

impl ModelCodec for SchemaCodec {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn mode(&self) -> EncodingMode {
        self.mode
    }

    fn serialize(&self, model: &Model) -> Result<EncodedModel> {
        if model.type_name() != self.schema.full_name() {
            return Err(Error::deflate(
                model.type_name(),
                format!("codec is bound to {}", self.schema.full_name()),
            ));
        }
        encode(model, self.mode)
    }

    /// Decodes with the mode recorded in the payload, not the codec's own
    fn deserialize(&self, encoded: &EncodedModel) -> Result<Model> {
        decode(&self.schema, encoded)
    }
}

/// Encode a model in the given mode
pub fn encode(model: &Model, mode: EncodingMode) -> Result<EncodedModel> {
    let data = match mode {
        EncodingMode::Binary => binary::encode(model)?,
        EncodingMode::Json => json::encode(model)?,
        EncodingMode::Text => text::encode(model).into_bytes(),
    };
    Ok(EncodedModel::new(model.type_name(), mode, data))
}

/// Decode an encoded model as an instance of `schema`
pub fn decode(schema: &Arc<Schema>, encoded: &EncodedModel) -> Result<Model> {
    if encoded.type_name() != schema.full_name() {
        return Err(Error::inflate(
            encoded.type_name(),
            format!("expected a {} payload", schema.full_name()),
        ));
    }
    match encoded.mode() {
        EncodingMode::Binary => binary::decode(schema, encoded.data()),
        EncodingMode::Json => json::decode(schema, encoded.data()),
        EncodingMode::Text => {
            let source = std::str::from_utf8(encoded.data())
                .map_err(|e| Error::inflate_with(schema.full_name(), e))?;
            text::decode(schema, source)
        }
    }
}

/// Set a decoded field, reporting type mismatches as inflate errors
pub(crate) fn set_decoded(
    model: &Model,
    name: &str,
    value: crate::value::Value,
) -> Result<Model> {
    model.with(name, value).map_err(|e| match e {
        Error::InvalidArgument(msg) => Error::inflate(model.type_name(), msg),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata;
    use crate::test_support::{counter_schema, john_doe, person_schema};
    use crate::value::Value;
    use rand::Rng;

    const MODES: [EncodingMode; 3] = [EncodingMode::Binary, EncodingMode::Json, EncodingMode::Text];

    fn everything() -> Model {
        metadata::splice_id(&john_doe(), Some("jd"))
            .and_then(|m| m.with("age", 41u64))
            .and_then(|m| m.with("avatar", vec![0u8, 1, 0xff, b'"', b'\\', b'\n']))
            .and_then(|m| m.with("score", -0.125))
            .and_then(|m| m.with("verified", false))
            .and_then(|m| {
                m.with(
                    "nicknames",
                    vec![Value::from("JD"), Value::from("Johnny \"D\"\ttab"), Value::from("")],
                )
            })
            .unwrap()
    }

    #[test]
    fn test_round_trip_every_mode() {
        for model in [Model::new(&person_schema()), john_doe(), everything()] {
            for mode in MODES {
                let codec = SchemaCodec::new(person_schema(), mode);
                let encoded = codec.serialize(&model).unwrap();
                assert_eq!(encoded.mode(), mode);
                let decoded = codec.deserialize(&encoded).unwrap();
                assert_eq!(decoded, model, "round trip through {mode}");
            }
        }
    }

    #[test]
    fn test_round_trip_preserves_zero_values_as_set() {
        let zeroes = Model::new(&person_schema())
            .with("name", "")
            .and_then(|m| m.with("age", 0u64))
            .and_then(|m| m.with("verified", false))
            .unwrap();
        for mode in MODES {
            let decoded = decode(&person_schema(), &encode(&zeroes, mode).unwrap()).unwrap();
            assert!(decoded.has("name"));
            assert!(decoded.has("age"));
            assert!(decoded.has("verified"));
            assert!(!decoded.has("score"));
        }
    }

    #[test]
    fn test_round_trip_random_values() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let age: u64 = rng.r#gen();
            let score: f64 = rng.gen_range(-1.0e12..1.0e12);
            let avatar: Vec<u8> = (0..rng.gen_range(0..16)).map(|_| rng.r#gen()).collect();
            let mut model = Model::new(&person_schema())
                .with("age", age)
                .and_then(|m| m.with("score", score))
                .unwrap();
            if !avatar.is_empty() {
                model = model.with("avatar", avatar).unwrap();
            }
            for mode in MODES {
                let decoded = decode(&person_schema(), &encode(&model, mode).unwrap()).unwrap();
                assert_eq!(decoded, model, "random round trip through {mode}");
            }
        }
    }

    #[test]
    fn test_doubles_keep_every_bit() {
        let mut rng = rand::thread_rng();
        let mut checked = 0;
        while checked < 20_000 {
            let score = f64::from_bits(rng.r#gen());
            if !score.is_finite() {
                continue;
            }
            checked += 1;
            let model = Model::new(&person_schema()).with("score", score).unwrap();
            for mode in MODES {
                let decoded = decode(&person_schema(), &encode(&model, mode).unwrap()).unwrap();
                let back = decoded.get("score").and_then(Value::as_f64).unwrap();
                assert_eq!(back.to_bits(), score.to_bits(), "{score:e} through {mode}");
            }
        }
    }

    #[test]
    fn test_non_finite_doubles() {
        for score in [f64::INFINITY, f64::NEG_INFINITY] {
            let model = Model::new(&person_schema()).with("score", score).unwrap();
            for mode in MODES {
                let decoded = decode(&person_schema(), &encode(&model, mode).unwrap()).unwrap();
                assert_eq!(decoded, model);
            }
        }
        let nan = Model::new(&person_schema()).with("score", f64::NAN).unwrap();
        for mode in MODES {
            let decoded = decode(&person_schema(), &encode(&nan, mode).unwrap()).unwrap();
            assert!(decoded.get("score").and_then(Value::as_f64).unwrap().is_nan());
        }
    }

    #[test]
    fn test_numeric_keys() {
        let counter = metadata::splice_id(&Model::new(&counter_schema()), Some("18446744073709551615"))
            .and_then(|m| m.with("value", -5i64))
            .unwrap();
        for mode in MODES {
            let decoded = decode(&counter_schema(), &encode(&counter, mode).unwrap()).unwrap();
            assert_eq!(decoded, counter);
        }
    }

    #[test]
    fn test_type_mismatch() {
        let codec = SchemaCodec::json(counter_schema());
        assert!(matches!(
            codec.serialize(&john_doe()),
            Err(Error::ModelDeflate { .. })
        ));

        let person_payload = encode(&john_doe(), EncodingMode::Json).unwrap();
        assert!(matches!(
            codec.deserialize(&person_payload),
            Err(Error::ModelInflate { .. })
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        let schema = person_schema();
        for mode in MODES {
            let garbage = EncodedModel::new(schema.full_name(), mode, vec![0xff, 0x00, 0x7b, 0x22]);
            assert!(
                matches!(decode(&schema, &garbage), Err(Error::ModelInflate { .. })),
                "garbage accepted by {mode}"
            );
        }
    }

    #[test]
    fn test_decodes_recorded_mode() {
        let codec = SchemaCodec::binary(person_schema());
        let as_text = codec.with_mode(EncodingMode::Text).serialize(&john_doe()).unwrap();
        assert_eq!(codec.deserialize(&as_text).unwrap(), john_doe());
    }
}
