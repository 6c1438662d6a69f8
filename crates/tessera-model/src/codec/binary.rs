//! Binary encoding
//!
//! Models are lowered to a [`WireRecord`] of `(field number, value)` pairs in
//! declaration order and written with bincode. Field names never hit the
//! wire, so renaming a field keeps old payloads readable. Unknown field
//! numbers are skipped on decode.

use crate::model::Model;
use crate::schema::{FieldDescriptor, FieldType, Schema};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_common::{Error, Result};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    fields: Vec<(u32, WireValue)>,
}

#[derive(Debug, Serialize, Deserialize)]
enum WireValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Message(WireRecord),
    List(Vec<WireValue>),
}

pub(crate) fn encode(model: &Model) -> Result<Vec<u8>> {
    bincode::serialize(&lower(model)).map_err(|e| Error::deflate_with(model.type_name(), *e))
}

pub(crate) fn decode(schema: &Arc<Schema>, data: &[u8]) -> Result<Model> {
    let record: WireRecord =
        bincode::deserialize(data).map_err(|e| Error::inflate_with(schema.full_name(), *e))?;
    raise(schema, record)
}

fn lower(model: &Model) -> WireRecord {
    WireRecord {
        fields: model
            .fields()
            .map(|(field, value)| (field.number(), lower_value(value)))
            .collect(),
    }
}

fn lower_value(value: &Value) -> WireValue {
    match value {
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(i) => WireValue::Int(*i),
        Value::UInt(u) => WireValue::UInt(*u),
        Value::Double(d) => WireValue::Double(*d),
        Value::String(s) => WireValue::String(s.clone()),
        Value::Bytes(b) => WireValue::Bytes(b.clone()),
        Value::Message(m) => WireValue::Message(lower(m)),
        Value::List(items) => WireValue::List(items.iter().map(lower_value).collect()),
    }
}

fn raise(schema: &Arc<Schema>, record: WireRecord) -> Result<Model> {
    let mut model = Model::new(schema);
    for (number, wire) in record.fields {
        let Some(field) = schema.field_by_number(number) else {
            debug!(type_name = schema.full_name(), number, "Skipping unknown field");
            continue;
        };
        let value = raise_value(schema, field, wire)?;
        model = super::set_decoded(&model, field.name(), value)?;
    }
    Ok(model)
}

fn raise_value(schema: &Schema, field: &FieldDescriptor, wire: WireValue) -> Result<Value> {
    match wire {
        WireValue::List(items) if field.is_repeated() => items
            .into_iter()
            .map(|item| raise_scalar(schema, field, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        wire => raise_scalar(schema, field, wire),
    }
}

fn raise_scalar(schema: &Schema, field: &FieldDescriptor, wire: WireValue) -> Result<Value> {
    Ok(match (wire, field.ty()) {
        (WireValue::Bool(b), FieldType::Bool) => Value::Bool(b),
        (WireValue::Int(i), FieldType::Int64) => Value::Int(i),
        (WireValue::UInt(u), FieldType::UInt64) => Value::UInt(u),
        (WireValue::Double(d), FieldType::Double) => Value::Double(d),
        (WireValue::String(s), FieldType::String) => Value::String(s),
        (WireValue::Bytes(b), FieldType::Bytes) => Value::Bytes(b),
        (WireValue::Message(record), FieldType::Message(nested)) => {
            Value::Message(raise(nested, record)?)
        }
        (_, ty) => {
            return Err(Error::inflate(
                schema.full_name(),
                format!("field {} does not hold a {}", field.number(), ty.name()),
            ));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{john_doe, person_schema};

    #[test]
    fn test_unknown_numbers_are_skipped() {
        let record = WireRecord {
            fields: vec![
                (2, WireValue::String("Jane".into())),
                (99, WireValue::Bool(true)),
            ],
        };
        let data = bincode::serialize(&record).unwrap();
        let model = decode(&person_schema(), &data).unwrap();
        assert_eq!(model.get("name").and_then(Value::as_str), Some("Jane"));
        assert_eq!(model.fields().count(), 1);
    }

    #[test]
    fn test_wrong_wire_type() {
        let record = WireRecord {
            fields: vec![(2, WireValue::Int(3))],
        };
        let data = bincode::serialize(&record).unwrap();
        assert!(matches!(
            decode(&person_schema(), &data),
            Err(Error::ModelInflate { .. })
        ));
    }

    #[test]
    fn test_only_set_fields_written() {
        let john = john_doe();
        let record = lower(&john);
        let numbers: Vec<u32> = record.fields.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![2, 3, 5]);
    }
}
