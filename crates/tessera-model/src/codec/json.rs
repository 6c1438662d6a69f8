//! JSON encoding
//!
//! One object per message, keyed by field name. Repeated fields are arrays,
//! bytes are standard base64, and non-finite doubles are the strings
//! `"Infinity"`, `"-Infinity"` and `"NaN"`. A `null` member counts as unset.
//! Unknown member names are rejected.

use crate::model::Model;
use crate::schema::{FieldDescriptor, FieldType, Schema};
use crate::value::Value;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value as Json};
use std::sync::Arc;
use tessera_common::{Error, Result};

pub(crate) fn encode(model: &Model) -> Result<Vec<u8>> {
    serde_json::to_vec(&to_json(model)).map_err(|e| Error::deflate_with(model.type_name(), e))
}

pub(crate) fn decode(schema: &Arc<Schema>, data: &[u8]) -> Result<Model> {
    let json: Json =
        serde_json::from_slice(data).map_err(|e| Error::inflate_with(schema.full_name(), e))?;
    from_json(schema, &json)
}

/// Render a model as a JSON object
#[must_use]
pub fn to_json(model: &Model) -> Json {
    let object: Map<String, Json> = model
        .fields()
        .map(|(field, value)| (field.name().to_string(), value_to_json(value)))
        .collect();
    Json::Object(object)
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::UInt(u) => Json::from(*u),
        Value::Double(d) => Number::from_f64(*d).map_or_else(
            || {
                let name = if d.is_nan() {
                    "NaN"
                } else if d.is_sign_positive() {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                Json::String(name.to_string())
            },
            Json::Number,
        ),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(STANDARD.encode(b)),
        Value::Message(m) => to_json(m),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
    }
}

/// Build a model of `schema` from a JSON object
pub fn from_json(schema: &Arc<Schema>, json: &Json) -> Result<Model> {
    let Json::Object(object) = json else {
        return Err(Error::inflate(
            schema.full_name(),
            "expected a JSON object",
        ));
    };
    let mut model = Model::new(schema);
    for (name, member) in object {
        let field = schema.field(name).ok_or_else(|| {
            Error::inflate(schema.full_name(), format!("unknown field '{name}'"))
        })?;
        if member.is_null() {
            continue;
        }
        let value = if field.is_repeated() {
            let Json::Array(items) = member else {
                return Err(mismatch(schema, field, member));
            };
            items
                .iter()
                .map(|item| json_to_scalar(schema, field, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)?
        } else {
            json_to_scalar(schema, field, member)?
        };
        model = super::set_decoded(&model, name, value)?;
    }
    Ok(model)
}

fn json_to_scalar(schema: &Schema, field: &FieldDescriptor, json: &Json) -> Result<Value> {
    let value = match (field.ty(), json) {
        (FieldType::Bool, Json::Bool(b)) => Some(Value::Bool(*b)),
        (FieldType::Int64, Json::Number(n)) => n.as_i64().map(Value::Int),
        (FieldType::UInt64, Json::Number(n)) => n.as_u64().map(Value::UInt),
        (FieldType::Double, Json::Number(n)) => n.as_f64().map(Value::Double),
        (FieldType::Double, Json::String(s)) => match s.as_str() {
            "NaN" => Some(Value::Double(f64::NAN)),
            "Infinity" => Some(Value::Double(f64::INFINITY)),
            "-Infinity" => Some(Value::Double(f64::NEG_INFINITY)),
            _ => None,
        },
        (FieldType::String, Json::String(s)) => Some(Value::String(s.clone())),
        (FieldType::Bytes, Json::String(s)) => Some(Value::Bytes(
            STANDARD
                .decode(s)
                .map_err(|e| Error::inflate_with(schema.full_name(), e))?,
        )),
        (FieldType::Message(nested), Json::Object(_)) => Some(Value::Message(from_json(nested, json)?)),
        _ => None,
    };
    value.ok_or_else(|| mismatch(schema, field, json))
}

fn mismatch(schema: &Schema, field: &FieldDescriptor, json: &Json) -> Error {
    Error::inflate(
        schema.full_name(),
        format!(
            "field '{}' expects {}{}, got {json}",
            field.name(),
            if field.is_repeated() { "repeated " } else { "" },
            field.ty().name()
        ),
    )
}
