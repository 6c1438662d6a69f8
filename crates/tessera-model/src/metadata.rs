//! Model metadata engine
//!
//! Pure, side-effect-free resolution over [`Schema`] trees:
//! - role matching and enforcement
//! - KEY / ID field discovery (one level into an embedded key)
//! - dotted-path resolution into [`FieldPointer`]s
//! - functional reads ([`pluck`]) and writes ([`splice`]) by path
//! - field-mask projection
//!
//! Path and argument problems are reported as [`Error::InvalidArgument`]
//! immediately; they are caller mistakes, not operational failures.

use crate::mask::FieldMask;
use crate::model::Model;
use crate::schema::{FieldDescriptor, FieldType, Schema};
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tessera_common::{Error, FieldKind, MaskMode, RecordKey, Result, Role};

// ---- Field pointers ----

/// Resolved reference to a field by dotted path
///
/// Equality, ordering and hashing use the base type name and the path, so a
/// pointer resolved twice is the same map key.
#[derive(Clone)]
pub struct FieldPointer {
    base: Arc<Schema>,
    field: FieldDescriptor,
    path: String,
}

impl FieldPointer {
    /// Schema the path is resolved against
    #[must_use]
    pub const fn base(&self) -> &Arc<Schema> {
        &self.base
    }

    /// Terminal field descriptor
    #[must_use]
    pub const fn field(&self) -> &FieldDescriptor {
        &self.field
    }

    /// Dotted path from the base schema
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path segments, outermost first
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.')
    }
}

impl PartialEq for FieldPointer {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.base.full_name() == other.base.full_name()
    }
}

impl Eq for FieldPointer {}

impl Hash for FieldPointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base.full_name().hash(state);
        self.path.hash(state);
    }
}

impl PartialOrd for FieldPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path
            .cmp(&other.path)
            .then_with(|| self.base.full_name().cmp(other.base.full_name()))
    }
}

impl fmt::Debug for FieldPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPointer({}:{})", self.base.full_name(), self.path)
    }
}

/// A field pointer plus the value plucked through it, if set
#[derive(Clone, Debug, PartialEq)]
pub struct FieldContainer<T = Value> {
    pointer: FieldPointer,
    value: Option<T>,
}

impl<T> FieldContainer<T> {
    #[must_use]
    pub const fn pointer(&self) -> &FieldPointer {
        &self.pointer
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.pointer.path()
    }

    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.value.is_some()
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Convert the plucked value, keeping the pointer
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldContainer<U> {
        FieldContainer {
            pointer: self.pointer,
            value: self.value.map(f),
        }
    }
}

// ---- Roles ----

/// Role of a schema
#[must_use]
pub fn role(schema: &Schema) -> Role {
    schema.role()
}

#[must_use]
pub fn match_role(schema: &Schema, role: Role) -> bool {
    schema.role() == role
}

#[must_use]
pub fn match_any_role(schema: &Schema, roles: &[Role]) -> bool {
    roles.contains(&schema.role())
}

/// Fail with `InvalidModelType` unless the schema has `role`
pub fn enforce_role(schema: &Schema, role: Role) -> Result<()> {
    enforce_any_role(schema, &[role])
}

/// Fail with `InvalidModelType` unless the schema has one of `roles`
pub fn enforce_any_role(schema: &Schema, roles: &[Role]) -> Result<()> {
    if match_any_role(schema, roles) {
        Ok(())
    } else {
        Err(Error::invalid_model_type(schema.full_name(), roles))
    }
}

// ---- Key / ID discovery ----

fn single_field_of_kind(schema: &Schema, kind: FieldKind) -> Result<Option<&FieldDescriptor>> {
    let mut fields = schema.fields_of_kind(kind);
    let first = fields.next();
    if fields.next().is_some() {
        return Err(Error::invalid_schema(format!(
            "{} declares more than one {kind} field",
            schema.full_name()
        )));
    }
    Ok(first)
}

/// Locate the KEY field of a keyed schema
///
/// Fails with `InvalidModelType` when the role cannot carry a key; returns
/// `None` when the schema simply has none.
pub fn key_field(schema: &Arc<Schema>) -> Result<Option<FieldPointer>> {
    enforce_any_role(schema, Role::KEYED)?;
    Ok(single_field_of_kind(schema, FieldKind::Key)?.map(|field| FieldPointer {
        base: schema.clone(),
        field: field.clone(),
        path: field.name().to_string(),
    }))
}

/// Schema of the embedded key record, if the schema has a KEY field
pub fn key_schema(schema: &Arc<Schema>) -> Result<Option<Arc<Schema>>> {
    Ok(key_field(schema)?.and_then(|pointer| pointer.field.ty().message_schema().cloned()))
}

/// Locate the ID field, directly or one level down inside the key
pub fn id_field(schema: &Arc<Schema>) -> Result<Option<FieldPointer>> {
    enforce_any_role(schema, Role::IDENTIFIED)?;
    if let Some(field) = single_field_of_kind(schema, FieldKind::Id)? {
        return Ok(Some(FieldPointer {
            base: schema.clone(),
            field: field.clone(),
            path: field.name().to_string(),
        }));
    }
    if !match_any_role(schema, Role::KEYED) {
        return Ok(None);
    }
    let Some(key) = key_field(schema)? else {
        return Ok(None);
    };
    let Some(key_schema) = key.field.ty().message_schema() else {
        return Ok(None);
    };
    Ok(single_field_of_kind(key_schema, FieldKind::Id)?.map(|id| FieldPointer {
        base: schema.clone(),
        field: id.clone(),
        path: format!("{}.{}", key.path, id.name()),
    }))
}

/// Check the exactly-one-KEY, exactly-one-ID invariant of persistable types
pub fn enforce_persistable(schema: &Arc<Schema>) -> Result<()> {
    let key_schema = key_schema(schema)?
        .ok_or_else(|| Error::missing_field(schema.full_name(), FieldKind::Key))?;
    single_field_of_kind(&key_schema, FieldKind::Id)?
        .ok_or_else(|| Error::missing_field(key_schema.full_name(), FieldKind::Id))?;
    Ok(())
}

/// ID of a model as a string
///
/// Fails with `MissingAnnotatedField` when the schema has no ID field at all;
/// returns `None` when the field exists but is unset.
pub fn id(model: &Model) -> Result<Option<String>> {
    let pointer = id_field(model.schema())?
        .ok_or_else(|| Error::missing_field(model.type_name(), FieldKind::Id))?;
    Ok(read(model, &pointer).and_then(|value| value.to_id_string()))
}

/// Embedded key record of a model
pub fn key(model: &Model) -> Result<Option<Model>> {
    let pointer = key_field(model.schema())?
        .ok_or_else(|| Error::missing_field(model.type_name(), FieldKind::Key))?;
    Ok(read(model, &pointer).and_then(|value| value.as_message().cloned()))
}

/// Namespaced storage key (`{key type}/{id}`) of a key record
///
/// Fails with `InvalidArgument` when the key carries no ID.
pub fn record_key(key: &Model) -> Result<RecordKey> {
    let id = id(key)?.ok_or_else(|| {
        Error::invalid_argument(format!("{} key has no ID set", key.type_name()))
    })?;
    Ok(RecordKey::new(key.type_name(), &id))
}

/// Build a key record holding `id` for a keyed schema
pub fn key_for_id(schema: &Arc<Schema>, id: &str) -> Result<Model> {
    let key_schema = key_schema(schema)?
        .ok_or_else(|| Error::missing_field(schema.full_name(), FieldKind::Key))?;
    splice_id(&Model::new(&key_schema), Some(id))
}

/// Copy of the model with its ID set or cleared
///
/// String IDs are stored as-is; integer ID fields parse `id`.
pub fn splice_id(model: &Model, id: Option<&str>) -> Result<Model> {
    let pointer = id_field(model.schema())?
        .ok_or_else(|| Error::missing_field(model.type_name(), FieldKind::Id))?;
    let value = id
        .map(|raw| id_value(pointer.field.ty(), raw))
        .transpose()?;
    splice_at(model, &pointer, value)
}

fn id_value(ty: &FieldType, raw: &str) -> Result<Value> {
    let invalid = || Error::invalid_argument(format!("'{raw}' is not a valid {} ID", ty.name()));
    match ty {
        FieldType::String if !raw.is_empty() && !raw.chars().any(char::is_whitespace) => {
            Ok(Value::String(raw.to_string()))
        }
        FieldType::Int64 => raw.parse().map(Value::Int).map_err(|_| invalid()),
        FieldType::UInt64 => raw.parse().map(Value::UInt).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Copy of the model with its key record set or cleared
pub fn splice_key(model: &Model, key: Option<Model>) -> Result<Model> {
    let pointer = key_field(model.schema())?
        .ok_or_else(|| Error::missing_field(model.type_name(), FieldKind::Key))?;
    splice_at(model, &pointer, key.map(Value::Message))
}

// ---- Paths ----

fn validate_path(path: &str) -> Result<()> {
    let malformed = path.is_empty()
        || path.starts_with('.')
        || path.ends_with('.')
        || path.contains("..")
        || path.chars().any(char::is_whitespace);
    if malformed {
        Err(Error::invalid_argument(format!("malformed field path '{path}'")))
    } else {
        Ok(())
    }
}

/// Resolve a dotted path against a schema
///
/// Each segment must name a field of the current schema. The walk follows
/// nested *schemas*, so paths through unset ancestors still resolve. Returns
/// `None` when a non-terminal segment is a scalar or repeated field that
/// cannot be descended into.
pub fn resolve_field(schema: &Arc<Schema>, path: &str) -> Result<Option<FieldPointer>> {
    validate_path(path)?;
    let mut current = schema;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let field = current.field(segment).ok_or_else(|| {
            Error::invalid_argument(format!(
                "unknown field '{segment}' in {} (path '{path}')",
                current.full_name()
            ))
        })?;
        if segments.peek().is_none() {
            return Ok(Some(FieldPointer {
                base: schema.clone(),
                field: field.clone(),
                path: path.to_string(),
            }));
        }
        match field.descend() {
            Some(nested) => current = nested,
            None => return Ok(None),
        }
    }
    Ok(None)
}

fn require_field(schema: &Arc<Schema>, path: &str) -> Result<FieldPointer> {
    resolve_field(schema, path)?.ok_or_else(|| {
        Error::invalid_argument(format!(
            "path '{path}' descends through a non-message field of {}",
            schema.full_name()
        ))
    })
}

fn read<'m>(model: &'m Model, pointer: &FieldPointer) -> Option<&'m Value> {
    let mut current = model;
    let mut segments = pointer.segments().peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        current = value.as_message()?;
    }
    None
}

/// Read the value at a dotted path
///
/// The container is empty when the field or any ancestor is unset.
pub fn pluck(model: &Model, path: &str) -> Result<FieldContainer> {
    let pointer = require_field(model.schema(), path)?;
    pluck_pointer(model, &pointer)
}

/// Read the value a resolved pointer refers to
pub fn pluck_pointer(model: &Model, pointer: &FieldPointer) -> Result<FieldContainer> {
    if pointer.base.full_name() != model.type_name() {
        return Err(Error::invalid_argument(format!(
            "pointer '{}' belongs to {}, not {}",
            pointer.path,
            pointer.base.full_name(),
            model.type_name()
        )));
    }
    Ok(FieldContainer {
        value: read(model, pointer).cloned(),
        pointer: pointer.clone(),
    })
}

fn mask_pointers(model: &Model, mask: Option<&FieldMask>) -> Result<Vec<FieldPointer>> {
    match mask {
        Some(mask) => mask
            .paths()
            .map(|path| require_field(model.schema(), path))
            .collect(),
        None => {
            let mut pointers: Vec<_> = model
                .schema()
                .fields()
                .iter()
                .map(|field| FieldPointer {
                    base: model.schema().clone(),
                    field: field.clone(),
                    path: field.name().to_string(),
                })
                .collect();
            pointers.sort();
            Ok(pointers)
        }
    }
}

/// Lazily pluck every masked path (or every top-level field), by path order
///
/// All paths are validated before the first item is produced.
pub fn pluck_stream<'m>(
    model: &'m Model,
    mask: Option<&FieldMask>,
) -> Result<impl Iterator<Item = FieldContainer> + use<'m>> {
    let pointers = mask_pointers(model, mask)?;
    Ok(pointers.into_iter().map(move |pointer| FieldContainer {
        value: read(model, &pointer).cloned(),
        pointer,
    }))
}

/// Pluck every masked path (or every top-level field), sorted by path
pub fn pluck_all(model: &Model, mask: Option<&FieldMask>) -> Result<Vec<FieldContainer>> {
    Ok(pluck_stream(model, mask)?.collect())
}

/// Copy of the model with the value at `path` set (`Some`) or cleared (`None`)
///
/// Unset ancestors are created as empty messages when setting; clearing
/// below an unset ancestor is a no-op.
pub fn splice(model: &Model, path: &str, value: Option<Value>) -> Result<Model> {
    let pointer = require_field(model.schema(), path)?;
    splice_at(model, &pointer, value)
}

fn splice_at(model: &Model, pointer: &FieldPointer, value: Option<Value>) -> Result<Model> {
    let segments: Vec<&str> = pointer.segments().collect();
    splice_segments(model, &segments, value)
}

fn splice_segments(model: &Model, segments: &[&str], value: Option<Value>) -> Result<Model> {
    match segments {
        [] => Ok(model.clone()),
        [name] => match value {
            Some(value) => model.with(name, value),
            None => model.without(name),
        },
        [name, rest @ ..] => {
            let child = match model.get(name) {
                Some(Value::Message(child)) => child.clone(),
                _ if value.is_none() => return Ok(model.clone()),
                _ => {
                    let nested = model
                        .schema()
                        .field(name)
                        .and_then(FieldDescriptor::descend)
                        .ok_or_else(|| {
                            Error::invalid_argument(format!(
                                "cannot descend into '{name}' of {}",
                                model.type_name()
                            ))
                        })?;
                    Model::new(nested)
                }
            };
            let child = splice_segments(&child, rest, value)?;
            model.with(name, Value::Message(child))
        }
    }
}

/// Check that every path of a mask resolves against the schema
pub fn check_mask(schema: &Arc<Schema>, mask: &FieldMask) -> Result<()> {
    mask.paths()
        .try_for_each(|path| require_field(schema, path).map(|_| ()))
}

/// Project a model through a field mask
///
/// `Include` keeps exactly the masked paths plus the ancestors needed to
/// hold them; `Exclude` clears the masked paths.
pub fn apply_mask(model: &Model, mask: &FieldMask, mode: MaskMode) -> Result<Model> {
    match mode {
        MaskMode::Include => {
            let mut projected = Model::new(model.schema());
            for container in pluck_stream(model, Some(mask))? {
                if let Some(value) = container.value {
                    projected = splice_at(&projected, &container.pointer, Some(value))?;
                }
            }
            Ok(projected)
        }
        MaskMode::Exclude => {
            let pointers = mask_pointers(model, Some(mask))?;
            pointers
                .iter()
                .try_fold(model.clone(), |current, pointer| {
                    splice_at(&current, pointer, None)
                })
        }
    }
}
