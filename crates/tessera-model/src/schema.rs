//! Schema descriptors
//!
//! A [`Schema`] is an explicit descriptor tree for one model type: its
//! fully-qualified name, role and ordered fields. Message-typed fields embed
//! the nested schema directly, so resolving a dotted path never needs a
//! lookup. Trees are built once per type and cached by name in a
//! [`SchemaRegistry`].
//!
//! Schemas can also be declared in a language-agnostic JSON file
//! ([`SchemaFile`]) where message fields refer to other types by name.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};
use tessera_common::{Error, FieldKind, Result, Role};

/// Type of a schema field
#[derive(Clone, Debug)]
pub enum FieldType {
    Bool,
    Int64,
    UInt64,
    Double,
    String,
    Bytes,
    /// Nested message with its own schema
    Message(Arc<Schema>),
}

impl FieldType {
    /// Nested schema, for message-typed fields
    #[must_use]
    pub fn message_schema(&self) -> Option<&Arc<Schema>> {
        match self {
            Self::Message(schema) => Some(schema),
            _ => None,
        }
    }

    /// Type name as written in schema files
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Double => "double",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Message(schema) => schema.full_name(),
        }
    }

    /// Check if values of this type can serve as an ID
    #[must_use]
    pub const fn is_id_compatible(&self) -> bool {
        matches!(self, Self::String | Self::Int64 | Self::UInt64)
    }

    fn parse_scalar(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(Self::Bool),
            "int64" => Some(Self::Int64),
            "uint64" => Some(Self::UInt64),
            "double" => Some(Self::Double),
            "string" => Some(Self::String),
            "bytes" => Some(Self::Bytes),
            _ => None,
        }
    }
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Message(a), Self::Message(b)) => a.full_name() == b.full_name(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

/// One field of a schema
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    number: u32,
    ty: FieldType,
    repeated: bool,
    kind: FieldKind,
}

impl FieldDescriptor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable field number, used by the binary encoding
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    #[must_use]
    pub const fn ty(&self) -> &FieldType {
        &self.ty
    }

    #[must_use]
    pub const fn is_repeated(&self) -> bool {
        self.repeated
    }

    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Nested schema a path may descend into (singular message fields only)
    #[must_use]
    pub fn descend(&self) -> Option<&Arc<Schema>> {
        if self.repeated {
            None
        } else {
            self.ty.message_schema()
        }
    }
}

/// Descriptor tree for one model type
pub struct Schema {
    full_name: String,
    role: Role,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
    by_number: HashMap<u32, usize>,
}

impl Schema {
    /// Start building a schema
    pub fn builder(full_name: impl Into<String>, role: Role) -> SchemaBuilder {
        SchemaBuilder {
            full_name: full_name.into(),
            role,
            fields: Vec::new(),
        }
    }

    /// Fully-qualified type name
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Fields in declaration order
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Look up a field by number
    #[must_use]
    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Fields carrying the given annotation
    pub fn fields_of_kind(&self, kind: FieldKind) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(move |f| f.kind == kind)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name
    }
}

impl Eq for Schema {}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .field(
                "fields",
                &self
                    .fields
                    .iter()
                    .map(|field| (field.name.as_str(), field.ty.name()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Schema`]
#[derive(Debug)]
pub struct SchemaBuilder {
    full_name: String,
    role: Role,
    fields: Vec<FieldDescriptor>,
}

impl SchemaBuilder {
    /// Add a singular field
    #[must_use]
    pub fn field(self, name: impl Into<String>, number: u32, ty: FieldType) -> Self {
        self.push(name, number, ty, false, FieldKind::Standard)
    }

    /// Add a repeated field
    #[must_use]
    pub fn repeated(self, name: impl Into<String>, number: u32, ty: FieldType) -> Self {
        self.push(name, number, ty, true, FieldKind::Standard)
    }

    /// Add the ID field
    #[must_use]
    pub fn id(self, name: impl Into<String>, number: u32, ty: FieldType) -> Self {
        self.push(name, number, ty, false, FieldKind::Id)
    }

    /// Add the KEY field
    #[must_use]
    pub fn key(self, name: impl Into<String>, number: u32, key_schema: Arc<Schema>) -> Self {
        self.push(name, number, FieldType::Message(key_schema), false, FieldKind::Key)
    }

    /// Add a field with explicit attributes
    #[must_use]
    pub fn push(
        mut self,
        name: impl Into<String>,
        number: u32,
        ty: FieldType,
        repeated: bool,
        kind: FieldKind,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            number,
            ty,
            repeated,
            kind,
        });
        self
    }

    /// Validate and build the schema
    pub fn build(self) -> Result<Arc<Schema>> {
        if self.full_name.is_empty() || self.full_name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_schema(format!(
                "invalid type name '{}'",
                self.full_name
            )));
        }

        let mut by_name = HashMap::with_capacity(self.fields.len());
        let mut by_number = HashMap::with_capacity(self.fields.len());

        for (index, field) in self.fields.iter().enumerate() {
            let context = || format!("{}.{}", self.full_name, field.name);

            if !is_valid_field_name(&field.name) {
                return Err(Error::invalid_schema(format!(
                    "invalid field name '{}'",
                    context()
                )));
            }
            if field.number == 0 {
                return Err(Error::invalid_schema(format!(
                    "field '{}' must have a positive number",
                    context()
                )));
            }
            if by_name.insert(field.name.clone(), index).is_some() {
                return Err(Error::invalid_schema(format!(
                    "duplicate field name '{}'",
                    context()
                )));
            }
            if by_number.insert(field.number, index).is_some() {
                return Err(Error::invalid_schema(format!(
                    "duplicate field number {} in {}",
                    field.number, self.full_name
                )));
            }

            match field.kind {
                FieldKind::Id if field.repeated || !field.ty.is_id_compatible() => {
                    return Err(Error::invalid_schema(format!(
                        "ID field '{}' must be a singular string or integer",
                        context()
                    )));
                }
                FieldKind::Key => {
                    let is_key_message = field
                        .ty
                        .message_schema()
                        .is_some_and(|s| s.role().is_key());
                    if field.repeated || !is_key_message {
                        return Err(Error::invalid_schema(format!(
                            "KEY field '{}' must be a singular key message",
                            context()
                        )));
                    }
                }
                _ => {}
            }
        }

        Ok(Arc::new(Schema {
            full_name: self.full_name,
            role: self.role,
            fields: self.fields,
            by_name,
            by_number,
        }))
    }
}

fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---- Schema files ----

/// Declarative schema file: a set of types referring to each other by name
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    pub types: Vec<TypeDescriptor>,
}

/// One type in a schema file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// One field in a schema file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub number: u32,
    /// Scalar type name or the fully-qualified name of another type
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default)]
    pub kind: FieldKind,
}

// ---- Registry ----

static GLOBAL: LazyLock<SchemaRegistry> = LazyLock::new(SchemaRegistry::new);

/// Cache of built schema trees keyed by fully-qualified type name
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    /// Create an empty, privately scoped registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Register a schema, returning the cached tree if the type is known
    pub fn register(&self, schema: Arc<Schema>) -> Arc<Schema> {
        self.schemas
            .write()
            .entry(schema.full_name().to_string())
            .or_insert(schema)
            .clone()
    }

    /// Look up a schema by fully-qualified name
    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(full_name).cloned()
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }

    /// Parse a JSON schema file and register its types
    pub fn load_json(&self, json: &str) -> Result<Vec<Arc<Schema>>> {
        let file: SchemaFile = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid schema file: {e}")))?;
        self.load(&file)
    }

    /// Build every type of a schema file and register it
    ///
    /// Types may reference each other in any order and may reference types
    /// already in the registry. Unknown and recursive references are
    /// rejected.
    pub fn load(&self, file: &SchemaFile) -> Result<Vec<Arc<Schema>>> {
        let mut specs = HashMap::with_capacity(file.types.len());
        for spec in &file.types {
            if specs.insert(spec.name.as_str(), spec).is_some() {
                return Err(Error::invalid_schema(format!(
                    "type '{}' declared twice",
                    spec.name
                )));
            }
        }

        let mut built = HashMap::new();
        let mut visiting = HashSet::new();
        file.types
            .iter()
            .map(|spec| {
                let schema = self.build_type(&spec.name, &specs, &mut built, &mut visiting)?;
                Ok(self.register(schema))
            })
            .collect()
    }

    fn build_type(
        &self,
        name: &str,
        specs: &HashMap<&str, &TypeDescriptor>,
        built: &mut HashMap<String, Arc<Schema>>,
        visiting: &mut HashSet<String>,
    ) -> Result<Arc<Schema>> {
        if let Some(schema) = built.get(name) {
            return Ok(schema.clone());
        }
        let Some(spec) = specs.get(name) else {
            return self
                .get(name)
                .ok_or_else(|| Error::invalid_schema(format!("unknown type '{name}'")));
        };
        if !visiting.insert(name.to_string()) {
            return Err(Error::invalid_schema(format!(
                "type '{name}' refers to itself"
            )));
        }

        let mut builder = Schema::builder(&spec.name, spec.role);
        for field in &spec.fields {
            let ty = match FieldType::parse_scalar(&field.ty) {
                Some(scalar) => scalar,
                None => FieldType::Message(self.build_type(&field.ty, specs, built, visiting)?),
            };
            builder = builder.push(&field.name, field.number, ty, field.repeated, field.kind);
        }
        let schema = builder.build()?;

        visiting.remove(name);
        built.insert(name.to_string(), schema.clone());
        Ok(schema)
    }
}
