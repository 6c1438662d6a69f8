//! Immutable schema-described records
//!
//! A [`Model`] holds only the fields that are set; an absent field is unset,
//! never a zero value. Updates produce a new model. An empty repeated list
//! counts as unset.

use crate::schema::{FieldDescriptor, Schema};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tessera_common::{Error, Result};

/// Structured record described by a [`Schema`]
#[derive(Clone)]
pub struct Model {
    schema: Arc<Schema>,
    values: BTreeMap<String, Value>,
}

impl Model {
    /// Empty instance of the schema (every field unset)
    #[must_use]
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: schema.clone(),
            values: BTreeMap::new(),
        }
    }

    /// Start building an instance of the schema
    #[must_use]
    pub fn builder(schema: &Arc<Schema>) -> ModelBuilder {
        ModelBuilder {
            model: Self::new(schema),
        }
    }

    #[must_use]
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Fully-qualified type name of the schema
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.schema.full_name()
    }

    /// Value of a top-level field, if set
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Check if a top-level field is set
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Check if no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Set fields in schema declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &Value)> {
        self.schema
            .fields()
            .iter()
            .filter_map(|field| self.values.get(field.name()).map(|value| (field, value)))
    }

    /// Copy with a top-level field set
    pub fn with(&self, name: &str, value: impl Into<Value>) -> Result<Self> {
        let mut next = self.clone();
        next.set(name, value.into())?;
        Ok(next)
    }

    /// Copy with a top-level field cleared
    pub fn without(&self, name: &str) -> Result<Self> {
        self.descriptor(name)?;
        let mut next = self.clone();
        next.values.remove(name);
        Ok(next)
    }

    fn descriptor(&self, name: &str) -> Result<&FieldDescriptor> {
        self.schema.field(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "{} has no field named '{name}'",
                self.schema.full_name()
            ))
        })
    }

    fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let field = self.descriptor(name)?;
        if !value.fits(field) {
            return Err(Error::invalid_argument(format!(
                "{}.{name} expects {}{}, got {}",
                self.schema.full_name(),
                if field.is_repeated() { "repeated " } else { "" },
                field.ty().name(),
                value.kind_name()
            )));
        }
        if matches!(&value, Value::List(items) if items.is_empty()) {
            self.values.remove(name);
        } else {
            self.values.insert(name.to_string(), value);
        }
        Ok(())
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.schema.full_name() == other.schema.full_name() && self.values == other.values
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.schema.full_name())?;
        f.debug_map()
            .entries(self.fields().map(|(field, value)| (field.name(), value)))
            .finish()
    }
}

/// Builder for [`Model`]
#[derive(Debug)]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    /// Set a top-level field
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.model.set(name, value.into())?;
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> Model {
        self.model
    }
}
