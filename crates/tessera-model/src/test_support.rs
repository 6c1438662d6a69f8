//! Shared schema fixtures for tests
//!
//! Built once per process and shared, the way a generated descriptor would
//! be.

use crate::model::Model;
use crate::schema::{FieldType, Schema};
use crate::value::Value;
use std::sync::{Arc, LazyLock};
use tessera_common::Role;

static PERSON_KEY: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Schema::builder("tessera.test.PersonKey", Role::ObjectKey)
        .id("id", 1, FieldType::String)
        .build()
        .expect("person key schema")
});

static CONTACT_INFO: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Schema::builder("tessera.test.ContactInfo", Role::Wire)
        .field("email_address", 1, FieldType::String)
        .field("phone_e164", 2, FieldType::String)
        .build()
        .expect("contact info schema")
});

static PERSON: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Schema::builder("tessera.test.Person", Role::Object)
        .key("key", 1, person_key_schema())
        .field("name", 2, FieldType::String)
        .field("contact_info", 3, FieldType::Message(contact_info_schema()))
        .field("age", 4, FieldType::UInt64)
        .repeated("nicknames", 5, FieldType::String)
        .field("avatar", 6, FieldType::Bytes)
        .field("score", 7, FieldType::Double)
        .field("verified", 8, FieldType::Bool)
        .build()
        .expect("person schema")
});

static BADGE: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Schema::builder("tessera.test.Badge", Role::Object)
        .key("key", 1, person_key_schema())
        .field("label", 2, FieldType::String)
        .build()
        .expect("badge schema")
});

static COUNTER_KEY: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Schema::builder("tessera.test.CounterKey", Role::ObjectKey)
        .id("id", 1, FieldType::UInt64)
        .build()
        .expect("counter key schema")
});

static COUNTER: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Schema::builder("tessera.test.Counter", Role::Object)
        .key("key", 1, counter_key_schema())
        .field("value", 2, FieldType::Int64)
        .build()
        .expect("counter schema")
});

static ENVELOPE: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Schema::builder("tessera.test.Envelope", Role::Wire)
        .field("payload", 1, FieldType::Bytes)
        .field("person", 2, FieldType::Message(person_schema()))
        .build()
        .expect("envelope schema")
});

#[must_use]
pub fn person_key_schema() -> Arc<Schema> {
    PERSON_KEY.clone()
}

#[must_use]
pub fn contact_info_schema() -> Arc<Schema> {
    CONTACT_INFO.clone()
}

/// `Person`: string-keyed object with scalar, nested and repeated fields
#[must_use]
pub fn person_schema() -> Arc<Schema> {
    PERSON.clone()
}

/// `Badge`: a second object type keyed by `PersonKey`
#[must_use]
pub fn badge_schema() -> Arc<Schema> {
    BADGE.clone()
}

#[must_use]
pub fn counter_key_schema() -> Arc<Schema> {
    COUNTER_KEY.clone()
}

/// `Counter`: object keyed by a numeric ID
#[must_use]
pub fn counter_schema() -> Arc<Schema> {
    COUNTER.clone()
}

/// `Envelope`: wire message that cannot carry a key
#[must_use]
pub fn envelope_schema() -> Arc<Schema> {
    ENVELOPE.clone()
}

/// Unkeyed John Doe with contact info and a nickname
#[must_use]
pub fn john_doe() -> Model {
    let contact = Model::builder(&contact_info_schema())
        .set("email_address", "john@doe.com")
        .and_then(|b| b.set("phone_e164", "+12345678910"))
        .expect("contact info")
        .build();
    Model::builder(&person_schema())
        .set("name", "John Doe")
        .and_then(|b| b.set("contact_info", contact))
        .and_then(|b| b.set("nicknames", vec![Value::from("JD")]))
        .expect("john doe")
        .build()
}

/// Person with the given ID and name
#[must_use]
pub fn person(id: &str, name: &str) -> Model {
    crate::metadata::splice_id(&Model::new(&person_schema()), Some(id))
        .and_then(|m| m.with("name", name))
        .expect("person")
}

/// Badge with the given ID and label
#[must_use]
pub fn badge(id: &str, label: &str) -> Model {
    crate::metadata::splice_id(&Model::new(&badge_schema()), Some(id))
        .and_then(|m| m.with("label", label))
        .expect("badge")
}
