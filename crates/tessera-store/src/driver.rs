//! Persistence driver trait and shared write planning
//!
//! Drivers store [`EncodedModel`]s under a [`RecordKey`] built from the
//! driver's model type and the key's ID, so model types sharing a key type
//! never collide in a shared backend. Argument problems (wrong model type, a key without an
//! ID, a bad mask path) fail before any backend work is scheduled.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tessera_common::op::Attempts;
use tessera_common::{Error, FieldKind, RecordKey, Result, WriteDisposition, WriteExpectation};
use tessera_model::metadata;
use tessera_model::{
    EncodedModel, FetchOptions, FieldType, Model, ModelCodec, Schema, WriteOptions,
};
use tokio::runtime::Handle;
use uuid::Uuid;

/// Backend contract for one model type
///
/// Every async operation is spawned on the options' executor, or on
/// [`PersistenceDriver::executor`] when none is given.
#[async_trait]
pub trait PersistenceDriver: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Codec bound to the model type this driver stores
    fn codec(&self) -> &Arc<dyn ModelCodec>;

    /// Default executor
    fn executor(&self) -> &Handle;

    /// Schema of the stored model type
    fn schema(&self) -> &Arc<Schema> {
        self.codec().schema()
    }

    /// Fresh key record for a model of this driver's type
    ///
    /// String IDs are 32-character lowercase hex UUIDs; integer IDs are
    /// drawn from the same random source.
    fn generate_key(&self, model: &Model) -> Result<Model> {
        check_model_type(self.schema(), model)?;
        let id = metadata::id_field(self.schema())?
            .ok_or_else(|| Error::missing_field(model.type_name(), FieldKind::Id))?;
        let raw = generate_id(id.field().ty())?;
        metadata::key_for_id(self.schema(), &raw)
    }

    /// Load the record stored under `key`, projected through the options'
    /// field mask
    async fn retrieve(&self, key: &Model, options: &FetchOptions) -> Result<Option<Model>>;

    /// Store `model`, generating a key when `key` is `None`
    ///
    /// A generated key forces `MustNotExist`. Returns the model with the key
    /// spliced in.
    async fn persist(
        &self,
        key: Option<&Model>,
        model: &Model,
        options: &WriteOptions,
    ) -> Result<Model>;

    /// Remove the record stored under `key`, returning the key
    ///
    /// Deleting an absent record succeeds unless the options require it to
    /// exist.
    async fn delete(&self, key: &Model, options: &WriteOptions) -> Result<Model>;

    /// Last write time of the record stored under `key`
    async fn last_updated(&self, key: &Model) -> Result<Option<SystemTime>>;
}

/// Random ID rendered for an ID field of type `ty`
pub fn generate_id(ty: &FieldType) -> Result<String> {
    let uuid = Uuid::new_v4();
    let (high, _) = uuid.as_u64_pair();
    match ty {
        FieldType::String => Ok(uuid.simple().to_string()),
        FieldType::Int64 => Ok((high >> 1).to_string()),
        FieldType::UInt64 => Ok(high.to_string()),
        other => Err(Error::invalid_schema(format!(
            "cannot generate IDs of type {}",
            other.name()
        ))),
    }
}

pub(crate) fn check_model_type(schema: &Schema, model: &Model) -> Result<()> {
    if model.type_name() == schema.full_name() {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "driver stores {}, got {}",
            schema.full_name(),
            model.type_name()
        )))
    }
}

/// Validate a key record and derive its storage key
pub(crate) fn record_key(schema: &Arc<Schema>, key: &Model) -> Result<RecordKey> {
    let key_schema = metadata::key_schema(schema)?
        .ok_or_else(|| Error::missing_field(schema.full_name(), FieldKind::Key))?;
    if key.type_name() != key_schema.full_name() {
        return Err(Error::invalid_argument(format!(
            "{} is keyed by {}, got {}",
            schema.full_name(),
            key_schema.full_name(),
            key.type_name()
        )));
    }
    let record = metadata::record_key(key)?;
    Ok(RecordKey::new(schema.full_name(), record.id()))
}

/// Validate a read and its mask before dispatch
pub(crate) fn plan_read(
    schema: &Arc<Schema>,
    key: &Model,
    options: &FetchOptions,
) -> Result<RecordKey> {
    let record = record_key(schema, key)?;
    if let Some(mask) = &options.mask {
        metadata::check_mask(schema, mask)?;
    }
    Ok(record)
}

/// Decode a stored record and apply the options' mask
pub(crate) fn finish_read(
    codec: &dyn ModelCodec,
    encoded: Option<EncodedModel>,
    options: &FetchOptions,
) -> Result<Option<Model>> {
    let Some(encoded) = encoded else {
        return Ok(None);
    };
    let model = codec.deserialize(&encoded)?;
    match &options.mask {
        Some(mask) if options.is_masked() => {
            metadata::apply_mask(&model, mask, options.mask_mode).map(Some)
        }
        _ => Ok(Some(model)),
    }
}

/// Everything a backend needs to execute one write
#[derive(Clone, Debug)]
pub(crate) struct WritePlan {
    pub record: RecordKey,
    pub model: Model,
    pub encoded: EncodedModel,
    pub disposition: WriteDisposition,
    pub updated_at: Option<SystemTime>,
    /// Stored with the record; finding it again means an earlier attempt
    /// of this same write already committed
    pub token: Uuid,
}

impl WritePlan {
    /// Non-conflict failure of this write, carrying the model
    #[must_use]
    pub fn failure(&self, cause: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::write_failure(
            self.model.type_name(),
            Some(self.record.id().to_string()),
            Some(self.encoded.clone()),
            cause,
        )
    }
}

/// Resolve the key, splice it into the model and encode the result
pub(crate) fn plan_write<D: PersistenceDriver + ?Sized>(
    driver: &D,
    key: Option<&Model>,
    model: &Model,
    options: &WriteOptions,
) -> Result<WritePlan> {
    let schema = driver.schema();
    check_model_type(schema, model)?;
    metadata::enforce_persistable(schema)?;

    let (key, disposition) = match key {
        Some(key) => (key.clone(), options.disposition),
        None => (driver.generate_key(model)?, WriteDisposition::MustNotExist),
    };
    let record = record_key(schema, &key)?;
    let model = metadata::splice_key(model, Some(key))?;
    let encoded = driver.codec().serialize(&model)?;

    Ok(WritePlan {
        record,
        model,
        encoded,
        disposition,
        updated_at: options.updated_at,
        token: Uuid::new_v4(),
    })
}

/// Check a write's preconditions against the stored record's write time
pub(crate) fn check_precondition(
    type_name: &str,
    record: &RecordKey,
    stored: Option<SystemTime>,
    disposition: WriteDisposition,
    updated_at: Option<SystemTime>,
) -> Result<()> {
    let conflict = |expectation: WriteExpectation| -> Result<()> {
        Err(Error::conflict(
            type_name,
            Some(record.id().to_string()),
            expectation,
        ))
    };
    if let Some(expected) = updated_at
        && stored != Some(expected)
    {
        return conflict(WriteExpectation::UpdateTime);
    }
    match (disposition, stored) {
        (WriteDisposition::MustExist, None) => conflict(WriteExpectation::MustExist),
        (WriteDisposition::MustNotExist, Some(_)) => conflict(WriteExpectation::MustNotExist),
        _ => Ok(()),
    }
}

/// Deletes only honour `MustExist`; deleting a missing record is otherwise
/// a no-op
pub(crate) fn delete_disposition(options: &WriteOptions) -> WriteDisposition {
    match options.disposition {
        WriteDisposition::MustExist => WriteDisposition::MustExist,
        _ => WriteDisposition::Blind,
    }
}

/// Retry policy for a delete
///
/// A conditional delete leaves nothing behind to recognise on a second
/// attempt, so a timeout ends it.
pub(crate) fn delete_attempts(options: &WriteOptions) -> Attempts {
    let attempts = options.attempts();
    if delete_disposition(options) == WriteDisposition::Blind && options.updated_at.is_none() {
        attempts
    } else {
        attempts.final_on_timeout()
    }
}

/// Current time truncated to whole microseconds, the resolution every
/// backend can store
pub(crate) fn write_time() -> SystemTime {
    from_micros(to_micros(SystemTime::now()))
}

pub(crate) fn to_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

pub(crate) fn from_micros(micros: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tessera_common::EncodingMode;
    use tessera_model::SchemaCodec;
    use tessera_model::test_support::{contact_info_schema, counter_schema, john_doe, person_schema};

    struct NullDriver {
        codec: Arc<dyn ModelCodec>,
        executor: Handle,
    }

    #[async_trait]
    impl PersistenceDriver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }

        fn codec(&self) -> &Arc<dyn ModelCodec> {
            &self.codec
        }

        fn executor(&self) -> &Handle {
            &self.executor
        }

        async fn retrieve(&self, _key: &Model, _options: &FetchOptions) -> Result<Option<Model>> {
            Ok(None)
        }

        async fn persist(
            &self,
            key: Option<&Model>,
            model: &Model,
            options: &WriteOptions,
        ) -> Result<Model> {
            plan_write(self, key, model, options).map(|plan| plan.model)
        }

        async fn delete(&self, key: &Model, _options: &WriteOptions) -> Result<Model> {
            Ok(key.clone())
        }

        async fn last_updated(&self, _key: &Model) -> Result<Option<SystemTime>> {
            Ok(None)
        }
    }

    fn driver(schema: Arc<Schema>) -> NullDriver {
        NullDriver {
            codec: SchemaCodec::new(schema, EncodingMode::Binary).shared(),
            executor: Handle::current(),
        }
    }

    #[tokio::test]
    async fn test_generated_keys_are_distinct() {
        let driver = driver(person_schema());
        let model = Model::new(&person_schema());
        let ids: HashSet<String> = (0..64)
            .map(|_| {
                let key = driver.generate_key(&model).unwrap();
                metadata::id(&key).unwrap().unwrap()
            })
            .collect();
        assert_eq!(ids.len(), 64);
        assert!(ids.iter().all(|id| id.len() == 32 && !id.contains(char::is_whitespace)));
    }

    #[tokio::test]
    async fn test_generated_numeric_keys() {
        let driver = driver(counter_schema());
        let key = driver.generate_key(&Model::new(&counter_schema())).unwrap();
        let id = metadata::id(&key).unwrap().unwrap();
        assert!(id.parse::<u64>().is_ok());
    }

    #[tokio::test]
    async fn test_plan_write_generates_key() {
        let driver = driver(person_schema());
        let model = Model::new(&person_schema()).with("name", "A").unwrap();
        let plan = plan_write(&driver, None, &model, &WriteOptions::blind()).unwrap();
        assert_eq!(plan.disposition, WriteDisposition::MustNotExist);
        assert!(metadata::id(&plan.model).unwrap().is_some());
        assert_eq!(plan.encoded.type_name(), "tessera.test.Person");
    }

    #[tokio::test]
    async fn test_plan_write_rejects_foreign_models() {
        let driver = driver(person_schema());
        let wrong = Model::new(&counter_schema());
        assert!(matches!(
            plan_write(&driver, None, &wrong, &WriteOptions::blind()),
            Err(Error::InvalidArgument(_))
        ));

        let foreign_key = metadata::key_for_id(&counter_schema(), "1").unwrap();
        let model = Model::new(&person_schema());
        assert!(matches!(
            plan_write(&driver, Some(&foreign_key), &model, &WriteOptions::blind()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_unpersistable_schema() {
        let driver = driver(contact_info_schema());
        let model = Model::new(&contact_info_schema());
        assert!(matches!(
            driver.persist(None, &model, &WriteOptions::blind()).await,
            Err(Error::InvalidModelType { .. })
        ));
    }

    #[test]
    fn test_preconditions() {
        let record = RecordKey::new("K", "1");
        let now = write_time();
        let check = |stored, disposition, updated_at| {
            check_precondition("T", &record, stored, disposition, updated_at)
        };

        assert!(check(None, WriteDisposition::Blind, None).is_ok());
        assert!(check(Some(now), WriteDisposition::Blind, None).is_ok());
        assert!(check(None, WriteDisposition::MustExist, None).unwrap_err().is_conflict());
        assert!(check(Some(now), WriteDisposition::MustExist, None).is_ok());
        assert!(check(Some(now), WriteDisposition::MustNotExist, None).unwrap_err().is_conflict());
        assert!(check(Some(now), WriteDisposition::Blind, Some(now)).is_ok());

        let earlier = now - Duration::from_secs(1);
        match check(Some(now), WriteDisposition::Blind, Some(earlier)).unwrap_err() {
            Error::ModelWriteConflict { expectation, key, .. } => {
                assert_eq!(expectation, WriteExpectation::UpdateTime);
                assert_eq!(key.as_deref(), Some("1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(check(None, WriteDisposition::Blind, Some(now)).unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_record_keys_are_per_model_type() {
        let key = metadata::key_for_id(&person_schema(), "jd").unwrap();
        let record = record_key(&person_schema(), &key).unwrap();
        assert_eq!(record.as_str(), "tessera.test.Person/jd");
        assert_eq!(record.id(), "jd");
    }

    #[tokio::test]
    async fn test_each_plan_has_its_own_token() {
        let driver = driver(person_schema());
        let model = Model::new(&person_schema()).with("name", "A").unwrap();
        let key = metadata::key_for_id(&person_schema(), "a").unwrap();
        let first = plan_write(&driver, Some(&key), &model, &WriteOptions::blind()).unwrap();
        let second = plan_write(&driver, Some(&key), &model, &WriteOptions::blind()).unwrap();
        assert_eq!(first.record, second.record);
        assert_ne!(first.token, second.token);
    }

    #[tokio::test]
    async fn test_write_failure_carries_the_model() {
        let driver = driver(person_schema());
        let key = metadata::key_for_id(&person_schema(), "jd").unwrap();
        let plan = plan_write(&driver, Some(&key), &john_doe(), &WriteOptions::blind()).unwrap();
        let err = plan.failure(std::io::Error::other("commit refused"));
        match &err {
            Error::ModelWriteFailure { type_name, key, .. } => {
                assert_eq!(type_name, "tessera.test.Person");
                assert_eq!(key.as_deref(), Some("jd"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let carried = err.failed_model().unwrap();
        assert_eq!(carried, &plan.encoded);
        assert_eq!(driver.codec().deserialize(carried).unwrap(), plan.model);
    }

    #[test]
    fn test_delete_attempts() {
        let blind = WriteOptions::blind().with_retries(3);
        assert!(!delete_attempts(&blind).final_on_timeout);
        assert!(!delete_attempts(&WriteOptions::must_not_exist()).final_on_timeout);
        assert!(delete_attempts(&WriteOptions::must_exist().with_retries(3)).final_on_timeout);
        assert!(delete_attempts(&blind.if_updated_at(write_time())).final_on_timeout);
    }

    #[test]
    fn test_micros_round_trip() {
        let now = write_time();
        assert_eq!(from_micros(to_micros(now)), now);
    }
}
