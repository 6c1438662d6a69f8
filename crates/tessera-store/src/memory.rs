//! In-memory persistence driver
//!
//! Encoded records live in a concurrent map keyed by `{model type}/{id}`. The
//! default map is shared by every driver in the process; `scoped` drivers
//! get a private one. Conditional writes hold the map entry for the whole
//! check-and-write, so concurrent writers to one key are serialised.

use crate::driver::{self, PersistenceDriver, WritePlan};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;
use tessera_common::op;
use tessera_common::{RecordKey, Result};
use tessera_model::{EncodedModel, FetchOptions, Model, ModelCodec, WriteOptions};
use tokio::runtime::Handle;
use tracing::debug;
use uuid::Uuid;

type Records = Arc<DashMap<RecordKey, StoredRecord>>;

static SHARED_RECORDS: LazyLock<Records> = LazyLock::new(|| Arc::new(DashMap::new()));

#[derive(Clone, Debug)]
struct StoredRecord {
    encoded: EncodedModel,
    updated_at: SystemTime,
    token: Uuid,
}

/// Concurrent-map backend
#[derive(Clone)]
pub struct InMemoryDriver {
    records: Records,
    codec: Arc<dyn ModelCodec>,
    executor: Handle,
}

impl InMemoryDriver {
    /// Driver over the process-wide record map
    #[must_use]
    pub fn new(codec: Arc<dyn ModelCodec>, executor: Handle) -> Self {
        Self {
            records: SHARED_RECORDS.clone(),
            codec,
            executor,
        }
    }

    /// Driver over a private record map
    #[must_use]
    pub fn scoped(codec: Arc<dyn ModelCodec>, executor: Handle) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            codec,
            executor,
        }
    }

    /// Number of stored records across all model types sharing the map
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl std::fmt::Debug for InMemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDriver")
            .field("type", &self.codec.schema().full_name())
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

fn write(records: &DashMap<RecordKey, StoredRecord>, plan: &WritePlan) -> Result<Model> {
    let check = |stored| {
        driver::check_precondition(
            plan.model.type_name(),
            &plan.record,
            stored,
            plan.disposition,
            plan.updated_at,
        )
    };
    let stored = StoredRecord {
        encoded: plan.encoded.clone(),
        updated_at: driver::write_time(),
        token: plan.token,
    };
    match records.entry(plan.record.clone()) {
        Entry::Occupied(entry) if entry.get().token == plan.token => {
            debug!(record = %plan.record, "Write already applied by an earlier attempt");
        }
        Entry::Occupied(mut entry) => {
            check(Some(entry.get().updated_at))?;
            entry.insert(stored);
        }
        Entry::Vacant(entry) => {
            check(None)?;
            entry.insert(stored);
        }
    }
    Ok(plan.model.clone())
}

fn remove(
    records: &DashMap<RecordKey, StoredRecord>,
    type_name: &str,
    record: &RecordKey,
    options: &WriteOptions,
) -> Result<bool> {
    let disposition = driver::delete_disposition(options);
    match records.entry(record.clone()) {
        Entry::Occupied(entry) => {
            driver::check_precondition(
                type_name,
                record,
                Some(entry.get().updated_at),
                disposition,
                options.updated_at,
            )?;
            entry.remove();
            Ok(true)
        }
        Entry::Vacant(_) => {
            driver::check_precondition(type_name, record, None, disposition, options.updated_at)?;
            Ok(false)
        }
    }
}

#[async_trait]
impl PersistenceDriver for InMemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn codec(&self) -> &Arc<dyn ModelCodec> {
        &self.codec
    }

    fn executor(&self) -> &Handle {
        &self.executor
    }

    async fn retrieve(&self, key: &Model, options: &FetchOptions) -> Result<Option<Model>> {
        let record = driver::plan_read(self.schema(), key, options)?;
        let executor = options.executor_or(&self.executor);
        let records = self.records.clone();
        let encoded = op::run(&executor, options.attempts(), move || {
            let records = records.clone();
            let record = record.clone();
            async move { Ok(records.get(&record).map(|stored| stored.encoded.clone())) }
        })
        .await?;
        driver::finish_read(self.codec.as_ref(), encoded, options)
    }

    async fn persist(
        &self,
        key: Option<&Model>,
        model: &Model,
        options: &WriteOptions,
    ) -> Result<Model> {
        let plan = driver::plan_write(self, key, model, options)?;
        let executor = options.executor_or(&self.executor);
        let records = self.records.clone();
        let saved = op::run(&executor, options.attempts(), move || {
            let records = records.clone();
            let plan = plan.clone();
            async move { write(&records, &plan) }
        })
        .await?;
        debug!(driver = "memory", type_name = saved.type_name(), "Persisted model");
        Ok(saved)
    }

    async fn delete(&self, key: &Model, options: &WriteOptions) -> Result<Model> {
        let record = driver::record_key(self.schema(), key)?;
        let type_name = self.schema().full_name().to_string();
        let executor = options.executor_or(&self.executor);
        let records = self.records.clone();
        let task_options = options.clone();
        let removed = op::run(&executor, driver::delete_attempts(options), move || {
            let records = records.clone();
            let type_name = type_name.clone();
            let record = record.clone();
            let options = task_options.clone();
            async move { remove(&records, &type_name, &record, &options) }
        })
        .await?;
        debug!(driver = "memory", removed, "Deleted record");
        Ok(key.clone())
    }

    async fn last_updated(&self, key: &Model) -> Result<Option<SystemTime>> {
        let record = driver::record_key(self.schema(), key)?;
        let records = self.records.clone();
        op::run(&self.executor, op::Attempts::default(), move || {
            let records = records.clone();
            let record = record.clone();
            async move { Ok(records.get(&record).map(|stored| stored.updated_at)) }
        })
        .await
    }
}
