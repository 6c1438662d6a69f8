//! Embedded persistence driver backed by redb
//!
//! Records are bincode-encoded [`StoredDocument`]s in a single `models`
//! table keyed by `{model type}/{id}`. Every conditional write reads and
//! writes inside one redb write transaction; redb serialises write
//! transactions, so the check cannot race another writer. All redb calls
//! are blocking and run on the executor's blocking pool.

use crate::driver::{self, PersistenceDriver, WritePlan};
use crate::error::BackendResultExt;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tessera_common::op;
use tessera_common::{Error, RecordKey, Result};
use tessera_model::{EncodedModel, FetchOptions, Model, ModelCodec, WriteOptions};
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

const MODELS: TableDefinition<&str, &[u8]> = TableDefinition::new("models");

/// Stored form of one record
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    encoded: EncodedModel,
    /// Last write time in microseconds since the Unix epoch
    updated_at_micros: u64,
    /// Token of the write that produced this document
    token: Uuid,
}

impl StoredDocument {
    fn updated_at(&self) -> SystemTime {
        driver::from_micros(self.updated_at_micros)
    }
}

/// Durable single-file backend
#[derive(Clone)]
pub struct EmbeddedDriver {
    db: Arc<Database>,
    codec: Arc<dyn ModelCodec>,
    executor: Handle,
}

impl EmbeddedDriver {
    /// Open (or create) the database at `path`
    pub fn open(
        path: impl AsRef<Path>,
        codec: Arc<dyn ModelCodec>,
        executor: Handle,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).backend()?;
        }
        let db = Database::create(path).backend()?;
        info!(path = %path.display(), type_name = codec.schema().full_name(), "Opened embedded store");
        Self::with_database(Arc::new(db), codec, executor)
    }

    /// Share an already open database, e.g. between drivers of several
    /// model types
    pub fn with_database(
        db: Arc<Database>,
        codec: Arc<dyn ModelCodec>,
        executor: Handle,
    ) -> Result<Self> {
        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write().backend()?;
        {
            let _t = write_txn.open_table(MODELS).backend()?;
        }
        write_txn.commit().backend()?;

        Ok(Self {
            db,
            codec,
            executor,
        })
    }

    /// Underlying database handle
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl std::fmt::Debug for EmbeddedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedDriver")
            .field("type", &self.codec.schema().full_name())
            .finish_non_exhaustive()
    }
}

fn decode_document(bytes: &[u8]) -> Result<StoredDocument> {
    bincode::deserialize(bytes).backend()
}

fn load_document(db: &Database, record: &RecordKey) -> Result<Option<StoredDocument>> {
    let read_txn = db.begin_read().backend()?;
    let table = read_txn.open_table(MODELS).backend()?;
    let guard = table.get(record.as_str()).backend()?;
    guard.map(|value| decode_document(value.value())).transpose()
}

fn store_document(db: &Database, plan: &WritePlan) -> Result<Model> {
    let write_txn = db.begin_write().backend()?;
    {
        let mut table = write_txn.open_table(MODELS).backend()?;
        let stored = table
            .get(plan.record.as_str())
            .backend()?
            .map(|value| decode_document(value.value()))
            .transpose()?;
        if stored.as_ref().is_some_and(|document| document.token == plan.token) {
            debug!(record = %plan.record, "Write already applied by an earlier attempt");
            return Ok(plan.model.clone());
        }
        driver::check_precondition(
            plan.model.type_name(),
            &plan.record,
            stored.as_ref().map(StoredDocument::updated_at),
            plan.disposition,
            plan.updated_at,
        )?;

        let document = StoredDocument {
            encoded: plan.encoded.clone(),
            updated_at_micros: driver::to_micros(driver::write_time()),
            token: plan.token,
        };
        let bytes = bincode::serialize(&document).backend()?;
        table.insert(plan.record.as_str(), bytes.as_slice()).backend()?;
    }
    write_txn.commit().map_err(|e| plan.failure(e))?;
    Ok(plan.model.clone())
}

fn remove_document(
    db: &Database,
    type_name: &str,
    record: &RecordKey,
    options: &WriteOptions,
) -> Result<bool> {
    let write_txn = db.begin_write().backend()?;
    let removed = {
        let mut table = write_txn.open_table(MODELS).backend()?;
        let stored = table
            .get(record.as_str())
            .backend()?
            .map(|value| decode_document(value.value()))
            .transpose()?;
        driver::check_precondition(
            type_name,
            record,
            stored.as_ref().map(StoredDocument::updated_at),
            driver::delete_disposition(options),
            options.updated_at,
        )?;
        table.remove(record.as_str()).backend()?.is_some()
    };
    write_txn
        .commit()
        .map_err(|e| Error::write_failure(type_name, Some(record.id().to_string()), None, e))?;
    Ok(removed)
}

#[async_trait]
impl PersistenceDriver for EmbeddedDriver {
    fn name(&self) -> &str {
        "redb"
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
        let db = self.db.clone();
        let document = op::run_blocking(&executor, options.attempts(), move || {
            load_document(&db, &record)
        })
        .await?;
        driver::finish_read(
            self.codec.as_ref(),
            document.map(|document| document.encoded),
            options,
        )
    }

    async fn persist(
        &self,
        key: Option<&Model>,
        model: &Model,
        options: &WriteOptions,
    ) -> Result<Model> {
        let plan = Arc::new(driver::plan_write(self, key, model, options)?);
        let executor = options.executor_or(&self.executor);
        let db = self.db.clone();
        let saved = op::run_blocking(&executor, options.attempts(), move || {
            store_document(&db, &plan)
        })
        .await?;
        debug!(driver = "redb", type_name = saved.type_name(), "Persisted model");
        Ok(saved)
    }

    async fn delete(&self, key: &Model, options: &WriteOptions) -> Result<Model> {
        let record = driver::record_key(self.schema(), key)?;
        let type_name: Arc<str> = Arc::from(self.schema().full_name());
        let executor = options.executor_or(&self.executor);
        let db = self.db.clone();
        let task_options = Arc::new(options.clone());
        let removed = op::run_blocking(&executor, driver::delete_attempts(options), move || {
            remove_document(&db, &type_name, &record, &task_options)
        })
        .await?;
        debug!(driver = "redb", removed, "Deleted record");
        Ok(key.clone())
    }

    async fn last_updated(&self, key: &Model) -> Result<Option<SystemTime>> {
        let record = driver::record_key(self.schema(), key)?;
        let db = self.db.clone();
        let document = op::run_blocking(&self.executor, op::Attempts::default(), move || {
            load_document(&db, &record)
        })
        .await?;
        Ok(document.map(|document| document.updated_at()))
    }
}
