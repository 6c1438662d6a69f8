//! Cache driver trait

use async_trait::async_trait;
use tessera_common::Result;
use tessera_model::{FetchOptions, Model};
use tokio::runtime::Handle;

/// Cache-only storage for models, addressed by key record
///
/// Every operation runs on the given executor. A miss is `Ok(None)`, never
/// an error. Evicting an absent key succeeds.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// Driver name for logging
    fn name(&self) -> &str;

    /// Store `model` under the ID of `key`
    ///
    /// Falls back to the model's embedded key when `key` has no ID; fails
    /// with `InvalidArgument` when neither resolves.
    async fn put(&self, key: &Model, model: &Model, executor: &Handle) -> Result<()>;

    /// Look up a model, applying the options' field mask to a hit
    async fn fetch(
        &self,
        key: &Model,
        options: &FetchOptions,
        executor: &Handle,
    ) -> Result<Option<Model>>;

    /// Drop one entry
    async fn evict(&self, key: &Model, executor: &Handle) -> Result<()>;

    /// Drop several entries
    async fn evict_all(&self, keys: &[Model], executor: &Handle) -> Result<()> {
        for key in keys {
            self.evict(key, executor).await?;
        }
        Ok(())
    }

    /// Drop every entry
    async fn flush(&self, executor: &Handle) -> Result<()>;
}
