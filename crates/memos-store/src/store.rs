//! Memo CRUD orchestration.
//!
//! [`MemoStore`] validates identifiers, allocates a unique short ID for
//! each new memo, and delegates storage to a [`Driver`]. It keeps no state
//! between calls apart from the shared short-ID generator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::{DEFAULT_MAX_SHORT_ID_ATTEMPTS, StoreConfig};
use crate::driver::Driver;
use crate::error::{StoreError, StoreResult};
use crate::memo::{DeleteMemo, FindMemo, Memo, UpdateMemo};
use crate::short_id::ShortIdGenerator;
use crate::uid::validate_uid;

/// Create, find, update, and delete memos through a [`Driver`].
pub struct MemoStore<D> {
    driver: D,
    short_ids: Arc<ShortIdGenerator>,
    max_short_id_attempts: Option<u32>,
}

impl<D: Driver> MemoStore<D> {
    /// A store over `driver` with an entropy-seeded short-ID generator.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            short_ids: Arc::new(ShortIdGenerator::new()),
            max_short_id_attempts: Some(DEFAULT_MAX_SHORT_ID_ATTEMPTS),
        }
    }

    /// A store over `driver` using the limits in `config`.
    pub fn with_config(driver: D, config: &StoreConfig) -> Self {
        Self::new(driver).with_max_short_id_attempts(config.max_short_id_attempts)
    }

    /// Use `generator` for short IDs, e.g. one shared by several stores or
    /// seeded for reproducible tests.
    pub fn with_short_id_generator(mut self, generator: Arc<ShortIdGenerator>) -> Self {
        self.short_ids = generator;
        self
    }

    /// Cap the short-ID candidates tried per create; `None` retries until
    /// the caller cancels.
    pub fn with_max_short_id_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_short_id_attempts = attempts;
        self
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Create a memo with a freshly allocated short ID.
    ///
    /// Any `short_id` on the input is replaced. Fails with
    /// [`StoreError::InvalidArgument`] before touching storage if the UID is
    /// malformed. A short-ID conflict reported by the driver (a concurrent
    /// creator won the race) is retried with a new candidate.
    #[instrument(skip(self, ctx, memo), fields(uid = %memo.uid))]
    pub async fn create_memo(&self, ctx: &CancellationToken, mut memo: Memo) -> StoreResult<Memo> {
        validate_uid(&memo.uid)?;

        let mut attempts = 0;
        loop {
            memo.short_id = self.allocate_short_id(ctx, &mut attempts).await?;

            match self.driver.create_memo(ctx, memo.clone()).await {
                Err(StoreError::Conflict { field: "short_id" }) => {
                    warn!(short_id = %memo.short_id, attempts, "short id taken at insert, retrying");
                }
                Ok(created) => {
                    debug!(memo_id = created.id, short_id = %created.short_id, "memo created");
                    return Ok(created);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// All memos matching `find`, possibly none.
    #[instrument(skip(self, ctx))]
    pub async fn list_memos(&self, ctx: &CancellationToken, find: &FindMemo) -> StoreResult<Vec<Memo>> {
        self.driver.list_memos(ctx, find).await
    }

    /// The first memo matching `find` in its ordering, or `None`.
    ///
    /// Several matches are not an error; only the first is returned, so use
    /// a selective filter (such as an id) when uniqueness matters.
    #[instrument(skip(self, ctx))]
    pub async fn get_memo(&self, ctx: &CancellationToken, find: &FindMemo) -> StoreResult<Option<Memo>> {
        let mut find = find.clone();
        if find.limit.is_none() {
            find.limit = Some(1);
        }
        let memos = self.list_memos(ctx, &find).await?;
        Ok(memos.into_iter().next())
    }

    /// Apply a patch. A new UID, if given, must be well formed.
    #[instrument(skip(self, ctx, update), fields(memo_id = update.id))]
    pub async fn update_memo(&self, ctx: &CancellationToken, update: &UpdateMemo) -> StoreResult<()> {
        if let Some(uid) = &update.uid {
            validate_uid(uid)?;
        }
        self.driver.update_memo(ctx, update).await
    }

    /// Delete a memo by id.
    #[instrument(skip(self, ctx))]
    pub async fn delete_memo(&self, ctx: &CancellationToken, delete: &DeleteMemo) -> StoreResult<()> {
        self.driver.delete_memo(ctx, delete).await
    }

    /// Draw candidates until one is not in use.
    ///
    /// `attempts` carries across calls so insert-time conflicts count
    /// toward the same ceiling as lookup collisions.
    async fn allocate_short_id(&self, ctx: &CancellationToken, attempts: &mut u32) -> StoreResult<String> {
        loop {
            if ctx.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if let Some(max) = self.max_short_id_attempts
                && *attempts >= max
            {
                warn!(attempts = *attempts, "giving up on short id allocation");
                return Err(StoreError::ShortIdExhausted { attempts: *attempts });
            }
            *attempts += 1;

            let candidate = self.short_ids.generate();
            let find = FindMemo {
                exclude_content: true,
                ..FindMemo::by_short_id(candidate.as_str())
            };
            if self.get_memo(ctx, &find).await?.is_none() {
                return Ok(candidate);
            }

            debug!(candidate = %candidate, attempt = *attempts, "short id collision");
            // Give the runtime a chance to deliver a cancellation even when the
            // driver answers without suspending.
            tokio::task::yield_now().await;
        }
    }
}

impl<D> std::fmt::Debug for MemoStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoStore")
            .field("max_short_id_attempts", &self.max_short_id_attempts)
            .finish_non_exhaustive()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "memo_store_tests.rs"]
mod tests;
