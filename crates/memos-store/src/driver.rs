//! Storage driver interface.
//!
//! [`MemoStore`](crate::MemoStore) validates and enriches requests, then
//! hands them to a [`Driver`] that performs the actual reads and writes.
//! Every method receives the caller's cancellation token and must return
//! [`StoreError::Cancelled`](crate::StoreError::Cancelled) promptly once
//! it fires.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;
use crate::memo::{DeleteMemo, FindMemo, Memo, UpdateMemo};

/// Persistence backend for memos.
///
/// Reads issued after a successful write in the same call chain must
/// observe that write.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Insert `memo` and return it as stored, with `id` and timestamps set.
    ///
    /// A storage-level uniqueness violation on the short ID is reported as
    /// [`StoreError::Conflict`](crate::StoreError::Conflict) with
    /// `field = "short_id"`.
    async fn create_memo(&self, ctx: &CancellationToken, memo: Memo) -> StoreResult<Memo>;

    /// All memos matching `find`, in the order it requests.
    async fn list_memos(&self, ctx: &CancellationToken, find: &FindMemo) -> StoreResult<Vec<Memo>>;

    /// Apply a patch. Updating a missing id is not an error.
    async fn update_memo(&self, ctx: &CancellationToken, update: &UpdateMemo) -> StoreResult<()>;

    /// Remove a memo. Deleting a missing id is not an error.
    async fn delete_memo(&self, ctx: &CancellationToken, delete: &DeleteMemo) -> StoreResult<()>;
}
