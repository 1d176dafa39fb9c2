//! # memos-store
//!
//! Memo persistence layer for Memos.
//!
//! [`MemoStore`] validates user-facing identifiers, allocates a unique
//! short ID (`abc1234`) for every new memo, and hands structured
//! find/update/delete descriptors to a pluggable [`Driver`]. The crate ships
//! one driver, [`SqliteDriver`], built on a WAL-mode SQLite [`Database`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  MemoStore  (uid check, short-id loop)  │
//! ├─────────────────────────────────────────┤
//! │  Driver trait                           │
//! │  └─ SqliteDriver (FindMemo -> SQL,      │
//! │                   filter expressions)   │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL + mmap)         │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every operation takes a [`CancellationToken`](tokio_util::sync::CancellationToken);
//! cancelling it makes the pending call return [`StoreError::Cancelled`].
//!
//! ## Quick start
//!
//! ```ignore
//! use memos_store::{Database, FindMemo, Memo, MemoStore, SqliteDriver, Visibility};
//! use tokio_util::sync::CancellationToken;
//!
//! let db = Database::open_and_migrate("data/memos.db").await?;
//! let store = MemoStore::new(SqliteDriver::new(db));
//! let ctx = CancellationToken::new();
//!
//! let memo = store
//!     .create_memo(&ctx, Memo::new("abc-123", 1, "hello").with_visibility(Visibility::Public))
//!     .await?;
//! let same = store.get_memo(&ctx, &FindMemo::by_short_id(&memo.short_id)).await?;
//! ```

pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod filter;
pub mod memo;
pub mod migration;
pub mod short_id;
pub mod sqlite;
pub mod store;
pub mod uid;

// ── re-exports ───────────────────────────────────────────────────────

pub use config::StoreConfig;
pub use db::Database;
pub use driver::Driver;
pub use error::{StoreError, StoreResult};
pub use memo::{
    DeleteMemo, FindMemo, FindMemoPayload, Memo, MemoPayload, MemoProperty, RowStatus, UpdateMemo,
    Visibility,
};
pub use short_id::{ShortIdGenerator, is_short_id};
pub use sqlite::SqliteDriver;
pub use store::MemoStore;
pub use uid::{is_valid_uid, validate_uid};
