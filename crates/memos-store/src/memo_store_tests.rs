use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::memo::{RowStatus, Visibility};
use crate::short_id::is_short_id;

/// In-memory driver that understands the handful of filters these tests use
/// and counts every call it receives.
#[derive(Default)]
struct RecordingDriver {
    memos: Mutex<Vec<Memo>>,
    lists: AtomicUsize,
    writes: AtomicUsize,
}

impl RecordingDriver {
    fn seeded(memos: Vec<Memo>) -> Self {
        Self {
            memos: Mutex::new(memos),
            ..Self::default()
        }
    }

    fn short_ids(&self) -> Vec<String> {
        self.memos
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.short_id.clone())
            .collect()
    }

    fn matches(memo: &Memo, find: &FindMemo) -> bool {
        find.id.is_none_or(|id| memo.id == id)
            && find.uid.as_ref().is_none_or(|uid| &memo.uid == uid)
            && find.short_id.as_ref().is_none_or(|s| &memo.short_id == s)
            && (find.visibility_list.is_empty() || find.visibility_list.contains(&memo.visibility))
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn create_memo(&self, _ctx: &CancellationToken, mut memo: Memo) -> StoreResult<Memo> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut memos = self.memos.lock().unwrap();
        if memos.iter().any(|m| m.short_id == memo.short_id) {
            return Err(StoreError::Conflict { field: "short_id" });
        }
        memo.id = memos.len() as i32 + 1;
        memos.push(memo.clone());
        Ok(memo)
    }

    async fn list_memos(&self, _ctx: &CancellationToken, find: &FindMemo) -> StoreResult<Vec<Memo>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let mut found: Vec<Memo> = self
            .memos
            .lock()
            .unwrap()
            .iter()
            .filter(|m| Self::matches(m, find))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_ts.cmp(&a.created_ts).then(b.id.cmp(&a.id)));
        if let Some(limit) = find.limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn update_memo(&self, _ctx: &CancellationToken, update: &UpdateMemo) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut memos = self.memos.lock().unwrap();
        if let Some(memo) = memos.iter_mut().find(|m| m.id == update.id) {
            if let Some(uid) = &update.uid {
                memo.uid = uid.clone();
            }
            if let Some(content) = &update.content {
                memo.content = content.clone();
            }
        }
        Ok(())
    }

    async fn delete_memo(&self, _ctx: &CancellationToken, delete: &DeleteMemo) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.memos.lock().unwrap().retain(|m| m.id != delete.id);
        Ok(())
    }
}

/// Reports every candidate short ID as already taken.
#[derive(Default)]
struct SaturatedDriver {
    lookups: AtomicUsize,
    creates: AtomicUsize,
}

#[async_trait]
impl Driver for SaturatedDriver {
    async fn create_memo(&self, _ctx: &CancellationToken, memo: Memo) -> StoreResult<Memo> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(memo)
    }

    async fn list_memos(&self, _ctx: &CancellationToken, find: &FindMemo) -> StoreResult<Vec<Memo>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let mut taken = Memo::new("taken", 1, "");
        taken.short_id = find.short_id.clone().unwrap_or_default();
        Ok(vec![taken])
    }

    async fn update_memo(&self, _ctx: &CancellationToken, _update: &UpdateMemo) -> StoreResult<()> {
        Ok(())
    }

    async fn delete_memo(&self, _ctx: &CancellationToken, _delete: &DeleteMemo) -> StoreResult<()> {
        Ok(())
    }
}

fn store(driver: RecordingDriver) -> MemoStore<RecordingDriver> {
    MemoStore::new(driver).with_short_id_generator(Arc::new(ShortIdGenerator::from_seed(11)))
}

#[tokio::test]
async fn create_assigns_short_id() {
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    let created = store
        .create_memo(&ctx, Memo::new("abc-123", 1, "hello"))
        .await
        .unwrap();

    assert!(is_short_id(&created.short_id));
    assert_eq!(created.content, "hello");
    assert_eq!(created.visibility, Visibility::Private);
    assert_eq!(created.row_status, RowStatus::Normal);
}

#[tokio::test]
async fn caller_supplied_short_id_is_replaced() {
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    let mut memo = Memo::new("mine", 1, "");
    memo.short_id = "NOT-A-SHORT-ID".into();
    let created = store.create_memo(&ctx, memo).await.unwrap();
    assert!(is_short_id(&created.short_id));
}

#[tokio::test]
async fn invalid_uid_never_reaches_driver() {
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    let err = store
        .create_memo(&ctx, Memo::new("bad uid!", 1, "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    let err = store
        .update_memo(&ctx, &UpdateMemo::new(1).with_uid("no spaces allowed"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    let driver = store.driver();
    assert_eq!(driver.lists.load(Ordering::SeqCst), 0);
    assert_eq!(driver.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn update_without_uid_skips_validation() {
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    let created = store
        .create_memo(&ctx, Memo::new("keep", 1, "before"))
        .await
        .unwrap();
    store
        .update_memo(&ctx, &UpdateMemo::new(created.id).with_content("after"))
        .await
        .unwrap();

    let fetched = store
        .get_memo(&ctx, &FindMemo::by_id(created.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.uid, "keep");
    assert_eq!(fetched.content, "after");
}

#[tokio::test]
async fn collision_draws_next_candidate() {
    // Replay the generator's sequence to know which candidate comes first.
    let preview = ShortIdGenerator::from_seed(11);
    let first = preview.generate();
    let second = preview.generate();

    let mut existing = Memo::new("existing", 1, "");
    existing.short_id = first.clone();
    let store = store(RecordingDriver::seeded(vec![existing]));
    let ctx = CancellationToken::new();

    let created = store
        .create_memo(&ctx, Memo::new("fresh", 1, ""))
        .await
        .unwrap();
    assert_ne!(created.short_id, first);
    assert_eq!(created.short_id, second);
    assert_eq!(store.driver().lists.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn repeated_creates_never_repeat_a_short_id() {
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    for i in 0..300 {
        store
            .create_memo(&ctx, Memo::new(format!("memo-{i}"), 1, ""))
            .await
            .unwrap();
    }

    let ids = store.driver().short_ids();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 300);
    assert_eq!(unique.len(), 300);
    assert!(ids.iter().all(|id| is_short_id(id)));
}

#[tokio::test]
async fn concurrent_creates_share_one_generator() {
    let store = Arc::new(store(RecordingDriver::default()));
    let ctx = CancellationToken::new();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .create_memo(&ctx, Memo::new(format!("w{worker}-{i}"), 1, ""))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let ids = store.driver().short_ids();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), 200);
}

#[tokio::test]
async fn insert_conflict_is_retried() {
    // The lookup misses, but the driver's unique index rejects the insert:
    // another creator claimed the candidate in between.
    struct RacingDriver {
        inner: RecordingDriver,
        conflicts_left: AtomicUsize,
    }

    #[async_trait]
    impl Driver for RacingDriver {
        async fn create_memo(&self, ctx: &CancellationToken, memo: Memo) -> StoreResult<Memo> {
            if self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Conflict { field: "short_id" });
            }
            self.inner.create_memo(ctx, memo).await
        }

        async fn list_memos(&self, ctx: &CancellationToken, find: &FindMemo) -> StoreResult<Vec<Memo>> {
            self.inner.list_memos(ctx, find).await
        }

        async fn update_memo(&self, ctx: &CancellationToken, update: &UpdateMemo) -> StoreResult<()> {
            self.inner.update_memo(ctx, update).await
        }

        async fn delete_memo(&self, ctx: &CancellationToken, delete: &DeleteMemo) -> StoreResult<()> {
            self.inner.delete_memo(ctx, delete).await
        }
    }

    let store = MemoStore::new(RacingDriver {
        inner: RecordingDriver::default(),
        conflicts_left: AtomicUsize::new(2),
    });
    let ctx = CancellationToken::new();

    let created = store
        .create_memo(&ctx, Memo::new("raced", 1, ""))
        .await
        .unwrap();
    assert!(is_short_id(&created.short_id));
    assert_eq!(store.driver().inner.lists.load(Ordering::SeqCst), 3);
    assert_eq!(store.driver().conflicts_left.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uid_conflict_is_not_retried() {
    let mut existing = Memo::new("dup", 1, "");
    existing.short_id = "zzz9999".into();

    struct UidTaken;

    #[async_trait]
    impl Driver for UidTaken {
        async fn create_memo(&self, _ctx: &CancellationToken, _memo: Memo) -> StoreResult<Memo> {
            Err(StoreError::Conflict { field: "uid" })
        }

        async fn list_memos(&self, _ctx: &CancellationToken, _find: &FindMemo) -> StoreResult<Vec<Memo>> {
            Ok(Vec::new())
        }

        async fn update_memo(&self, _ctx: &CancellationToken, _update: &UpdateMemo) -> StoreResult<()> {
            Ok(())
        }

        async fn delete_memo(&self, _ctx: &CancellationToken, _delete: &DeleteMemo) -> StoreResult<()> {
            Ok(())
        }
    }

    let store = MemoStore::new(UidTaken);
    let err = store
        .create_memo(&CancellationToken::new(), existing)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { field: "uid" }));
}

#[tokio::test]
async fn saturated_space_hits_attempt_ceiling() {
    let store = MemoStore::new(SaturatedDriver::default()).with_max_short_id_attempts(Some(5));
    let ctx = CancellationToken::new();

    let err = store
        .create_memo(&ctx, Memo::new("full", 1, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ShortIdExhausted { attempts: 5 }));
    assert_eq!(store.driver().lookups.load(Ordering::SeqCst), 5);
    assert_eq!(store.driver().creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_stops_unbounded_retry() {
    let store = MemoStore::new(SaturatedDriver::default()).with_max_short_id_attempts(None);
    let ctx = CancellationToken::new();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        store.create_memo(&ctx, Memo::new("spin", 1, "")),
    )
    .await
    .expect("create must return once cancelled");

    assert!(result.unwrap_err().is_cancelled());
    assert!(store.driver().lookups.load(Ordering::SeqCst) > 0);
    assert_eq!(store.driver().creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn get_memo_absent_is_none() {
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    let found = store
        .get_memo(&ctx, &FindMemo::by_uid("nobody"))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn get_memo_returns_first_in_order() {
    let older = Memo::new("older", 1, "").with_created_ts(100);
    let newer = Memo::new("newer", 1, "").with_created_ts(200);
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    store.create_memo(&ctx, older).await.unwrap();
    store.create_memo(&ctx, newer).await.unwrap();

    let first = store
        .get_memo(&ctx, &FindMemo::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.uid, "newer");
}

#[tokio::test]
async fn delete_delegates() {
    let store = store(RecordingDriver::default());
    let ctx = CancellationToken::new();

    let created = store
        .create_memo(&ctx, Memo::new("gone", 1, ""))
        .await
        .unwrap();
    store
        .delete_memo(&ctx, &DeleteMemo { id: created.id })
        .await
        .unwrap();

    assert!(
        store
            .list_memos(&ctx, &FindMemo::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn config_sets_attempt_ceiling() {
    let config = StoreConfig::new().with_max_short_id_attempts(Some(2));
    let store = MemoStore::with_config(SaturatedDriver::default(), &config);

    let err = store
        .create_memo(&CancellationToken::new(), Memo::new("cfg", 1, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ShortIdExhausted { attempts: 2 }));
}
