//! SQLite implementation of [`Driver`].
//!
//! [`FindMemo`] is compiled into a single parameterised `SELECT`; the
//! parent of a comment is resolved through `memo_relation`. All work runs
//! on the blocking pool via [`Database::execute`] and is raced against the
//! caller's cancellation token. Writes run in a transaction and re-check
//! the token before starting and again before committing; a write whose
//! token fired while it waited on the database is rolled back.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, ffi};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::driver::Driver;
use crate::error::{StoreError, StoreResult};
use crate::filter::{self, Condition, PayloadFlag};
use crate::memo::{
    DeleteMemo, FindMemo, FindMemoPayload, Memo, MemoPayload, RowStatus, UpdateMemo, Visibility,
};

/// Stores memos in the `memo` and `memo_relation` tables.
#[derive(Clone)]
pub struct SqliteDriver {
    db: Database,
}

impl SqliteDriver {
    /// Create a driver backed by an already migrated `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run `f` on the blocking pool unless `ctx` fires first.
    async fn run<F, T>(&self, ctx: &CancellationToken, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(StoreError::Cancelled),
            result = self.db.execute_mut(f) => result,
        }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    #[instrument(skip(self, ctx, memo), fields(uid = %memo.uid, short_id = %memo.short_id))]
    async fn create_memo(&self, ctx: &CancellationToken, mut memo: Memo) -> StoreResult<Memo> {
        let now = Utc::now().timestamp();
        if memo.created_ts == 0 {
            memo.created_ts = now;
        }
        if memo.updated_ts == 0 {
            memo.updated_ts = memo.created_ts;
        }
        let payload = serde_json::to_string(&memo.payload)?;
        let token = ctx.clone();

        let memo = self
            .run(ctx, move |conn| {
                if token.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO memo (uid, short_id, creator_id, created_ts, updated_ts, \
                     row_status, content, visibility, pinned, payload) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        memo.uid,
                        memo.short_id,
                        memo.creator_id,
                        memo.created_ts,
                        memo.updated_ts,
                        memo.row_status.as_str(),
                        memo.content,
                        memo.visibility.as_str(),
                        memo.pinned,
                        payload,
                    ],
                )
                .map_err(map_write_error)?;

                memo.id = i32::try_from(tx.last_insert_rowid()).map_err(|_| {
                    StoreError::InvalidArgument("memo id exceeds i32 range".into())
                })?;

                if let Some(parent_id) = memo.parent_id {
                    tx.execute(
                        "INSERT INTO memo_relation (memo_id, related_memo_id, type) \
                         VALUES (?1, ?2, 'COMMENT')",
                        rusqlite::params![memo.id, parent_id],
                    )
                    .map_err(|e| match map_write_error(e) {
                        StoreError::InvalidArgument(_) => StoreError::InvalidArgument(format!(
                            "parent memo {parent_id} does not exist"
                        )),
                        other => other,
                    })?;
                }

                commit_unless_cancelled(tx, &token)?;
                Ok(memo)
            })
            .await?;

        debug!(memo_id = memo.id, "memo created");
        Ok(memo)
    }

    #[instrument(skip(self, ctx))]
    async fn list_memos(&self, ctx: &CancellationToken, find: &FindMemo) -> StoreResult<Vec<Memo>> {
        // Compiled up front so a malformed filter never reaches storage.
        let query = build_list_query(find)?;

        self.run(ctx, move |conn| {
            let mut stmt = conn.prepare(&query.sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(query.params.iter()), MemoRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(MemoRow::into_memo).collect()
        })
        .await
    }

    #[instrument(skip(self, ctx, update), fields(memo_id = update.id))]
    async fn update_memo(&self, ctx: &CancellationToken, update: &UpdateMemo) -> StoreResult<()> {
        if update.is_empty() {
            debug!("empty patch, nothing to update");
            return Ok(());
        }

        let mut sets: Vec<&'static str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(uid) = &update.uid {
            sets.push("uid = ?");
            params.push(Value::Text(uid.clone()));
        }
        if let Some(ts) = update.created_ts {
            sets.push("created_ts = ?");
            params.push(Value::Integer(ts));
        }
        sets.push("updated_ts = ?");
        params.push(Value::Integer(
            update.updated_ts.unwrap_or_else(|| Utc::now().timestamp()),
        ));
        if let Some(status) = update.row_status {
            sets.push("row_status = ?");
            params.push(Value::Text(status.as_str().into()));
        }
        if let Some(content) = &update.content {
            sets.push("content = ?");
            params.push(Value::Text(content.clone()));
        }
        if let Some(visibility) = update.visibility {
            sets.push("visibility = ?");
            params.push(Value::Text(visibility.as_str().into()));
        }
        if let Some(pinned) = update.pinned {
            sets.push("pinned = ?");
            params.push(Value::Integer(i64::from(pinned)));
        }
        if let Some(payload) = &update.payload {
            sets.push("payload = ?");
            params.push(Value::Text(serde_json::to_string(payload)?));
        }
        params.push(Value::Integer(i64::from(update.id)));

        let sql = format!("UPDATE memo SET {} WHERE id = ?", sets.join(", "));
        let token = ctx.clone();

        let changed = self
            .run(ctx, move |conn| {
                if token.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                let tx = conn.transaction()?;
                let changed = tx
                    .execute(&sql, rusqlite::params_from_iter(params.iter()))
                    .map_err(map_write_error)?;
                commit_unless_cancelled(tx, &token)?;
                Ok(changed)
            })
            .await?;

        debug!(changed, "memo updated");
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn delete_memo(&self, ctx: &CancellationToken, delete: &DeleteMemo) -> StoreResult<()> {
        let id = delete.id;
        let token = ctx.clone();

        let removed = self
            .run(ctx, move |conn| {
                if token.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                let tx = conn.transaction()?;
                // Comments go with the memo they comment on, transitively.
                let removed = tx.execute(
                    "WITH RECURSIVE doomed(id) AS ( \
                         SELECT ?1 \
                         UNION \
                         SELECT r.memo_id FROM memo_relation r \
                         JOIN doomed d ON r.related_memo_id = d.id \
                         WHERE r.type = 'COMMENT' \
                     ) \
                     DELETE FROM memo WHERE id IN (SELECT id FROM doomed)",
                    rusqlite::params![id],
                )?;
                commit_unless_cancelled(tx, &token)?;
                Ok(removed)
            })
            .await?;

        debug!(memo_id = id, removed, "memo deleted");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Query compilation
// ═══════════════════════════════════════════════════════════════════════

/// A compiled `SELECT` with its positional parameters.
#[derive(Debug)]
struct ListQuery {
    sql: String,
    params: Vec<Value>,
}

#[derive(Default)]
struct Where {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Where {
    fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    fn push_raw(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    fn content_contains(&mut self, needle: &str) {
        self.push(
            "m.content LIKE ? ESCAPE '\\'",
            [Value::Text(format!("%{}%", escape_like(needle)))],
        );
    }

    /// `json_each` match on the tag list, including `tag/...` children.
    fn any_tag(&mut self, tags: &[String]) {
        if tags.is_empty() {
            self.push_raw("0");
            return;
        }
        let alternatives = vec!["t.value = ? OR t.value LIKE ? ESCAPE '\\'"; tags.len()].join(" OR ");
        let params = tags.iter().flat_map(|tag| {
            [
                Value::Text(tag.clone()),
                Value::Text(format!("{}/%", escape_like(tag))),
            ]
        });
        self.push(
            format!(
                "EXISTS (SELECT 1 FROM json_each(m.payload, '$.tags') t WHERE {alternatives})"
            ),
            params.collect::<Vec<_>>(),
        );
    }

    fn visibility_in(&mut self, list: &[Visibility]) {
        if list.is_empty() {
            self.push_raw("0");
            return;
        }
        self.push(
            format!("m.visibility IN ({})", Self::placeholders(list.len())),
            list.iter().map(|v| Self::text(v.as_str())).collect::<Vec<_>>(),
        );
    }

    fn payload(&mut self, find: &FindMemoPayload) {
        if let Some(raw) = &find.raw {
            self.push(
                "m.payload LIKE ? ESCAPE '\\'",
                [Value::Text(format!("%{}%", escape_like(raw)))],
            );
        }
        for tag in &find.tag_search {
            self.any_tag(std::slice::from_ref(tag));
        }
        let flags = [
            (find.has_link, PayloadFlag::HasLink),
            (find.has_task_list, PayloadFlag::HasTaskList),
            (find.has_code, PayloadFlag::HasCode),
            (find.has_incomplete_tasks, PayloadFlag::HasIncompleteTasks),
        ];
        for (on, flag) in flags {
            if on {
                self.flag(flag);
            }
        }
    }

    fn flag(&mut self, flag: PayloadFlag) {
        self.push_raw(format!("json_extract(m.payload, '{}') = 1", flag.json_path()));
    }

    fn condition(&mut self, condition: &Condition) {
        match condition {
            Condition::Int { field, op, value } => self.push(
                format!("m.{} {} ?", field.column(), op.as_sql()),
                [Value::Integer(*value)],
            ),
            Condition::Pinned(pinned) => {
                self.push("m.pinned = ?", [Value::Integer(i64::from(*pinned))])
            }
            Condition::Visibility { equal, value } => self.push(
                format!("m.visibility {} ?", if *equal { "=" } else { "!=" }),
                [Self::text(value.as_str())],
            ),
            Condition::RowStatus { equal, value } => self.push(
                format!("m.row_status {} ?", if *equal { "=" } else { "!=" }),
                [Self::text(value.as_str())],
            ),
            Condition::VisibilityIn(list) => self.visibility_in(list),
            Condition::TagIn(tags) => self.any_tag(tags),
            Condition::ContentContains(needle) => self.content_contains(needle),
            Condition::Flag(flag) => self.flag(*flag),
        }
    }
}

fn build_list_query(find: &FindMemo) -> StoreResult<ListQuery> {
    let conditions = match &find.filter {
        Some(expr) => filter::parse_filter(expr)?,
        None => Vec::new(),
    };

    let mut w = Where::default();

    if let Some(id) = find.id {
        w.push("m.id = ?", [Value::Integer(i64::from(id))]);
    }
    if let Some(uid) = &find.uid {
        w.push("m.uid = ?", [Where::text(uid)]);
    }
    if let Some(short_id) = &find.short_id {
        w.push("m.short_id = ?", [Where::text(short_id)]);
    }
    if let Some(status) = find.row_status {
        w.push("m.row_status = ?", [Where::text(status.as_str())]);
    }
    if let Some(creator_id) = find.creator_id {
        w.push("m.creator_id = ?", [Value::Integer(i64::from(creator_id))]);
    }
    if let Some(ts) = find.created_ts_after {
        w.push("m.created_ts >= ?", [Value::Integer(ts)]);
    }
    if let Some(ts) = find.created_ts_before {
        w.push("m.created_ts < ?", [Value::Integer(ts)]);
    }
    if let Some(ts) = find.updated_ts_after {
        w.push("m.updated_ts >= ?", [Value::Integer(ts)]);
    }
    if let Some(ts) = find.updated_ts_before {
        w.push("m.updated_ts < ?", [Value::Integer(ts)]);
    }
    for term in &find.content_search {
        w.content_contains(term);
    }
    if !find.visibility_list.is_empty() {
        w.visibility_in(&find.visibility_list);
    }
    if let Some(payload) = &find.payload_find {
        w.payload(payload);
    }
    if find.exclude_comments {
        w.push_raw("r.related_memo_id IS NULL");
    }
    for condition in &conditions {
        w.condition(condition);
    }

    let content = if find.exclude_content { "''" } else { "m.content" };
    let mut sql = format!(
        "SELECT m.id, m.uid, m.short_id, m.creator_id, m.created_ts, m.updated_ts, \
         m.row_status, {content}, m.visibility, m.pinned, m.payload, r.related_memo_id \
         FROM memo m \
         LEFT JOIN memo_relation r ON r.memo_id = m.id AND r.type = 'COMMENT'"
    );
    if !w.clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&w.clauses.join(" AND "));
    }

    sql.push_str(" ORDER BY ");
    sql.push_str(&order_by(find).join(", "));

    let mut params = w.params;
    match (find.limit, find.offset) {
        (Some(limit), offset) => {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
            if let Some(offset) = offset {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(i64::from(offset)));
            }
        }
        (None, Some(offset)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Value::Integer(i64::from(offset)));
        }
        (None, None) => {}
    }

    Ok(ListQuery { sql, params })
}

/// Pinned first (if asked), then updated time (if asked), then created
/// time, then id. Time keys and the tie-break share one direction.
fn order_by(find: &FindMemo) -> Vec<String> {
    let dir = if find.order_by_time_asc { "ASC" } else { "DESC" };
    let mut keys = Vec::with_capacity(4);
    if find.order_by_pinned {
        keys.push("m.pinned DESC".to_string());
    }
    if find.order_by_updated_ts {
        keys.push(format!("m.updated_ts {dir}"));
    }
    keys.push(format!("m.created_ts {dir}"));
    keys.push(format!("m.id {dir}"));
    keys
}

/// Escape `%`, `_`, and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Commit `tx` unless the caller has cancelled meanwhile. An uncommitted
/// transaction rolls back when dropped.
fn commit_unless_cancelled(
    tx: rusqlite::Transaction<'_>,
    token: &CancellationToken,
) -> StoreResult<()> {
    if token.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    tx.commit()?;
    Ok(())
}

/// Translate unique and foreign-key violations into store errors.
fn map_write_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
        let message = message.as_deref().unwrap_or_default();
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE if message.contains("memo.short_id") => {
                return StoreError::Conflict { field: "short_id" };
            }
            ffi::SQLITE_CONSTRAINT_UNIQUE if message.contains("memo.uid") => {
                return StoreError::Conflict { field: "uid" };
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return StoreError::InvalidArgument("referenced memo does not exist".into());
            }
            _ => {}
        }
    }
    StoreError::Sqlite(err)
}

// ═══════════════════════════════════════════════════════════════════════
//  Row mapping
// ═══════════════════════════════════════════════════════════════════════

struct MemoRow {
    id: i32,
    uid: String,
    short_id: String,
    creator_id: i32,
    created_ts: i64,
    updated_ts: i64,
    row_status: String,
    content: String,
    visibility: String,
    pinned: bool,
    payload: String,
    parent_id: Option<i32>,
}

impl MemoRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uid: row.get(1)?,
            short_id: row.get(2)?,
            creator_id: row.get(3)?,
            created_ts: row.get(4)?,
            updated_ts: row.get(5)?,
            row_status: row.get(6)?,
            content: row.get(7)?,
            visibility: row.get(8)?,
            pinned: row.get(9)?,
            payload: row.get(10)?,
            parent_id: row.get(11)?,
        })
    }

    fn into_memo(self) -> StoreResult<Memo> {
        let payload: MemoPayload = serde_json::from_str(&self.payload)?;
        Ok(Memo {
            id: self.id,
            uid: self.uid,
            short_id: self.short_id,
            row_status: RowStatus::parse(&self.row_status)?,
            creator_id: self.creator_id,
            created_ts: self.created_ts,
            updated_ts: self.updated_ts,
            content: self.content,
            visibility: Visibility::parse_lossy(&self.visibility),
            pinned: self.pinned,
            payload,
            parent_id: self.parent_id,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
