//! Memo entity and the descriptors used to find, patch, and delete memos.
//!
//! [`FindMemo`] is a composable filter: every field is optional and the
//! fields that are set are combined with logical AND. Drivers translate it
//! into whatever their storage understands.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Enumerations
// ═══════════════════════════════════════════════════════════════════════

/// Who may read a memo.
///
/// Unrecognised stored or deserialized values normalize to
/// [`Visibility::Private`]; [`Visibility::parse`] is the strict form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Visibility {
    /// Readable by anyone, including anonymous visitors.
    Public,
    /// Readable by signed-in users.
    Protected,
    /// Readable by the creator only.
    #[default]
    Private,
}

impl Visibility {
    /// Parse a visibility, mapping anything unknown to `Private`.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "PUBLIC" => Self::Public,
            "PROTECTED" => Self::Protected,
            _ => Self::Private,
        }
    }

    /// Parse a caller-supplied visibility, rejecting unknown values.
    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "PUBLIC" => Ok(Self::Public),
            "PROTECTED" => Ok(Self::Protected),
            "PRIVATE" => Ok(Self::Private),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown visibility: {other}"
            ))),
        }
    }

    /// Convert to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Protected => "PROTECTED",
            Self::Private => "PRIVATE",
        }
    }
}

impl From<String> for Visibility {
    fn from(s: String) -> Self {
        Self::parse_lossy(&s)
    }
}

impl From<Visibility> for String {
    fn from(v: Visibility) -> Self {
        v.as_str().to_string()
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a memo row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowStatus {
    /// Live and listed.
    #[default]
    Normal,
    /// Hidden from default listings but kept.
    Archived,
}

impl RowStatus {
    /// Convert from the stored string representation.
    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "NORMAL" => Ok(Self::Normal),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown row status: {other}"
            ))),
        }
    }

    /// Convert to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Memo
// ═══════════════════════════════════════════════════════════════════════

/// Structured metadata derived from memo content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoPayload {
    pub tags: Vec<String>,
    pub property: MemoProperty,
}

/// Content features detected when the memo was last written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoProperty {
    pub has_link: bool,
    pub has_task_list: bool,
    pub has_code: bool,
    pub has_incomplete_tasks: bool,
}

/// A persisted note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    /// System-assigned row identifier.
    pub id: i32,
    /// User-facing unique identifier.
    pub uid: String,
    /// Shareable identifier of the form `abc1234`, assigned on create.
    pub short_id: String,

    pub row_status: RowStatus,
    pub creator_id: i32,
    /// Unix timestamp (seconds) of creation.
    pub created_ts: i64,
    /// Unix timestamp (seconds) of the last update.
    pub updated_ts: i64,

    pub content: String,
    pub visibility: Visibility,
    pub pinned: bool,
    pub payload: MemoPayload,

    /// The memo this one comments on, if any.
    pub parent_id: Option<i32>,
}

impl Memo {
    /// A new, unsaved memo with default status, visibility, and payload.
    ///
    /// `id`, `short_id`, and zero timestamps are filled in on create.
    pub fn new(uid: impl Into<String>, creator_id: i32, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            uid: uid.into(),
            short_id: String::new(),
            row_status: RowStatus::Normal,
            creator_id,
            created_ts: 0,
            updated_ts: 0,
            content: content.into(),
            visibility: Visibility::default(),
            pinned: false,
            payload: MemoPayload::default(),
            parent_id: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_payload(mut self, payload: MemoPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_parent(mut self, parent_id: i32) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_created_ts(mut self, ts: i64) -> Self {
        self.created_ts = ts;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Descriptors
// ═══════════════════════════════════════════════════════════════════════

/// Filter describing which memos to retrieve.
///
/// Timestamp ranges are half-open: `*_after` is inclusive, `*_before` is
/// exclusive. Results are ordered by pinned (if requested), then updated
/// time (if requested), then created time, then id; time keys run
/// descending unless `order_by_time_asc` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindMemo {
    pub id: Option<i32>,
    pub uid: Option<String>,
    pub short_id: Option<String>,

    pub row_status: Option<RowStatus>,
    pub creator_id: Option<i32>,
    pub created_ts_after: Option<i64>,
    pub created_ts_before: Option<i64>,
    pub updated_ts_after: Option<i64>,
    pub updated_ts_before: Option<i64>,

    /// Every term must appear in the content.
    pub content_search: Vec<String>,
    /// Empty means any visibility.
    pub visibility_list: Vec<Visibility>,
    pub payload_find: Option<FindMemoPayload>,
    /// Return memos with an empty `content`.
    pub exclude_content: bool,
    /// Leave out memos that comment on another memo.
    pub exclude_comments: bool,
    /// Driver-interpreted filter expression.
    pub filter: Option<String>,

    pub limit: Option<u32>,
    pub offset: Option<u32>,

    pub order_by_updated_ts: bool,
    pub order_by_pinned: bool,
    pub order_by_time_asc: bool,
}

impl FindMemo {
    pub fn by_id(id: i32) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            ..Self::default()
        }
    }

    pub fn by_short_id(short_id: impl Into<String>) -> Self {
        Self {
            short_id: Some(short_id.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_visibility_list(mut self, visibilities: impl IntoIterator<Item = Visibility>) -> Self {
        self.visibility_list = visibilities.into_iter().collect();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Sub-filter over the memo payload.
///
/// A `false` flag imposes no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindMemoPayload {
    /// Substring of the serialized payload.
    pub raw: Option<String>,
    /// Every tag must be present; a tag also matches its `tag/...` children.
    pub tag_search: Vec<String>,
    pub has_link: bool,
    pub has_task_list: bool,
    pub has_code: bool,
    pub has_incomplete_tasks: bool,
}

/// Patch applied to a single memo. Only `Some` fields change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateMemo {
    pub id: i32,
    pub uid: Option<String>,
    pub created_ts: Option<i64>,
    /// Explicit update time; drivers use "now" when this is `None`.
    pub updated_ts: Option<i64>,
    pub row_status: Option<RowStatus>,
    pub content: Option<String>,
    pub visibility: Option<Visibility>,
    pub pinned: Option<bool>,
    pub payload: Option<MemoPayload>,
}

impl UpdateMemo {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.uid.is_none()
            && self.created_ts.is_none()
            && self.updated_ts.is_none()
            && self.row_status.is_none()
            && self.content.is_none()
            && self.visibility.is_none()
            && self.pinned.is_none()
            && self.payload.is_none()
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_row_status(mut self, status: RowStatus) -> Self {
        self.row_status = Some(status);
        self
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    pub fn with_payload(mut self, payload: MemoPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Identifies a memo to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteMemo {
    pub id: i32,
}
