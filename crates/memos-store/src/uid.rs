//! User-facing memo identifier syntax.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{StoreError, StoreResult};

/// 1 to 32 ASCII alphanumerics, hyphens allowed only on the inside.
static UID_MATCHER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,30}[a-zA-Z0-9])?$").expect("UID pattern is valid")
});

/// Whether `uid` is a well-formed memo UID.
pub fn is_valid_uid(uid: &str) -> bool {
    UID_MATCHER.is_match(uid)
}

/// Fail with [`StoreError::InvalidArgument`] unless `uid` is well formed.
pub fn validate_uid(uid: &str) -> StoreResult<()> {
    if is_valid_uid(uid) {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!("invalid uid: {uid:?}")))
    }
}
