//! Duplicate record collapse.
//!
//! Duplicates accumulate along two keys: the external marketplace id (two
//! observers racing on a new listing) and the storefront product id (a
//! listing relinked to an existing product). Each collapse keeps exactly one
//! survivor per key value and deletes the rest.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use super::engine::ReconciliationError;
use crate::store::SyncStore;

/// Which key family to deduplicate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKey {
    /// Marketplace listing id. The survivor is the most recently updated
    /// row; ties keep the smallest row id.
    ExternalId,
    /// Storefront product id. The survivor is the row with the most recent
    /// successful sync; never-synced rows count as oldest, ties keep the
    /// smallest row id.
    InternalId,
}

impl DuplicateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKey::ExternalId => "external_id",
            DuplicateKey::InternalId => "internal_id",
        }
    }
}

impl fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one duplicate collapse pass.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCollapse {
    pub total_removed: u64,
    /// Removed row count per duplicated key value.
    pub removed_by_key: BTreeMap<String, u64>,
}

pub(super) async fn collapse(
    store: &SyncStore,
    key: DuplicateKey,
) -> Result<DuplicateCollapse, ReconciliationError> {
    let (group_sql, survivor_sql, delete_sql) = match key {
        DuplicateKey::ExternalId => (
            "SELECT external_id FROM sync_records
             GROUP BY external_id HAVING COUNT(*) > 1",
            "SELECT id FROM sync_records WHERE external_id = ?
             ORDER BY updated_at DESC, id ASC LIMIT 1",
            "DELETE FROM sync_records WHERE external_id = ? AND id != ?",
        ),
        DuplicateKey::InternalId => (
            "SELECT internal_id FROM sync_records WHERE internal_id IS NOT NULL
             GROUP BY internal_id HAVING COUNT(*) > 1",
            "SELECT id FROM sync_records WHERE internal_id = ?
             ORDER BY COALESCE(last_successful_sync_at, -1) DESC, id ASC LIMIT 1",
            "DELETE FROM sync_records WHERE internal_id = ? AND id != ?",
        ),
    };

    let duplicated: Vec<String> = sqlx::query_scalar(group_sql)
        .fetch_all(store.pool())
        .await?;

    let mut removed_by_key = BTreeMap::new();
    let mut total_removed = 0u64;

    for value in duplicated {
        // The group can shrink between the scan and this point; skip if so.
        let survivor: Option<i64> = sqlx::query_scalar(survivor_sql)
            .bind(&value)
            .fetch_optional(store.pool())
            .await?;
        let Some(survivor) = survivor else { continue };

        let result = sqlx::query(delete_sql)
            .bind(&value)
            .bind(survivor)
            .execute(store.pool())
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(key = %key, value = %value, removed, survivor, "collapsed duplicate records");
            total_removed += removed;
            removed_by_key.insert(value, removed);
        }
    }

    if total_removed > 0 {
        info!(
            key = %key,
            total_removed,
            groups = removed_by_key.len(),
            "duplicate collapse finished"
        );
    }

    Ok(DuplicateCollapse {
        total_removed,
        removed_by_key,
    })
}
