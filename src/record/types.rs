//! Sync record data model.
//!
//! Rows come back from SQLite as plain strings and millisecond integers;
//! `SyncRecordRow` is that raw shape and `into_record` validates it into the
//! typed `SyncRecord` the rest of the daemon works with.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::store::StoreError;

/// Columns selected (and returned) whenever a full record is read.
pub(crate) const RECORD_COLUMNS: &str = "id, external_id, internal_id, sync_status, \
     sync_error_message, sync_retry_count, last_sync_attempt_at, last_successful_sync_at, \
     processing_status, processing_started_at, processing_owner_id, processing_timeout_at, \
     sold_from, sold_at, source_sold_at, storefront_sold_at, created_at, updated_at";

/// Outcome of the most recent sync attempt for a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Synced,
    Error,
    Pending,
    PartialError,
    SkippedNoChange,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Error => "ERROR",
            SyncStatus::Pending => "PENDING",
            SyncStatus::PartialError => "PARTIAL_ERROR",
            SyncStatus::SkippedNoChange => "SKIPPED_NO_CHANGE",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYNCED" => Ok(SyncStatus::Synced),
            "ERROR" => Ok(SyncStatus::Error),
            "PENDING" => Ok(SyncStatus::Pending),
            "PARTIAL_ERROR" => Ok(SyncStatus::PartialError),
            "SKIPPED_NO_CHANGE" => Ok(SyncStatus::SkippedNoChange),
            _ => Err(format!("unknown sync status: {s}")),
        }
    }
}

/// Lease state of a record's processing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStatus {
    Idle,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Idle => "idle",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ProcessingStatus::Idle),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(format!("unknown processing status: {s}")),
        }
    }
}

/// Which side a sold listing was sold on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoldFrom {
    Source,
    Storefront,
    Both,
}

impl SoldFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoldFrom::Source => "source",
            SoldFrom::Storefront => "storefront",
            SoldFrom::Both => "both",
        }
    }
}

impl fmt::Display for SoldFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoldFrom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(SoldFrom::Source),
            "storefront" => Ok(SoldFrom::Storefront),
            "both" => Ok(SoldFrom::Both),
            _ => Err(format!("unknown sold_from value: {s}")),
        }
    }
}

/// One listing's sync bookkeeping record.
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub id: i64,
    /// Listing id on the source marketplace.
    pub external_id: String,
    /// Product id on the storefront, once the listing has been linked.
    pub internal_id: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_error_message: Option<String>,
    /// Consecutive failed attempts since the last success.
    pub sync_retry_count: i64,
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub processing_status: ProcessingStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_owner_id: Option<String>,
    pub processing_timeout_at: Option<DateTime<Utc>>,
    pub sold_from: Option<SoldFrom>,
    pub sold_at: Option<DateTime<Utc>>,
    pub source_sold_at: Option<DateTime<Utc>>,
    pub storefront_sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Whether a live processing lease is held on this record right now.
    pub fn is_leased(&self, at: DateTime<Utc>) -> bool {
        self.processing_status == ProcessingStatus::Processing
            && self.processing_timeout_at.map_or(true, |deadline| at < deadline)
    }
}

/// Raw row shape as stored, before validation.
#[derive(FromRow)]
pub(crate) struct SyncRecordRow {
    pub id: i64,
    pub external_id: String,
    pub internal_id: Option<String>,
    pub sync_status: String,
    pub sync_error_message: Option<String>,
    pub sync_retry_count: i64,
    pub last_sync_attempt_at: Option<i64>,
    pub last_successful_sync_at: Option<i64>,
    pub processing_status: String,
    pub processing_started_at: Option<i64>,
    pub processing_owner_id: Option<String>,
    pub processing_timeout_at: Option<i64>,
    pub sold_from: Option<String>,
    pub sold_at: Option<i64>,
    pub source_sold_at: Option<i64>,
    pub storefront_sold_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncRecordRow {
    pub(crate) fn into_record(self) -> Result<SyncRecord, StoreError> {
        Ok(SyncRecord {
            id: self.id,
            external_id: self.external_id,
            internal_id: self.internal_id,
            sync_status: parse_column("sync_status", &self.sync_status)?,
            sync_error_message: self.sync_error_message,
            sync_retry_count: self.sync_retry_count,
            last_sync_attempt_at: opt_timestamp("last_sync_attempt_at", self.last_sync_attempt_at)?,
            last_successful_sync_at: opt_timestamp(
                "last_successful_sync_at",
                self.last_successful_sync_at,
            )?,
            processing_status: parse_column("processing_status", &self.processing_status)?,
            processing_started_at: opt_timestamp(
                "processing_started_at",
                self.processing_started_at,
            )?,
            processing_owner_id: self.processing_owner_id,
            processing_timeout_at: opt_timestamp(
                "processing_timeout_at",
                self.processing_timeout_at,
            )?,
            sold_from: match self.sold_from {
                Some(value) => Some(parse_column("sold_from", &value)?),
                None => None,
            },
            sold_at: opt_timestamp("sold_at", self.sold_at)?,
            source_sold_at: opt_timestamp("source_sold_at", self.source_sold_at)?,
            storefront_sold_at: opt_timestamp("storefront_sold_at", self.storefront_sold_at)?,
            created_at: timestamp("created_at", self.created_at)?,
            updated_at: timestamp("updated_at", self.updated_at)?,
        })
    }
}

fn parse_column<T>(column: &'static str, value: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|_| StoreError::InvalidColumn {
        column,
        value: value.to_string(),
    })
}

fn timestamp(column: &'static str, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::InvalidColumn {
        column,
        value: ms.to_string(),
    })
}

fn opt_timestamp(column: &'static str, ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(|value| timestamp(column, value)).transpose()
}
