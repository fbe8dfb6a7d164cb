mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{count_records, seed_record, set_error_state, test_store};
use crosslist_daemon::lease::LeaseManager;
use crosslist_daemon::record::{
    get_record, mark_sold, observe_listing, record_sync_failure, record_sync_partial,
    record_sync_skipped, record_sync_success, sync_stats, ProcessingStatus, RecordError, SoldFrom,
    SyncStatus, MAX_ERROR_MESSAGE_LEN,
};

#[tokio::test]
async fn test_observe_listing_creates_pending_record() {
    let store = test_store().await;

    let record = observe_listing(&store, "ext-1")
        .await
        .expect("Should create record");

    assert_eq!(record.external_id, "ext-1");
    assert_eq!(record.sync_status, SyncStatus::Pending);
    assert_eq!(record.processing_status, ProcessingStatus::Idle);
    assert_eq!(record.sync_retry_count, 0);
    assert!(record.internal_id.is_none());
    assert!(record.last_sync_attempt_at.is_none());
    assert_eq!(record.created_at, record.updated_at);
}

#[tokio::test]
async fn test_observe_listing_returns_existing_record() {
    let store = test_store().await;

    let first = observe_listing(&store, "ext-1").await.expect("Should create");
    let second = observe_listing(&store, "ext-1").await.expect("Should fetch");

    assert_eq!(first.id, second.id);
    assert_eq!(count_records(&store).await, 1);
}

#[tokio::test]
async fn test_get_record_missing_listing_is_none() {
    let store = test_store().await;
    assert!(get_record(&store, "ext-missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_success_links_product_and_clears_error_state() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;
    record_sync_failure(&store, "ext-1", "upstream 500")
        .await
        .expect("Should record failure");

    record_sync_success(&store, "ext-1", Some("prod-1"))
        .await
        .expect("Should record success");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.internal_id.as_deref(), Some("prod-1"));
    assert_eq!(record.sync_retry_count, 0);
    assert!(record.sync_error_message.is_none());
    assert!(record.last_sync_attempt_at.is_some());
    assert!(record.last_successful_sync_at.is_some());
}

#[tokio::test]
async fn test_success_without_product_keeps_existing_link() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;
    record_sync_success(&store, "ext-1", Some("prod-1"))
        .await
        .expect("Should record success");

    record_sync_success(&store, "ext-1", None)
        .await
        .expect("Should record success");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.internal_id.as_deref(), Some("prod-1"));
}

#[tokio::test]
async fn test_failures_accumulate_retry_count() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;

    record_sync_failure(&store, "ext-1", "timeout")
        .await
        .expect("Should record failure");
    record_sync_failure(&store, "ext-1", "rate limited")
        .await
        .expect("Should record failure");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Error);
    assert_eq!(record.sync_retry_count, 2);
    assert_eq!(record.sync_error_message.as_deref(), Some("rate limited"));
}

#[tokio::test]
async fn test_failure_clips_oversized_message() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;

    let message = "x".repeat(MAX_ERROR_MESSAGE_LEN + 100);
    record_sync_failure(&store, "ext-1", &message)
        .await
        .expect("Should record failure");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    let stored = record.sync_error_message.expect("Should keep a message");
    assert_eq!(stored.chars().count(), MAX_ERROR_MESSAGE_LEN);
}

#[tokio::test]
async fn test_partial_failure_uses_its_own_status() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;

    record_sync_partial(&store, "ext-1", "price updated, stock push failed")
        .await
        .expect("Should record partial failure");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::PartialError);
    assert_eq!(record.sync_retry_count, 1);
}

#[tokio::test]
async fn test_skipped_attempt_keeps_success_bookkeeping() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;
    record_sync_success(&store, "ext-1", Some("prod-1"))
        .await
        .expect("Should record success");
    let before = get_record(&store, "ext-1").await.unwrap().unwrap();

    record_sync_skipped(&store, "ext-1")
        .await
        .expect("Should record skip");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::SkippedNoChange);
    assert_eq!(record.sync_retry_count, 0);
    assert_eq!(record.last_successful_sync_at, before.last_successful_sync_at);
}

#[tokio::test]
async fn test_lifecycle_on_unknown_listing_is_not_found() {
    let store = test_store().await;

    let err = record_sync_success(&store, "ext-missing", None)
        .await
        .expect_err("Should refuse unknown listing");
    assert!(matches!(err, RecordError::NotFound(_)));
    assert!(err.to_string().contains("ext-missing"));
}

#[tokio::test]
async fn test_mark_sold_records_first_sale() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;
    let at = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();

    mark_sold(&store, "ext-1", SoldFrom::Source, at)
        .await
        .expect("Should mark sold");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.sold_from, Some(SoldFrom::Source));
    assert_eq!(record.sold_at, Some(at));
    assert_eq!(record.source_sold_at, Some(at));
    assert!(record.storefront_sold_at.is_none());
}

#[tokio::test]
async fn test_mark_sold_on_both_sides_upgrades_to_both() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;
    let first = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2026, 1, 16, 9, 30, 0).unwrap();

    mark_sold(&store, "ext-1", SoldFrom::Source, first)
        .await
        .expect("Should mark sold");
    mark_sold(&store, "ext-1", SoldFrom::Storefront, later)
        .await
        .expect("Should mark sold");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.sold_from, Some(SoldFrom::Both));
    // The overall sale time stays at the first sale.
    assert_eq!(record.sold_at, Some(first));
    assert_eq!(record.source_sold_at, Some(first));
    assert_eq!(record.storefront_sold_at, Some(later));
}

#[tokio::test]
async fn test_mark_sold_same_side_twice_keeps_first_time() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;
    let first = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2026, 1, 16, 9, 30, 0).unwrap();

    mark_sold(&store, "ext-1", SoldFrom::Source, first)
        .await
        .expect("Should mark sold");
    mark_sold(&store, "ext-1", SoldFrom::Source, later)
        .await
        .expect("Should mark sold");

    let record = get_record(&store, "ext-1").await.unwrap().unwrap();
    assert_eq!(record.sold_from, Some(SoldFrom::Source));
    assert_eq!(record.source_sold_at, Some(first));
}

#[tokio::test]
async fn test_sync_stats_counts_by_status_and_processing() {
    let store = test_store().await;
    seed_record(&store, "ext-1").await;
    seed_record(&store, "ext-2").await;
    seed_record(&store, "ext-3").await;
    seed_record(&store, "ext-4").await;
    record_sync_success(&store, "ext-1", None)
        .await
        .expect("Should record success");
    record_sync_success(&store, "ext-2", None)
        .await
        .expect("Should record success");
    set_error_state(&store, "ext-3", "upstream 500", 1).await;
    let leases = LeaseManager::new(store.clone());
    leases
        .acquire("ext-2", "worker-a", Duration::from_secs(600))
        .await
        .unwrap()
        .expect("Should acquire lease");

    let stats = sync_stats(&store).await.expect("Should compute stats");

    assert_eq!(stats.total_records, 4);
    assert_eq!(stats.processing, 1);
    assert_eq!(status_count(&stats.by_sync_status, SyncStatus::Synced), 2);
    assert_eq!(status_count(&stats.by_sync_status, SyncStatus::Error), 1);
    assert_eq!(status_count(&stats.by_sync_status, SyncStatus::Pending), 1);
}

fn status_count(counts: &[(SyncStatus, i64)], status: SyncStatus) -> i64 {
    counts
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, count)| *count)
        .unwrap_or(0)
}
