// Poll cycles: deltas, counter resets, skipped nodes, bootstrap

mod common;

use chrono::{Duration, NaiveDate};
use common::{FakeReading, harness, local, second_service};
use traffic_reporter::collector::last_skipped;
use traffic_reporter::models::Usage;

#[tokio::test]
async fn reset_sequence_yields_compensated_deltas() {
    let h = harness().await;
    let times = [
        local(2026, 10, 19, 10, 0),
        local(2026, 10, 19, 10, 5),
        local(2026, 10, 19, 10, 10),
        local(2026, 10, 19, 10, 15),
    ];
    let mut deltas = Vec::new();
    for (reading, at) in [100u64, 150, 40, 90].into_iter().zip(times) {
        h.source.counters("n1", "hk-1", reading, 0);
        let report = h.service.collect_at(at).await.unwrap();
        deltas.push(report.total.upload);
    }
    assert_eq!(deltas, vec![0, 50, 40, 50]);

    let samples = h
        .repo
        .query_samples(Some("n1"), times[0].timestamp(), times[3].timestamp() + 1)
        .await
        .unwrap();
    let uploads: Vec<u64> = samples.iter().map(|s| s.usage.upload).collect();
    // First sighting only sets the baseline.
    assert_eq!(uploads, vec![50, 40, 50]);

    let baselines = h.repo.get_baselines().await.unwrap();
    assert_eq!(baselines["n1"].accumulated_upload, 140);
    assert_eq!(baselines["n1"].last_upload, 90);

    let resets = h
        .repo
        .reset_nodes_between(times[0], times[3])
        .await
        .unwrap();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].name, "hk-1");
}

#[tokio::test]
async fn missing_node_spans_gap_without_reset() {
    let h = harness().await;
    h.source.counters("n1", "hk-1", 1_000, 500);
    h.service.collect_at(local(2026, 10, 19, 10, 0)).await.unwrap();

    h.source.set("n1", "hk-1", FakeReading::Hang);
    let report = h.service.collect_at(local(2026, 10, 19, 10, 5)).await.unwrap();
    assert_eq!(report.observed, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].label(), "hk-1(timeout)");

    h.source.counters("n1", "hk-1", 1_800, 900);
    let report = h.service.collect_at(local(2026, 10, 19, 10, 10)).await.unwrap();
    assert_eq!(report.resets, 0);
    assert_eq!(report.total, Usage::new(800, 400));

    let resets = h
        .repo
        .reset_nodes_between(local(2026, 10, 19, 0, 0), local(2026, 10, 20, 0, 0))
        .await
        .unwrap();
    assert!(resets.is_empty());
}

#[tokio::test]
async fn failing_node_does_not_fail_cycle() {
    let h = harness().await;
    h.source.counters("n1", "alpha", 10, 10);
    h.source.set("n2", "beta", FakeReading::Fail);
    let report = h.service.collect_at(local(2026, 10, 19, 10, 0)).await.unwrap();
    assert_eq!(report.listed, 2);
    assert_eq!(report.observed, 1);
    assert_eq!(
        last_skipped(&h.repo).await.unwrap(),
        vec!["beta(http_status)".to_string()]
    );

    // A clean cycle clears the skipped list.
    h.source.counters("n2", "beta", 5, 5);
    h.service.collect_at(local(2026, 10, 19, 10, 5)).await.unwrap();
    assert!(last_skipped(&h.repo).await.unwrap().is_empty());
}

#[tokio::test]
async fn node_list_failure_is_an_error() {
    let h = harness().await;
    h.source
        .list_fails
        .store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(h.service.collect_at(local(2026, 10, 19, 10, 0)).await.is_err());
}

#[tokio::test]
async fn bootstrap_then_collect_produces_zero_deltas() {
    let h = harness().await;
    h.source.counters("n1", "alpha", 5_000_000, 9_000_000);
    h.source.counters("n2", "beta", 42, 0);

    let boot = h.service.bootstrap_at(local(2026, 10, 19, 9, 0)).await.unwrap();
    assert_eq!(boot.observed, 2);
    assert_eq!(boot.first_seen, 2);

    let report = h.service.collect_at(local(2026, 10, 19, 9, 5)).await.unwrap();
    assert_eq!(report.observed, 2);
    assert_eq!(report.first_seen, 0);
    assert_eq!(report.resets, 0);
    assert!(report.total.is_zero());
}

#[tokio::test]
async fn bootstrap_keeps_accumulated_totals() {
    let h = harness().await;
    h.source.counters("n1", "alpha", 100, 100);
    h.service.collect_at(local(2026, 10, 19, 9, 0)).await.unwrap();
    h.source.counters("n1", "alpha", 300, 100);
    h.service.collect_at(local(2026, 10, 19, 9, 5)).await.unwrap();

    h.source.counters("n1", "alpha", 50, 50);
    let boot = h.service.bootstrap_at(local(2026, 10, 19, 9, 7)).await.unwrap();
    assert_eq!(boot.first_seen, 0);

    let baselines = h.repo.get_baselines().await.unwrap();
    assert_eq!(baselines["n1"].accumulated_upload, 200);
    assert_eq!(baselines["n1"].last_upload, 50);

    // No reset recorded for the re-anchor.
    let resets = h
        .repo
        .reset_nodes_between(local(2026, 10, 19, 0, 0), local(2026, 10, 20, 0, 0))
        .await
        .unwrap();
    assert!(resets.is_empty());
}

#[tokio::test]
async fn concurrent_collectors_count_traffic_once() {
    let h = harness().await;
    let other = second_service(&h).await;
    h.source.counters("n1", "alpha", 1_000, 0);
    h.service.collect_at(local(2026, 10, 19, 10, 0)).await.unwrap();

    h.source.counters("n1", "alpha", 1_500, 0);
    let at = local(2026, 10, 19, 10, 5);
    let (a, b) = tokio::join!(h.service.collect_at(at), other.collect_at(at));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.observed + b.observed, 1);
    assert_eq!(a.stale + b.stale, 1);
    assert_eq!(a.total.upload + b.total.upload, 500);

    let baselines = h.repo.get_baselines().await.unwrap();
    assert_eq!(baselines["n1"].accumulated_upload, 500);
    let sampled: u64 = h
        .repo
        .query_samples(Some("n1"), 0, i64::MAX)
        .await
        .unwrap()
        .iter()
        .map(|s| s.usage.upload)
        .sum();
    assert_eq!(sampled, 500);
}

#[tokio::test]
async fn older_reading_than_baseline_is_ignored() {
    let h = harness().await;
    let other = second_service(&h).await;
    h.source.counters("n1", "alpha", 1_000, 0);
    h.service.collect_at(local(2026, 10, 19, 10, 0)).await.unwrap();
    h.source.counters("n1", "alpha", 1_500, 0);
    h.service.collect_at(local(2026, 10, 19, 10, 5)).await.unwrap();

    // A slower process commits a reading taken before the latest cycle.
    h.source.counters("n1", "alpha", 1_200, 0);
    let late = other.collect_at(local(2026, 10, 19, 10, 4)).await.unwrap();
    assert_eq!(late.stale, 1);
    assert_eq!(late.resets, 0);

    let baselines = h.repo.get_baselines().await.unwrap();
    assert_eq!(baselines["n1"].last_upload, 1_500);
    assert_eq!(baselines["n1"].accumulated_upload, 500);
}

#[tokio::test]
async fn first_cycle_after_midnight_counts_toward_new_day() {
    let h = harness().await;
    h.source.counters("n1", "alpha", 0, 0);
    h.service.collect_at(local(2026, 10, 19, 23, 50)).await.unwrap();
    h.source.counters("n1", "alpha", 10, 0);
    h.service.collect_at(local(2026, 10, 19, 23, 55)).await.unwrap();
    h.source.counters("n1", "alpha", 30, 0);
    let after_midnight = local(2026, 10, 20, 0, 0) + Duration::seconds(30);
    h.service.collect_at(after_midnight).await.unwrap();

    let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    h.repo.rollup(day, local(2026, 10, 20, 0, 10)).await.unwrap();
    let records = h.repo.query_daily(Some("n1"), day, day).await.unwrap();
    assert_eq!(records[0].usage, Usage::new(10, 0));

    let next_day = h
        .repo
        .query_samples(Some("n1"), local(2026, 10, 20, 0, 0).timestamp(), i64::MAX)
        .await
        .unwrap();
    assert_eq!(next_day.len(), 1);
    assert_eq!(next_day[0].usage, Usage::new(20, 0));
}
