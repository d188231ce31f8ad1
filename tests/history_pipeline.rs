//! Chunked history writes against a scripted server.

#![expect(clippy::expect_used, reason = "test assertions")]
#![expect(clippy::indexing_slicing, reason = "test assertions")]

use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use haystack_client::{
    history::{HistorySample, HistoryWriter, plan_chunks},
    test_helpers::{ScriptedTransport, StaticTokens, ok_json, scripted_session},
    transport::{HttpRequest, HttpResponse},
    zinc::ZonedDateTime,
};
use proptest::prelude::*;
use rstest::rstest;
use serde_json::json;

fn at(minute: i64) -> ZonedDateTime {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid date");
    ZonedDateTime::utc(base + ChronoDuration::minutes(minute))
}

fn sample(point: &str, minute: i64) -> HistorySample {
    HistorySample::new(point, at(minute), 20.0).expect("sample")
}

/// `per_point` samples for each point, interleaved across points.
fn interleaved(points: &[&str], per_point: i64) -> Vec<HistorySample> {
    (0..per_point)
        .flat_map(|minute| points.iter().map(move |p| sample(p, minute)))
        .collect()
}

fn ok_grid() -> Result<HttpResponse, haystack_client::ClientError> {
    ok_json(&json!({"meta": {"ver": "3.0"}, "rows": []}))
}

fn body_mentions(request: &HttpRequest, point: &str) -> bool {
    request
        .body
        .as_deref()
        .is_some_and(|b| b.contains(&format!("}}, @{point})")))
}

fn writer(transport: &Arc<ScriptedTransport>) -> HistoryWriter {
    HistoryWriter::new(Arc::new(scripted_session(transport, StaticTokens::new("tok"))))
}

#[rstest]
#[tokio::test]
async fn writes_every_sample_in_ordered_chunks() {
    let transport = Arc::new(ScriptedTransport::new(|_| ok_grid()));
    let samples = interleaved(&["p1", "p2", "p3"], 800);

    let results = writer(&transport)
        .write_chunked(&samples, 1000, 3)
        .await
        .expect("valid chunk size");

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(
        results.iter().map(|r| r.samples_written).collect::<Vec<_>>(),
        vec![1000, 1000, 400]
    );
    for (chunk, result) in results.iter().enumerate() {
        assert_eq!(result.details.get("chunk"), Some(&json!(chunk)));
    }
    assert_eq!(transport.request_count(), 3);
    assert!(
        transport
            .requests()
            .iter()
            .all(|r| r.url == "http://haystack.test/api/demo/evalAll")
    );
}

#[rstest]
#[tokio::test]
async fn failing_chunk_does_not_affect_siblings() {
    let transport = Arc::new(ScriptedTransport::new(|request| {
        if body_mentions(request, "p2") {
            Ok(HttpResponse::new(400, "bad point"))
        } else {
            ok_grid()
        }
    }));
    let mut samples: Vec<HistorySample> = (0..1000).map(|m| sample("p1", m)).collect();
    samples.extend((0..1000).map(|m| sample("p2", m)));
    samples.extend((0..400).map(|m| sample("p3", m)));

    let results = writer(&transport)
        .write_chunked(&samples, 1000, 2)
        .await
        .expect("valid chunk size");

    assert_eq!(
        results.iter().map(|r| r.success).collect::<Vec<_>>(),
        vec![true, false, true]
    );
    let failed = &results[1];
    assert_eq!(failed.samples_written, 0);
    assert!(failed.error.as_deref().is_some_and(|e| e.contains("400")));
    assert_eq!(failed.details.get("chunk"), Some(&json!(1)));
    assert_eq!(results.iter().map(|r| r.samples_written).sum::<usize>(), 1400);
}

#[rstest]
#[tokio::test]
async fn server_reported_error_fails_the_batch() {
    let transport = Arc::new(ScriptedTransport::new(|_| {
        ok_json(&json!({"meta": {"ver": "3.0", "err": "m:", "dis": "point is not historized"}, "rows": []}))
    }));
    let result = writer(&transport).write(&[sample("p1", 0)]).await;
    assert!(!result.success);
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("point is not historized"))
    );
    assert_eq!(transport.request_count(), 1);
}

#[rstest]
#[tokio::test]
async fn empty_batches_send_nothing() {
    let transport = Arc::new(ScriptedTransport::new(|_| ok_grid()));
    let history = writer(&transport);

    let single = history.write(&[]).await;
    assert!(single.success);
    assert_eq!(single.samples_written, 0);
    assert!(history.write_chunked(&[], 10, 3).await.expect("ok").is_empty());
    assert_eq!(transport.request_count(), 0);
}

#[rstest]
#[case(3, 3)]
#[case(1, 1)]
#[case(0, 1)]
#[case(usize::MAX, 10)]
#[tokio::test]
async fn in_flight_chunks_respect_the_limit(#[case] max_concurrent: usize, #[case] expected_peak: usize) {
    let transport = Arc::new(ScriptedTransport::new(|_| ok_grid()).with_delay(Duration::from_millis(20)));
    let samples = interleaved(&["p1"], 100);

    let results = writer(&transport)
        .write_chunked(&samples, 10, max_concurrent)
        .await
        .expect("valid chunk size");

    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(transport.peak_in_flight(), expected_peak);
}

fn arbitrary_samples() -> impl Strategy<Value = Vec<HistorySample>> {
    prop::collection::vec((0_usize..4, 0_i64..500), 0..200).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(point, minute)| sample(&format!("p{point}"), minute))
            .collect()
    })
}

proptest! {
    #[test]
    fn chunk_plan_keeps_each_point_in_time_order(
        samples in arbitrary_samples(),
        chunk_size in 1_usize..50,
    ) {
        let chunks = plan_chunks(&samples, chunk_size).expect("non-zero chunk size");

        prop_assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), samples.len());
        prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= chunk_size));
        if let Some((_, full)) = chunks.split_last() {
            prop_assert!(full.iter().all(|c| c.len() == chunk_size));
        }

        let flat: Vec<&HistorySample> = chunks.iter().flatten().collect();
        for (a, b) in flat.iter().zip(flat.iter().skip(1)) {
            if a.point_id() == b.point_id() {
                prop_assert!(a.timestamp().instant() <= b.timestamp().instant());
            }
        }
        // Each point occupies one contiguous run.
        let mut seen: Vec<&str> = Vec::new();
        for s in &flat {
            let id = s.point_id().id();
            if seen.last() != Some(&id) {
                prop_assert!(!seen.contains(&id));
                seen.push(id);
            }
        }
    }
}
