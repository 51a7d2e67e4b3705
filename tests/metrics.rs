#![cfg(feature = "metrics")]
//! Tests for `wsgate` metrics helpers.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;
use wsgate::{
    config::ConnectionConfig,
    connection::Connection,
    metrics::{self as ws_metrics, Direction},
    session::ConnectionId,
};

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter_with_label(snapshotter: &Snapshotter, name: &str, label: (&str, &str)) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(k, _, _, v)| {
            let matches = k.key().name() == name
                && k
                    .key()
                    .labels()
                    .any(|l| l.key() == label.0 && l.value() == label.1);
            match v {
                DebugValue::Counter(c) if matches => Some(c),
                _ => None,
            }
        })
        .unwrap_or(0)
}

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn frame_metric_increments(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || ws_metrics::inc_frames(direction));

    assert_eq!(
        counter_with_label(&snapshotter, ws_metrics::FRAMES_PROCESSED, ("direction", label)),
        1
    );
}

#[test]
fn connection_gauge_tracks_open_connections() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        ws_metrics::inc_connections();
        ws_metrics::inc_connections();
        ws_metrics::dec_connections();
    });

    let metrics = snapshotter.snapshot().into_vec();
    let found = metrics.iter().any(|(k, _, _, v)| {
        k.key().name() == ws_metrics::CONNECTIONS_ACTIVE
            && matches!(v, DebugValue::Gauge(g) if (g.0 - 1.0).abs() < f64::EPSILON)
    });
    assert!(found, "expected one active connection, got {metrics:#?}");
}

#[test]
fn protocol_violation_counts_error_by_kind() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let mut conn = Connection::new(ConnectionId::new(1), &ConnectionConfig::default());
        conn.handshake_written();
        // Unmasked text frame from a client.
        let _ = conn.feed(&[0x81, 0x01, b'a']);
    });

    assert_eq!(
        counter_with_label(&snapshotter, ws_metrics::ERRORS_TOTAL, ("kind", "masking")),
        1
    );
    // The close frame sent in response.
    assert_eq!(
        counter_with_label(
            &snapshotter,
            ws_metrics::FRAMES_PROCESSED,
            ("direction", "outbound")
        ),
        1
    );
}

#[test]
fn handshake_failures_are_counted() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        (0..2).for_each(|_| ws_metrics::inc_handshake_failures());
    });

    let metrics = snapshotter.snapshot().into_vec();
    assert!(
        metrics.iter().any(|(key, _, _, value)| {
            key.key().name() == ws_metrics::HANDSHAKE_FAILURES
                && matches!(value, DebugValue::Counter(2))
        }),
        "expected two handshake failures, got {metrics:#?}"
    );
}
