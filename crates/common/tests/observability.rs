use metrics_exporter_prometheus::PrometheusBuilder;

// Integration test so it exercises the public `common::observability` surface.

#[test]
fn error_events_increment_counter() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let (dispatch, _otel_guard) = common::observability::build_dispatch("fade-test", "info");

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::warn!(wager_id = "w1", "not counted");
            tracing::error!(wager_id = "w1", "store write failed");
        });
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("fade_tracing_error_events"),
        "expected fade_tracing_error_events in rendered metrics, got:\n{rendered}"
    );
}
