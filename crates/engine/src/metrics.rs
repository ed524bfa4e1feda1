use metrics::{describe_counter, describe_gauge, describe_histogram};

pub fn describe() {
    describe_counter!(
        "fade_toggles_total",
        "Fade toggles by outcome (faded, unfaded, busy, sign_in_required, not_found, error)."
    );
    describe_counter!(
        "fade_public_fades_total",
        "Public fade attempts by outcome."
    );
    describe_counter!(
        "fade_feed_resyncs_total",
        "Viewer re-reads after the change feed reported lag."
    );
    describe_counter!(
        "fade_leaderboard_runs_total",
        "Weekly leaderboard computations."
    );
    describe_gauge!(
        "fade_leaderboard_entries",
        "Users on the most recent weekly leaderboard."
    );
    describe_counter!(
        "fade_leaderboard_user_errors_total",
        "Users skipped because their wagers could not be read."
    );
    describe_gauge!(
        "fade_feed_subscribers",
        "Live row-change subscriptions."
    );
    describe_histogram!(
        "fade_db_query_latency_ms",
        "SQLite call latency in milliseconds, by op and status."
    );
    describe_counter!(
        "fade_db_query_errors_total",
        "Failed SQLite calls, by op."
    );
}
