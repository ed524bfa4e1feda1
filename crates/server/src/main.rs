mod api;
mod cli;
mod jobs;
mod scheduler;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let invocation = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;
    let config = match &invocation.config_path {
        Some(path) => common::config::Config::load_from(path)?,
        None => common::config::Config::load()?,
    };

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("fade-server", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    tracing::info!("fade engine starting");

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tz = config.leaderboard.tz()?;
    let feed = engine::ChangeFeed::new(config.realtime.feed_capacity)
        .with_warn_threshold_pct(config.realtime.warn_threshold_pct);
    let store = engine::FadeStore::open(&config.database.path, feed.clone()).await?;

    if invocation.command != cli::Command::Run {
        cli::run_command(&store, &config, invocation.command).await?;
        return Ok(());
    }

    let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.observability.prometheus_port).into();
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install_recorder()?;
    engine::metrics::describe();

    let shutdown = CancellationToken::new();

    // ── Operational event log ──
    let events_rx = feed.subscribe_operational();
    let events_task = tokio::spawn(engine::events::subscribers::run_logging_subscriber(
        events_rx,
        shutdown.clone(),
    ));

    // ── Leaderboard refresh ──
    let (leaderboard_tx, leaderboard_rx) = tokio::sync::mpsc::channel::<()>(8);
    let scheduler_handles = scheduler::start(vec![scheduler::JobSpec {
        name: "leaderboard".to_string(),
        interval: Duration::from_secs(config.leaderboard.refresh_interval_secs),
        run_immediately: true,
        tick: leaderboard_tx,
    }]);
    let job = jobs::LeaderboardJob {
        store: store.clone(),
        feed: feed.clone(),
        tz,
        min_bets: config.leaderboard.min_bets,
    };
    tokio::spawn(jobs::run_leaderboard_worker(job, leaderboard_rx));

    let state = Arc::new(api::AppState::new(
        store,
        tz,
        config.leaderboard.min_bets,
        config.server.api_key.clone(),
    ));
    let app = api::router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, metrics = %metrics_addr, "starting fade HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    tracing::info!("shutting down");
    for handle in scheduler_handles {
        handle.abort();
    }
    shutdown.cancel();
    let logged = events_task.await.unwrap_or(0);
    tracing::info!(events_logged = logged, "fade engine stopped");

    Ok(())
}
