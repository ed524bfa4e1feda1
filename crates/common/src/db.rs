use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

/// Async database wrapper around `tokio_rusqlite::Connection`.
///
/// All SQLite work runs on one dedicated background thread, so closures passed
/// to [`AsyncDb::call`] execute one at a time in submission order. Clone is
/// cheap (shared sender to the background thread).
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path` (":memory:" works), set PRAGMAs and run
    /// migrations on the background thread.
    pub async fn open(path: &str) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;

        // Another process (ingestion, an admin sqlite3 shell) may hold the write
        // lock during startup. Retry migrations with backoff instead of exiting.
        let mut backoff = std::time::Duration::from_millis(500);
        let max_backoff = std::time::Duration::from_secs(30);
        let max_total_wait = std::time::Duration::from_secs(5 * 60);
        let start = std::time::Instant::now();

        loop {
            let res = conn
                .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                    conn.busy_timeout(std::time::Duration::from_secs(1))?;
                    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
                    run_migrations(conn)?;
                    conn.busy_timeout(std::time::Duration::from_secs(30))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Error(err)) => {
                    if !is_locked(&err) {
                        return Err(
                            anyhow::Error::from(err).context("AsyncDb::open: migration failed")
                        );
                    }
                    if start.elapsed() >= max_total_wait {
                        return Err(anyhow::Error::from(err).context(
                            "AsyncDb::open: migration failed (database stayed locked too long)",
                        ));
                    }
                    tracing::warn!(
                        wait_for = ?backoff,
                        "AsyncDb::open: database is locked; retrying migrations"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => return Err(anyhow::anyhow!("AsyncDb::open: {other}")),
            }
        }

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return its result.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("database connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("database close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("database error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records latency and error metrics under `op`.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = if res.is_ok() { "ok" } else { "err" };
        metrics::histogram!("fade_db_query_latency_ms", "op" => op, "status" => status)
            .record(ms);
        if res.is_err() {
            metrics::counter!("fade_db_query_errors_total", "op" => op).increment(1);
        }

        res
    }
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Schema plus idempotent column migrations. Safe to run on every start.
pub fn run_migrations(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)?;
    migrate_wagers_team_columns(conn)?;
    conn.execute_batch(TRIGGERS)?;
    Ok(())
}

/// Adds the home/away columns to a `wagers` table created without them.
/// No-op on tables built from `SCHEMA`.
fn migrate_wagers_team_columns(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    for name in ["home_team", "away_team"] {
        let has: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('wagers') WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get(0),
        )?;
        if has == 0 {
            conn.execute(&format!("ALTER TABLE wagers ADD COLUMN {name} TEXT"), [])?;
        }
    }
    Ok(())
}

/// Canonical text form of a timestamp column: UTC, second precision, `Z` suffix.
/// Lexical order of these strings equals chronological order.
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_db_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("bad timestamp {s:?}: {e}"))?
        .with_timezone(&Utc))
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_profiles (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- Rows are written by the sportsbook ingestion pipeline. The only column this
-- service maintains is fade_counter, and only through the triggers below.
CREATE TABLE IF NOT EXISTS wagers (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    event_description TEXT NOT NULL DEFAULT '',
    home_team TEXT,
    away_team TEXT,
    bet_type TEXT NOT NULL,            -- spread, moneyline, total, teamTotal, other
    position TEXT NOT NULL,
    line REAL,
    odds INTEGER,                      -- American odds
    units_risked REAL NOT NULL DEFAULT 0,
    units_won_lost REAL NOT NULL DEFAULT 0,
    result TEXT NOT NULL DEFAULT 'pending',  -- pending, win, loss, push
    fade_counter INTEGER NOT NULL DEFAULT 0 CHECK (fade_counter >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wagers_user_created ON wagers(user_id, created_at);

-- One row per (wager, user), ever. deactivated_at IS NULL means active.
CREATE TABLE IF NOT EXISTS fade_memberships (
    wager_id TEXT NOT NULL REFERENCES wagers(id),
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    deactivated_at TEXT,
    PRIMARY KEY (wager_id, user_id)
);

CREATE TABLE IF NOT EXISTS public_fade_tallies (
    public_wager_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    fade_count INTEGER NOT NULL DEFAULT 0 CHECK (fade_count BETWEEN 0 AND 3),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (public_wager_id, user_id)
);
"#;

// Each trigger recounts instead of adding/subtracting, so the counter equals the
// active-row count after every statement regardless of interleaving.
const TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS trg_fade_memberships_insert
AFTER INSERT ON fade_memberships
BEGIN
    UPDATE wagers SET fade_counter = (
        SELECT COUNT(*) FROM fade_memberships
        WHERE wager_id = NEW.wager_id AND deactivated_at IS NULL
    ) WHERE id = NEW.wager_id;
END;

CREATE TRIGGER IF NOT EXISTS trg_fade_memberships_tombstone
AFTER UPDATE OF deactivated_at ON fade_memberships
BEGIN
    UPDATE wagers SET fade_counter = (
        SELECT COUNT(*) FROM fade_memberships
        WHERE wager_id = NEW.wager_id AND deactivated_at IS NULL
    ) WHERE id = NEW.wager_id;
END;

CREATE TRIGGER IF NOT EXISTS trg_fade_memberships_delete
AFTER DELETE ON fade_memberships
BEGIN
    UPDATE wagers SET fade_counter = (
        SELECT COUNT(*) FROM fade_memberships
        WHERE wager_id = OLD.wager_id AND deactivated_at IS NULL
    ) WHERE id = OLD.wager_id;
END;
"#;
