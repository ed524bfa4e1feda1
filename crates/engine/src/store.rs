//! Typed access to the fade tables.
//!
//! Every write runs inside one `AsyncDb` closure and publishes the resulting
//! row states to the [`ChangeFeed`] before the closure returns. Closures run
//! one at a time on the SQLite thread, so notifications leave in commit order
//! and the last counter a subscriber sees is the current one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::db::{parse_db_timestamp, to_db_timestamp, AsyncDb};
use common::types::{
    BetResult, BetType, FadeMembership, MembershipState, PublicFadeTally, PublicWagerId, UserId,
    UserProfile, Wager, WagerId, PUBLIC_FADE_LIMIT,
};
use rusqlite::{params, OptionalExtension, Row};

use crate::change_feed::ChangeFeed;
use crate::events::RowChange;
use crate::leaderboard::GradedWager;

#[derive(Clone)]
pub struct FadeStore {
    db: AsyncDb,
    feed: ChangeFeed,
}

/// Result of a conditional membership write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipWrite {
    /// False when the condition did not hold (a concurrent writer got there first).
    pub applied: bool,
    pub membership: FadeMembership,
    pub fade_counter: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicFadeWrite {
    Recorded {
        tally: PublicFadeTally,
        wager_total: i64,
    },
    LimitReached {
        wager_total: i64,
    },
}

fn conversion_err(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_timestamp(&raw).map_err(|e| conversion_err(idx, e))
}

fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_db_timestamp(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn result_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<BetResult> {
    let raw: String = row.get(idx)?;
    BetResult::from_str_loose(&raw)
        .ok_or_else(|| conversion_err(idx, format!("unknown wager result {raw:?}")))
}

const WAGER_COLUMNS: &str = "id, user_id, event_description, home_team, away_team, bet_type, \
     position, line, odds, units_risked, units_won_lost, result, fade_counter, created_at, updated_at";

fn wager_from_row(row: &Row<'_>) -> rusqlite::Result<Wager> {
    Ok(Wager {
        id: WagerId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        event_description: row.get(2)?,
        home_team: row.get(3)?,
        away_team: row.get(4)?,
        bet_type: BetType::from_str_loose(&row.get::<_, String>(5)?),
        position: row.get(6)?,
        line: row.get(7)?,
        odds: row.get(8)?,
        units_risked: row.get(9)?,
        units_won_lost: row.get(10)?,
        result: result_column(row, 11)?,
        fade_counter: row.get(12)?,
        created_at: ts_column(row, 13)?,
        updated_at: ts_column(row, 14)?,
    })
}

fn read_membership(
    conn: &rusqlite::Connection,
    wager_id: &WagerId,
    user_id: &UserId,
) -> rusqlite::Result<Option<FadeMembership>> {
    conn.query_row(
        "SELECT deactivated_at FROM fade_memberships WHERE wager_id = ?1 AND user_id = ?2",
        params![wager_id.as_str(), user_id.as_str()],
        |row| opt_ts_column(row, 0),
    )
    .optional()
    .map(|found| {
        found.map(|deactivated_at| FadeMembership {
            wager_id: wager_id.clone(),
            user_id: user_id.clone(),
            state: MembershipState::from_deactivated_at(deactivated_at),
        })
    })
}

fn read_counter(conn: &rusqlite::Connection, wager_id: &WagerId) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT fade_counter FROM wagers WHERE id = ?1",
        [wager_id.as_str()],
        |row| row.get(0),
    )
    .optional()
}

fn read_public_total(
    conn: &rusqlite::Connection,
    public_wager_id: &PublicWagerId,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(fade_count), 0) FROM public_fade_tallies WHERE public_wager_id = ?1",
        [public_wager_id.as_str()],
        |row| row.get(0),
    )
}

/// Shared tail of every membership write: read back row + counter, publish if applied.
fn finish_membership_write(
    conn: &rusqlite::Connection,
    feed: &ChangeFeed,
    wager_id: &WagerId,
    user_id: &UserId,
    applied: bool,
) -> Result<MembershipWrite> {
    let membership = read_membership(conn, wager_id, user_id)?
        .with_context(|| format!("membership ({wager_id}, {user_id}) vanished after write"))?;
    let fade_counter =
        read_counter(conn, wager_id)?.with_context(|| format!("wager {wager_id} vanished"))?;

    if applied {
        feed.publish(RowChange::Membership(membership.clone()));
        feed.publish(RowChange::WagerCounter {
            wager_id: wager_id.clone(),
            fade_counter,
        });
    }

    Ok(MembershipWrite {
        applied,
        membership,
        fade_counter,
    })
}

impl FadeStore {
    pub fn new(db: AsyncDb, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }

    /// Convenience for binaries and tests: open the database and attach a feed.
    pub async fn open(path: &str, feed: ChangeFeed) -> Result<Self> {
        Ok(Self::new(AsyncDb::open(path).await?, feed))
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    // ── Directory and wager rows (written by ingestion adapters) ──

    pub async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        let profile = profile.clone();
        self.db
            .call_named("user_profiles.upsert", move |conn| {
                conn.execute(
                    "INSERT INTO user_profiles (id, username) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET username = excluded.username",
                    params![profile.id.as_str(), profile.username],
                )?;
                Ok(())
            })
            .await
    }

    /// Insert or refresh a wager row. `fade_counter` is never taken from the
    /// input; it belongs to the membership triggers.
    pub async fn upsert_wager(&self, wager: &Wager) -> Result<()> {
        let w = wager.clone();
        self.db
            .call_named("wagers.upsert", move |conn| {
                conn.execute(
                    "INSERT INTO wagers (id, user_id, event_description, home_team, away_team,
                        bet_type, position, line, odds, units_risked, units_won_lost, result,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                     ON CONFLICT(id) DO UPDATE SET
                        event_description = excluded.event_description,
                        home_team = excluded.home_team,
                        away_team = excluded.away_team,
                        bet_type = excluded.bet_type,
                        position = excluded.position,
                        line = excluded.line,
                        odds = excluded.odds,
                        units_risked = excluded.units_risked,
                        units_won_lost = excluded.units_won_lost,
                        result = excluded.result,
                        updated_at = excluded.updated_at",
                    params![
                        w.id.as_str(),
                        w.user_id.as_str(),
                        w.event_description,
                        w.home_team,
                        w.away_team,
                        w.bet_type.as_str(),
                        w.position,
                        w.line,
                        w.odds,
                        w.units_risked,
                        w.units_won_lost,
                        w.result.as_str(),
                        to_db_timestamp(w.created_at),
                        to_db_timestamp(w.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn wager(&self, wager_id: &WagerId) -> Result<Option<Wager>> {
        let id = wager_id.clone();
        self.db
            .call_named("wagers.get", move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE id = ?1"),
                        [id.as_str()],
                        wager_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>> {
        self.db
            .call_named("user_profiles.list", |conn| {
                let mut stmt = conn.prepare("SELECT id, username FROM user_profiles ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(UserProfile {
                            id: UserId(row.get(0)?),
                            username: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Win/loss/push wagers created by `user_id` in `[start, end)`.
    pub async fn graded_wagers(
        &self,
        user_id: &UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GradedWager>> {
        let user = user_id.clone();
        let (start, end) = (to_db_timestamp(start), to_db_timestamp(end));
        self.db
            .call_named("wagers.graded_in_window", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT result, units_risked, units_won_lost FROM wagers
                     WHERE user_id = ?1 AND result IN ('win', 'loss', 'push')
                       AND created_at >= ?2 AND created_at < ?3",
                )?;
                let rows = stmt
                    .query_map(params![user.as_str(), start, end], |row| {
                        Ok(GradedWager {
                            result: result_column(row, 0)?,
                            units_risked: row.get(1)?,
                            units_won_lost: row.get(2)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    // ── Canonical counter ──

    pub async fn fade_counter(&self, wager_id: &WagerId) -> Result<Option<i64>> {
        let id = wager_id.clone();
        self.db
            .call_named("wagers.fade_counter", move |conn| Ok(read_counter(conn, &id)?))
            .await
    }

    /// The atomic counter function: recompute `fade_counter` from the active
    /// membership rows, persist it, and return it. `None` if the wager is unknown.
    pub async fn recount_fade_counter(&self, wager_id: &WagerId) -> Result<Option<i64>> {
        let id = wager_id.clone();
        let feed = self.feed.clone();
        self.db
            .call_named("wagers.recount", move |conn| {
                let changed = conn.execute(
                    "UPDATE wagers SET fade_counter = (
                        SELECT COUNT(*) FROM fade_memberships
                        WHERE wager_id = ?1 AND deactivated_at IS NULL
                     ) WHERE id = ?1",
                    [id.as_str()],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let fade_counter = read_counter(conn, &id)?;
                if let Some(fade_counter) = fade_counter {
                    feed.publish(RowChange::WagerCounter {
                        wager_id: id.clone(),
                        fade_counter,
                    });
                }
                Ok(fade_counter)
            })
            .await
    }

    /// Recount every wager. Returns how many counters were wrong.
    pub async fn recount_all(&self) -> Result<usize> {
        let feed = self.feed.clone();
        self.db
            .call_named("wagers.recount_all", move |conn| {
                let tx = conn.transaction()?;
                let drifted: Vec<(String, i64)> = {
                    let mut stmt = tx.prepare(
                        "SELECT w.id, (SELECT COUNT(*) FROM fade_memberships m
                                       WHERE m.wager_id = w.id AND m.deactivated_at IS NULL) AS actual
                         FROM wagers w
                         WHERE w.fade_counter != actual",
                    )?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                };
                for (id, actual) in &drifted {
                    tx.execute(
                        "UPDATE wagers SET fade_counter = ?2 WHERE id = ?1",
                        params![id, actual],
                    )?;
                }
                tx.commit()?;

                for (id, actual) in &drifted {
                    feed.publish(RowChange::WagerCounter {
                        wager_id: WagerId(id.clone()),
                        fade_counter: *actual,
                    });
                }
                Ok(drifted.len())
            })
            .await
    }

    /// Active membership rows for a wager, for consistency checks against
    /// `fade_counter`. Display paths must read the counter instead.
    pub async fn count_active_memberships(&self, wager_id: &WagerId) -> Result<i64> {
        let id = wager_id.clone();
        self.db
            .call_named("fade_memberships.count_active", move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM fade_memberships
                     WHERE wager_id = ?1 AND deactivated_at IS NULL",
                    [id.as_str()],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    // ── Fade memberships ──

    pub async fn membership(
        &self,
        wager_id: &WagerId,
        user_id: &UserId,
    ) -> Result<Option<FadeMembership>> {
        let (w, u) = (wager_id.clone(), user_id.clone());
        self.db
            .call_named("fade_memberships.get", move |conn| {
                Ok(read_membership(conn, &w, &u)?)
            })
            .await
    }

    /// Tombstone an active row. Not applied if it was already tombstoned.
    pub async fn deactivate_membership(
        &self,
        wager_id: &WagerId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<MembershipWrite> {
        let (w, u) = (wager_id.clone(), user_id.clone());
        let feed = self.feed.clone();
        self.db
            .call_named("fade_memberships.deactivate", move |conn| {
                let changed = conn.execute(
                    "UPDATE fade_memberships SET deactivated_at = ?3
                     WHERE wager_id = ?1 AND user_id = ?2 AND deactivated_at IS NULL",
                    params![w.as_str(), u.as_str(), to_db_timestamp(now)],
                )?;
                finish_membership_write(conn, &feed, &w, &u, changed > 0)
            })
            .await
    }

    /// Clear the tombstone on an existing row. Not applied if it was already active.
    pub async fn reactivate_membership(
        &self,
        wager_id: &WagerId,
        user_id: &UserId,
    ) -> Result<MembershipWrite> {
        let (w, u) = (wager_id.clone(), user_id.clone());
        let feed = self.feed.clone();
        self.db
            .call_named("fade_memberships.reactivate", move |conn| {
                let changed = conn.execute(
                    "UPDATE fade_memberships SET deactivated_at = NULL
                     WHERE wager_id = ?1 AND user_id = ?2 AND deactivated_at IS NOT NULL",
                    params![w.as_str(), u.as_str()],
                )?;
                finish_membership_write(conn, &feed, &w, &u, changed > 0)
            })
            .await
    }

    /// Insert a fresh active row. `None` if the wager does not exist; not
    /// applied if a row for the pair already exists.
    pub async fn insert_membership(
        &self,
        wager_id: &WagerId,
        user_id: &UserId,
    ) -> Result<Option<MembershipWrite>> {
        let (w, u) = (wager_id.clone(), user_id.clone());
        let feed = self.feed.clone();
        self.db
            .call_named("fade_memberships.insert", move |conn| {
                if read_counter(conn, &w)?.is_none() {
                    return Ok(None);
                }
                let changed = conn.execute(
                    "INSERT INTO fade_memberships (wager_id, user_id) VALUES (?1, ?2)
                     ON CONFLICT(wager_id, user_id) DO NOTHING",
                    params![w.as_str(), u.as_str()],
                )?;
                finish_membership_write(conn, &feed, &w, &u, changed > 0).map(Some)
            })
            .await
    }

    // ── Public fade tallies ──

    pub async fn public_tally(
        &self,
        public_wager_id: &PublicWagerId,
        user_id: &UserId,
    ) -> Result<Option<PublicFadeTally>> {
        let (p, u) = (public_wager_id.clone(), user_id.clone());
        self.db
            .call_named("public_fade_tallies.get", move |conn| {
                let count: Option<i64> = conn
                    .query_row(
                        "SELECT fade_count FROM public_fade_tallies
                         WHERE public_wager_id = ?1 AND user_id = ?2",
                        params![p.as_str(), u.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(count.map(|fade_count| PublicFadeTally {
                    public_wager_id: p,
                    user_id: u,
                    fade_count,
                }))
            })
            .await
    }

    /// `SUM(fade_count)` across all users. Always recomputed, never cached.
    pub async fn public_total(&self, public_wager_id: &PublicWagerId) -> Result<i64> {
        let p = public_wager_id.clone();
        self.db
            .call_named("public_fade_tallies.total", move |conn| {
                Ok(read_public_total(conn, &p)?)
            })
            .await
    }

    /// One saturating fade: insert at 1, increment below the cap, refuse at the cap.
    pub async fn record_public_fade(
        &self,
        public_wager_id: &PublicWagerId,
        user_id: &UserId,
    ) -> Result<PublicFadeWrite> {
        let (p, u) = (public_wager_id.clone(), user_id.clone());
        let feed = self.feed.clone();
        self.db
            .call_named("public_fade_tallies.record", move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT fade_count FROM public_fade_tallies
                         WHERE public_wager_id = ?1 AND user_id = ?2",
                        params![p.as_str(), u.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;

                let now = to_db_timestamp(Utc::now());
                let changed = match existing {
                    None => tx.execute(
                        "INSERT INTO public_fade_tallies (public_wager_id, user_id, fade_count, updated_at)
                         VALUES (?1, ?2, 1, ?3)",
                        params![p.as_str(), u.as_str(), now],
                    )?,
                    Some(count) if count < PUBLIC_FADE_LIMIT => tx.execute(
                        "UPDATE public_fade_tallies SET fade_count = fade_count + 1, updated_at = ?3
                         WHERE public_wager_id = ?1 AND user_id = ?2 AND fade_count < ?4",
                        params![p.as_str(), u.as_str(), now, PUBLIC_FADE_LIMIT],
                    )?,
                    Some(_) => 0,
                };

                if changed == 0 {
                    let wager_total = read_public_total(&tx, &p)?;
                    tx.commit()?;
                    return Ok(PublicFadeWrite::LimitReached { wager_total });
                }

                let fade_count: i64 = tx.query_row(
                    "SELECT fade_count FROM public_fade_tallies
                     WHERE public_wager_id = ?1 AND user_id = ?2",
                    params![p.as_str(), u.as_str()],
                    |row| row.get(0),
                )?;
                let wager_total = read_public_total(&tx, &p)?;
                tx.commit()?;

                let tally = PublicFadeTally {
                    public_wager_id: p,
                    user_id: u,
                    fade_count,
                };
                feed.publish(RowChange::PublicTally {
                    tally: tally.clone(),
                    wager_total,
                });
                Ok(PublicFadeWrite::Recorded { tally, wager_total })
            })
            .await
    }
}
