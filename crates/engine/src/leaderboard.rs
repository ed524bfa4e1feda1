//! Weekly "coldest bettor" leaderboard.
//!
//! The week runs Monday 00:00 to the next Monday 00:00 in the configured
//! local time zone. Users are ranked ascending by win rate, so rank 1 is the
//! coldest bettor: the best one to fade.

use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use common::types::{BetResult, UserId, UserProfile};
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::FadeStore;

pub const DEFAULT_MIN_BETS: u32 = 5;

/// The columns of a graded wager the aggregator needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradedWager {
    pub result: BetResult,
    pub units_risked: f64,
    pub units_won_lost: f64,
}

/// Source of users and their graded wagers.
pub trait WagerHistory {
    fn directory(&self) -> impl Future<Output = Result<Vec<UserProfile>>> + Send;
    fn graded_in_window(
        &self,
        user_id: &UserId,
        window: WeekWindow,
    ) -> impl Future<Output = Result<Vec<GradedWager>>> + Send;
}

impl WagerHistory for FadeStore {
    fn directory(&self) -> impl Future<Output = Result<Vec<UserProfile>>> + Send {
        self.list_users()
    }

    fn graded_in_window(
        &self,
        user_id: &UserId,
        window: WeekWindow,
    ) -> impl Future<Output = Result<Vec<GradedWager>>> + Send {
        self.graded_wagers(user_id, window.start, window.end)
    }
}

/// `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST jump; use the offset in effect around it.
        None => tz
            .offset_from_utc_datetime(&naive)
            .fix()
            .from_local_datetime(&naive)
            .earliest()
            .map_or_else(|| naive.and_utc(), |dt| dt.with_timezone(&Utc)),
    }
}

/// The week containing `now`, in `tz`.
pub fn week_window<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> WeekWindow {
    let today = now.with_timezone(tz).date_naive();
    let back = u64::from(today.weekday().num_days_from_monday());
    let monday = today - Days::new(back);
    let next_monday = monday + Days::new(7);
    WeekWindow {
        start: local_midnight(tz, monday),
        end: local_midnight(tz, next_monday),
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserScore {
    pub total_bets: u32,
    pub win_rate: f64,
    pub roi: f64,
    pub units_gained: f64,
}

/// Win/loss feed the rate; pushes only count toward units. `None` when the
/// user has no decided bets.
pub fn score_user(wagers: &[GradedWager]) -> Option<UserScore> {
    let mut wins = 0u32;
    let mut losses = 0u32;
    let mut units_gained = 0.0;
    let mut units_risked = 0.0;
    for w in wagers {
        match w.result {
            BetResult::Win => wins += 1,
            BetResult::Loss => losses += 1,
            BetResult::Push => {}
            BetResult::Pending => continue,
        }
        units_gained += w.units_won_lost;
        units_risked += w.units_risked;
    }

    let total_bets = wins + losses;
    if total_bets == 0 {
        return None;
    }
    let roi = if units_risked > 0.0 {
        units_gained / units_risked * 100.0
    } else {
        0.0
    };
    Some(UserScore {
        total_bets,
        win_rate: round2(f64::from(wins) / f64::from(total_bets) * 100.0),
        roi: round2(roi),
        units_gained: round2(units_gained),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: UserId,
    pub username: String,
    pub total_bets: u32,
    pub win_rate: f64,
    pub roi: f64,
    pub units_gained: f64,
    pub is_current_user: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardResponse {
    pub data: Vec<LeaderboardEntry>,
}

/// Rank every qualifying user for the week containing `now`. A directory
/// failure yields an empty board; a failing user is logged and skipped.
pub async fn weekly_leaderboard<S, Tz>(
    source: &S,
    now: DateTime<Utc>,
    tz: &Tz,
    current_user: Option<&UserId>,
    min_bets: u32,
) -> Vec<LeaderboardEntry>
where
    S: WagerHistory,
    Tz: TimeZone,
{
    match try_weekly_leaderboard(source, now, tz, current_user, min_bets).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "leaderboard: user directory unavailable");
            Vec::new()
        }
    }
}

/// Like [`weekly_leaderboard`] but surfaces a directory failure, for callers
/// that report job health.
pub async fn try_weekly_leaderboard<S, Tz>(
    source: &S,
    now: DateTime<Utc>,
    tz: &Tz,
    current_user: Option<&UserId>,
    min_bets: u32,
) -> Result<Vec<LeaderboardEntry>>
where
    S: WagerHistory,
    Tz: TimeZone,
{
    let window = week_window(now, tz);
    let users = source.directory().await?;

    let mut entries = Vec::new();
    for user in users {
        let wagers = match source.graded_in_window(&user.id, window).await {
            Ok(w) => w,
            Err(e) => {
                metrics::counter!("fade_leaderboard_user_errors_total").increment(1);
                warn!(user_id = %user.id, error = %e, "leaderboard: skipping user");
                continue;
            }
        };
        let Some(score) = score_user(&wagers) else {
            continue;
        };
        if score.total_bets < min_bets {
            debug!(user_id = %user.id, total_bets = score.total_bets, "below minimum bets");
            continue;
        }
        entries.push(LeaderboardEntry {
            is_current_user: current_user == Some(&user.id),
            id: user.id,
            username: user.username,
            total_bets: score.total_bets,
            win_rate: score.win_rate,
            roi: score.roi,
            units_gained: score.units_gained,
        });
    }

    entries.sort_by(|a, b| {
        a.win_rate
            .total_cmp(&b.win_rate)
            .then_with(|| b.total_bets.cmp(&a.total_bets))
            .then_with(|| a.username.cmp(&b.username))
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use chrono_tz::America::New_York;
    use std::collections::HashMap;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn graded(result: BetResult, risked: f64, won_lost: f64) -> GradedWager {
        GradedWager {
            result,
            units_risked: risked,
            units_won_lost: won_lost,
        }
    }

    fn record(wins: usize, losses: usize, pushes: usize) -> Vec<GradedWager> {
        let mut v = Vec::new();
        v.extend((0..wins).map(|_| graded(BetResult::Win, 1.0, 0.91)));
        v.extend((0..losses).map(|_| graded(BetResult::Loss, 1.0, -1.0)));
        v.extend((0..pushes).map(|_| graded(BetResult::Push, 1.0, 0.0)));
        v
    }

    #[derive(Default)]
    struct FakeHistory {
        directory_down: bool,
        users: Vec<UserProfile>,
        wagers: HashMap<UserId, Vec<GradedWager>>,
        failing: Vec<UserId>,
    }

    impl FakeHistory {
        fn with_user(mut self, id: &str, wagers: Vec<GradedWager>) -> Self {
            self.users.push(UserProfile {
                id: UserId::new(id),
                username: id.to_string(),
            });
            self.wagers.insert(UserId::new(id), wagers);
            self
        }
    }

    impl WagerHistory for FakeHistory {
        fn directory(&self) -> impl Future<Output = Result<Vec<UserProfile>>> + Send {
            let res = if self.directory_down {
                Err(anyhow::anyhow!("directory down"))
            } else {
                Ok(self.users.clone())
            };
            std::future::ready(res)
        }

        fn graded_in_window(
            &self,
            user_id: &UserId,
            _window: WeekWindow,
        ) -> impl Future<Output = Result<Vec<GradedWager>>> + Send {
            let res = if self.failing.contains(user_id) {
                Err(anyhow::anyhow!("query failed"))
            } else {
                Ok(self.wagers.get(user_id).cloned().unwrap_or_default())
            };
            std::future::ready(res)
        }
    }

    fn now() -> DateTime<Utc> {
        utc("2026-10-21T16:00:00Z")
    }

    #[test]
    fn test_sunday_night_belongs_to_the_week_started_six_days_earlier() {
        // Sunday 23:00 in New York is already Monday in UTC.
        let window = week_window(utc("2026-10-26T03:00:00Z"), &New_York);
        assert_eq!(window.start, utc("2026-10-19T04:00:00Z"));
        assert_eq!(window.end, utc("2026-10-26T04:00:00Z"));
        assert_eq!(
            window.start.with_timezone(&New_York).weekday(),
            Weekday::Mon
        );
    }

    #[test]
    fn test_monday_midnight_starts_a_new_week() {
        let window = week_window(utc("2026-10-19T04:00:00Z"), &New_York);
        assert_eq!(window.start, utc("2026-10-19T04:00:00Z"));
    }

    #[test]
    fn test_week_spanning_dst_end_is_local_midnight_to_midnight() {
        // DST ends Sunday 2026-11-01 in New York.
        let window = week_window(utc("2026-10-28T12:00:00Z"), &New_York);
        assert_eq!(window.start, utc("2026-10-26T04:00:00Z"));
        assert_eq!(window.end, utc("2026-11-02T05:00:00Z"));
    }

    #[test]
    fn test_score_user() {
        let score = score_user(&record(3, 3, 1)).unwrap();
        assert_eq!(score.total_bets, 6);
        assert_eq!(score.win_rate, 50.0);
        // 3 * 0.91 - 3 = -0.27 over 7 risked.
        assert_eq!(score.units_gained, -0.27);
        assert_eq!(score.roi, -3.86);

        assert_eq!(score_user(&record(0, 0, 4)), None);
    }

    #[test]
    fn test_roi_zero_when_nothing_risked() {
        let score = score_user(&[graded(BetResult::Win, 0.0, 1.0)]).unwrap();
        assert_eq!(score.roi, 0.0);
        assert_eq!(score.win_rate, 100.0);
    }

    #[tokio::test]
    async fn test_min_bets_filter_and_ordering() {
        let source = FakeHistory::default()
            .with_user("four", record(0, 4, 0))
            .with_user("hot", record(5, 1, 0))
            .with_user("cold", record(1, 5, 0))
            .with_user("even_six", record(3, 3, 0))
            .with_user("even_eight", record(4, 4, 0));

        let current = UserId::new("cold");
        let board =
            weekly_leaderboard(&source, now(), &New_York, Some(&current), DEFAULT_MIN_BETS).await;
        let order: Vec<&str> = board.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(order, ["cold", "even_eight", "even_six", "hot"]);

        assert!(board[0].is_current_user);
        assert!(board[1..].iter().all(|e| !e.is_current_user));
        assert_eq!(board[2].win_rate, 50.0);
    }

    #[tokio::test]
    async fn test_directory_failure_is_empty() {
        let source = FakeHistory {
            directory_down: true,
            ..FakeHistory::default()
        }
        .with_user("cold", record(1, 5, 0));
        assert!(weekly_leaderboard(&source, now(), &New_York, None, 5)
            .await
            .is_empty());
        assert!(try_weekly_leaderboard(&source, now(), &New_York, None, 5)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failing_user_is_omitted() {
        let mut source = FakeHistory::default()
            .with_user("ok", record(1, 5, 0))
            .with_user("broken", record(0, 6, 0));
        source.failing.push(UserId::new("broken"));

        let board = weekly_leaderboard(&source, now(), &New_York, None, 5).await;
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].username, "ok");
    }

    #[tokio::test]
    async fn test_store_source_reads_only_graded_wagers_in_window() {
        use crate::store::test_support::{memory_store, spread_wager};

        let store = memory_store().await;
        store
            .upsert_user(&UserProfile {
                id: UserId::new("u1"),
                username: "cold".into(),
            })
            .await
            .unwrap();

        let in_week = utc("2026-10-20T15:00:00Z");
        let mut n = 0;
        let mut add = |result: BetResult, created_at: DateTime<Utc>| {
            n += 1;
            let mut w = spread_wager(&format!("w{n}"), "u1");
            w.result = result;
            w.units_won_lost = match result {
                BetResult::Win => 1.0,
                BetResult::Loss => -1.0,
                _ => 0.0,
            };
            w.created_at = created_at;
            w
        };
        let wagers = vec![
            add(BetResult::Win, in_week),
            add(BetResult::Loss, in_week),
            add(BetResult::Loss, in_week),
            add(BetResult::Loss, in_week),
            add(BetResult::Loss, in_week),
            add(BetResult::Pending, in_week),
            // Previous week.
            add(BetResult::Win, utc("2026-10-19T03:59:59Z")),
        ];
        for w in &wagers {
            store.upsert_wager(w).await.unwrap();
        }

        let board = weekly_leaderboard(&store, now(), &New_York, None, 5).await;
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].total_bets, 5);
        assert_eq!(board[0].win_rate, 20.0);
        assert_eq!(board[0].units_gained, -3.0);
    }

    #[test]
    fn test_response_json_shape() {
        let response = LeaderboardResponse {
            data: vec![LeaderboardEntry {
                id: UserId::new("u1"),
                username: "cold".into(),
                total_bets: 6,
                win_rate: 16.67,
                roi: -70.5,
                units_gained: -4.23,
                is_current_user: true,
            }],
        };
        let json = serde_json::to_value(&response).unwrap();
        let entry = &json["data"][0];
        assert_eq!(entry["id"], "u1");
        assert_eq!(entry["totalBets"], 6);
        assert_eq!(entry["winRate"], 16.67);
        assert_eq!(entry["unitsGained"], -4.23);
        assert_eq!(entry["isCurrentUser"], true);
    }
}
