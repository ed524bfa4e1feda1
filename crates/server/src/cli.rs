use anyhow::Result;
use chrono::Utc;
use common::config::Config;
use common::types::{UserId, WagerId};
use engine::bet_line;
use engine::leaderboard::{try_weekly_leaderboard, LeaderboardEntry};
use engine::{FadeLedger, FadeStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Leaderboard { user_id: Option<String> },
    Describe { wager_id: String },
    Recount { wager_id: String },
    RecountAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_path: Option<String>,
    pub command: Command,
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Invocation, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let mut config_path = None;
    let mut rest = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args
                .next()
                .ok_or_else(|| "usage: fade-server --config <path> [command]".to_string())?;
            config_path = Some(path);
        } else {
            rest.push(arg);
        }
    }

    let mut rest = rest.into_iter();
    let command = match rest.next().as_deref() {
        None | Some("run") => Command::Run,
        Some("leaderboard") => Command::Leaderboard {
            user_id: rest.next(),
        },
        Some("describe") => Command::Describe {
            wager_id: rest
                .next()
                .ok_or_else(|| "usage: fade-server describe <wager_id>".to_string())?,
        },
        Some("recount") => Command::Recount {
            wager_id: rest
                .next()
                .ok_or_else(|| "usage: fade-server recount <wager_id>".to_string())?,
        },
        Some("recount-all") => Command::RecountAll,
        Some(other) => return Err(format!("unknown command: {other}")),
    };

    Ok(Invocation {
        config_path,
        command,
    })
}

pub async fn run_command(store: &FadeStore, config: &Config, cmd: Command) -> Result<()> {
    match cmd {
        Command::Run => Ok(()),
        Command::Leaderboard { user_id } => {
            let current = user_id.map(UserId::new);
            let entries = try_weekly_leaderboard(
                store,
                Utc::now(),
                &config.leaderboard.tz()?,
                current.as_ref(),
                config.leaderboard.min_bets,
            )
            .await?;
            show_leaderboard(&entries);
            Ok(())
        }
        Command::Describe { wager_id } => {
            println!("{}", describe_wager(store, &WagerId::new(wager_id)).await?);
            Ok(())
        }
        Command::Recount { wager_id } => {
            let count = FadeLedger::new(store.clone())
                .recount(&WagerId::new(wager_id.as_str()))
                .await?;
            println!("{wager_id}: fade_counter={count}");
            Ok(())
        }
        Command::RecountAll => {
            let corrected = store.recount_all().await?;
            println!("recounted all wagers, {corrected} corrected");
            Ok(())
        }
    }
}

pub fn format_leaderboard_row(rank: usize, e: &LeaderboardEntry) -> String {
    let marker = if e.is_current_user { "*" } else { " " };
    format!(
        "{rank:>3}{marker} {:<20} bets={:<3} win%={:>6.2} roi%={:>7.2} units={:>+7.2}",
        e.username, e.total_bets, e.win_rate, e.roi, e.units_gained
    )
}

fn show_leaderboard(entries: &[LeaderboardEntry]) {
    println!("Coldest bettors this week:");
    if entries.is_empty() {
        println!("  (nobody has enough graded bets yet)");
    }
    for (i, e) in entries.iter().enumerate() {
        println!("{}", format_leaderboard_row(i + 1, e));
    }
}

async fn describe_wager(store: &FadeStore, wager_id: &WagerId) -> Result<String> {
    let Some(wager) = store.wager(wager_id).await? else {
        return Ok(format!("{wager_id}: not found"));
    };
    let d = bet_line::describe(&wager);
    Ok(format!(
        "{wager_id}: {}\n  line:     {}\n  opposite: {}\n  fades:    {}",
        wager.event_description, d.line, d.opposite_line, wager.fade_counter
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::ChangeFeed;

    fn args(v: &[&str]) -> impl Iterator<Item = String> {
        v.iter().map(|s| (*s).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args_defaults_to_run() {
        let inv = parse_args(args(&["fade-server"])).unwrap();
        assert_eq!(inv.command, Command::Run);
        assert_eq!(inv.config_path, None);
    }

    #[test]
    fn test_parse_config_flag_anywhere() {
        let inv = parse_args(args(&["fade-server", "recount", "w1", "--config", "x.toml"])).unwrap();
        assert_eq!(
            inv.command,
            Command::Recount {
                wager_id: "w1".to_string()
            }
        );
        assert_eq!(inv.config_path.as_deref(), Some("x.toml"));
    }

    #[test]
    fn test_parse_leaderboard_optional_user() {
        let inv = parse_args(args(&["fade-server", "leaderboard"])).unwrap();
        assert_eq!(inv.command, Command::Leaderboard { user_id: None });
        let inv = parse_args(args(&["fade-server", "leaderboard", "u1"])).unwrap();
        assert_eq!(
            inv.command,
            Command::Leaderboard {
                user_id: Some("u1".to_string())
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(args(&["fade-server", "describe"])).is_err());
        assert!(parse_args(args(&["fade-server", "--config"])).is_err());
        assert_eq!(
            parse_args(args(&["fade-server", "nope"])).unwrap_err(),
            "unknown command: nope"
        );
    }

    #[test]
    fn test_format_leaderboard_row_marks_current_user() {
        let e = LeaderboardEntry {
            id: UserId::new("u1"),
            username: "icecold".to_string(),
            total_bets: 6,
            win_rate: 16.67,
            roi: -66.67,
            units_gained: -4.0,
            is_current_user: true,
        };
        let row = format_leaderboard_row(1, &e);
        assert!(row.starts_with("  1* icecold"), "{row}");
        assert!(row.contains("win%= 16.67"), "{row}");
    }

    #[tokio::test]
    async fn test_describe_wager_shows_both_sides() {
        let store = FadeStore::open(":memory:", ChangeFeed::new(16)).await.unwrap();
        store
            .upsert_wager(&crate::test_support::wager("w1", "owner"))
            .await
            .unwrap();

        let text = describe_wager(&store, &WagerId::new("w1")).await.unwrap();
        assert!(text.contains("Lakers -5.5"), "{text}");
        assert!(text.contains("Celtics +5.5"), "{text}");

        let missing = describe_wager(&store, &WagerId::new("ghost")).await.unwrap();
        assert_eq!(missing, "ghost: not found");
    }
}
