//! Bet line inverter: the displayed line of a wager and the line of the
//! opposite side, as a fader would be betting it.

use std::sync::LazyLock;

use common::types::{BetType, Wager};
use regex::{Captures, Regex};
use serde::Serialize;

use crate::teams::{self, short_team_name};

/// Trailing signed number, e.g. "Lakers -5.5".
static RE_TRAILING_SIGNED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([+-])(\d+(?:\.\d+)?)\s*$").expect("valid trailing signed regex")
});
/// Trailing number with or without sign.
static RE_TRAILING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)[+-]?(\d+(?:\.\d+)?)\s*$").expect("valid trailing number regex")
});
static RE_OVER_UNDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(over|under)\b").expect("valid over/under regex"));
/// Tokens after the team name that are not part of it.
static RE_LINE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:[+-]?\d+(?:\.\d+)?|pk|pick|ml|moneyline|over|under)\s*$")
        .expect("valid line suffix regex")
});

const OPPOSITE_FALLBACK: &str = "Opposite bet";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerDescription {
    pub line: String,
    pub opposite_line: String,
}

/// Number without trailing zeros: `220`, `5.5`.
pub fn format_number(value: f64) -> String {
    let s = format!("{:.2}", value.abs());
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if value < 0.0 && s != "0" {
        format!("-{s}")
    } else {
        s.to_string()
    }
}

/// Spread value with an explicit sign; zero is a pick'em.
pub fn format_signed(value: f64) -> String {
    let magnitude = format_number(value.abs());
    if magnitude == "0" {
        "PK".to_string()
    } else if value < 0.0 {
        format!("-{magnitude}")
    } else {
        format!("+{magnitude}")
    }
}

/// Team text of a position with trailing line tokens removed.
fn team_label(position: &str) -> &str {
    let mut label = position.trim();
    while let Some(m) = RE_LINE_SUFFIX.find(label) {
        label = label[..m.start()].trim_end();
    }
    label
}

fn trailing_signed(position: &str) -> Option<f64> {
    let caps = RE_TRAILING_SIGNED.captures(position)?;
    let magnitude: f64 = caps[2].parse().ok()?;
    Some(if &caps[1] == "-" { -magnitude } else { magnitude })
}

fn trailing_number(position: &str) -> Option<f64> {
    RE_TRAILING_NUMBER
        .captures(position)
        .and_then(|caps| caps[1].parse().ok())
}

fn is_pickem(position: &str) -> bool {
    let lower = position.trim().to_ascii_lowercase();
    lower.ends_with(" pk") || lower.ends_with(" pick") || lower == "pk"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Over,
    Under,
}

impl Direction {
    fn read(position: &str) -> Self {
        match RE_OVER_UNDER.captures(position) {
            Some(caps) if caps[1].eq_ignore_ascii_case("under") => Self::Under,
            _ => Self::Over,
        }
    }

    fn flipped(self) -> Self {
        match self {
            Self::Over => Self::Under,
            Self::Under => Self::Over,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Over => "Over",
            Self::Under => "Under",
        }
    }
}

/// Swap over/under keeping the original casing style.
fn flip_word(word: &str) -> String {
    let flipped = if word.eq_ignore_ascii_case("over") {
        "under"
    } else {
        "over"
    };
    if word.chars().all(|c| c.is_ascii_uppercase()) {
        flipped.to_ascii_uppercase()
    } else if word.starts_with(|c: char| c.is_ascii_uppercase()) {
        let mut s = flipped.to_string();
        s[..1].make_ascii_uppercase();
        s
    } else {
        flipped.to_string()
    }
}

pub fn describe(wager: &Wager) -> WagerDescription {
    match wager.bet_type {
        BetType::Spread => describe_spread(wager),
        BetType::Moneyline => describe_moneyline(wager),
        BetType::Total => describe_total(wager),
        BetType::TeamTotal => describe_team_total(wager),
        BetType::Other => describe_other(wager),
    }
}

fn describe_spread(wager: &Wager) -> WagerDescription {
    let team = team_label(&wager.position);
    let value = wager
        .line
        .or_else(|| trailing_signed(&wager.position))
        .or_else(|| is_pickem(&wager.position).then_some(0.0));
    let Some(value) = value else {
        return describe_other(wager);
    };

    let opponent = teams::resolve(wager, team).map(|r| r.opponent);
    let opposite_team = opponent.as_deref().unwrap_or(team);
    WagerDescription {
        line: format!("{} {}", short_team_name(team), format_signed(value)),
        opposite_line: format!("{} {}", short_team_name(opposite_team), format_signed(-value)),
    }
}

fn describe_moneyline(wager: &Wager) -> WagerDescription {
    let team = team_label(&wager.position);
    let opposite_line = teams::resolve(wager, team).map_or_else(
        || OPPOSITE_FALLBACK.to_string(),
        |r| format!("{} ML", short_team_name(&r.opponent)),
    );
    WagerDescription {
        line: format!("{} ML", short_team_name(team)),
        opposite_line,
    }
}

fn total_threshold(wager: &Wager) -> Option<String> {
    wager
        .line
        .map(f64::abs)
        .or_else(|| trailing_number(&wager.position))
        .map(format_number)
}

fn with_threshold(prefix: &str, threshold: Option<&str>) -> String {
    match threshold {
        Some(t) => format!("{prefix} {t}"),
        None => prefix.to_string(),
    }
}

fn describe_total(wager: &Wager) -> WagerDescription {
    let direction = Direction::read(&wager.position);
    let threshold = total_threshold(wager);
    WagerDescription {
        line: with_threshold(direction.as_str(), threshold.as_deref()),
        opposite_line: with_threshold(direction.flipped().as_str(), threshold.as_deref()),
    }
}

fn describe_team_total(wager: &Wager) -> WagerDescription {
    let direction = Direction::read(&wager.position);
    let threshold = total_threshold(wager);
    let team_text = RE_OVER_UNDER
        .split(&wager.position)
        .next()
        .map(team_label)
        .unwrap_or_default();
    let team = short_team_name(team_text);

    let side = |d: Direction| {
        let prefix = if team.is_empty() {
            d.as_str().to_string()
        } else {
            format!("{team} {}", d.as_str())
        };
        with_threshold(&prefix, threshold.as_deref())
    };
    WagerDescription {
        line: side(direction),
        opposite_line: side(direction.flipped()),
    }
}

fn describe_other(wager: &Wager) -> WagerDescription {
    let position = wager.position.trim();
    let line = match wager.line {
        // A totals-style line reads as a threshold, not a signed handicap.
        Some(value) if trailing_number(position).is_none() && RE_OVER_UNDER.is_match(position) => {
            format!("{position} {}", format_number(value))
        }
        Some(value) if trailing_number(position).is_none() => {
            format!("{position} {}", format_signed(value))
        }
        _ => position.to_string(),
    };
    let opposite_line = opposite_of_text(wager, &line);
    WagerDescription {
        line,
        opposite_line,
    }
}

/// First rule that applies: flip a trailing signed number, flip an
/// over/under word, swap in the opponent, or give up.
fn opposite_of_text(wager: &Wager, text: &str) -> String {
    if RE_TRAILING_SIGNED.is_match(text) {
        return RE_TRAILING_SIGNED
            .replace(text, |caps: &Captures<'_>| {
                let sign = if &caps[1] == "-" { "+" } else { "-" };
                format!("{sign}{}", &caps[2])
            })
            .into_owned();
    }

    if RE_OVER_UNDER.is_match(text) {
        return RE_OVER_UNDER
            .replace(text, |caps: &Captures<'_>| flip_word(&caps[1]))
            .into_owned();
    }

    if let Some(r) = teams::resolve(wager, team_label(text)) {
        let opponent = short_team_name(&r.opponent);
        let own_len = r.own.len();
        let starts_with_own = text
            .get(..own_len)
            .is_some_and(|head| head.eq_ignore_ascii_case(&r.own));
        if starts_with_own {
            return format!("{opponent}{}", &text[own_len..]);
        }
        return format!("{opponent} {text}");
    }

    OPPOSITE_FALLBACK.to_string()
}
