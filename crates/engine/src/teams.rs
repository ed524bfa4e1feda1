//! Team names: which side of a matchup a position backs, and display compaction.

use std::collections::HashSet;
use std::sync::LazyLock;

use common::types::Wager;
use regex::Regex;

static RE_VS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+vs\.?\s+").expect("valid vs separator regex"));
static RE_V: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+v\.?\s+").expect("valid v separator regex"));

/// Longest first so "Football Club" wins over "FC"-style endings.
const CLUB_SUFFIXES: &[&str] = &[
    "Football Club",
    "Soccer Club",
    "Hockey Club",
    "AFC",
    "FC",
    "SC",
    "CF",
];

/// The two sides of a wager's event.
pub fn matchup(wager: &Wager) -> Option<(String, String)> {
    let explicit = (
        wager.home_team.as_deref().map(str::trim),
        wager.away_team.as_deref().map(str::trim),
    );
    if let (Some(home), Some(away)) = explicit {
        if !home.is_empty() && !away.is_empty() {
            return Some((home.to_string(), away.to_string()));
        }
    }
    split_event(&wager.event_description)
}

/// Split "Away @ Home", "A vs B", "A vs. B" or "A v B", in that priority.
pub fn split_event(description: &str) -> Option<(String, String)> {
    let pair = if let Some((a, b)) = description.split_once('@') {
        (a, b)
    } else if let Some(m) = RE_VS.find(description) {
        (&description[..m.start()], &description[m.end()..])
    } else if let Some(m) = RE_V.find(description) {
        (&description[..m.start()], &description[m.end()..])
    } else {
        return None;
    };

    let (a, b) = (pair.0.trim(), pair.1.trim());
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some((a.to_string(), b.to_string()))
}

/// The backed side and its opponent, as full names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub own: String,
    pub opponent: String,
}

/// Decide which side `team` refers to. Case-insensitive substring match
/// first, then word overlap. Ties are unresolved.
pub fn resolve(wager: &Wager, team: &str) -> Option<Resolution> {
    let (a, b) = matchup(wager)?;
    let needle = team.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let contains = |side: &str| {
        let side = side.to_lowercase();
        side.contains(&needle) || needle.contains(&side)
    };
    let picked_a = match (contains(&a), contains(&b)) {
        (true, false) => true,
        (false, true) => false,
        (true, true) => return None,
        (false, false) => {
            let team_words = words(&needle);
            let (ov_a, ov_b) = (
                words(&a).intersection(&team_words).count(),
                words(&b).intersection(&team_words).count(),
            );
            match ov_a.cmp(&ov_b) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => return None,
            }
        }
    };

    let (own, opponent) = if picked_a { (a, b) } else { (b, a) };
    Some(Resolution { own, opponent })
}

fn words(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Strip a trailing club designator for display. Never returns an empty name.
pub fn short_team_name(name: &str) -> &str {
    let name = name.trim();
    for suffix in CLUB_SUFFIXES {
        let Some(cut) = name.len().checked_sub(suffix.len()) else {
            continue;
        };
        let (Some(head), Some(tail)) = (name.get(..cut), name.get(cut..)) else {
            continue;
        };
        if tail.eq_ignore_ascii_case(suffix) && head.ends_with(char::is_whitespace) {
            let head = head.trim_end();
            if !head.is_empty() {
                return head;
            }
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::spread_wager;

    fn wager_for(event: &str) -> Wager {
        let mut w = spread_wager("w1", "owner");
        w.event_description = event.to_string();
        w
    }

    #[test]
    fn test_split_priority() {
        assert_eq!(
            split_event("Celtics @ Lakers"),
            Some(("Celtics".into(), "Lakers".into()))
        );
        assert_eq!(
            split_event("Arsenal vs. Chelsea"),
            Some(("Arsenal".into(), "Chelsea".into()))
        );
        assert_eq!(
            split_event("Nadal v Federer"),
            Some(("Nadal".into(), "Federer".into()))
        );
        // "@" outranks "vs" when both appear.
        assert_eq!(
            split_event("Team vs Others @ Home"),
            Some(("Team vs Others".into(), "Home".into()))
        );
        assert_eq!(split_event("Super Bowl futures"), None);
    }

    #[test]
    fn test_explicit_teams_win_over_description() {
        let mut w = wager_for("something unparseable");
        w.home_team = Some("Boston Celtics".into());
        w.away_team = Some("Los Angeles Lakers".into());
        let r = resolve(&w, "Lakers").unwrap();
        assert_eq!(r.opponent, "Boston Celtics");
        assert_eq!(r.own, "Los Angeles Lakers");
    }

    #[test]
    fn test_resolve_by_substring_then_words() {
        let w = wager_for("Los Angeles Lakers vs Boston Celtics");
        assert_eq!(resolve(&w, "lakers").unwrap().opponent, "Boston Celtics");

        // No substring hit, one shared word.
        let w = wager_for("New York Knicks vs Brooklyn Nets");
        assert_eq!(resolve(&w, "NY Knicks").unwrap().opponent, "Brooklyn Nets");
    }

    #[test]
    fn test_ambiguous_is_unresolved() {
        let w = wager_for("New York Rangers vs New York Islanders");
        assert_eq!(resolve(&w, "New York"), None);
        assert_eq!(resolve(&wager_for("Lakers vs Celtics"), "Warriors"), None);
        assert_eq!(resolve(&wager_for("no separator here"), "Lakers"), None);
    }

    #[test]
    fn test_short_team_name_strips_club_suffixes() {
        assert_eq!(short_team_name("Arsenal FC"), "Arsenal");
        assert_eq!(short_team_name("Bournemouth AFC"), "Bournemouth");
        assert_eq!(short_team_name("Chelsea Football Club"), "Chelsea");
        assert_eq!(short_team_name("Real Madrid CF"), "Real Madrid");
        assert_eq!(short_team_name("Lakers"), "Lakers");
        assert_eq!(short_team_name("FC"), "FC");
        // Only whole trailing words count.
        assert_eq!(short_team_name("Roosevelt Rocs"), "Roosevelt Rocs");
    }
}
