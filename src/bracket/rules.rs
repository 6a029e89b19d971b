//! Round classification: which round labels are knockout stages, and in what
//! order they are shown.

use serde::{Deserialize, Serialize};

const DEFAULT_INCLUDE: [&str; 10] = [
  "final",
  "semi",
  "quarter",
  "round of 16",
  "round of 32",
  "1/8",
  "1/4",
  "1/2",
  "playoffs",
  "knockout",
];

const DEFAULT_EXCLUDE: [&str; 11] = [
  "group",
  "league",
  "regular",
  "1st round",
  "2nd round",
  "3rd round",
  "4th round",
  "5th round",
  "6th round",
  "matchday",
  "preliminary",
];

/// Priority of rounds no rule recognises.
pub const UNRANKED: u8 = 99;

/// One row of the ordering table: a name containing any of `any` and none of
/// `none` gets `priority`.
struct PriorityRule {
  any: &'static [&'static str],
  none: &'static [&'static str],
  priority: u8,
}

/// Rules are tried in order, first match wins.
const PRIORITY_TABLE: [PriorityRule; 7] = [
  PriorityRule {
    any: &["3rd place", "third place"],
    none: &[],
    priority: 2,
  },
  PriorityRule {
    any: &["final"],
    none: &["semi", "quarter", "1/2", "1/4", "1/8", "1/16"],
    priority: 1,
  },
  PriorityRule {
    any: &["semi", "1/2"],
    none: &[],
    priority: 3,
  },
  PriorityRule {
    any: &["quarter", "1/4"],
    none: &[],
    priority: 4,
  },
  PriorityRule {
    any: &["round of 16", "1/8"],
    none: &[],
    priority: 5,
  },
  PriorityRule {
    any: &["round of 32", "1/16"],
    none: &[],
    priority: 6,
  },
  PriorityRule {
    any: &["playoffs", "knockout"],
    none: &[],
    priority: 7,
  },
];

/// Keyword lists deciding which rounds belong in a bracket.
///
/// Loaded from the `bracket` section of the config file so new competitions
/// can be supported without code changes. Keywords are matched
/// case-insensitively as substrings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BracketRules {
  pub include: Vec<String>,
  pub exclude: Vec<String>,
  /// Upper bound on retained rounds
  pub max_rounds: usize,
}

impl Default for BracketRules {
  fn default() -> Self {
    Self {
      include: DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect(),
      exclude: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
      max_rounds: 6,
    }
  }
}

impl BracketRules {
  /// Whether `round` is a knockout round.
  pub fn is_knockout(&self, round: &str) -> bool {
    let name = round.to_lowercase();
    let has = |keyword: &String| name.contains(&keyword.to_lowercase());
    self.include.iter().any(has) && !self.exclude.iter().any(has)
  }

  /// Knockout rounds among `rounds`, in input order, capped at `max_rounds`.
  pub fn select<'a>(&self, rounds: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut selected: Vec<&str> = Vec::new();
    for round in rounds {
      if selected.len() == self.max_rounds {
        break;
      }
      if self.is_knockout(round) && !selected.contains(&round) {
        selected.push(round);
      }
    }
    selected
  }
}

/// Display rank of a round, lower first. The final is 1.
pub fn priority(round: &str) -> u8 {
  let name = round.to_lowercase();
  PRIORITY_TABLE
    .iter()
    .find(|rule| {
      rule.any.iter().any(|k| name.contains(k)) && !rule.none.iter().any(|k| name.contains(k))
    })
    .map(|rule| rule.priority)
    .unwrap_or(UNRANKED)
}
