use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// Fixture statuses meaning the match is over.
pub const TERMINAL_STATUSES: [&str; 3] = ["FT", "AET", "PEN"];

/// Fixture statuses meaning the match is being played right now.
pub const LIVE_STATUSES: [&str; 8] = ["1H", "HT", "2H", "ET", "BT", "P", "SUSP", "INT"];

/// A scheduled, live or finished match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
  pub id: u64,
  pub league: u32,
  pub season: u16,
  pub round: Option<String>,
  /// Kick-off as sent upstream (RFC 3339)
  pub date: String,
  pub timestamp: Option<i64>,
  pub status: FixtureStatus,
  pub venue: Option<String>,
  pub home: TeamRef,
  pub away: TeamRef,
  pub home_goals: Option<u16>,
  pub away_goals: Option<u16>,
}

impl Fixture {
  /// Calendar day of kick-off, if the date parses.
  pub fn day(&self) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(&self.date)
      .ok()
      .map(|dt| dt.date_naive())
  }

  pub fn is_finished(&self) -> bool {
    TERMINAL_STATUSES.contains(&self.status.short.as_str())
  }

  pub fn is_live(&self) -> bool {
    LIVE_STATUSES.contains(&self.status.short.as_str())
  }

  pub fn involves(&self, team: u32) -> bool {
    self.home.id == team || self.away.id == team
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureStatus {
  pub long: String,
  pub short: String,
  pub elapsed: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
  pub id: u32,
  pub name: String,
  pub logo: Option<String>,
}

/// A fixture returned by the in-play endpoint.
///
/// Cached apart from regular fixtures because the live set is a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveFixture(pub Fixture);

/// One row of a league table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
  pub league: u32,
  pub season: u16,
  /// Group name for multi-table competitions ("Group A")
  pub group: Option<String>,
  pub rank: u32,
  pub team: TeamRef,
  pub points: i32,
  pub goal_diff: i32,
  pub played: u32,
  pub won: u32,
  pub drawn: u32,
  pub lost: u32,
  pub goals_for: u32,
  pub goals_against: u32,
  pub form: Option<String>,
  pub description: Option<String>,
}

/// Team details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProfile {
  pub id: u32,
  pub name: String,
  pub code: Option<String>,
  pub country: Option<String>,
  pub founded: Option<u16>,
  pub national: bool,
  pub logo: Option<String>,
  pub venue: Option<String>,
  pub venue_city: Option<String>,
  pub venue_capacity: Option<u32>,
}

/// League catalogue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
  pub id: u32,
  pub name: String,
  /// "League" or "Cup"
  pub kind: String,
  pub country: Option<String>,
  pub current_season: Option<u16>,
}

/// One round label as returned upstream for a league/season.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRound {
  pub league: u32,
  pub season: u16,
  pub name: String,
}
