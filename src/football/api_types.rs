//! Serde-deserializable types matching API-Football responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;

use super::types::{Fixture, FixtureStatus, League, Standing, TeamProfile, TeamRef};

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTeam {
  pub id: u32,
  #[serde(default)]
  pub name: String,
  pub logo: Option<String>,
}

impl From<ApiTeam> for TeamRef {
  fn from(team: ApiTeam) -> Self {
    TeamRef {
      id: team.id,
      name: team.name,
      logo: team.logo,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiVenue {
  pub name: Option<String>,
  pub city: Option<String>,
  pub capacity: Option<u32>,
}

// ============================================================================
// /fixtures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiFixtureStatus {
  #[serde(default)]
  pub long: String,
  #[serde(default)]
  pub short: String,
  pub elapsed: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct ApiFixtureInfo {
  pub id: u64,
  #[serde(default)]
  pub date: String,
  pub timestamp: Option<i64>,
  #[serde(default)]
  pub venue: ApiVenue,
  pub status: ApiFixtureStatus,
}

#[derive(Debug, Deserialize)]
pub struct ApiFixtureLeague {
  pub id: u32,
  pub season: u16,
  pub round: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTeams {
  pub home: ApiTeam,
  pub away: ApiTeam,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiGoals {
  pub home: Option<u16>,
  pub away: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct ApiFixture {
  pub fixture: ApiFixtureInfo,
  pub league: ApiFixtureLeague,
  pub teams: ApiTeams,
  #[serde(default)]
  pub goals: ApiGoals,
}

impl From<ApiFixture> for Fixture {
  fn from(raw: ApiFixture) -> Self {
    let venue = match (raw.fixture.venue.name, raw.fixture.venue.city) {
      (Some(name), Some(city)) => Some(format!("{}, {}", name, city)),
      (Some(name), None) => Some(name),
      (None, city) => city,
    };

    Fixture {
      id: raw.fixture.id,
      league: raw.league.id,
      season: raw.league.season,
      round: raw.league.round,
      date: raw.fixture.date,
      timestamp: raw.fixture.timestamp,
      status: FixtureStatus {
        long: raw.fixture.status.long,
        short: raw.fixture.status.short,
        elapsed: raw.fixture.status.elapsed,
      },
      venue,
      home: raw.teams.home.into(),
      away: raw.teams.away.into(),
      home_goals: raw.goals.home,
      away_goals: raw.goals.away,
    }
  }
}

// ============================================================================
// /standings
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiGoalTotals {
  #[serde(rename = "for", default)]
  pub scored: u32,
  #[serde(default)]
  pub against: u32,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiRecord {
  #[serde(default)]
  pub played: u32,
  #[serde(default)]
  pub win: u32,
  #[serde(default)]
  pub draw: u32,
  #[serde(default)]
  pub lose: u32,
  #[serde(default)]
  pub goals: ApiGoalTotals,
}

#[derive(Debug, Deserialize)]
pub struct ApiStandingRow {
  pub rank: u32,
  pub team: ApiTeam,
  #[serde(default)]
  pub points: i32,
  #[serde(rename = "goalsDiff", default)]
  pub goals_diff: i32,
  pub group: Option<String>,
  pub form: Option<String>,
  pub description: Option<String>,
  #[serde(default)]
  pub all: ApiRecord,
}

#[derive(Debug, Deserialize)]
pub struct ApiStandingsLeague {
  pub id: u32,
  pub season: u16,
  /// One table per group
  #[serde(default)]
  pub standings: Vec<Vec<ApiStandingRow>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiStandingsEntry {
  pub league: ApiStandingsLeague,
}

impl ApiStandingsEntry {
  pub fn into_rows(self) -> Vec<Standing> {
    let league = self.league.id;
    let season = self.league.season;
    self
      .league
      .standings
      .into_iter()
      .flatten()
      .map(|row| Standing {
        league,
        season,
        group: row.group,
        rank: row.rank,
        team: row.team.into(),
        points: row.points,
        goal_diff: row.goals_diff,
        played: row.all.played,
        won: row.all.win,
        drawn: row.all.draw,
        lost: row.all.lose,
        goals_for: row.all.goals.scored,
        goals_against: row.all.goals.against,
        form: row.form,
        description: row.description,
      })
      .collect()
  }
}

// ============================================================================
// /teams
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTeamInfo {
  pub id: u32,
  #[serde(default)]
  pub name: String,
  pub code: Option<String>,
  pub country: Option<String>,
  pub founded: Option<u16>,
  #[serde(default)]
  pub national: bool,
  pub logo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTeamEntry {
  pub team: ApiTeamInfo,
  #[serde(default)]
  pub venue: ApiVenue,
}

impl From<ApiTeamEntry> for TeamProfile {
  fn from(raw: ApiTeamEntry) -> Self {
    TeamProfile {
      id: raw.team.id,
      name: raw.team.name,
      code: raw.team.code,
      country: raw.team.country,
      founded: raw.team.founded,
      national: raw.team.national,
      logo: raw.team.logo,
      venue: raw.venue.name,
      venue_city: raw.venue.city,
      venue_capacity: raw.venue.capacity,
    }
  }
}

// ============================================================================
// /leagues
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiLeagueInfo {
  pub id: u32,
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type", default)]
  pub kind: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiCountry {
  pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiSeason {
  pub year: u16,
  #[serde(default)]
  pub current: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiLeagueEntry {
  pub league: ApiLeagueInfo,
  #[serde(default)]
  pub country: ApiCountry,
  #[serde(default)]
  pub seasons: Vec<ApiSeason>,
}

impl From<ApiLeagueEntry> for League {
  fn from(raw: ApiLeagueEntry) -> Self {
    League {
      id: raw.league.id,
      name: raw.league.name,
      kind: raw.league.kind,
      country: raw.country.name,
      current_season: raw.seasons.iter().find(|s| s.current).map(|s| s.year),
    }
  }
}
