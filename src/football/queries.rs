//! One [`QuerySpec`] per upstream resource kind.
//!
//! Each query knows the partition filter that fully answers it from cache
//! and the API-Football request that answers it from the network.

use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::{Freshness, Lookup, PartitionFilter, QuerySpec};
use crate::remote::ApiRequest;

use super::api_types::{ApiFixture, ApiLeagueEntry, ApiStandingsEntry, ApiTeamEntry};
use super::types::{Fixture, League, LiveFixture, RawRound, Standing, TeamProfile};

/// Decode an upstream `response` array, mapping each element.
fn decode_list<A, R>(payload: Value, map: impl Fn(A) -> R) -> Result<Vec<R>, String>
where
  A: DeserializeOwned,
{
  let raw: Vec<A> = serde_json::from_value(payload).map_err(|e| e.to_string())?;
  Ok(raw.into_iter().map(map).collect())
}

/// Season a date belongs to, European convention: seasons start in July.
pub fn season_of(date: NaiveDate) -> u16 {
  let year = if date.month() < 7 {
    date.year() - 1
  } else {
    date.year()
  };
  u16::try_from(year).unwrap_or(0)
}

// ============================================================================
// Fixtures
// ============================================================================

/// Which slice of a league season a fixtures query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureScope {
  /// Kick-off between two days, inclusive
  Dates { from: NaiveDate, to: NaiveDate },
  /// One named round ("Quarter-finals")
  Round(String),
  /// Everything in the season; too broad to answer from cache
  Season,
}

/// Fixtures of one league season, optionally narrowed in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixturesQuery {
  pub league: u32,
  pub season: u16,
  pub scope: FixtureScope,
  /// Only fixtures involving this team
  pub team: Option<u32>,
  /// Only fixtures whose short status is listed
  pub statuses: Vec<String>,
}

impl FixturesQuery {
  pub fn new(league: u32, season: u16, scope: FixtureScope) -> Self {
    Self {
      league,
      season,
      scope,
      team: None,
      statuses: Vec::new(),
    }
  }

  /// Fixtures on one day. The season is derived from the date when omitted.
  pub fn on_date(league: u32, date: NaiveDate, season: Option<u16>) -> Self {
    let season = season.unwrap_or_else(|| season_of(date));
    Self::new(league, season, FixtureScope::Dates { from: date, to: date })
  }

  pub fn between(league: u32, season: u16, from: NaiveDate, to: NaiveDate) -> Self {
    Self::new(league, season, FixtureScope::Dates { from, to })
  }

  pub fn in_round(league: u32, season: u16, round: impl Into<String>) -> Self {
    Self::new(league, season, FixtureScope::Round(round.into()))
  }

  pub fn team(mut self, team: u32) -> Self {
    self.team = Some(team);
    self
  }

  pub fn status(mut self, short: impl Into<String>) -> Self {
    self.statuses.push(short.into());
    self
  }
}

impl QuerySpec for FixturesQuery {
  type Row = Fixture;

  fn describe(&self) -> String {
    let scope = match &self.scope {
      FixtureScope::Dates { from, to } if from == to => format!("on {}", from),
      FixtureScope::Dates { from, to } => format!("from {} to {}", from, to),
      FixtureScope::Round(round) => format!("in {}", round),
      FixtureScope::Season => "for the season".to_string(),
    };
    format!("fixtures of league {} {} {}", self.league, self.season, scope)
  }

  fn request(&self) -> ApiRequest {
    let request = ApiRequest::new("fixtures")
      .param("league", self.league)
      .param("season", self.season);

    match &self.scope {
      FixtureScope::Dates { from, to } if from == to => request.param("date", from),
      FixtureScope::Dates { from, to } => request.param("from", from).param("to", to),
      FixtureScope::Round(round) => request.param("round", round),
      FixtureScope::Season => request,
    }
  }

  fn lookup(&self) -> Lookup {
    let filter = PartitionFilter {
      league: Some(self.league),
      season: Some(self.season),
      ..Default::default()
    };

    match &self.scope {
      FixtureScope::Dates { from, to } => Lookup::Filter(PartitionFilter {
        from: Some(*from),
        to: Some(*to),
        ..filter
      }),
      FixtureScope::Round(round) => Lookup::Filter(PartitionFilter {
        round: Some(round.clone()),
        ..filter
      }),
      FixtureScope::Season => Lookup::Uncached,
    }
  }

  fn decode(&self, payload: Value) -> Result<Vec<Fixture>, String> {
    decode_list(payload, |raw: ApiFixture| Fixture::from(raw))
  }

  fn refine(&self, rows: Vec<Fixture>) -> Vec<Fixture> {
    rows
      .into_iter()
      .filter(|f| self.team.is_none_or(|team| f.involves(team)))
      .filter(|f| self.statuses.is_empty() || self.statuses.contains(&f.status.short))
      .collect()
  }
}

/// One fixture by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureQuery(pub u64);

impl QuerySpec for FixtureQuery {
  type Row = Fixture;

  fn describe(&self) -> String {
    format!("fixture {}", self.0)
  }

  fn request(&self) -> ApiRequest {
    ApiRequest::new("fixtures").param("id", self.0)
  }

  fn lookup(&self) -> Lookup {
    Lookup::Key(self.0.to_string())
  }

  fn decode(&self, payload: Value) -> Result<Vec<Fixture>, String> {
    decode_list(payload, |raw: ApiFixture| Fixture::from(raw))
  }
}

/// Fixtures being played right now, for one league or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveQuery {
  pub league: Option<u32>,
}

impl QuerySpec for LiveQuery {
  type Row = LiveFixture;

  fn describe(&self) -> String {
    match self.league {
      Some(league) => format!("live fixtures of league {}", league),
      None => "all live fixtures".to_string(),
    }
  }

  fn request(&self) -> ApiRequest {
    let live = match self.league {
      Some(league) => league.to_string(),
      None => "all".to_string(),
    };
    ApiRequest::new("fixtures").param("live", live)
  }

  fn lookup(&self) -> Lookup {
    Lookup::Filter(PartitionFilter {
      league: self.league,
      ..Default::default()
    })
  }

  fn freshness(&self) -> Freshness {
    Freshness::Live
  }

  fn decode(&self, payload: Value) -> Result<Vec<LiveFixture>, String> {
    decode_list(payload, |raw: ApiFixture| LiveFixture(raw.into()))
  }

  // The live set is a snapshot: finished matches must drop out
  fn replaces_partition(&self) -> bool {
    true
  }
}

// ============================================================================
// Standings, rounds, teams, leagues
// ============================================================================

/// League table(s) of one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandingsQuery {
  pub league: u32,
  pub season: u16,
}

impl QuerySpec for StandingsQuery {
  type Row = Standing;

  fn describe(&self) -> String {
    format!("standings of league {} {}", self.league, self.season)
  }

  fn request(&self) -> ApiRequest {
    ApiRequest::new("standings")
      .param("league", self.league)
      .param("season", self.season)
  }

  fn lookup(&self) -> Lookup {
    Lookup::Filter(PartitionFilter {
      league: Some(self.league),
      season: Some(self.season),
      ..Default::default()
    })
  }

  fn decode(&self, payload: Value) -> Result<Vec<Standing>, String> {
    let entries: Vec<ApiStandingsEntry> =
      serde_json::from_value(payload).map_err(|e| e.to_string())?;
    Ok(entries.into_iter().flat_map(|e| e.into_rows()).collect())
  }

  fn replaces_partition(&self) -> bool {
    true
  }
}

/// Round labels used by a league season, in upstream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundsQuery {
  pub league: u32,
  pub season: u16,
}

impl QuerySpec for RoundsQuery {
  type Row = RawRound;

  fn describe(&self) -> String {
    format!("rounds of league {} {}", self.league, self.season)
  }

  fn request(&self) -> ApiRequest {
    ApiRequest::new("fixtures/rounds")
      .param("league", self.league)
      .param("season", self.season)
  }

  fn lookup(&self) -> Lookup {
    Lookup::Filter(PartitionFilter {
      league: Some(self.league),
      season: Some(self.season),
      ..Default::default()
    })
  }

  fn decode(&self, payload: Value) -> Result<Vec<RawRound>, String> {
    decode_list(payload, |name: String| RawRound {
      league: self.league,
      season: self.season,
      name,
    })
  }

  // Upstream may relabel rounds; old labels must not linger
  fn replaces_partition(&self) -> bool {
    true
  }
}

/// One team profile by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamQuery(pub u32);

impl QuerySpec for TeamQuery {
  type Row = TeamProfile;

  fn describe(&self) -> String {
    format!("team {}", self.0)
  }

  fn request(&self) -> ApiRequest {
    ApiRequest::new("teams").param("id", self.0)
  }

  fn lookup(&self) -> Lookup {
    Lookup::Key(self.0.to_string())
  }

  fn decode(&self, payload: Value) -> Result<Vec<TeamProfile>, String> {
    decode_list(payload, |raw: ApiTeamEntry| raw.into())
  }
}

/// The league catalogue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaguesQuery;

impl QuerySpec for LeaguesQuery {
  type Row = League;

  fn describe(&self) -> String {
    "league catalogue".to_string()
  }

  fn request(&self) -> ApiRequest {
    ApiRequest::new("leagues")
  }

  fn lookup(&self) -> Lookup {
    Lookup::Filter(PartitionFilter::default())
  }

  fn decode(&self, payload: Value) -> Result<Vec<League>, String> {
    decode_list(payload, |raw: ApiLeagueEntry| raw.into())
  }
}
