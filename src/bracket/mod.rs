//! Knockout bracket synthesis.
//!
//! Rebuilds a single-elimination bracket from the round labels of a league
//! season and the fixtures of each knockout round. Upstream round lists mix
//! group and knockout stages, and two-legged or mirrored records make the
//! same pairing show up more than once per round.

mod rules;

pub use rules::{priority, BracketRules};

use chrono::DateTime;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStore, DataState, Origin, Repository};
use crate::error::Result;
use crate::football::{Fixture, FixtureStatus, FixturesQuery, RoundsQuery, TeamRef};
use crate::remote::Gateway;

/// A deduplicated knockout match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketFixture {
  pub id: u64,
  pub date: String,
  /// Unix seconds parsed from `date`, 0 when it doesn't parse
  pub timestamp: i64,
  pub status: FixtureStatus,
  pub venue: Option<String>,
  pub home: TeamRef,
  pub away: TeamRef,
  pub home_score: Option<u16>,
  pub away_score: Option<u16>,
}

impl From<Fixture> for BracketFixture {
  fn from(fixture: Fixture) -> Self {
    let timestamp = DateTime::parse_from_rfc3339(&fixture.date)
      .map(|dt| dt.timestamp())
      .unwrap_or(0);

    Self {
      id: fixture.id,
      date: fixture.date,
      timestamp,
      status: fixture.status,
      venue: fixture.venue,
      home: fixture.home,
      away: fixture.away,
      home_score: fixture.home_goals,
      away_score: fixture.away_goals,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketRound {
  pub round: String,
  pub fixtures: Vec<BracketFixture>,
}

/// Knockout rounds of a league season, final first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Bracket {
  pub league: u32,
  pub season: u16,
  pub rounds: Vec<BracketRound>,
  /// Knockout rounds left out because their fixtures couldn't be fetched
  pub skipped: Vec<String>,
  /// Whether any round was served from stale cache
  pub stale: bool,
}

impl Bracket {
  pub fn is_empty(&self) -> bool {
    self.rounds.is_empty()
  }

  pub fn state(&self) -> DataState {
    if !self.skipped.is_empty() {
      DataState::Partial
    } else if self.stale {
      DataState::Stale
    } else {
      DataState::Fresh
    }
  }
}

/// Keep one fixture per unordered team pair.
///
/// A finished fixture replaces an unfinished one for the same pair; otherwise
/// the first one seen stays. Output keeps first-seen order.
pub fn dedup_fixtures(fixtures: Vec<Fixture>) -> Vec<Fixture> {
  let mut kept: Vec<Fixture> = Vec::with_capacity(fixtures.len());
  let mut slots: HashMap<(u32, u32), usize> = HashMap::new();

  for fixture in fixtures {
    let (a, b) = (fixture.home.id, fixture.away.id);
    let pair = (a.min(b), a.max(b));

    match slots.get(&pair) {
      Some(&slot) => {
        if fixture.is_finished() && !kept[slot].is_finished() {
          debug!(
            "fixture {} replaces unfinished duplicate {}",
            fixture.id, kept[slot].id
          );
          kept[slot] = fixture;
        }
      }
      None => {
        slots.insert(pair, kept.len());
        kept.push(fixture);
      }
    }
  }

  kept
}

/// Builds brackets from rounds and fixtures served by the repository.
pub struct BracketSynthesizer<'a, G, S> {
  repository: &'a Repository<G, S>,
  rules: &'a BracketRules,
}

impl<'a, G: Gateway, S: CacheStore> BracketSynthesizer<'a, G, S> {
  pub fn new(repository: &'a Repository<G, S>, rules: &'a BracketRules) -> Self {
    Self { repository, rules }
  }

  /// Synthesize the bracket of `league` in `season`.
  ///
  /// Fails only when the round list itself can't be obtained. A round whose
  /// fixtures fail to load is logged and left out.
  #[instrument(skip(self))]
  pub async fn synthesize(&self, league: u32, season: u16) -> Result<Bracket> {
    let mut bracket = Bracket {
      league,
      season,
      ..Default::default()
    };

    let rounds = self
      .repository
      .fetch(&RoundsQuery { league, season })
      .await?;
    bracket.stale |= rounds.origin == Origin::StaleFallback;

    let selected = self.rules.select(rounds.data.iter().map(|r| r.name.as_str()));
    if selected.is_empty() {
      debug!("no knockout rounds among {} rounds", rounds.data.len());
      return Ok(bracket);
    }

    for round in selected {
      let fetched = match self
        .repository
        .fetch(&FixturesQuery::in_round(league, season, round))
        .await
      {
        Ok(fetched) => fetched,
        Err(e) => {
          warn!("skipping round {}: {}", round, e);
          bracket.skipped.push(round.to_string());
          continue;
        }
      };
      bracket.stale |= fetched.origin == Origin::StaleFallback;

      let fixtures: Vec<BracketFixture> = dedup_fixtures(fetched.data)
        .into_iter()
        .map(BracketFixture::from)
        .collect();
      if fixtures.is_empty() {
        debug!("round {} has no fixtures, dropping it", round);
        continue;
      }

      bracket.rounds.push(BracketRound {
        round: round.to_string(),
        fixtures,
      });
    }

    // Stable: equal priorities keep discovery order
    bracket.rounds.sort_by_key(|r| priority(&r.round));
    Ok(bracket)
  }
}
