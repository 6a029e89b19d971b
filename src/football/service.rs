//! Football data service: the repository, fan-out and bracket synthesis
//! behind one facade.

use crate::aggregate::{fetch_many, AggregateResult};
use crate::bracket::{Bracket, BracketRules, BracketSynthesizer};
use crate::cache::{CacheStore, Fetched, Repository};
use crate::config::Config;
use crate::error::Result;
use crate::remote::{Gateway, HttpGateway, RetryingFetcher};

use super::queries::{
  FixtureQuery, FixturesQuery, LeaguesQuery, LiveQuery, RoundsQuery, StandingsQuery, TeamQuery,
};
use super::types::{Fixture, League, LiveFixture, RawRound, Standing, TeamProfile};

/// Football data with transparent caching.
///
/// Every read goes through the freshness-gated repository, so results may
/// come from cache, the network, or stale cache when upstream is failing.
pub struct FootballService<G, S> {
  repository: Repository<G, S>,
  rules: BracketRules,
  /// Leagues used when a fan-out call names none
  leagues: Vec<u32>,
}

impl<S: CacheStore> FootballService<HttpGateway, S> {
  /// Create a service talking to the configured upstream.
  pub fn connect(config: &Config, store: S) -> color_eyre::Result<Self> {
    let gateway = HttpGateway::new(&config.api, Config::api_key())?;
    let fetcher = RetryingFetcher::new(gateway, config.retry.policy());
    let repository = Repository::new(fetcher, store).with_freshness(config.cache.freshness());

    Ok(Self::new(
      repository,
      config.bracket.clone(),
      config.leagues.clone(),
    ))
  }
}

impl<G: Gateway, S: CacheStore> FootballService<G, S> {
  pub fn new(repository: Repository<G, S>, rules: BracketRules, leagues: Vec<u32>) -> Self {
    Self {
      repository,
      rules,
      leagues,
    }
  }

  fn leagues_or_default(&self, leagues: &[u32]) -> Vec<u32> {
    if leagues.is_empty() {
      self.leagues.clone()
    } else {
      leagues.to_vec()
    }
  }

  /// Fixtures across leagues, one concurrent query per league.
  pub async fn fixtures(
    &self,
    leagues: &[u32],
    query: impl Fn(u32) -> FixturesQuery,
  ) -> Result<AggregateResult<Fixture, u32>> {
    fetch_many(
      &self.repository,
      self.leagues_or_default(leagues),
      |league| query(*league),
    )
    .await
  }

  /// In-play fixtures across leagues.
  pub async fn live(&self, leagues: &[u32]) -> Result<AggregateResult<LiveFixture, u32>> {
    fetch_many(
      &self.repository,
      self.leagues_or_default(leagues),
      |league| LiveQuery {
        league: Some(*league),
      },
    )
    .await
  }

  pub async fn fixture(&self, id: u64) -> Result<Fetched<Fixture>> {
    self.repository.fetch_one(&FixtureQuery(id)).await
  }

  pub async fn standings(&self, league: u32, season: u16) -> Result<Fetched<Vec<Standing>>> {
    self
      .repository
      .fetch(&StandingsQuery { league, season })
      .await
  }

  pub async fn rounds(&self, league: u32, season: u16) -> Result<Fetched<Vec<RawRound>>> {
    self.repository.fetch(&RoundsQuery { league, season }).await
  }

  pub async fn team(&self, id: u32) -> Result<Fetched<TeamProfile>> {
    self.repository.fetch_one(&TeamQuery(id)).await
  }

  pub async fn leagues(&self) -> Result<Fetched<Vec<League>>> {
    self.repository.fetch(&LeaguesQuery).await
  }

  /// Knockout bracket of a league season.
  pub async fn bracket(&self, league: u32, season: u16) -> Result<Bracket> {
    BracketSynthesizer::new(&self.repository, &self.rules)
      .synthesize(league, season)
      .await
  }

  /// Drop every cached row. Returns how many were removed.
  pub fn clear_cache(&self) -> color_eyre::Result<usize> {
    self.repository.store().clear()
  }
}
