//! Caching implementations for football types.

use sha2::{Digest, Sha256};

use crate::cache::{Cacheable, Partition};

use super::types::{Fixture, League, LiveFixture, RawRound, Standing, TeamProfile};

/// SHA256 hash for stable, fixed-length keys of rows without an upstream id.
fn hashed_key(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

fn fixture_partition(fixture: &Fixture) -> Partition {
  Partition {
    league: Some(fixture.league),
    season: Some(fixture.season),
    day: fixture.day(),
    round: fixture.round.clone(),
  }
}

impl Cacheable for Fixture {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn partition(&self) -> Partition {
    fixture_partition(self)
  }

  fn entity_type() -> &'static str {
    "fixture"
  }
}

impl Cacheable for LiveFixture {
  fn cache_key(&self) -> String {
    self.0.id.to_string()
  }

  fn partition(&self) -> Partition {
    fixture_partition(&self.0)
  }

  fn entity_type() -> &'static str {
    "live_fixture"
  }
}

impl Cacheable for Standing {
  fn cache_key(&self) -> String {
    hashed_key(&format!(
      "{}:{}:{}:{}",
      self.league,
      self.season,
      self.group.as_deref().unwrap_or(""),
      self.team.id
    ))
  }

  fn partition(&self) -> Partition {
    Partition {
      league: Some(self.league),
      season: Some(self.season),
      ..Default::default()
    }
  }

  fn entity_type() -> &'static str {
    "standing"
  }
}

impl Cacheable for TeamProfile {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn partition(&self) -> Partition {
    // Teams are only ever looked up by id
    Partition::default()
  }

  fn entity_type() -> &'static str {
    "team"
  }
}

impl Cacheable for League {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn partition(&self) -> Partition {
    Partition {
      league: Some(self.id),
      season: self.current_season,
      ..Default::default()
    }
  }

  fn entity_type() -> &'static str {
    "league"
  }
}

impl Cacheable for RawRound {
  fn cache_key(&self) -> String {
    hashed_key(&format!("{}:{}:{}", self.league, self.season, self.name))
  }

  fn partition(&self) -> Partition {
    Partition {
      league: Some(self.league),
      season: Some(self.season),
      ..Default::default()
    }
  }

  fn entity_type() -> &'static str {
    "round"
  }
}
