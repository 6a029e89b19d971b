//! API-Football resources: domain types, wire types and one query per
//! resource kind, plus the service facade the front end talks to.

mod api_types;
mod cache;
mod queries;
mod service;
mod types;

pub use queries::{
  season_of, FixtureQuery, FixtureScope, FixturesQuery, LeaguesQuery, LiveQuery, RoundsQuery,
  StandingsQuery, TeamQuery,
};
pub use service::FootballService;
pub use types::{Fixture, FixtureStatus, League, LiveFixture, RawRound, Standing, TeamProfile, TeamRef};
