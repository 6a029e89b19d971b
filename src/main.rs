mod aggregate;
mod bracket;
mod cache;
mod config;
mod error;
mod football;
mod remote;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use aggregate::AggregateResult;
use bracket::Bracket;
use cache::{CacheStore, DataState, Fetched, MemoryStore, SqliteStore};
use config::{CacheBackend, Config};
use football::{season_of, Fixture, FixturesQuery, FootballService};
use remote::Gateway;

#[derive(Parser, Debug)]
#[command(name = "kickoff")]
#[command(about = "Cached football statistics: fixtures, standings and knockout brackets")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kickoff/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Print JSON instead of text
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fixtures on a day (or up to --to) across leagues
  Fixtures {
    #[arg(long)]
    date: NaiveDate,
    /// Last day of the range, inclusive
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Season year (default: derived from the date)
    #[arg(long)]
    season: Option<u16>,
    /// League id, repeatable (default: configured leagues)
    #[arg(long = "league")]
    leagues: Vec<u32>,
    /// Only fixtures of this team
    #[arg(long)]
    team: Option<u32>,
    /// Only fixtures with this short status (FT, NS, ...), repeatable
    #[arg(long = "status")]
    statuses: Vec<String>,
  },
  /// One fixture by id
  Fixture {
    #[arg(long)]
    id: u64,
  },
  /// Fixtures being played right now
  Live {
    #[arg(long = "league")]
    leagues: Vec<u32>,
  },
  /// League table
  Standings {
    #[arg(long)]
    league: u32,
    #[arg(long)]
    season: u16,
  },
  /// Round labels of a league season
  Rounds {
    #[arg(long)]
    league: u32,
    #[arg(long)]
    season: u16,
  },
  /// Knockout bracket of a league season
  Bracket {
    #[arg(long)]
    league: u32,
    #[arg(long)]
    season: u16,
  },
  /// Team profile
  Team {
    #[arg(long)]
    id: u32,
  },
  /// League catalogue
  Leagues,
  /// Remove every cached record
  ClearCache,
}

/// Log to a file in the data directory, and to stderr with --verbose.
///
/// Filter from KICKOFF_LOG (default "info"). The guard must outlive main's work.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::never(&log_dir, "kickoff.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let env_filter =
    EnvFilter::try_from_env("KICKOFF_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .boxed()
  });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  info!("starting with {:?} cache", config.cache.backend);

  match config.cache.backend {
    CacheBackend::Sqlite => {
      let store = SqliteStore::open(&config.cache.database_path()?)?;
      run(FootballService::connect(&config, store)?, args).await
    }
    CacheBackend::Memory => run(FootballService::connect(&config, MemoryStore::new())?, args).await,
  }
}

async fn run<G: Gateway, S: CacheStore>(service: FootballService<G, S>, args: Args) -> Result<()> {
  let json = args.json;

  match args.command {
    Command::Fixtures {
      date,
      to,
      season,
      leagues,
      team,
      statuses,
    } => {
      let season = season.unwrap_or_else(|| season_of(date));
      let result = service
        .fixtures(&leagues, |league| {
          let mut query = match to {
            Some(to) => FixturesQuery::between(league, season, date, to),
            None => FixturesQuery::on_date(league, date, Some(season)),
          };
          if let Some(team) = team {
            query = query.team(team);
          }
          for status in &statuses {
            query = query.status(status.clone());
          }
          query
        })
        .await?;
      print_aggregate(&result, json, |rows| {
        rows.iter().for_each(|f| println!("{}", fixture_line(f)))
      })?;
    }
    Command::Fixture { id } => {
      let fetched = service.fixture(id).await?;
      print_fetched(&fetched, json, |f| println!("{}", fixture_line(f)))?;
    }
    Command::Live { leagues } => {
      let result = service.live(&leagues).await?;
      print_aggregate(&result, json, |rows| {
        rows.iter().for_each(|f| println!("{}", fixture_line(&f.0)))
      })?;
    }
    Command::Standings { league, season } => {
      let fetched = service.standings(league, season).await?;
      print_fetched(&fetched, json, |rows| {
        let mut group = None;
        for row in rows {
          if row.group != group {
            if let Some(name) = &row.group {
              println!("{}", name);
            }
            group = row.group.clone();
          }
          println!(
            "{:>3}. {:<28} {:>3} pts  {:>2}W {:>2}D {:>2}L  {:>3}:{:<3} {:+}",
            row.rank,
            row.team.name,
            row.points,
            row.won,
            row.drawn,
            row.lost,
            row.goals_for,
            row.goals_against,
            row.goal_diff
          );
        }
      })?;
    }
    Command::Rounds { league, season } => {
      let fetched = service.rounds(league, season).await?;
      print_fetched(&fetched, json, |rows| {
        rows.iter().for_each(|r| println!("{}", r.name))
      })?;
    }
    Command::Bracket { league, season } => {
      let bracket = service.bracket(league, season).await?;
      print_bracket(&bracket, json)?;
    }
    Command::Team { id } => {
      let fetched = service.team(id).await?;
      print_fetched(&fetched, json, |team| {
        println!("{} ({})", team.name, team.country.as_deref().unwrap_or("-"));
        if let Some(founded) = team.founded {
          println!("Founded {}", founded);
        }
        if let Some(venue) = &team.venue {
          let city = team.venue_city.as_deref().unwrap_or("");
          match team.venue_capacity {
            Some(capacity) => println!("{}, {} ({} seats)", venue, city, capacity),
            None => println!("{}, {}", venue, city),
          }
        }
      })?;
    }
    Command::Leagues => {
      let fetched = service.leagues().await?;
      print_fetched(&fetched, json, |rows| {
        for league in rows {
          println!(
            "{:>5}  {:<32} {:<8} {}",
            league.id,
            league.name,
            league.kind,
            league.country.as_deref().unwrap_or("")
          );
        }
      })?;
    }
    Command::ClearCache => {
      let removed = service.clear_cache()?;
      println!("Removed {} cached records", removed);
    }
  }

  Ok(())
}

fn fixture_line(fixture: &Fixture) -> String {
  let score = match (fixture.home_goals, fixture.away_goals) {
    (Some(home), Some(away)) => format!("{} - {}", home, away),
    _ => "vs".to_string(),
  };
  let clock = match fixture.status.elapsed {
    Some(minute) if fixture.is_live() => format!("{}'", minute),
    _ => fixture.status.short.clone(),
  };
  format!(
    "{:<5} {} {} {} [{}]",
    clock,
    fixture.home.name,
    score,
    fixture.away.name,
    fixture.date
  )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", text);
  Ok(())
}

#[derive(Serialize)]
struct Output<'a, T> {
  state: DataState,
  data: &'a T,
  #[serde(skip_serializing_if = "Option::is_none")]
  warning: Option<&'a str>,
}

fn print_fetched<T: Serialize>(fetched: &Fetched<T>, json: bool, text: impl Fn(&T)) -> Result<()> {
  if json {
    return print_json(&Output {
      state: fetched.state(),
      data: &fetched.data,
      warning: fetched.warning.as_deref(),
    });
  }

  text(&fetched.data);
  if let Some(warning) = &fetched.warning {
    eprintln!("warning: {}", warning);
  }
  Ok(())
}

fn print_aggregate<T: Serialize, K: Serialize + Display>(
  result: &AggregateResult<T, K>,
  json: bool,
  text: impl Fn(&[T]),
) -> Result<()> {
  if json {
    #[derive(Serialize)]
    struct AggregateOutput<'a, T, K> {
      state: DataState,
      #[serde(flatten)]
      result: &'a AggregateResult<T, K>,
    }
    return print_json(&AggregateOutput {
      state: result.state(),
      result,
    });
  }

  text(&result.succeeded);
  for (key, warning) in result.warnings() {
    eprintln!("warning: league {}: {}", key, warning);
  }
  if result.state() == DataState::Partial {
    let failed: Vec<String> = result
      .errors
      .iter()
      .map(|(key, message)| format!("league {} ({})", key, message))
      .collect();
    eprintln!("partial data, missing: {}", failed.join(", "));
  }
  Ok(())
}

fn print_bracket(bracket: &Bracket, json: bool) -> Result<()> {
  if json {
    return print_json(&Output {
      state: bracket.state(),
      data: bracket,
      warning: None,
    });
  }

  if bracket.is_empty() {
    println!("No knockout rounds");
  }
  for round in &bracket.rounds {
    println!("{}", round.round);
    for f in &round.fixtures {
      let score = match (f.home_score, f.away_score) {
        (Some(home), Some(away)) => format!("{} - {}", home, away),
        _ => "vs".to_string(),
      };
      println!("  {:<4} {} {} {}", f.status.short, f.home.name, score, f.away.name);
    }
  }
  match bracket.state() {
    DataState::Partial => eprintln!("partial data, missing rounds: {}", bracket.skipped.join(", ")),
    DataState::Stale => eprintln!("warning: some rounds may be outdated"),
    DataState::Fresh => {}
  }
  Ok(())
}
