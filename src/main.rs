use brew_offline::brew::types::RateCoffee;
use brew_offline::brew::{BrewService, WriteOutcome};
use brew_offline::config::Config;
use brew_offline::logging;
use brew_offline::network::ConnectivityMonitor;
use brew_offline::notice::TracingNotices;
use brew_offline::queue::FlushOutcome;
use brew_offline::store::SqliteStore;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "brew-offline")]
#[command(about = "Coffee brewing client that keeps working offline")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/brew-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v, -vv, -vvv)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  /// Behave as if the device had no network
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Ask a brewing question
  Ask { question: String },
  /// Show the top recipes
  Recipes,
  /// Rate a coffee from 1 to 5 stars
  Rate {
    coffee_id: String,
    stars: u8,
    #[arg(long)]
    comment: Option<String>,
  },
  /// Inspect or replay queued writes
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Inspect or maintain the cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List writes waiting to be sent
  List,
  /// Replay queued writes now
  Flush,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Show entry counts and size
  Stats,
  /// Evict entries until the cache is within its limits
  Sweep,
  /// Remove every cache entry
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;

  // Held until exit so buffered log lines reach the file
  let _log_guard = logging::init(
    args.verbose,
    (!args.log_stderr).then_some(data_dir.as_path()),
  )?;

  let store = Arc::new(SqliteStore::open(&config.database_path()?)?);
  let connectivity = Arc::new(ConnectivityMonitor::new(!args.offline));
  let service = BrewService::new(&config, store, connectivity, Arc::new(TracingNotices))?;

  match args.command {
    Command::Ask { question } => {
      let answer = service.ask(&question).await;
      if answer.offline {
        println!("(offline answer)");
      }
      println!("{}", answer.answer);
    }
    Command::Recipes => {
      let result = service.top_recipes().await?;
      if let (true, Some(cached_at)) = (result.is_offline(), result.cached_at) {
        println!("(offline copy from {})", cached_at.format("%Y-%m-%d %H:%M"));
      }
      for recipe in &result.data {
        println!(
          "{:<30} {:?} {}g/{}g {}",
          recipe.name, recipe.method, recipe.coffee_grams, recipe.water_grams, recipe.grind_size
        );
      }
    }
    Command::Rate {
      coffee_id,
      stars,
      comment,
    } => {
      let outcome = service
        .rate_coffee(RateCoffee {
          coffee_id,
          stars,
          comment,
        })
        .await?;
      match outcome {
        WriteOutcome::Sent => println!("Rating sent"),
        WriteOutcome::Queued { id } => println!("Rating queued as {}", id),
      }
    }
    Command::Queue(QueueCommand::List) => {
      let pending = service.queue().pending()?;
      if pending.is_empty() {
        println!("Queue is empty");
      }
      for item in pending {
        println!(
          "{} {:<16} attempts={} queued={}",
          item.id,
          item.mutation_type,
          item.attempts,
          item.enqueued_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }
    Command::Queue(QueueCommand::Flush) => match service.flush().await {
      FlushOutcome::Completed(report) => println!(
        "replayed={} failed={} dropped={} unhandled={}",
        report.replayed,
        report.failed,
        report.dropped.len(),
        report.unhandled
      ),
      FlushOutcome::AlreadyRunning => println!("A flush is already running"),
    },
    Command::Cache(CacheCommand::Stats) => {
      let stats = service.cache().stats()?;
      println!(
        "entries={} expired={} corrupt={} bytes={}",
        stats.entries, stats.expired, stats.corrupt, stats.bytes
      );
    }
    Command::Cache(CacheCommand::Sweep) => {
      let removed = service.cache().sweep()?;
      println!("Removed {} entries", removed.len());
    }
    Command::Cache(CacheCommand::Clear) => {
      let removed = service.cache().clear()?;
      println!("Removed {} entries", removed);
    }
  }

  Ok(())
}
