use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use logwarden::alerts::{
    AlertDispatcher, CommandUserLookup, DryRunNotifier, MailNotifier, NoUserLookup, Notifier,
    ThrottleStore, UserLookup,
};
use logwarden::clock::SystemClock;
use logwarden::collectors::{check_feed, discover_feeds, FeedCleaner};
use logwarden::{Config, LogSelection, Pipeline, RunSummary};
use std::path::PathBuf;

/// Command-line arguments for a single alert run
#[derive(Parser, Debug)]
#[command(
    name = "logwarden",
    about = "Mail throttled alerts for the newest network sensor logs",
    long_about = "Finds the current rotation of network sensor logs (or the files given), \
                  parses every alert record, and mails one notification per remote address \
                  and category per day. The check and clean subcommands maintain the \
                  sensor's .brodata input feeds instead.",
    subcommand_negates_reqs = true
)]
#[command(group(
    ArgGroup::new("selection")
        .required(true)
        .args(["use_recent", "files"])
))]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        default_value = "logwarden.toml",
        help = "Configuration file path (TOML format)"
    )]
    config: PathBuf,

    /// Process the newest logs under the configured log directory
    #[arg(short = 'r', long)]
    use_recent: bool,

    /// Process these log files instead
    #[arg(short, long, value_name = "FILES", value_delimiter = ',', num_args = 1..)]
    files: Vec<PathBuf>,

    /// Log notifications instead of sending them
    #[arg(short, long)]
    test: bool,

    /// Enable debug logging
    #[arg(short, long, global = true, help = "Enable debug logging output")]
    debug: bool,

    #[command(subcommand)]
    command: Option<FeedCommand>,
}

/// Maintenance of the sensor's `.brodata` input feeds
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum FeedCommand {
    /// Validate every feed without modifying it
    Check {
        /// Directory searched for feeds (defaults to `feed_dir` from the config)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Validate every feed, then remove expired entries
    Clean {
        /// Directory searched for feeds (defaults to `feed_dir` from the config)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

impl Cli {
    fn selection(&self) -> LogSelection {
        if self.use_recent {
            LogSelection::Latest
        } else {
            LogSelection::Explicit(self.files.clone())
        }
    }

    /// Default log filter; `RUST_LOG` still takes precedence
    fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "error"
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    Config::from_file(&cli.config).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config.display()
        )
    })
}

fn run_alerts(cli: &Cli) -> Result<RunSummary> {
    let config = load_config(cli)?;

    let store = ThrottleStore::setup(&config.throttle_db, SystemClock::new())
        .context("Failed to set up throttle store")?;

    let notifier: Box<dyn Notifier> = if cli.test {
        info!("Test mode: notifications will be logged, not sent");
        Box::new(DryRunNotifier)
    } else {
        Box::new(MailNotifier::new(config.mail_command.clone()))
    };

    let user_lookup: Box<dyn UserLookup> =
        match CommandUserLookup::from_command(&config.user_lookup_command) {
            Some(lookup) => Box::new(lookup),
            None => Box::new(NoUserLookup),
        };

    let dispatcher = AlertDispatcher::new(&config, store, notifier, user_lookup);
    let summary = Pipeline::new(&config)
        .run(&cli.selection(), dispatcher)
        .context("Run aborted")?;
    Ok(summary)
}

/// Check or clean the feeds, returning how many files were processed
fn run_feeds(cli: &Cli, command: &FeedCommand) -> Result<usize> {
    let (dir, clean) = match command {
        FeedCommand::Check { dir } => (dir, false),
        FeedCommand::Clean { dir } => (dir, true),
    };
    let root = match dir {
        Some(dir) => dir.clone(),
        None => load_config(cli)?
            .feed_dir
            .context("No feed directory given and feed_dir is not configured")?,
    };

    if clean {
        let reports = FeedCleaner::new(SystemClock::new())
            .run(&root)
            .context("Feed cleaning failed")?;
        let removed: usize = reports.iter().map(|r| r.removed.len()).sum();
        info!("Cleaned {} feeds, removed {} entries", reports.len(), removed);
        Ok(reports.len())
    } else {
        let feeds = discover_feeds(&root).context("Feed check failed")?;
        for path in &feeds {
            check_feed(path).context("Feed check failed")?;
            info!("[PASS] {}", path.display());
        }
        Ok(feeds.len())
    }
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level())).init();

    let result = match &cli.command {
        Some(command) => run_feeds(&cli, command).map(|count| info!("Finished: {} feeds", count)),
        None => run_alerts(&cli).map(|summary| info!("Finished: {}", summary)),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
