mod app_context;
mod config;
mod database;
mod engines;
mod entities;
mod error;
mod logging;
mod models;
mod ports;
mod ranked_list;
mod scoring;
mod services;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

use crate::{
    app_context::AppContext,
    config::Config,
    logging::setup_logging,
    models::{EngineId, TrackQuery},
    services::{
        download::{DownloadState, lyric_file_name},
        search::{SearchEvent, SearchOutcome, SearchStatus, SearchTask},
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "LYRIC_MANAGER_CONFIG")]
    config: Option<PathBuf>,

    /// Console log level (default: off)
    #[arg(long, default_value = "off", global = true, env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// File log level (default: debug)
    #[arg(long, default_value = "debug", global = true)]
    log_file_level: log::LevelFilter,

    /// Path to log file
    #[arg(long, env = "LYRIC_MANAGER_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Track metadata as the player reports it.
#[derive(ClapArgs, Debug, Clone)]
struct QueryArgs {
    #[arg(short, long)]
    title: Option<String>,

    #[arg(short, long)]
    artist: Option<String>,

    #[arg(long)]
    album: Option<String>,

    #[arg(long)]
    track_number: Option<i32>,

    /// Location of the track, e.g. file:///music/song.flac
    #[arg(short, long)]
    uri: Option<String>,
}

impl From<QueryArgs> for TrackQuery {
    fn from(args: QueryArgs) -> Self {
        TrackQuery {
            title: args.title,
            artist: args.artist,
            album: args.album,
            track_number: args.track_number,
            uri: args.uri,
        }
        .normalized()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search every enabled engine and print ranked candidates
    Search {
        #[command(flatten)]
        query: QueryArgs,

        /// Only query these engines (repeatable)
        #[arg(short, long = "engine")]
        engines: Vec<String>,
    },
    /// Search, download the best candidate, save it and remember it
    Fetch {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(short, long = "engine")]
        engines: Vec<String>,

        /// Directory to save into, defaults to the configured lyrics directory
        #[arg(short, long)]
        output_directory: Option<PathBuf>,
    },
    /// Print the lyric file remembered for a track
    Find {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Remember a lyric file for a track
    Assign {
        #[command(flatten)]
        query: QueryArgs,

        /// The lyric file; omit to record that the track has none
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Forget the lyric file remembered for a track
    Forget {
        #[command(flatten)]
        query: QueryArgs,
    },
    #[command(subcommand)]
    Cache(CacheCommands),
    /// List the enabled engines
    Engines,
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Print every remembered assignment
    List,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

fn engine_ids(engines: Vec<String>) -> Vec<EngineId> {
    engines.into_iter().map(EngineId::new).collect()
}

/// Runs a search to completion, printing progress. Ctrl-C cancels it.
async fn run_search(mut task: SearchTask) -> Result<SearchOutcome> {
    let cancel = task.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, cancelling search");
            cancel.cancel();
        }
    });

    let mut outcome = None;
    while let Some(event) = task.next_event().await {
        match event {
            SearchEvent::Started { engine, .. } => log::debug!("Searching {}", engine),
            SearchEvent::EngineFinished { engine, result, .. } => match result {
                Ok(count) => eprintln!("{engine}: {count} result(s)"),
                Err(message) => eprintln!("{engine}: failed ({message})"),
            },
            SearchEvent::Completed(done) => outcome = Some(done),
        }
    }
    ctrl_c.abort();

    match outcome {
        Some(outcome) => Ok(outcome),
        None => Ok(task.wait().await),
    }
}

fn print_candidates(outcome: &SearchOutcome) {
    for (index, candidate) in outcome.candidates.iter().enumerate() {
        println!(
            "{:>2}. [{:>6}] {} - {} ({}) via {}",
            index + 1,
            candidate.rank,
            candidate.artist.as_deref().unwrap_or("?"),
            candidate.title.as_deref().unwrap_or("?"),
            candidate.album.as_deref().unwrap_or("-"),
            candidate.engine
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_logging(args.log_level, args.log_file.clone(), args.log_file_level)?;

    log::debug!("Lyric manager starting");

    if let Commands::Config(config_commands) = &args.command {
        match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                println!("{}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        }
        return Ok(());
    }

    let config = {
        if let Some(config) = args.config {
            Config::from_file(&config)
        } else {
            Config::load()
        }
    }
    .with_context(|| "Failed to load lyric-manager config")?;

    let app = AppContext::new(config).await?;

    match args.command {
        Commands::Search { query, engines } => {
            let task = app.searches.search(query.into(), &engine_ids(engines))?;
            let outcome = run_search(task).await?;
            match outcome.status {
                SearchStatus::Success => print_candidates(&outcome),
                SearchStatus::Failure => println!("No lyrics found"),
                SearchStatus::Cancelled => println!("Search cancelled"),
            }
        }
        Commands::Fetch {
            query,
            engines,
            output_directory,
        } => {
            let query: TrackQuery = query.into();
            let task = app.searches.search(query.clone(), &engine_ids(engines))?;
            let outcome = run_search(task).await?;
            if outcome.status == SearchStatus::Cancelled {
                println!("Search cancelled");
                return Ok(());
            }

            let mut saved = None;
            for candidate in outcome.candidates {
                log::info!("Trying {} from {}", candidate.url, candidate.engine);
                let download = app.downloads.start(candidate).wait().await;
                match (download.state, download.content, download.error) {
                    (DownloadState::Completed, Some(content), _) => {
                        let directory = output_directory
                            .clone()
                            .unwrap_or_else(|| app.config.lyrics_directory_path());
                        let dest = directory.join(lyric_file_name(&query, content.format));
                        content
                            .save_to(&dest)
                            .await
                            .wrap_err("Failed to save lyrics")?;
                        saved = Some(dest);
                        break;
                    }
                    (_, _, Some(e)) => log::warn!("Download failed: {}", e),
                    (state, _, None) => log::warn!("Download ended as {:?}", state),
                }
            }

            let Some(dest) = saved else {
                return Err(eyre!("No lyrics could be downloaded for {}", query.describe()));
            };
            app.cache
                .assign(&query, Some(&dest))
                .await
                .wrap_err("Failed to remember lyric file")?;
            println!("{}", dest.display());
        }
        Commands::Find { query } => match app.cache.find(&query.into()).await? {
            Some(path) => println!("{}", path.display()),
            None => println!("No lyric file remembered"),
        },
        Commands::Assign { query, path } => {
            app.cache.assign(&query.into(), path.as_deref()).await?;
            log::info!("Assignment stored");
        }
        Commands::Forget { query } => {
            if app.cache.remove(&query.into()).await? {
                println!("Forgotten");
            } else {
                println!("Nothing remembered for this track");
            }
        }
        Commands::Cache(CacheCommands::List) => {
            for entry in app.cache.entries().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    entry.id,
                    entry.uri.as_deref().unwrap_or("-"),
                    entry.artist.as_deref().unwrap_or("-"),
                    entry.title.as_deref().unwrap_or("-"),
                    entry.album.as_deref().unwrap_or("-"),
                    entry.lrcpath.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Engines => {
            for engine in app.registry.all() {
                println!("{}\t{}", engine.id(), engine.display_name());
            }
        }
        Commands::Config(_) => {}
    }

    Ok(())
}
