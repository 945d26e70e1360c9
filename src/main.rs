mod analyzer;
mod cli;
mod config;
mod daemon;
mod disc_metadata;
mod encoder;
mod error;
mod monitor;
mod notify;
mod orchestrator;
mod organizer;
mod process_lock;
mod progress;
mod queue;
mod ripper;
mod series_cache;
mod subprocess;
mod tmdb;
mod tmdb_cache;

use anyhow::{bail, Result};
use clap::Parser;
use std::sync::Arc;

use cli::{Args, CacheAction, Command, QueueAction};
use config::Config;
use process_lock::ProcessLock;
use queue::{ItemState, QueueStore};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    let config = Arc::new(config);

    match args.command {
        Command::Start { supervised } => {
            if let Some((pid, mode)) = ProcessLock::find_running().await {
                bail!("spindle is already running (pid {pid}, {mode})");
            }

            config.ensure_directories()?;
            init_file_logging(&config)?;

            if supervised {
                eprintln!("Starting spindle under supervision...");
            } else {
                eprintln!("Starting spindle daemon (logs in {})", config.log_dir.display());
            }

            daemon::run(config).await?;
        }
        Command::Stop => {
            init_stderr_logging();
            match ProcessLock::find_running().await {
                Some((pid, mode)) => {
                    println!("Stopping spindle (pid {pid}, {mode})...");
                    if ProcessLock::stop_process(pid).await {
                        println!("Stopped.");
                    } else {
                        bail!("failed to stop pid {pid}");
                    }
                }
                None => println!("spindle is not running."),
            }
        }
        Command::Status => {
            init_stderr_logging();
            let running = ProcessLock::find_running().await;
            match &running {
                Some((pid, mode)) => println!("Daemon:  running (pid {pid}, {mode})"),
                None => println!("Daemon:  not running"),
            }

            if let Some(disc) =
                monitor::detect_disc(&config.optical_drive, config.disc_monitor_timeout).await
            {
                println!("Drive:   {disc}");
            } else {
                println!("Drive:   empty");
            }

            let store = QueueStore::open(&config.queue_db_path())?;
            let stats = store.stats()?;
            let total: usize = stats.values().sum();
            println!("Queue:   {total} item(s)");
            for state in ItemState::ALL {
                if let Some(count) = stats.get(&state) {
                    println!("  {:12} {count}", state.to_string());
                }
            }
        }
        Command::Queue { action } => {
            init_stderr_logging();
            let store = QueueStore::open(&config.queue_db_path())?;
            match action {
                QueueAction::List => {
                    let items = store.list_all()?;
                    if items.is_empty() {
                        println!("Queue is empty.");
                    }
                    for item in items {
                        let progress = if item.state.is_processing() {
                            format!(" ({:.0}%)", item.progress_percent)
                        } else {
                            String::new()
                        };
                        println!("#{:<4} {:12} {}{progress}", item.id, item.state.to_string(), item);
                        if let Some(error) = &item.error_message {
                            println!("      error: {error}");
                        }
                    }
                }
                QueueAction::Clear {
                    completed,
                    failed,
                    all,
                    force,
                } => {
                    let mut removed = 0;
                    if all {
                        removed += store.clear_all(force)?;
                    } else {
                        if completed {
                            removed += store.clear_completed()?;
                        }
                        if failed {
                            removed += store.clear_failed()?;
                        }
                        if !completed && !failed {
                            bail!("pass --completed, --failed or --all");
                        }
                    }
                    println!("Removed {removed} item(s).");
                }
                QueueAction::Remove { item_id } => {
                    if store.remove(item_id)? {
                        println!("Removed item {item_id}.");
                    } else {
                        bail!("no queue item {item_id}");
                    }
                }
                QueueAction::Health => {
                    let health = store.health_check();
                    println!("reachable:      {}", health.store_reachable);
                    println!("schema version: {}", health.schema_version);
                    println!("rows:           {}", health.row_count);
                    println!("integrity:      {}", if health.integrity_ok { "ok" } else { "FAILED" });
                }
            }
        }
        Command::Retry { item_id } => {
            init_stderr_logging();
            let store = QueueStore::open(&config.queue_db_path())?;
            let Some(mut item) = store.get(item_id)? else {
                bail!("no queue item {item_id}");
            };
            if item.state != ItemState::Failed {
                bail!("item {item_id} is {}, only failed items can be retried", item.state);
            }
            item.state = ItemState::Pending;
            item.error_message = None;
            item.progress_stage = None;
            item.progress_percent = 0.0;
            item.progress_message = None;
            store.update(&item)?;
            println!("Item {item_id} queued for retry.");
        }
        Command::AddFile { path } => {
            init_stderr_logging();
            let path = path.canonicalize()?;
            if !path.is_file() {
                bail!("{} is not a file", path.display());
            }
            let store = QueueStore::open(&config.queue_db_path())?;
            let item = store.add_file(&path)?;
            println!("Added as item {}.", item.id);
        }
        Command::Show { item_id } => {
            init_stderr_logging();
            let store = QueueStore::open(&config.queue_db_path())?;
            let Some(item) = store.get(item_id)? else {
                bail!("no queue item {item_id}");
            };
            println!("id:         {}", item.id);
            println!("state:      {}", item.state);
            if let Some(title) = &item.disc_title {
                println!("disc:       {title}");
            }
            if let Some(info) = &item.media_info {
                println!("identified: {info}");
            }
            if let Some(plan) = &item.rip_plan {
                println!(
                    "plan:       {} ({} title(s), confidence {:.2})",
                    plan.content_kind,
                    plan.titles.len(),
                    plan.confidence
                );
            }
            for (label, path) in [
                ("ripped", &item.ripped_file),
                ("encoded", &item.encoded_file),
                ("final", &item.final_file),
            ] {
                if let Some(path) = path {
                    println!("{label}:     {}", path.display());
                }
            }
            if let Some(error) = &item.error_message {
                println!("error:      {error}");
            }
            println!("created:    {}", item.created_at.to_rfc3339());
            println!("updated:    {}", item.updated_at.to_rfc3339());
        }
        Command::Cache { action } => {
            init_stderr_logging();
            let tmdb_cache =
                tmdb_cache::TmdbCache::open(&config.tmdb_cache_db_path(), config.tmdb_cache_ttl_days)?;
            let series_cache = series_cache::SeriesCache::open(
                &config.series_cache_db_path(),
                config.series_cache_ttl_days,
            )?;
            match action {
                CacheAction::Stats => {
                    let tmdb = tmdb_cache.stats()?;
                    println!(
                        "TMDB cache:   {} entries ({} movie, {} tv)",
                        tmdb.total_entries, tmdb.movie_entries, tmdb.tv_entries
                    );
                    let series = series_cache.stats()?;
                    println!(
                        "Series cache: {} entries ({} cached in the last 7 days)",
                        series.total_entries, series.recent_entries
                    );
                    for (title, season, hits) in series.popular {
                        println!("  {title} S{} - {hits} hit(s)", season.unwrap_or(0));
                    }
                }
                CacheAction::Clear => {
                    let removed = tmdb_cache.clear()? + series_cache.clear()?;
                    println!("Removed {removed} cache entries.");
                }
            }
        }
        Command::TestNotify => {
            init_stderr_logging();
            let notifier = notify::Notifier::new(&config);
            if notifier.test_notification().await {
                println!("Notification sent.");
            } else {
                bail!("notification failed; check ntfy_topic in your config");
            }
        }
    }

    Ok(())
}

fn init_file_logging(config: &Config) -> Result<()> {
    let log_path = config.log_dir.join("spindle.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::fmt()
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
