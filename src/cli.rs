use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(version = "0.1.0")]
#[command(about = "Automated disc ripping, encoding and library organization", long_about = None)]
pub struct Args {
    /// Path to a config file (default: ~/.config/spindle/config.yaml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the daemon and watch the optical drive
    Start {
        /// Mark this instance as running under a process supervisor
        #[arg(long)]
        supervised: bool,
    },
    /// Stop a running daemon
    Stop,
    /// Show daemon and queue status
    Status,
    /// Inspect or clean the processing queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Retry a failed item
    Retry {
        /// Queue item id
        item_id: i64,
    },
    /// Add an already-ripped video file to the queue
    AddFile {
        /// Path to the video file
        path: PathBuf,
    },
    /// Show one queue item in detail
    Show {
        /// Queue item id
        item_id: i64,
    },
    /// Metadata cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Send a test notification
    TestNotify,
}

#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// List all queue items
    List,
    /// Remove finished items from the queue
    Clear {
        /// Remove completed items
        #[arg(long)]
        completed: bool,
        /// Remove failed items
        #[arg(long)]
        failed: bool,
        /// Remove everything
        #[arg(long)]
        all: bool,
        /// Clear even while items are processing
        #[arg(long)]
        force: bool,
    },
    /// Delete one item from the queue
    Remove {
        /// Queue item id
        item_id: i64,
    },
    /// Check queue store health
    Health,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show TMDB and series cache statistics
    Stats,
    /// Clear both caches
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let args = Args::parse_from(["spindle", "start"]);
        assert!(matches!(
            args.command,
            Command::Start { supervised: false }
        ));
    }

    #[test]
    fn test_parse_start_supervised_with_config() {
        let args = Args::parse_from(["spindle", "-c", "/etc/spindle.yaml", "start", "--supervised"]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/spindle.yaml")));
        assert!(matches!(args.command, Command::Start { supervised: true }));
    }

    #[test]
    fn test_parse_queue_clear_flags() {
        let args = Args::parse_from(["spindle", "queue", "clear", "--failed", "--force"]);
        match args.command {
            Command::Queue {
                action: QueueAction::Clear {
                    completed,
                    failed,
                    all,
                    force,
                },
            } => {
                assert!(!completed);
                assert!(failed);
                assert!(!all);
                assert!(force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_retry() {
        let args = Args::parse_from(["spindle", "retry", "7"]);
        assert!(matches!(args.command, Command::Retry { item_id: 7 }));
    }
}
