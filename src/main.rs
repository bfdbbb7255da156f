use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use feedstore::config::Config;
use feedstore::jobs::{apply_files, BatchFile};
use feedstore::storage::{Database, DatabaseError, MessageCounts, OutlineNode};

/// Get the config directory path (~/.config/feedstore/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedstore"))
}

#[derive(Parser, Debug)]
#[command(name = "feedstore", about = "Feed message store with duplicate-free batch reconciliation")]
struct Args {
    /// Config file (default: ~/.config/feedstore/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides `database_path` from the config
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply fetched batch files ({feed_id, account_id, base_url, messages} JSON)
    Apply {
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
    /// Print unread/total counts
    Counts {
        #[arg(long)]
        account: i64,
        /// Counts of one feed (by custom id)
        #[arg(long, conflicts_with_all = ["category", "bin"])]
        feed: Option<i64>,
        /// Counts of the feeds inside one category (by custom id)
        #[arg(long, conflicts_with = "bin")]
        category: Option<i64>,
        /// Counts of the recycle bin
        #[arg(long)]
        bin: bool,
    },
    /// Store an account tree (JSON list of category/feed nodes)
    ImportTree {
        #[arg(long)]
        account: i64,
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Permanently delete the messages in an account's bin
    PurgeBin {
        #[arg(long)]
        account: i64,
        /// Only purge messages already read
        #[arg(long)]
        read_only: bool,
    },
    /// Move every message in an account's bin back to its feed
    RestoreBin {
        #[arg(long)]
        account: i64,
    },
}

fn print_counts(label: &str, counts: MessageCounts) {
    println!("{label}: {} unread / {} total", counts.unread, counts.total);
}

async fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The database is locked by another process. Please try again later.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn run_apply(db: &Database, config: &Config, paths: Vec<PathBuf>) -> Result<bool> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = BatchFile::load(&path)?;
        files.push((path, file));
    }

    let reports = apply_files(db, files, config.batch_size()).await;
    let mut all_ok = true;
    for report in &reports {
        all_ok &= report.ok();
        println!(
            "{}: feed {} account {}: {} new/updated unread, {} failed rows{}",
            report.path.display(),
            report.feed_id,
            report.account_id,
            report.updated_count(),
            report.failed_rows(),
            if report.ok() { "" } else { " (rolled back)" }
        );
    }

    if config.purge_read_after_apply {
        let purged = db.purge_read_messages().await?;
        tracing::info!(purged, "Purged read messages");
    }
    if config.purge_older_than_days > 0 {
        let purged = db.purge_old_messages(config.purge_older_than_days).await?;
        tracing::info!(purged, days = config.purge_older_than_days, "Purged old messages");
    }

    Ok(all_ok)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = args
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| config_dir.join("feeds.db"));
    let db = open_database(&db_path).await?;

    match args.command {
        Command::Apply { files } => {
            if !run_apply(&db, &config, files).await? {
                std::process::exit(2);
            }
        }
        Command::Counts {
            account,
            feed,
            category,
            bin,
        } => {
            if let Some(feed) = feed {
                print_counts(&format!("feed {feed}"), db.message_counts_for_feed(feed, account).await?);
            } else if bin {
                print_counts("bin", db.message_counts_for_bin(account).await?);
                for (feed, counts) in db.bin_counts_by_feed(account).await? {
                    print_counts(&format!("  from feed {feed}"), counts);
                }
            } else {
                let per_feed = match category {
                    Some(category) => db.message_counts_for_category(category, account).await?,
                    None => db.message_counts_for_account(account).await?,
                };
                let mut feeds: Vec<_> = per_feed.into_iter().collect();
                feeds.sort_by_key(|(feed, _)| *feed);
                for (feed, counts) in feeds {
                    print_counts(&format!("feed {feed}"), counts);
                }
            }
        }
        Command::ImportTree { account, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read tree file {}", file.display()))?;
            let tree: Vec<OutlineNode> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid tree file {}", file.display()))?;
            let stored = db
                .store_account_tree(&tree, account)
                .await
                .context("Failed to store account tree")?;
            println!("Stored {} nodes for account {account}", stored.len());
        }
        Command::PurgeBin { account, read_only } => {
            let purged = db.purge_messages_from_bin(account, read_only).await?;
            println!("Purged {purged} messages from the bin of account {account}");
        }
        Command::RestoreBin { account } => {
            let restored = db.restore_bin(account).await?;
            println!("Restored {restored} messages for account {account}");
        }
    }

    Ok(())
}
