// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Media Renamer: AI-assisted bulk renaming for a media library

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

use media_renamer::ai::AiClient;
use media_renamer::assets::ImageAssetGenerator;
use media_renamer::categorize::Categorizer;
use media_renamer::config::AppConfig;
use media_renamer::db::{Database, NewAttachment};
use media_renamer::dispatch::Dispatcher;
use media_renamer::history::{History, HistoryEvent};
use media_renamer::library::{is_media_file, AssetGenerator, LocalFileStore, RecordStore};
use media_renamer::rename::{RenameApplier, RenameRequest, RenameResult, RollbackPolicy};
use media_renamer::sanitize::split_extension;
use media_renamer::suggest::Suggester;

/// Media Renamer CLI - AI-assisted bulk renaming for media libraries
#[derive(Parser, Debug)]
#[command(name = "media-renamer")]
#[command(version)]
#[command(about = "AI-assisted bulk renaming for media libraries", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a configuration file, library directory and database
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Register media files under a directory as attachments
    Import {
        /// Directory to import
        dir: PathBuf,
    },

    /// List attachments, newest first
    List {
        #[arg(long, default_value = "1")]
        page: usize,

        #[arg(long, default_value = "20")]
        per_page: usize,
    },

    /// Ask the AI service for new names
    Suggest {
        /// Attachment ids
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,

        /// Suggest for every attachment
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Filename template (overrides config)
        #[arg(short, long)]
        template: Option<String>,

        /// Write the suggestions as rename requests to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply rename requests from a JSON file
    Apply {
        /// JSON array of {id, old, new}
        requests: PathBuf,

        /// Also restore path, title and slug when a rename fails late
        #[arg(long)]
        full_rollback: bool,
    },

    /// Queue attachments for background AI categorization
    Scan {
        /// Include attachments that were already processed
        #[arg(long)]
        full: bool,
    },

    /// Run queued background jobs
    Worker {
        /// Run due jobs once and exit
        #[arg(long)]
        once: bool,
    },

    /// Rename history
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent history entries
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// List logged errors
    Errors,

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Show database statistics
    Stats,

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { dir, force } = &cli.command {
        return run_init(dir.clone(), *force);
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {:?}", cli.config))?;
    let output = Output::new(&cli.format);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Import { dir } => run_import(&config, &dir, &output),
        Commands::List { page, per_page } => run_list(&config, page, per_page, &output),
        Commands::Suggest { ids, all, template, output: file } => {
            run_suggest(&config, ids, all, template, file, &output).await
        }
        Commands::Apply { requests, full_rollback } => run_apply(&config, &requests, full_rollback, &output),
        Commands::Scan { full } => run_scan(&config, full),
        Commands::Worker { once } => run_worker(&config, once).await,
        Commands::History { action } => run_history_command(&config, action, &output),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Db { action } => run_db_command(&config, action, &output),
    }
}

/// Result printer for `--format`
struct Output {
    format: String,
}

impl Output {
    fn new(format: &str) -> Self {
        Self { format: format.to_string() }
    }

    /// Print `items` as JSON/JSONL, or hand each to `text` in text mode
    fn emit<T: Serialize>(&self, items: &[T], text: impl Fn(&T) -> String) -> Result<()> {
        match self.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(items)?),
            "jsonl" => {
                for item in items {
                    println!("{}", serde_json::to_string(item)?);
                }
            }
            _ => {
                for item in items {
                    println!("{}", text(item));
                }
            }
        }
        Ok(())
    }

    fn is_text(&self) -> bool {
        self.format == "text"
    }
}

fn open_db(config: &AppConfig) -> Result<Database> {
    Database::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path))
}

/// Initialize a new media library workspace
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        bail!("config.json already exists. Use --force to overwrite");
    }

    let uploads = target.join("uploads");
    std::fs::create_dir_all(&uploads)?;

    let mut config = AppConfig::default();
    config.library.base_dir = uploads;
    config.database.path = target.join("media-library.db").to_string_lossy().into_owned();
    config.history.path = target.join("rename_history.jsonl").to_string_lossy().into_owned();
    config.save(&config_path)?;
    open_db(&config)?;

    println!("Media library initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - uploads/");
    println!("  - media-library.db");
    println!("\nNext steps:");
    println!("  1. Set ai_engine.url in config.json");
    println!("  2. Import files: media-renamer import uploads/");

    Ok(())
}

#[derive(Serialize)]
struct Imported {
    id: i64,
    file: String,
}

fn run_import(config: &AppConfig, dir: &Path, output: &Output) -> Result<()> {
    let db = open_db(config)?;
    let paths = config.library_paths();
    let assets = ImageAssetGenerator::default();

    let mut files = walkdir(dir);
    files.sort();

    let mut imported = Vec::new();
    for path in files.into_iter().filter(|p| is_media_file(p) && !is_variant(p)) {
        let stored = paths.stored_form(&path);
        if db.find_by_attached_file(&stored)?.is_some() {
            debug!("Already registered: {}", stored);
            continue;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let id = db.insert_attachment(&NewAttachment {
            title: split_extension(file_name).0.to_string(),
            attached_file: stored.clone(),
            ..Default::default()
        })?;

        match assets.generate(id, &path) {
            Ok(metadata) => db.update_attachment_metadata(id, &metadata)?,
            Err(e) => warn!("No metadata for {}: {}", stored, e),
        }
        imported.push(Imported { id, file: stored });
    }

    output.emit(&imported, |i| format!("  {:>5}  {}", i.id, i.file))?;
    if output.is_text() {
        println!("Imported {} files", imported.len());
    }
    Ok(())
}

/// Generated `<stem>-<w>x<h>.<ext>` files are not attachments of their own
fn is_variant(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let Some((_, size)) = stem.rsplit_once('-') else {
        return false;
    };
    match size.split_once('x') {
        Some((w, h)) => {
            !w.is_empty() && !h.is_empty() && w.chars().all(|c| c.is_ascii_digit()) && h.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn walkdir(path: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                files.extend(walkdir(&p));
            } else if p.is_file() {
                files.push(p);
            }
        }
    }

    files
}

fn run_list(config: &AppConfig, page: usize, per_page: usize, output: &Output) -> Result<()> {
    let db = open_db(config)?;
    let listing = db.list_attachments(page, per_page)?;

    if !output.is_text() {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!(
        "Attachments (page {}/{}, {} total):",
        listing.current_page, listing.total_pages, listing.total_posts
    );
    for a in &listing.attachments {
        println!(
            "  {:>5}  {:<40}  {}",
            a.id,
            a.title,
            a.attached_file.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn all_attachment_ids(db: &Database) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    let mut page = 1;
    loop {
        let batch = db.attachment_ids_page(page, 100, false)?;
        let done = batch.len() < 100;
        ids.extend(batch);
        if done {
            return Ok(ids);
        }
        page += 1;
    }
}

async fn run_suggest(
    config: &AppConfig,
    ids: Vec<i64>,
    all: bool,
    template: Option<String>,
    file: Option<PathBuf>,
    output: &Output,
) -> Result<()> {
    let db = open_db(config)?;
    let ids = if all { all_attachment_ids(&db)? } else { ids };
    if ids.is_empty() {
        bail!("No attachments selected (use --ids or --all)");
    }

    let client = AiClient::new(&config.ai_engine)?;
    let template = template.unwrap_or_else(|| config.rules.filename_template.clone());
    let suggestions = Suggester::new(&client, &db, &template).suggest(&ids).await;

    output.emit(&suggestions, |s| {
        format!("  {:>5}  {} -> {}  [{:?}]", s.id, s.current_filename, s.suggested, s.source)
    })?;

    if let Some(path) = file {
        let requests: Vec<RenameRequest> = suggestions.into_iter().map(Into::into).collect();
        std::fs::write(&path, serde_json::to_string_pretty(&requests)?)
            .with_context(|| format!("writing {:?}", path))?;
        info!("Wrote {} rename requests to {:?}", requests.len(), path);
    }
    Ok(())
}

fn run_apply(config: &AppConfig, requests_path: &Path, full_rollback: bool, output: &Output) -> Result<()> {
    let raw = std::fs::read_to_string(requests_path)
        .with_context(|| format!("reading {:?}", requests_path))?;
    let requests: Vec<RenameRequest> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {:?}", requests_path))?;

    let db = open_db(config)?;
    let history = History::new(PathBuf::from(&config.history.path));
    let assets = ImageAssetGenerator::default();
    let policy = if full_rollback { RollbackPolicy::Full } else { config.rollback_policy() };

    let outcomes = RenameApplier::new(&LocalFileStore, &db, &assets, &history, config.library_paths())
        .with_policy(policy)
        .apply_all(&requests);

    output.emit(&outcomes, |o| match &o.result {
        RenameResult::Renamed { to, references_updated, .. } => {
            format!("  ✓ {:>5}  {} -> {} ({} references)", o.id, o.old, to.display(), references_updated)
        }
        RenameResult::Failed { message, rolled_back, .. } => {
            let note = if *rolled_back { " (file restored)" } else { "" };
            format!("  ✗ {:>5}  {}: {}{}", o.id, o.old, message, note)
        }
    })?;

    if output.is_text() {
        let renamed = outcomes.iter().filter(|o| o.is_success()).count();
        println!("{} renamed, {} failed", renamed, outcomes.len() - renamed);
    }
    Ok(())
}

fn run_scan(config: &AppConfig, full: bool) -> Result<()> {
    let db = open_db(config)?;
    let batches = Dispatcher::new(&db, config.batch.batch_size, config.batch.dispatch_delay_secs)
        .scan_attachments(full)?;
    println!("Queued {} batches", batches);
    Ok(())
}

/// Run due background jobs until interrupted
async fn run_worker(config: &AppConfig, once: bool) -> Result<()> {
    let db = open_db(config)?;
    let client = AiClient::new(&config.ai_engine)?;
    let categorizer = Categorizer::new(&client, &db, config.library_paths())
        .enabled(client.can_categorize())
        .inline_images(config.ai_engine.inline_images);
    let dispatcher = Dispatcher::new(&db, config.batch.batch_size, config.batch.dispatch_delay_secs);
    let interval = Duration::from_secs(config.batch.poll_interval_secs.max(1));

    info!("Worker started (poll every {:?})", interval);
    loop {
        let report = dispatcher.run_due_jobs(&categorizer, chrono::Utc::now()).await?;
        debug!("Worker pass: {:?}", report);
        if once {
            println!(
                "Ran {} jobs ({} failed), processed {} attachments",
                report.jobs_run, report.jobs_failed, report.attachments_processed
            );
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = signal::ctrl_c() => {
                info!("Shutting down worker");
                return Ok(());
            }
        }
    }
}

fn run_history_command(config: &AppConfig, action: HistoryCommands, output: &Output) -> Result<()> {
    let history = History::new(PathBuf::from(&config.history.path));

    let describe = |event: &HistoryEvent| match event {
        HistoryEvent::Rename { old, new } => format!("{} -> {}", old, new),
        HistoryEvent::Error { message } => format!("ERROR {}", message),
    };

    match action {
        HistoryCommands::List { count } => {
            let entries = history.get_recent(count)?;
            if output.is_text() {
                println!("Recent history ({} entries):", entries.len());
            }
            output.emit(&entries, |e| {
                format!("  {} {}", e.timestamp.format("%Y-%m-%d %H:%M"), describe(&e.event))
            })?;
        }
        HistoryCommands::Errors => {
            let entries = history.errors()?;
            output.emit(&entries, |e| {
                format!("  {} {}", e.timestamp.format("%Y-%m-%d %H:%M"), describe(&e.event))
            })?;
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Library: {:?} ({})", config.library.base_dir, config.library.base_url);
            println!("  AI endpoint: {}", config.ai_engine.url);
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

fn run_db_command(config: &AppConfig, action: DbCommands, output: &Output) -> Result<()> {
    let db = open_db(config)?;

    match action {
        DbCommands::Stats => {
            let stats = db.get_stats()?;
            if !output.is_text() {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("Database Statistics:");
            println!("  Attachments: {}", stats.attachment_count);
            println!("  Processed: {}", stats.processed_count);
            println!("  Pending jobs: {}", stats.pending_jobs);
            println!("  Failed jobs: {}", stats.failed_jobs);
        }
        DbCommands::Vacuum => {
            db.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["media-renamer"]).is_err());
    }

    #[test]
    fn test_cli_suggest_ids() {
        let cli = Cli::try_parse_from(["media-renamer", "suggest", "--ids", "1,2,3", "-o", "out.json"]).unwrap();

        match cli.command {
            Commands::Suggest { ids, all, output, .. } => {
                assert_eq!(ids, vec![1, 2, 3]);
                assert!(!all);
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            _ => panic!("Expected Suggest command"),
        }
    }

    #[test]
    fn test_cli_apply_command() {
        let cli = Cli::try_parse_from(["media-renamer", "apply", "renames.json", "--full-rollback", "--format", "json"])
            .unwrap();
        assert_eq!(cli.format, "json");

        match cli.command {
            Commands::Apply { requests, full_rollback } => {
                assert_eq!(requests, PathBuf::from("renames.json"));
                assert!(full_rollback);
            }
            _ => panic!("Expected Apply command"),
        }
    }

    #[test]
    fn test_cli_history_list() {
        let cli = Cli::try_parse_from(["media-renamer", "history", "list", "-n", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History { action: HistoryCommands::List { count: 5 } }
        ));
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["media-renamer", "--format", "xml", "db", "stats"]).is_err());
    }

    #[test]
    fn test_is_variant() {
        assert!(is_variant(Path::new("/u/beach-150x150.jpg")));
        assert!(!is_variant(Path::new("/u/beach-sunset.jpg")));
        assert!(!is_variant(Path::new("/u/max-x.jpg")));
    }
}
