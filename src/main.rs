//! cryptkeeper - move stale, duplicate and oversized files into a reversible
//! graveyard.
//!
//! Usage:
//!   crypt scan [PATH]                 Classify files and show what is tagged
//!   crypt purge [PATH] [--dry-run]    Banish every tagged file
//!   crypt graveyard                   List files currently in the graveyard
//!   crypt restore <GRAVEYARD_PATH>    Move a file back where it came from
//!   crypt log [--action banish]       Show the custody log
//!   crypt whitelist add|remove|list   Manage resurrected paths
//!   crypt reconcile                   Compare the graveyard with its log
//!   crypt --help                      Show help

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cryptkeeper::{
    BanishRequest, Classification, ClassificationSummary, ClassifiedFile, Keeper, KeeperConfig,
    LogAction, LogEntry, LogFilter, Orphan, PurgeEvent, PurgeReport, ScanOutcome, format_age,
};

#[derive(Parser)]
#[command(
    name = "cryptkeeper",
    version,
    about = "Find stale, duplicate and oversized files and move them into a reversible graveyard",
    long_about = "cryptkeeper tags files as Ghosts (untouched for a long time), Zombies \
                  (duplicates of an older file) and Demons (very large), and moves them \
                  into a graveyard. Every move is logged and can be reversed."
)]
struct Cli {
    /// Configuration file (defaults to <config_dir>/cryptkeeper/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory holding the graveyard, log and whitelist
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and show tagged files
    Scan {
        /// Path to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Banish every tagged file under a directory
    Purge {
        /// Path to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Only banish files carrying one of these tags
        #[arg(long, value_delimiter = ',')]
        only: Vec<Classification>,

        /// Show what would be banished without moving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List files currently in the graveyard
    Graveyard,

    /// Move a graveyard file back out
    Restore {
        /// Path of the file inside the graveyard
        graveyard_path: PathBuf,

        /// Restore here instead of the logged original location
        #[arg(long)]
        to: Option<PathBuf>,

        /// Also whitelist the restored file so it is never tagged again
        #[arg(long, conflicts_with = "to")]
        resurrect: bool,
    },

    /// Show the custody log
    Log {
        /// Only show entries with this action
        #[arg(short, long)]
        action: Option<LogAction>,

        /// Only show entries newer than this (e.g., "30d", "12h", "1w")
        #[arg(short, long)]
        since: Option<String>,

        /// Show at most this many of the most recent entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Manage the whitelist of resurrected paths
    Whitelist {
        #[command(subcommand)]
        action: WhitelistCommand,
    },

    /// Compare the graveyard directory with the log
    Reconcile,
}

#[derive(Subcommand)]
enum WhitelistCommand {
    /// Never tag this path again
    Add { path: PathBuf },
    /// Allow this path to be tagged again
    Remove { path: PathBuf },
    /// List whitelisted paths
    List,
}

#[derive(clap::Args)]
struct PolicyArgs {
    /// Files untouched for this long are Ghosts (e.g., "1y", "6m", "30d")
    #[arg(long)]
    stale: Option<String>,

    /// Files at least this large are Demons (e.g., "500MB", "2GB")
    #[arg(long)]
    demon_size: Option<String>,

    /// Maximum number of files to collect
    #[arg(long)]
    cap: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let format = cli.format;

    match cli.command {
        Command::Scan { path, policy } => {
            policy.apply(&mut config)?;
            let keeper = Keeper::open(config)?;
            run_scan(&keeper, &path, format).await?;
        }
        Command::Purge {
            path,
            policy,
            only,
            dry_run,
        } => {
            policy.apply(&mut config)?;
            let keeper = Keeper::open(config)?;
            run_purge(&keeper, &path, &only, dry_run, format).await?;
        }
        Command::Graveyard => run_graveyard(&Keeper::open(config)?, format)?,
        Command::Restore {
            graveyard_path,
            to,
            resurrect,
        } => {
            let keeper = Keeper::open(config)?;
            run_restore(&keeper, &graveyard_path, to.as_deref(), resurrect, format)?;
        }
        Command::Log {
            action,
            since,
            limit,
        } => {
            let keeper = Keeper::open(config)?;
            run_log(&keeper, action, since.as_deref(), limit, format)?;
        }
        Command::Whitelist { action } => {
            run_whitelist(&Keeper::open(config)?, action, format)?;
        }
        Command::Reconcile => run_reconcile(&Keeper::open(config)?, format)?,
    }

    Ok(())
}

/// Diagnostics go to stderr, filtered by `CRYPTKEEPER_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("CRYPTKEEPER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(explicit: Option<&Path>) -> Result<KeeperConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match KeeperConfig::default_path() {
            Some(path) => path,
            None => return Ok(KeeperConfig::default()),
        },
    };
    KeeperConfig::load(&path).with_context(|| format!("Invalid config {}", path.display()))
}

impl PolicyArgs {
    fn apply(&self, config: &mut KeeperConfig) -> Result<()> {
        if let Some(stale) = &self.stale {
            let days = parse_duration(stale)?.as_secs() / (24 * 60 * 60);
            if days == 0 {
                bail!("--stale must be at least one day, got {stale:?}");
            }
            config.stale_days = days;
        }
        if let Some(size) = &self.demon_size {
            config.demon_threshold = parse_size(size)?;
        }
        if let Some(cap) = self.cap {
            config.scan_cap = cap;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ScanReport<'a> {
    root: &'a Path,
    files_scanned: usize,
    limit_reached: bool,
    summary: ClassificationSummary,
    tagged: Vec<&'a ClassifiedFile>,
}

/// Scan in the background, showing progress on a terminal.
async fn scan_with_progress(keeper: &Keeper, path: &Path) -> Result<ScanOutcome> {
    let path = path.canonicalize().context("Invalid path")?;
    let show = std::io::stderr().is_terminal();
    let mut handle = keeper.start_scan(&path)?;

    loop {
        match handle.progress().recv().await {
            Ok(progress) => {
                if show {
                    eprint!(
                        "\r{}: {} files, {}   ",
                        progress.phase,
                        progress.files_scanned,
                        format_size(progress.bytes_scanned)
                    );
                }
                if progress.is_final() {
                    break;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    if show {
        eprintln!();
    }

    let outcome = handle.join().await.context("Scan failed")?;
    if let Some(warning) = &outcome.guard_warning {
        eprintln!("warning: {warning}");
    }
    if outcome.limit_reached {
        eprintln!(
            "warning: stopped after {} files; results are partial",
            outcome.records.len()
        );
    }
    Ok(outcome)
}

async fn run_scan(keeper: &Keeper, path: &Path, format: OutputFormat) -> Result<()> {
    let outcome = scan_with_progress(keeper, path).await?;
    let classified = keeper.classify(&outcome.records);
    let summary = ClassificationSummary::from_classified(&classified);
    let tagged: Vec<&ClassifiedFile> = classified.iter().filter(|f| f.is_tagged()).collect();

    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(70));
            println!(
                " {} - {} files, {}",
                outcome.root.display(),
                outcome.records.len(),
                format_size(outcome.stats.total_size)
            );
            println!(
                " {} ghosts, {} zombies, {} demons",
                summary.ghosts, summary.zombies, summary.demons
            );
            println!(" Reclaimable: {}", format_size(summary.reclaimable_bytes));
            println!(" Scanned in {:.2}s", outcome.duration.as_secs_f64());
            println!("{}", "─".repeat(70));
            println!();

            for file in &tagged {
                print_classified(file);
            }

            if outcome.has_warnings() {
                println!();
                println!("{} warning(s) during scan", outcome.warnings.len());
            }
        }
        OutputFormat::Json => {
            let report = ScanReport {
                root: &outcome.root,
                files_scanned: outcome.records.len(),
                limit_reached: outcome.limit_reached,
                summary,
                tagged,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn run_purge(
    keeper: &Keeper,
    path: &Path,
    only: &[Classification],
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    let outcome = scan_with_progress(keeper, path).await?;
    let classified = keeper.classify(&outcome.records);
    let targets: Vec<&ClassifiedFile> = classified
        .iter()
        .filter(|f| f.is_tagged())
        .filter(|f| only.is_empty() || only.iter().any(|t| f.classifications.contains(*t)))
        .collect();

    if dry_run {
        match format {
            OutputFormat::Text => {
                for file in &targets {
                    print_classified(file);
                }
                let bytes: u64 = targets.iter().map(|f| f.record.size).sum();
                println!();
                println!(" Would banish {} files ({})", targets.len(), format_size(bytes));
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&targets)?),
        }
        return Ok(());
    }

    let requests: Vec<BanishRequest> = targets.into_iter().map(BanishRequest::from).collect();
    if requests.is_empty() {
        eprintln!("Nothing to banish.");
        return Ok(());
    }

    let show = std::io::stderr().is_terminal();
    let mut events = keeper.start_purge(requests);
    let mut report: Option<PurgeReport> = None;
    while let Some(event) = events.recv().await {
        match event {
            PurgeEvent::Progress(progress) => {
                if show {
                    eprint!(
                        "\rBanishing: {:.0}% ({}/{})   ",
                        progress.percentage(),
                        progress.files_completed + progress.files_failed,
                        progress.files_total
                    );
                }
            }
            PurgeEvent::Failed(error) => {
                if show {
                    eprintln!();
                }
                eprintln!("failed: {error}");
            }
            PurgeEvent::Complete(done) => report = Some(done),
        }
    }
    if show {
        eprintln!();
    }

    let Some(report) = report else {
        bail!("Purge task ended without a report");
    };

    match format {
        OutputFormat::Text => {
            println!(
                " Banished {} files ({}), {} failed",
                report.banished.len(),
                format_size(report.bytes_banished()),
                report.errors.len()
            );
            println!(
                " Session {} can be undone until {}",
                report.session_id,
                report.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn run_graveyard(keeper: &Keeper, format: OutputFormat) -> Result<()> {
    let entries = keeper.graveyard();

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!(" The graveyard is empty.");
                return Ok(());
            }
            let total: u64 = entries.iter().filter_map(|e| e.file_size).sum();
            println!(" {} files, {}", entries.len(), format_size(total));
            println!();
            for entry in &entries {
                let age = (Utc::now() - entry.timestamp).to_std().unwrap_or_default();
                println!(
                    "  {:>10}  {:>12}  {}",
                    format_size(entry.file_size.unwrap_or(0)),
                    format!("{} ago", format_age(age)),
                    entry.file_path.display()
                );
                if let Some(graveyard_path) = &entry.graveyard_path {
                    println!("              -> {}", graveyard_path.display());
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
    }

    Ok(())
}

fn run_restore(
    keeper: &Keeper,
    graveyard_path: &Path,
    to: Option<&Path>,
    resurrect: bool,
    format: OutputFormat,
) -> Result<()> {
    let restored = match (to, resurrect) {
        (Some(target), _) => keeper.restore(graveyard_path, target)?,
        (None, true) => keeper.resurrect_from_graveyard(graveyard_path)?,
        (None, false) => {
            let Some(entry) = keeper.log().banished_at(graveyard_path) else {
                bail!("{} is not in the graveyard log", graveyard_path.display());
            };
            let original = entry.original_path.unwrap_or(entry.file_path);
            keeper.restore(graveyard_path, &original)?
        }
    };

    match format {
        OutputFormat::Text => {
            println!(" Restored {}", restored.original_path.display());
            if resurrect {
                println!(" Whitelisted; it will not be tagged again.");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&restored)?),
    }

    Ok(())
}

fn run_log(
    keeper: &Keeper,
    action: Option<LogAction>,
    since: Option<&str>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut filter = LogFilter::new();
    if let Some(action) = action {
        filter = filter.action(action);
    }
    if let Some(since) = since {
        let window = chrono::Duration::from_std(parse_duration(since)?)?;
        let start = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        filter = filter.since(start);
    }

    let mut entries = keeper.log().query(&filter);
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    match format {
        OutputFormat::Text => {
            for entry in &entries {
                print_log_entry(entry);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
    }

    Ok(())
}

fn run_whitelist(keeper: &Keeper, action: WhitelistCommand, format: OutputFormat) -> Result<()> {
    match action {
        WhitelistCommand::Add { path } => {
            let path = absolute(&path)?;
            if keeper.resurrect(&path)? {
                println!(" Whitelisted {}", path.display());
            } else {
                println!(" Already whitelisted: {}", path.display());
            }
        }
        WhitelistCommand::Remove { path } => {
            let path = absolute(&path)?;
            if keeper.unwhitelist(&path)? {
                println!(" Removed {}", path.display());
            } else {
                println!(" Not whitelisted: {}", path.display());
            }
        }
        WhitelistCommand::List => {
            let paths = keeper.whitelist().all();
            match format {
                OutputFormat::Text => {
                    for path in &paths {
                        println!("{}", path.display());
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&paths)?),
            }
        }
    }

    Ok(())
}

fn run_reconcile(keeper: &Keeper, format: OutputFormat) -> Result<()> {
    let report = keeper.reconcile();

    match format {
        OutputFormat::Text => {
            println!(
                " {} files in the graveyard, {} logged",
                report.physical_files, report.logged_entries
            );
            if report.is_consistent() {
                println!(" Graveyard and log agree.");
            }
            for orphan in &report.orphans {
                match orphan {
                    Orphan::Unlogged { path } => println!("  unlogged  {}", path.display()),
                    Orphan::Missing { entry } => {
                        println!("  missing   {}", entry.file_path.display());
                    }
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn print_classified(file: &ClassifiedFile) {
    println!(
        "  {:<14} {:>10}  {}",
        file.classifications.to_string(),
        format_size(file.record.size),
        file.path().display()
    );
}

fn print_log_entry(entry: &LogEntry) {
    let size = entry.file_size.map(format_size).unwrap_or_default();
    println!(
        "{}  {:<9} {:>10}  {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.action.to_string(),
        size,
        entry.file_path.display()
    );
}

/// Whitelist entries are matched against absolute scan paths.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Parse a size string (e.g., "1KB", "10MB", "1GB").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    let unit = &s[digits.len()..];

    let multiplier: u64 = match unit {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        other => bail!("Unknown size unit {other:?}"),
    };
    let num: f64 = digits.parse().with_context(|| format!("Invalid size {s:?}"))?;
    if !num.is_finite() || num < 0.0 {
        bail!("Invalid size {s:?}");
    }

    Ok((num * multiplier as f64) as u64)
}

/// Parse a duration string (e.g., "1y", "6m", "30d", "1w").
fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim().to_lowercase();
    let digits = s.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let unit = &s[digits.len()..];

    let multiplier = match unit {
        "y" => 365.0 * 24.0 * 60.0 * 60.0,
        "m" => 30.0 * 24.0 * 60.0 * 60.0,
        "w" => 7.0 * 24.0 * 60.0 * 60.0,
        "d" | "" => 24.0 * 60.0 * 60.0,
        "h" => 60.0 * 60.0,
        other => bail!("Unknown duration unit {other:?}"),
    };
    let num: f64 = digits
        .parse()
        .with_context(|| format!("Invalid duration {s:?}"))?;
    if !num.is_finite() || num < 0.0 {
        bail!("Invalid duration {s:?}");
    }

    Ok(std::time::Duration::from_secs_f64(num * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("512").unwrap(), 512);
        assert!(parse_size("10XB").is_err());
        assert!(parse_size("-1GB").is_err());
    }

    #[test]
    fn test_policy_rejects_sub_day_stale() {
        let policy = |stale: &str| PolicyArgs {
            stale: Some(stale.to_string()),
            demon_size: None,
            cap: None,
        };
        let mut config = KeeperConfig::default();

        assert!(policy("12h").apply(&mut config).is_err());
        assert_eq!(config.stale_days, KeeperConfig::default().stale_days);

        policy("36h").apply(&mut config).unwrap();
        assert_eq!(config.stale_days, 1);
        policy("2w").apply(&mut config).unwrap();
        assert_eq!(config.stale_days, 14);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30d").unwrap().as_secs(), 30 * 86_400);
        assert_eq!(parse_duration("12h").unwrap().as_secs(), 12 * 3_600);
        assert_eq!(parse_duration("7").unwrap().as_secs(), 7 * 86_400);
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_cli_parses_purge_flags() {
        let cli = Cli::try_parse_from(["crypt", "purge", "/tmp", "--only", "ghost,zombie", "--dry-run"])
            .unwrap();
        match cli.command {
            Command::Purge { only, dry_run, .. } => {
                assert_eq!(only, vec![Classification::Ghost, Classification::Zombie]);
                assert!(dry_run);
            }
            _ => panic!("expected purge"),
        }
    }
}
