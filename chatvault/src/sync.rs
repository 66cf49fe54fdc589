//! chatvault-sync - backfill chat history dumps into the database
//!
//! Scans a directory of per-chat JSONL export files (`<chat_id>.jsonl`)
//! and feeds them through the ingestion engine. Safe to re-run at any
//! time and to run alongside a live collector: every fetch is bounded by
//! the chat's watermark and the store's uniqueness invariant settles
//! overlaps.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/chatvault/data.db
//! - Logs: $XDG_STATE_HOME/chatvault/chatvault.log
//! - Config: $XDG_CONFIG_HOME/chatvault/config.toml

use anyhow::{Context, Result};
use chatvault_core::ingest::{DumpSource, IngestCoordinator};
use chatvault_core::{Config, Database, RunSummary, SourceKind};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "chatvault-sync")]
#[command(about = "Backfill chat history dumps into the database")]
#[command(version)]
struct Args {
    /// Directory of per-chat JSONL dump files (<chat_id>.jsonl)
    dump_dir: PathBuf,

    /// Verbose output (-v per-chat details)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Dry run - discover chat dumps but don't sync
    #[arg(long)]
    dry_run: bool,

    /// Watch mode - continuously sync instead of one-shot
    #[arg(short, long)]
    watch: bool,

    /// Poll interval in milliseconds (only with --watch)
    #[arg(long, default_value = "2000")]
    poll: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        chatvault_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("chatvault-sync starting");

    let db_path = config.database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    let dump = DumpSource::new(&args.dump_dir);
    let chats = dump
        .discover_chats()
        .context("failed to scan dump directory")?;
    println!(
        "Discovered {} chat dump(s) in {}",
        chats.len(),
        args.dump_dir.display()
    );

    if args.dry_run {
        for chat_id in &chats {
            println!("  - chat {}", chat_id);
        }
        println!("\nDry run - no sync performed");
        tracing::info!("Dry run complete");
        return Ok(());
    }

    let coordinator = IngestCoordinator::with_reply_policy(db, config.ingest.reply_policy);

    if args.watch {
        run_watch_mode(&coordinator, &dump, &args)
    } else {
        run_single_sync(&coordinator, &dump, &chats, &args)
    }
}

/// Run a single sync pass with a progress bar.
fn run_single_sync(
    coordinator: &IngestCoordinator,
    dump: &DumpSource,
    chats: &[i64],
    args: &Args,
) -> Result<()> {
    let pb = ProgressBar::new(chats.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let summary =
        coordinator.sync_source_with_progress(SourceKind::Backfill, dump, chats, |current, _, chat_id| {
            pb.set_position(current as u64);
            pb.set_message(format!("chat {}", chat_id));
        });

    pb.finish_and_clear();

    print_run_summary(&summary, args.verbose);

    tracing::info!(
        run_id = %summary.run_id,
        saved = summary.messages_saved,
        "chatvault-sync complete"
    );

    Ok(())
}

/// Run continuous watch mode, re-scanning the dump directory each pass.
fn run_watch_mode(coordinator: &IngestCoordinator, dump: &DumpSource, args: &Args) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let poll_duration = Duration::from_millis(args.poll);

    println!(
        "Watch mode active (poll every {}ms). Press Ctrl+C to stop.",
        args.poll
    );
    println!();

    while running.load(Ordering::SeqCst) {
        // New dump files may appear between passes
        let chats = match dump.discover_chats() {
            Ok(chats) => chats,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to scan dump directory");
                thread::sleep(poll_duration);
                continue;
            }
        };

        let summary = coordinator.sync_source(SourceKind::Backfill, dump, &chats);

        // Only print when something happened
        if !summary.is_noop() {
            println!(
                "Synced: {} chat(s), {} saved, {} skipped, {} errored",
                summary.chats_processed,
                summary.messages_saved,
                summary.messages_skipped,
                summary.messages_errored
            );

            if args.verbose >= 1 {
                print_chat_reports(&summary);
            }
            print_chat_errors(&summary);
        }

        thread::sleep(poll_duration);
    }

    println!("Watch mode stopped.");
    tracing::info!("chatvault-sync watch mode stopped");

    Ok(())
}

/// Print the run summary: totals first, per-chat details on demand.
fn print_run_summary(summary: &RunSummary, verbose: u8) {
    println!("\nSync complete:");
    println!("  Chats processed:  {}", summary.chats_processed);
    println!("  Chats failed:     {}", summary.chats_failed);
    println!("  Messages seen:    {}", summary.messages_seen);
    println!("  Messages saved:   {}", summary.messages_saved);
    println!("  Messages skipped: {}", summary.messages_skipped);
    println!("  Messages errored: {}", summary.messages_errored);
    println!("  Reply warnings:   {}", summary.reply_warnings);

    if verbose >= 1 {
        print_chat_reports(summary);
    }
    print_chat_errors(summary);
}

fn print_chat_reports(summary: &RunSummary) {
    let changed: Vec<_> = summary
        .chat_reports
        .iter()
        .filter(|r| r.saved > 0 || r.errored > 0)
        .collect();
    if changed.is_empty() {
        return;
    }

    println!("\nChats synced:");
    for report in changed {
        println!(
            "  chat {}: +{} saved, {} skipped, {} errored, watermark {}",
            report.chat_id,
            report.saved,
            report.skipped,
            report.errored,
            report
                .watermark
                .map(|w| w.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

fn print_chat_errors(summary: &RunSummary) {
    if summary.errors.is_empty() {
        return;
    }

    println!("\nErrors ({}):", summary.errors.len());
    for (chat_id, err) in &summary.errors {
        println!("  chat {}: {}", chat_id, err);
    }
}
