//! chatvault - chat history store status tool
//!
//! Prints an overview of the store: chats with message counts and
//! watermarks, user counts per role, and totals.

use anyhow::{Context, Result};
use chatvault_core::{Config, Database};
use clap::Parser;

#[derive(Parser)]
#[command(name = "chatvault")]
#[command(about = "Show the state of the chat history store")]
#[command(version)]
struct Args {
    /// Include inactive chats
    #[arg(long)]
    all: bool,

    /// Recent messages to preview per chat (0 disables previews)
    #[arg(long, default_value = "0")]
    preview: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        chatvault_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = config.database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    let overview = db.chat_overview().context("failed to query chats")?;
    let shown: Vec<_> = overview
        .iter()
        .filter(|o| args.all || o.chat.is_active)
        .collect();

    println!("\nChats ({}):", shown.len());
    for entry in &shown {
        let name = entry.chat.name.as_deref().unwrap_or("<unnamed>");
        let watermark = entry
            .watermark
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        let inactive = if entry.chat.is_active { "" } else { " [inactive]" };
        println!(
            "  {:<14} {:<28} {:>8} message(s)  watermark {}{}",
            entry.chat.id, name, entry.message_count, watermark, inactive
        );

        if args.preview > 0 {
            let messages = db
                .recent_messages(entry.chat.id, args.preview)
                .context("failed to query messages")?;
            for msg in messages {
                let text: String = msg
                    .text
                    .as_deref()
                    .unwrap_or("<no text>")
                    .chars()
                    .take(60)
                    .collect();
                println!(
                    "      [{}] #{} {}",
                    msg.sent_at.format("%Y-%m-%d %H:%M"),
                    msg.native_id,
                    text
                );
            }
        }
    }

    let by_role = db.count_users_by_role().context("failed to query users")?;
    println!("\nUsers by role:");
    for (role, count) in by_role {
        println!("  {:<10} {}", role.as_str(), count);
    }

    let total = db
        .count_messages(None)
        .context("failed to count messages")?;
    println!("\nTotal messages: {}", total);

    Ok(())
}
