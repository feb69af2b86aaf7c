//! Check that the configured spreadsheet is reachable.
//!
//! Usage: cargo run --bin check_sheets [spendbot.json]
//!
//! Reads the category list and the data sheet, then prints what it found.
//! Nothing is written.

use std::time::Duration;

use spendbot::config::Config;
use spendbot::ledger::expense::parse_rows;
use spendbot::ledger::{GoogleSheets, Sheet};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "spendbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let layout = config.sheets.clone();
    let sheets = GoogleSheets::new(layout.clone(), config.google_token_command.clone(), Duration::from_secs(30));

    println!("Spreadsheet: {}", layout.spreadsheet_id);

    match sheets.read_categories().await {
        Ok(categories) if categories.is_empty() => {
            println!("⚠️  '{}' has no categories in column A", layout.config_sheet);
        }
        Ok(categories) => {
            println!("✅ {} categories: {}", categories.len(), categories.join(", "));
        }
        Err(e) => {
            eprintln!("❌ Reading '{}' failed: {e}", layout.config_sheet);
            std::process::exit(1);
        }
    }

    match sheets.read_range(&layout.data_sheet, "A2:G").await {
        Ok(raw) => {
            let parsed = parse_rows(&raw);
            println!("✅ {} expense rows in '{}'", parsed.rows.len(), layout.data_sheet);
            if parsed.skipped > 0 {
                println!("⚠️  {} row(s) could not be parsed", parsed.skipped);
            }
        }
        Err(e) => {
            eprintln!("❌ Reading '{}' failed: {e}", layout.data_sheet);
            std::process::exit(1);
        }
    }
}
