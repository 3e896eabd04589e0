use anyhow::{Context, Result};
use mmdb_reader::Database;
use std::path::PathBuf;

pub fn cmd_verify(database: PathBuf, json_output: bool) -> Result<()> {
    let db = Database::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;

    let report = db.verify();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Database: {}", database.display());
        println!("{}", report.stats.summary());
        for info in &report.info {
            println!("  {}", info);
        }
        for warning in &report.warnings {
            println!("  WARNING: {}", warning);
        }
        for error in &report.errors {
            println!("  ERROR: {}", error);
        }
        println!();
        if report.is_valid() {
            println!("✓ Database is valid");
        } else {
            println!("✗ Verification failed with {} errors", report.errors.len());
        }
    }

    std::process::exit(if report.is_valid() { 0 } else { 1 });
}
