use anyhow::{Context, Result};
use mmdb_reader::Database;
use serde_json::json;
use std::path::PathBuf;

use crate::cli_utils::{data_value_to_json, format_bytes, format_data_value, format_unix_timestamp};

pub fn cmd_inspect(database: PathBuf, json_output: bool, full: bool) -> Result<()> {
    let db = Database::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;

    let metadata = db.metadata();
    let header = db.header();

    if json_output {
        let mut output = json!({
            "file": database.display().to_string(),
            "metadata": serde_json::to_value(metadata)?,
            "layout": {
                "tree_size": header.tree_size,
                "data_section_start": header.data_section_start,
                "data_section_size": header.data_section_size(),
                "metadata_start": header.metadata_start,
            },
        });
        if full {
            output["raw_metadata"] = data_value_to_json(db.raw_metadata());
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {}", database.display());
    println!(
        "Type:     {}",
        metadata.database_type.as_deref().unwrap_or("(none)")
    );
    println!(
        "Format:   v{}.{}",
        metadata.binary_format_major_version, metadata.binary_format_minor_version
    );
    println!();
    println!("Search tree:");
    println!("  IP version:    IPv{}", metadata.ip_version.number());
    println!("  Record size:   {} bits", metadata.record_size.bits());
    println!("  Nodes:         {}", metadata.node_count);
    println!("  Tree size:     {}", format_bytes(header.tree_size));
    println!("  Data section:  {}", format_bytes(header.data_section_size()));

    println!();
    println!("Metadata:");
    if let Some(epoch) = metadata.build_epoch {
        println!("  Built:         {}", format_unix_timestamp(epoch));
    }
    if !metadata.languages.is_empty() {
        println!("  Languages:     {}", metadata.languages.join(", "));
    }
    for (lang, text) in &metadata.description {
        println!("  Description:   [{}] {}", lang, text);
    }

    if full {
        println!();
        println!("Raw metadata:");
        println!("{}", format_data_value(db.raw_metadata(), ""));
    }

    Ok(())
}
