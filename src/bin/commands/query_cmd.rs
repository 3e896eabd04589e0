use anyhow::{Context, Result};
use mmdb_reader::{Database, MmdbError, SourceKind};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cli_utils::{data_value_to_json, format_cidr};

pub fn cmd_query(database: PathBuf, ips: Vec<String>, in_memory: bool, quiet: bool) -> Result<()> {
    let kind = if in_memory {
        SourceKind::InMemory
    } else {
        SourceKind::Mmap
    };
    let db = Database::options()
        .source_kind(kind)
        .open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;

    let mut results = Vec::with_capacity(ips.len());
    let mut all_found = true;

    for ip in &ips {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| MmdbError::InvalidAddress(ip.clone()))
            .with_context(|| format!("Query failed for: {}", ip))?;

        let found = db
            .lookup_prefix(addr)
            .with_context(|| format!("Query failed for: {}", ip))?;

        let entry = match found {
            Some((data, prefix_len)) => {
                json!({
                    "ip": ip,
                    "network": format_cidr(addr, prefix_len),
                    "prefix_len": prefix_len,
                    "data": data_value_to_json(&data),
                })
            }
            None => {
                all_found = false;
                json!({ "ip": ip, "data": null })
            }
        };
        results.push(entry);
    }

    if !quiet {
        println!("{}", serde_json::to_string_pretty(&json!(results))?);
    }

    // Exit with appropriate code
    std::process::exit(if all_found { 0 } else { 1 });
}
