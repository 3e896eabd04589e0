//! Whole-file verification
//!
//! Opening a database only checks the metadata and geometry; lookups check
//! what they touch. [`verify`] walks everything: every network in the
//! search tree, the separator, and every distinct record in the data
//! section.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mmdb_reader::Database;
//!
//! let db = Database::open("database.mmdb")?;
//! let report = db.verify();
//!
//! if report.is_valid() {
//!     println!("✓ {}", report.stats.summary());
//! } else {
//!     for error in &report.errors {
//!         println!("  - {}", error);
//!     }
//! }
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```

use crate::database::Database;
use crate::mmdb::types::{DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER, METADATA_MAX_SIZE};
use crate::source::ByteSource;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Maximum decode errors listed individually in a report
const MAX_REPORTED_RECORD_ERRORS: usize = 20;

/// Verification report with detailed findings
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Problems that make lookups fail for some addresses
    pub errors: Vec<String>,
    /// Oddities that do not break lookups
    pub warnings: Vec<String>,
    /// Informational messages about database properties
    pub info: Vec<String>,
    /// Statistics gathered while walking the file
    pub stats: VerifyStats,
}

/// Statistics gathered during verification
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyStats {
    /// File size in bytes
    pub file_size: u64,
    /// Number of search tree nodes
    pub node_count: u32,
    /// Search tree size in bytes
    pub tree_size: u64,
    /// Data section size in bytes
    pub data_section_size: u64,
    /// Networks with data
    pub network_count: u64,
    /// Distinct records those networks reference
    pub record_count: usize,
}

impl VerifyReport {
    /// Check if the database passed all checks (no errors)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn info(&mut self, msg: impl Into<String>) {
        self.info.push(msg.into());
    }
}

impl VerifyStats {
    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Nodes: {}, Networks: {}, Records: {}, Data: {} KB, Size: {} KB",
            self.node_count,
            self.network_count,
            self.record_count,
            self.data_section_size / 1024,
            self.file_size / 1024
        )
    }
}

/// Verify every part of an open database
pub fn verify<S: ByteSource>(db: &Database<S>) -> VerifyReport {
    let mut report = VerifyReport::default();
    let header = *db.header();

    report.stats.file_size = db.source().len();
    report.stats.node_count = header.node_count;
    report.stats.tree_size = header.tree_size;
    report.stats.data_section_size = header.data_section_size();
    report.info(format!(
        "IP tree: {} nodes, {} bits/record, IPv{}, tree size: {} bytes",
        header.node_count,
        header.record_size.bits(),
        header.ip_version.number(),
        header.tree_size
    ));

    check_separator(db, &mut report);
    check_metadata(db, &mut report);

    let offsets = collect_record_offsets(db, &mut report);
    report.stats.record_count = offsets.len();

    if report.stats.network_count == 0 && report.errors.is_empty() {
        report.warning("search tree contains no networks with data");
    }

    let offsets: Vec<u64> = offsets.into_iter().collect();
    let failures: Vec<String> = offsets
        .par_iter()
        .filter_map(|&offset| {
            db.decode_at(offset)
                .err()
                .map(|e| format!("record at data offset {}: {}", offset, e))
        })
        .collect();

    let failure_count = failures.len();
    for failure in failures.into_iter().take(MAX_REPORTED_RECORD_ERRORS) {
        report.error(failure);
    }
    if failure_count > MAX_REPORTED_RECORD_ERRORS {
        report.error(format!(
            "... and {} more undecodable records",
            failure_count - MAX_REPORTED_RECORD_ERRORS
        ));
    }

    debug!(
        "verified {} networks, {} records: {} errors, {} warnings",
        report.stats.network_count,
        report.stats.record_count,
        report.errors.len(),
        report.warnings.len()
    );
    report
}

/// The 16 bytes after the tree must be zero
fn check_separator<S: ByteSource>(db: &Database<S>, report: &mut VerifyReport) {
    let tree_size = db.header().tree_size;
    match db.source().read(tree_size, DATA_SECTION_SEPARATOR_SIZE as usize) {
        Ok(bytes) if bytes.iter().all(|&b| b == 0) => {}
        Ok(bytes) => report.error(format!(
            "data section separator at {} is not zero: {:02x?}",
            tree_size, &bytes[..]
        )),
        Err(e) => report.error(format!("cannot read separator: {}", e)),
    }
}

fn check_metadata<S: ByteSource>(db: &Database<S>, report: &mut VerifyReport) {
    let metadata = db.metadata();

    let marker_offset = db.header().metadata_start - METADATA_MARKER.len() as u64;
    let from_end = db.source().len() - marker_offset;
    if from_end > METADATA_MAX_SIZE {
        report.warning(format!(
            "metadata marker is {} bytes from end of file (writers keep it within {})",
            from_end, METADATA_MAX_SIZE
        ));
    }

    match &metadata.database_type {
        Some(db_type) => report.info(format!("Database type: {}", db_type)),
        None => report.warning("metadata has no database_type"),
    }

    for lang in metadata.description.keys() {
        if !metadata.languages.is_empty() && !metadata.languages.contains(lang) {
            report.warning(format!(
                "description language {} is not listed in languages",
                lang
            ));
        }
    }

    if let Some(epoch) = metadata.build_epoch {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if epoch > now + 86_400 {
            report.warning(format!("build_epoch {} is in the future", epoch));
        }
    }
}

/// Walk every network, collecting the distinct data offsets
fn collect_record_offsets<S: ByteSource>(
    db: &Database<S>,
    report: &mut VerifyReport,
) -> BTreeSet<u64> {
    let mut offsets = BTreeSet::new();
    for network in db.networks() {
        match network {
            Ok(network) => {
                report.stats.network_count += 1;
                offsets.insert(network.data_offset);
            }
            Err(e) => {
                report.error(format!("search tree: {}", e));
                break;
            }
        }
    }
    offsets
}
