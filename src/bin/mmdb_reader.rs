mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{cmd_inspect, cmd_query, cmd_verify};

#[derive(Parser)]
#[command(name = "mmdb-reader")]
#[command(
    about = "Query and inspect MaxMind DB (MMDB) files",
    long_about = "mmdb-reader - Look up IP addresses in MaxMind DB (MMDB) files\n\n\
    Reads GeoIP2, GeoLite2 and any other database in the MMDB format, \n\
    memory-mapped for fast startup. Gzip-compressed files (.gz) are \n\
    decompressed into memory.\n\n\
    Examples:\n\
      mmdb-reader query GeoLite2-City.mmdb 1.1.1.1\n\
      mmdb-reader inspect GeoLite2-City.mmdb --json\n\
      mmdb-reader verify GeoLite2-City.mmdb"
)]
#[command(version)]
struct Cli {
    /// Log diagnostics to stderr (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up IP addresses
    Query {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IP addresses to look up
        #[arg(value_name = "IP", required = true)]
        ips: Vec<String>,

        /// Read the whole file into memory instead of memory-mapping it
        #[arg(long)]
        in_memory: bool,

        /// Quiet mode - no output, only exit code (0 = all found, 1 = some missing)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show database metadata
    Inspect {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Also print metadata fields not covered by the summary
        #[arg(long)]
        full: bool,
    },

    /// Check every network and record in a database
    Verify {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli_utils::init_tracing(cli.verbose);

    match cli.command {
        Commands::Query {
            database,
            ips,
            in_memory,
            quiet,
        } => cmd_query(database, ips, in_memory, quiet),
        Commands::Inspect {
            database,
            json,
            full,
        } => cmd_inspect(database, json, full),
        Commands::Verify { database, json } => cmd_verify(database, json),
    }
}
