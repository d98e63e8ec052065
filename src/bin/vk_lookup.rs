//! Agency lookup CLI
//!
//! Inspect the resolved database config and query the mapping tables the
//! collectors depend on.
//!
//! # Usage
//!
//! ```bash
//! # Show where the connection parameters come from
//! vk_lookup config
//!
//! # Header mapping for a dataset key
//! vk_lookup mapping 1301b --state VA
//!
//! # Pre-flight a batch of dataset keys (non-zero exit if any are missing)
//! vk_lookup --lenient verify 0401 103 1301B --state TN
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use agency_lookup::prelude::*;

#[derive(Parser)]
#[command(name = "vk_lookup")]
#[command(version)]
#[command(about = "Query agency and header-mapping records used by the collectors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Return empty results instead of failing on missing records
    #[arg(long, global = true)]
    lenient: bool,

    /// Print JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved connection config (password masked)
    Config,

    /// Test database connectivity
    Check,

    /// Look up the header mapping for a dataset key
    Mapping {
        /// Dataset key, e.g. 0401 or 1301b
        key: String,

        /// Two-letter state code
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Look up one agency by name or ID
    Agency {
        #[arg(long, conflicts_with = "id", required_unless_present = "id")]
        name: Option<String>,

        #[arg(long)]
        id: Option<i64>,
    },

    /// List agencies in a state
    State {
        /// Two-letter state code (case-insensitive)
        state: String,
    },

    /// Check that every dataset key has a header mapping
    Verify {
        #[arg(required = true)]
        keys: Vec<String>,

        #[arg(short, long)]
        state: Option<String>,
    },
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.lenient {
        EngineMode::lenient()
    } else {
        EngineMode::strict()
    };

    let result = match cli.command {
        Commands::Config => cmd_config(cli.json).await,
        Commands::Check => cmd_check(cli.json).await,
        Commands::Mapping { key, state } => cmd_mapping(mode, &key, state.as_deref(), cli.json).await,
        Commands::Agency { name, id } => cmd_agency(mode, name, id, cli.json).await,
        Commands::State { state } => cmd_state(mode, &state, cli.json).await,
        Commands::Verify { keys, state } => cmd_verify(mode, &keys, state.as_deref(), cli.json).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if cli.json {
                println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
            } else {
                eprintln!("{}: {:#}", "error".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

async fn cmd_config(json: bool) -> Result<bool> {
    let resolver = ConfigResolver::system();
    let deployment = resolver.detect_deployment().await;
    let config = resolver
        .resolve()
        .await
        .context("Failed to resolve database config")?;

    if json {
        print_json(&serde_json::json!({
            "deployment": deployment.to_string(),
            "host": config.host,
            "port": config.port,
            "database": config.database,
            "user": config.user,
            "url": config.masked_url(),
        }))?;
    } else {
        println!("{}", "Database config".bold());
        println!("  {:<11} {}", "deployment:", deployment);
        println!("  {:<11} {}", "url:", config.masked_url().cyan());
    }
    Ok(true)
}

async fn cmd_check(json: bool) -> Result<bool> {
    let ok = test_database_connection(None).await;
    if json {
        print_json(&serde_json::json!({ "connected": ok }))?;
    } else if ok {
        println!("{} database connection successful", "✓".green());
    } else {
        println!("{} database connection failed", "✗".red());
    }
    Ok(ok)
}

async fn cmd_mapping(mode: EngineMode, key: &str, state: Option<&str>, json: bool) -> Result<bool> {
    let mut lookup = MappingLookup::new(mode);
    let Some(mapping) = lookup.get_header_mapping(key, state).await? else {
        return report_missing(&format!("no header mapping for {key}"), json);
    };

    if json {
        print_json(&mapping)?;
    } else {
        let value = serde_json::to_value(&mapping)?;
        println!(
            "{} {}",
            normalize_dataset_key(key).bold(),
            format!("→ {} ({})", mapping.agency_name, mapping.agency_id).cyan()
        );
        for label in HeaderMapping::labels() {
            match value.get(label) {
                Some(serde_json::Value::Null) | None => {
                    println!("  {:<24} {}", label, "-".dimmed())
                }
                Some(serde_json::Value::String(s)) => println!("  {:<24} {}", label, s),
                Some(other) => println!("  {:<24} {}", label, other),
            }
        }
    }
    Ok(true)
}

async fn cmd_agency(
    mode: EngineMode,
    name: Option<String>,
    id: Option<i64>,
    json: bool,
) -> Result<bool> {
    let mut lookup = MappingLookup::new(mode);
    let agency = match (name, id) {
        (Some(name), _) => lookup.get_agency_by_name(&name).await?,
        (None, Some(id)) => lookup.get_agency_by_id(id).await?,
        (None, None) => return Err(anyhow!("either --name or --id is required")),
    };

    match agency {
        Some(agency) => {
            if json {
                print_json(&agency)?;
            } else {
                print_agency(&agency);
            }
            Ok(true)
        }
        None => report_missing("agency not found", json),
    }
}

async fn cmd_state(mode: EngineMode, state: &str, json: bool) -> Result<bool> {
    let mut lookup = MappingLookup::new(mode);
    let agencies = lookup.get_agencies_by_state(state).await?;

    if json {
        print_json(&agencies)?;
    } else {
        println!(
            "{} agencies in {}",
            agencies.len().to_string().bold(),
            state.to_uppercase()
        );
        for agency in &agencies {
            print_agency(agency);
        }
    }
    Ok(!agencies.is_empty())
}

async fn cmd_verify(
    mode: EngineMode,
    keys: &[String],
    state: Option<&str>,
    json: bool,
) -> Result<bool> {
    let mut lookup = MappingLookup::new(mode);
    let results = lookup.verify_dataset_mappings(keys, state).await;
    let all_found = results.values().all(|found| *found);

    if json {
        print_json(&results)?;
    } else {
        for (key, found) in &results {
            let mark = if *found { "✓".green() } else { "✗".red() };
            println!("{} {}", mark, key);
        }
    }
    Ok(all_found)
}

// =============================================================================
// HELPERS
// =============================================================================

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_agency(agency: &Agency) {
    println!(
        "  {:>6}  {}  {}",
        agency.agency_id.to_string().yellow(),
        agency.state,
        agency.agency_name
    );
    if let Some(url) = &agency.agency_url {
        println!("          {}", url.dimmed());
    }
}

/// Lenient misses print a note and exit non-zero
fn report_missing(message: &str, json: bool) -> Result<bool> {
    if json {
        print_json(&serde_json::Value::Null)?;
    } else {
        println!("{} {}", "-".yellow(), message);
    }
    Ok(false)
}
