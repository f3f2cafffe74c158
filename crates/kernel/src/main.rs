//! layerquery
//!
//! Command-line front end: resolves and compiles layer queries from a saved
//! workspace document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use layerquery_kernel::compile::{Dialect, TemporalRange, compiler_for};
use layerquery_kernel::config::Config;
use layerquery_kernel::entry::{EntryStore, LayerKey, WorkspaceDocument, resolve};
use layerquery_kernel::request::{ModifierPipeline, RequestParams};

/// Resolve and compile layer queries.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print which areas and filters apply to a layer.
    Resolve {
        /// Workspace document (JSON with areas, filters and entries).
        #[arg(long)]
        workspace: PathBuf,

        /// Layer id.
        #[arg(long)]
        layer: String,

        /// Filter kind the layer accepts.
        #[arg(long, default_value = "wfs")]
        entry_type: String,
    },

    /// Print the request parameters for a layer, one `key=value` per line.
    Compile {
        /// Workspace document (JSON with areas, filters and entries).
        #[arg(long)]
        workspace: PathBuf,

        /// Layer id.
        #[arg(long)]
        layer: String,

        /// Filter kind the layer accepts.
        #[arg(long, default_value = "wfs")]
        entry_type: String,

        /// Backend dialect: ecql, arc or filter-encoding.
        #[arg(long)]
        dialect: Dialect,

        /// Start of the time window (RFC 3339).
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// End of the time window (RFC 3339).
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,

        /// Column holding the start of each feature's validity.
        #[arg(long)]
        start_column: Option<String>,

        /// Column holding the end of each feature's validity.
        #[arg(long)]
        end_column: Option<String>,

        /// Print one URL-encoded query string instead of one pair per line.
        #[arg(long)]
        query_string: bool,
    },
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Command::Resolve {
            workspace,
            layer,
            entry_type,
        } => {
            let store = load_workspace(&workspace)?;
            let resolved = resolve(&store.snapshot(), &LayerKey::new(&layer, &entry_type));
            let summary = serde_json::to_string_pretty(&resolved.summary())
                .context("failed to serialize resolution")?;
            println!("{summary}");
        }
        Command::Compile {
            workspace,
            layer,
            entry_type,
            dialect,
            from,
            to,
            start_column,
            end_column,
            query_string,
        } => {
            let store = load_workspace(&workspace)?;
            let resolved = resolve(&store.snapshot(), &LayerKey::new(&layer, &entry_type));
            let compiler = compiler_for(dialect, config.compile_options());
            let compiled = compiler.compile_query(&resolved);
            for advisory in &compiled.advisories {
                warn!(layer = %layer, advisory = %advisory, "query advisory");
            }

            let temporal = match (from, to) {
                (Some(from), Some(to)) => {
                    let start_column = start_column
                        .context("--start-column is required with a time window")?;
                    let range = TemporalRange::new(&start_column, from, to)
                        .context("--from must not be after --to")?;
                    Some(match end_column {
                        Some(end) => range.with_end_column(&end),
                        None => range,
                    })
                }
                _ => None,
            };

            let mut pipeline = ModifierPipeline::new();
            pipeline.install_query(
                &compiler,
                compiled,
                temporal.as_ref(),
                config.round_time_to_seconds,
            );
            let params = pipeline.apply(&RequestParams::new());
            if query_string {
                println!("{}", params.to_query_string());
            } else {
                print!("{params}");
            }
        }
    }

    Ok(())
}

fn load_workspace(path: &Path) -> Result<EntryStore> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let document = WorkspaceDocument::parse(&json)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(document.into_store())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
