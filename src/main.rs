pub mod config;
pub mod data;
pub mod fetch;
pub mod join;
pub mod query;
pub mod render;
pub mod server;
pub mod types;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use types::Indicator;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and extract the geometry bundle(s) only
    Fetch {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a ranking table for a UF, or the top-N leaderboard
    Rank {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// UF to rank within
        #[arg(long, conflicts_with = "top")]
        uf: Option<String>,
        /// Indicator column to rank by
        #[arg(long, value_enum, default_value = "iqm-final")]
        indicator: Indicator,
        /// Slice the pre-ranked leaderboard instead
        #[arg(long)]
        top: Option<usize>,
    },
    /// Run the full pipeline and serve the dashboard API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Fetch { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let client = fetch::http_client()?;
            let shp = fetch::ensure_layer(
                &client,
                &app_config.input.microregions,
                &app_config.fetch.scratch_dir,
                "microregions",
            )
            .await?;
            println!("microregions: {}", shp.display());
            if let Some(states) = &app_config.input.states {
                let shp = fetch::ensure_layer(
                    &client,
                    states,
                    &app_config.fetch.scratch_dir,
                    "states",
                )
                .await?;
                println!("states: {}", shp.display());
            }
        }
        Commands::Rank {
            config,
            uf,
            indicator,
            top,
        } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let dataset = data::load_pipeline(&app_config).await?;

            let entries = match (uf, top) {
                (_, Some(n)) => {
                    let Some(leaderboard) = &dataset.leaderboard else {
                        bail!("--top needs a ranking_sheet in the config");
                    };
                    let selection = query::top_n(leaderboard, &dataset.joined, *n);
                    println!(
                        "Top {} (UFs touched: {})",
                        selection.entries.len(),
                        selection
                            .ufs
                            .iter()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    selection.entries
                }
                (Some(uf), None) => {
                    let records = query::filter_by_uf(&dataset.joined, uf);
                    if records.is_empty() {
                        bail!("no joined records for UF '{uf}'");
                    }
                    println!("Ranking for {} by {}", uf, indicator.column());
                    query::rank(&records, *indicator)
                }
                (None, None) => bail!("pass --uf <UF> or --top <N>"),
            };

            for entry in &entries {
                let value = entry
                    .value
                    .map(|v| format!("{v:8.2}"))
                    .unwrap_or_else(|| "       -".to_string());
                println!("{:>3}  {:<40} {:<2} {}", entry.position, entry.name, entry.uf, value);
            }
        }
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let dataset = data::load_pipeline(&app_config).await?;
            server::start_server(app_config, dataset).await?;
        }
    }

    Ok(())
}
