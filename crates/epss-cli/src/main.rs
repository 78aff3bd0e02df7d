mod cmd;
mod context;
mod output;

use clap::{Parser, Subcommand};
use cmd::{cache::CacheSubcommand, config::ConfigSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "epss",
    about = "Look up EPSS exploit-prediction scores for CVEs, with a local cache",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ~/.epss/config.yaml)
    #[arg(long, global = true, env = "EPSS_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Do not read or write the on-disk score cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up scores for one or more CVE ids
    Lookup {
        /// CVE identifiers, e.g. CVE-2021-44228
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Print the CVE ids mentioned in a piece of text (reads stdin if omitted)
    Extract { text: Option<String> },

    /// Attach EPSS data to a JSON array of findings
    Enrich {
        /// Path to a JSON file containing an array of findings
        file: PathBuf,

        /// Write the enriched findings here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Only refresh findings with missing or outdated EPSS data
        #[arg(long)]
        refresh_only: bool,

        /// Age in hours after which EPSS data counts as outdated
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
    },

    /// Inspect or maintain the on-disk score cache
    Cache {
        #[command(subcommand)]
        subcommand: CacheSubcommand,
    },

    /// Show or validate the effective configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = context::Context::load(cli.config.as_deref(), cli.no_cache).and_then(|ctx| {
        match cli.command {
            Commands::Lookup { ids } => cmd::lookup::run(&ctx, &ids, cli.json),
            Commands::Extract { text } => cmd::extract::run(text.as_deref(), cli.json),
            Commands::Enrich {
                file,
                output,
                refresh_only,
                max_age_hours,
            } => cmd::enrich::run(
                &ctx,
                &file,
                output.as_deref(),
                refresh_only,
                max_age_hours,
            ),
            Commands::Cache { subcommand } => cmd::cache::run(&ctx, subcommand, cli.json),
            Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
