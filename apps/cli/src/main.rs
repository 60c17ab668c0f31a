//! DLGate CLI - Command-line concurrent download manager
//!
//! Downloads several URLs at once under a concurrency cap, with live
//! progress bars and Ctrl-C cancellation.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dlgate_core::SettingsStore;
use std::path::PathBuf;

/// DLGate - Concurrent HTTP Download Manager
#[derive(Parser)]
#[command(name = "dlgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "DLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs concurrently
    Get {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory to save into
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Maximum simultaneous downloads
        #[arg(short = 'c', long, env = "DLGATE_MAX_CONCURRENT")]
        max_concurrent: Option<usize>,
    },

    /// Fetch a document through the request queue and print it
    Fetch {
        /// URL to fetch
        url: String,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all settings
    Show,

    /// Set a setting
    Set {
        /// Setting key
        key: String,

        /// Setting value
        value: String,
    },

    /// Reset to defaults
    Reset,

    /// Print the settings file location
    Path,
}

fn init_tracing(verbose: u8) {
    // RUST_LOG wins over -v
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location(),
    };

    match cli.command {
        Commands::Get {
            urls,
            dir,
            max_concurrent,
        } => commands::get(&store, urls, dir, max_concurrent, cli.output).await?,

        Commands::Fetch { url } => commands::fetch(&store, &url, cli.output).await?,

        Commands::Config { action } => commands::config_action(&store, action, cli.output).await?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "dlgate", &mut std::io::stdout());
        }
    }

    Ok(())
}
