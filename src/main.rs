//! hippod-report CLI - upload test reports to a hippod service.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use hippod_client::config::{self, Config};
use hippod_client::report::{self, load_report, validate_records};
use hippod_client::{Container, Error};

const DEFAULT_CONFIG: &str = "hippod.toml";

#[derive(Parser)]
#[command(name = "hippod-report")]
#[command(about = "Upload test reports to a hippod service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./hippod.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the records of a report file
    Upload {
        /// JSON report file
        report: PathBuf,

        /// Override the service URL
        #[arg(short, long)]
        url: Option<String>,

        /// Override the request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Check a report file without uploading it
    Validate {
        /// JSON report file
        report: PathBuf,
    },

    /// Write a configuration file
    Init {
        /// Service URL
        #[arg(short, long, default_value = "http://127.0.0.1/")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Upload {
            report,
            url,
            timeout,
        } => upload(cli.config.as_deref(), &report, url, timeout).await,
        Commands::Validate { report } => validate(&report),
        Commands::Init { url } => init_config(cli.config.as_deref(), &url),
    }
}

fn load_settings(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            config::load_config(Path::new(DEFAULT_CONFIG))
        }
        None => Ok(Config::default()),
    }
}

async fn upload(
    config_path: Option<&Path>,
    report_path: &Path,
    url: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut config = load_settings(config_path)?;

    // Apply overrides
    if let Some(url) = url {
        config.hippod.url = Some(url);
    }
    if let Some(timeout) = timeout {
        config.hippod.timeout_secs = timeout;
    }
    if config.hippod.url.is_none() {
        bail!("No service URL configured, use --url or set [hippod] url in the config file");
    }

    let records = load_report(report_path)?;
    info!(
        "Loaded {} record(s) from {}",
        records.len(),
        report_path.display()
    );

    let container = Container::with_config(&config.hippod)?;
    for record in records {
        container.add(record)?;
    }

    match container.upload().await {
        Ok(result) => {
            report::print_summary(&result);
            Ok(())
        }
        Err(e @ Error::Rejected(_)) => {
            eprintln!("{}", console::style("Some records were rejected:").red().bold());
            report::print_rejections(&e);
            std::process::exit(1);
        }
        Err(e) => {
            let hint = if e.is_retryable() {
                " (retryable)"
            } else {
                ""
            };
            eprintln!("Upload failed{}: {}", hint, e);
            if !e.rejections().is_empty() {
                eprintln!("{}", console::style("Rejected before the failure:").red().bold());
                report::print_rejections(&e);
            }
            std::process::exit(1);
        }
    }
}

fn validate(report_path: &Path) -> Result<()> {
    let records = load_report(report_path)?;
    let problems = validate_records(&records);

    if problems.is_empty() {
        println!("Report is valid! ({} record(s))", records.len());
        return Ok(());
    }

    for problem in &problems {
        eprintln!("  {}", problem);
    }
    eprintln!(
        "{} of {} record(s) are incomplete",
        problems.len(),
        records.len()
    );
    std::process::exit(1);
}

fn init_config(config_path: Option<&Path>, url: &str) -> Result<()> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG));
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let mut config = Config::default();
    config.hippod.url = Some(url.to_string());
    let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {}", path.display());
    Ok(())
}
