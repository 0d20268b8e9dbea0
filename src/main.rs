use anyhow::Result;
use clap::{Parser, Subcommand};
use legendsvpn::{
    proxy::{GeoConfig, ProxyManager, StopRule, ValidatorConfig},
    tui::App,
    AppConfig,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Find fast public HTTP proxies
#[derive(Parser)]
#[command(name = "legendsvpn")]
#[command(about = "Fetch public proxy lists and find the fastest working proxies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding proxies.txt and the log file
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Number of working proxies to look for
    #[arg(short, long, default_value = "3")]
    min_working: usize,

    /// Maximum number of proxies to test (all when omitted)
    #[arg(long)]
    max_tests: Option<usize>,

    /// Stop testing as soon as --min-working proxies answered
    #[arg(long)]
    early_stop: bool,

    /// Number of concurrent probes
    #[arg(short = 'n', long, default_value = "20")]
    concurrency: usize,

    /// Timeout of a single probe in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Upper bound on a whole validation pass in seconds (0 disables it)
    #[arg(long, default_value = "600")]
    deadline: u64,

    /// MaxMind MMDB file used when a proxy location cannot be fetched
    #[arg(long)]
    mmdb: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive menu
    Menu,
    /// Fetch proxies from all sources and save them
    Fetch,
    /// Test saved proxies and show the fastest
    Find,
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        let stop_rule = if self.early_stop {
            StopRule::AtMinWorking
        } else {
            StopRule::ExhaustPool
        };
        let deadline = (self.deadline > 0).then(|| Duration::from_secs(self.deadline));

        let validator = ValidatorConfig::new()
            .with_concurrency(self.concurrency)
            .with_probe_timeout(Duration::from_secs(self.timeout))
            .with_stop_rule(stop_rule)
            .with_deadline(deadline);

        let mut geo = GeoConfig::new();
        if let Some(path) = &self.mmdb {
            geo = geo.with_mmdb_path(path.clone());
        }

        AppConfig::new()
            .with_data_dir(&self.data_dir)
            .with_validator(validator)
            .with_geo(geo)
            .with_min_working(self.min_working)
            .with_max_tests(self.max_tests)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.app_config();
    let interactive = matches!(cli.command, Some(Commands::Menu) | None);

    setup_logging(&cli.log_level, interactive.then_some(cli.data_dir.as_path()))?;

    let min_working = config.min_working;
    let max_tests = config.max_tests;
    let manager = Arc::new(ProxyManager::new(config)?);

    match cli.command {
        Some(Commands::Menu) | None => {
            let mut app = App::new(manager, min_working, max_tests);
            app.run().await?;
            println!("Goodbye!");
        }
        Some(Commands::Fetch) => {
            println!("Fetching proxies from {} sources...", manager.sources().len());
            let count = manager.fetch_proxies().await?;
            if count == 0 {
                eprintln!("No proxies could be fetched, keeping the previous list");
            } else {
                println!(
                    "Successfully fetched {} proxies into {}",
                    count,
                    manager.store().path().display()
                );
            }
        }
        Some(Commands::Find) => {
            println!("Finding fastest proxy...");
            let working = manager.find_working_proxies(min_working, max_tests).await;

            let Some(fastest) = working.first() else {
                eprintln!("No working proxies found");
                return Ok(());
            };

            println!("\nSpeed Test Results:");
            println!("{:<24} {:>12}  Status", "Proxy", "Speed (ms)");
            for (i, record) in working.iter().enumerate() {
                println!(
                    "{:<24} {:>10.0}ms  {}",
                    record.candidate.as_str(),
                    record.latency_ms,
                    if i == 0 { "Fastest" } else { "" }
                );
            }

            let report = manager.connection_report(fastest).await;
            println!();
            println!("{:<12} {:<32} {:<32}", "Status", "Original Location", "Proxy Location");
            println!(
                "{:<12} {:<32} {:<32}",
                "Connected",
                report.original.short_display(),
                report.via_proxy.short_display()
            );
        }
    }

    Ok(())
}

/// Install the global subscriber; the menu logs to a file so the terminal
/// UI stays intact
fn setup_logging(level: &str, log_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("legendsvpn={}", level)))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("legendsvpn.log"))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}
