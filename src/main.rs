use anyhow::Result;
use clap::{Parser, Subcommand};
use proxy_sieve::{
    logging,
    proxy::{
        CandidateSource, CycleController, FileSource, ProbeConfig, ProtocolFilter, ScrapeSource,
        ValidationEngine,
    },
    server::{self, ApiState},
    Config,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// A high-performance proxy checker with JSON output and scheduling
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "A high-performance proxy checker with JSON output and scheduling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON file
    #[arg(short, long, default_value = "proxies.json", global = true)]
    output: PathBuf,

    /// Proxy type to check
    #[arg(short = 't', long, value_enum, default_value = "all", global = true)]
    proxy_type: ProtocolFilter,

    /// Save invalid proxies to a file
    #[arg(short = 's', long, global = true)]
    save_invalid: bool,

    /// Query server port
    #[arg(short, long, default_value = "8080", global = true)]
    port: u16,

    /// Maximum number of concurrent probes
    #[arg(short = 'n', long, default_value = "500", global = true)]
    threads: usize,

    /// Repeat the check every N hours (0 = run once)
    #[arg(short, long, default_value = "0", global = true)]
    repeat: u64,

    /// Attempts per protocol
    #[arg(long, default_value = "2", global = true)]
    retries: u32,

    /// Timeout in seconds for each attempt
    #[arg(long, default_value = "2", global = true)]
    timeout: u64,

    /// URL to fetch through each proxy
    #[arg(long, default_value = "http://httpbin.org/ip", global = true)]
    test_url: String,

    /// Plaintext log of valid proxies
    #[arg(long, default_value = "Valid_Proxies.txt", global = true)]
    valid_log: PathBuf,

    /// Plaintext log of invalid proxies
    #[arg(long, default_value = "Invalid_Proxies.txt", global = true)]
    invalid_log: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxies listed in a file
    File {
        /// Input file containing one IP:PORT per line
        input: PathBuf,
    },
    /// Scrape public proxy lists and check them
    Scrape,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            output_path: self.output.clone(),
            valid_log_path: self.valid_log.clone(),
            invalid_log_path: self.invalid_log.clone(),
            max_concurrency: self.threads,
            probe: ProbeConfig::new()
                .with_timeout(Duration::from_secs(self.timeout))
                .with_retries(self.retries)
                .with_test_url(self.test_url.clone()),
            server_port: self.port,
        }
    }

    fn source(&self) -> Result<Box<dyn CandidateSource>> {
        let source: Box<dyn CandidateSource> = match &self.command {
            Commands::File { input } => Box::new(FileSource::new(input)),
            Commands::Scrape => Box::new(ScrapeSource::for_filter(self.proxy_type)?),
        };
        Ok(source)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = cli.config();
    let protocols = cli.proxy_type.protocols();
    let source = cli.source()?;

    let engine = ValidationEngine::from_config(&config);
    let controller = CycleController::new(engine.clone());

    let server_state = ApiState::new(engine);
    let port = config.server_port;
    tokio::spawn(async move {
        if let Err(e) = server::start(port, server_state).await {
            error!(error = %e, "query server stopped");
        }
    });

    info!(
        output = %config.output_path.display(),
        proxy_type = ?cli.proxy_type,
        max_concurrency = config.max_concurrency,
        repeat_hours = cli.repeat,
        "configuration loaded"
    );

    let scheduler = async {
        loop {
            match controller
                .run_cycle(source.as_ref(), &protocols, cli.save_invalid)
                .await
            {
                Ok(report) => {
                    println!(
                        "\nChecking complete! Total: {}, Checked: {}, Valid: {}",
                        report.total, report.checked, report.valid
                    );
                    println!("Valid proxies saved to: {}", config.output_path.display());
                    println!("Backup text file: {}", config.valid_log_path.display());
                    if cli.save_invalid {
                        println!("Invalid proxies: {}", config.invalid_log_path.display());
                    }
                }
                Err(e) => error!(error = %format!("{:#}", e), "proxy check cycle failed"),
            }

            if cli.repeat == 0 {
                break;
            }
            info!(hours = cli.repeat, "next check scheduled");
            tokio::time::sleep(Duration::from_secs(cli.repeat * 3600)).await;
        }

        println!("Query server running on port {}. Press Ctrl+C to stop.", port);
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = scheduler => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutting down");
        }
    }

    Ok(())
}
