use anyhow::Result;
use clap::{Parser, Subcommand};
use geo_sift::{
    logging::{self, LogStream},
    Config, LaunchMode, Pipeline, RunOptions,
};
use std::path::PathBuf;

/// Collect candidate IPs, classify them by country and feed the allowed ones
/// to a bandwidth scanner
#[derive(Parser)]
#[command(name = "geo-sift")]
#[command(version)]
#[command(about = "Collect candidate IPs, classify them by country and feed the allowed ones to a bandwidth scanner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to geo-sift.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long)]
    log_level: Option<String>,

    /// Write log lines to stdout instead of stderr
    #[arg(long)]
    log_stdout: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline (default)
    Run {
        /// Start the scanner without waiting for its results
        #[arg(long)]
        no_wait: bool,
        /// Discard earlier classifications
        #[arg(long)]
        fresh: bool,
    },
    /// Collect addresses from the manual list and the domain list
    Collect {
        /// Discard earlier classifications
        #[arg(long)]
        fresh: bool,
    },
    /// Probe and classify every unchecked address
    Classify,
    /// Write the address column of the classified file
    Extract,
    /// Split classified addresses by the allow-list
    Partition,
    /// Stage the allowed addresses and start the scanner
    Scan {
        /// Start the scanner without waiting for its results
        #[arg(long)]
        no_wait: bool,
    },
    /// Build the proxy list from the scanner's results
    Process,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", Config::example());
        return Ok(());
    }

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_stdout {
        config.logging.stream = LogStream::Stdout;
    }
    logging::init(&config.logging)?;

    let command = cli.command.unwrap_or(Commands::Run {
        no_wait: false,
        fresh: false,
    });

    let pipeline = Pipeline::new(config)?;
    let paths = pipeline.config().paths.clone();

    match command {
        Commands::Run { no_wait, fresh } => {
            let summary = pipeline
                .run(RunOptions {
                    mode: launch_mode(no_wait),
                    fresh,
                })
                .await?;

            println!(
                "Collected {} unique IPs ({} domains failed)",
                summary.collect.unique,
                summary.collect.failed_domains.len()
            );
            println!(
                "Classified {}: {} unreachable, {} unknown, {} already done",
                summary.classify.classified,
                summary.classify.unreachable,
                summary.classify.unknown,
                summary.classify.skipped
            );
            match (summary.partition, summary.process) {
                (None, _) => println!("Partition failed; scanner not started"),
                (Some(partition), process) => {
                    println!(
                        "Allowed: {}, blocked: {}, unreachable: {}",
                        partition.allowed, partition.blocked, partition.unreachable
                    );
                    match process {
                        Some(process) => println!(
                            "Proxy list: {} fast IPs saved to {:?}",
                            process.fast, paths.proxy_with_country
                        ),
                        None => {
                            println!("Scanner started; run `geo-sift process` once it finishes")
                        }
                    }
                }
            }
        }
        Commands::Collect { fresh } => {
            let report = pipeline.collect(fresh).await?;
            println!(
                "Saved {} unique IPs to {:?}",
                report.unique, paths.all_ips_with_country
            );
            for domain in &report.failed_domains {
                eprintln!("Failed to resolve: {}", domain);
            }
        }
        Commands::Classify => {
            let report = pipeline.classify().await?;
            println!(
                "Classified {} of {} IPs ({} unreachable, {} unknown)",
                report.classified, report.total, report.unreachable, report.unknown
            );
        }
        Commands::Extract => {
            let count = pipeline.extract()?;
            println!("Saved {} IPs to {:?}", count, paths.all_ips);
        }
        Commands::Partition => {
            if let Some(report) = pipeline.partition() {
                println!("Allowed: {} -> {:?}", report.allowed, paths.partition.allowed_ips);
                println!("Blocked: {} -> {:?}", report.blocked, paths.partition.blocked_ips);
                println!(
                    "Unreachable: {} -> {:?}",
                    report.unreachable, paths.partition.unreachable_ips
                );
            }
        }
        Commands::Process => {
            let report = pipeline.process().await?;
            println!(
                "{} of {} rows above the speed threshold, saved to {:?}",
                report.fast, report.rows, paths.proxy_with_country
            );
        }
        Commands::Scan { no_wait } => match pipeline.scan(launch_mode(no_wait)).await? {
            Some(result) => println!("Scanner result ready: {}", result.display()),
            None => println!("Scanner started"),
        },
    }

    Ok(())
}

fn launch_mode(no_wait: bool) -> LaunchMode {
    if no_wait {
        LaunchMode::Detached
    } else {
        LaunchMode::Wait
    }
}
