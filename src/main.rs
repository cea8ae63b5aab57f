//! multiscan CLI - retrying, batching, parallel test runs for flaky suites.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use multiscan::config::{self, Config};
use multiscan::device::{Device, SimulatorKiller};
use multiscan::orchestrator::{AttemptCompleted, CompletionCallback, Flow, RunCoordinator};
use multiscan::report::{JunitParser, print_summary};
use multiscan::tool::CommandTool;

#[derive(Parser)]
#[command(name = "multiscan")]
#[command(about = "Run flaky test suites in retried, parallel batches", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "multiscan.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests
    Run {
        /// Override the number of tries per batch
        #[arg(long)]
        try_count: Option<usize>,

        /// Override the number of batches
        #[arg(long)]
        batch_count: Option<usize>,

        /// Override the number of parallel test runs
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Override the output directory
        #[arg(short, long)]
        output_directory: Option<PathBuf>,

        /// Also write the run summary as JSON to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

/// Command line overrides for the `[multiscan]` section.
struct Overrides {
    try_count: Option<usize>,
    batch_count: Option<usize>,
    parallel: Option<usize>,
    output_directory: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        let settings = &mut config.multiscan;
        if let Some(try_count) = self.try_count {
            settings.try_count = try_count;
        }
        if let Some(batch_count) = self.batch_count {
            settings.batch_count = Some(batch_count);
        }
        if let Some(parallel) = self.parallel {
            settings.parallel_testrun_count = parallel;
        }
        if let Some(dir) = self.output_directory {
            settings.output_directory = dir;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            try_count,
            batch_count,
            parallel,
            output_directory,
            summary_json,
        } => {
            let overrides = Overrides {
                try_count,
                batch_count,
                parallel,
                output_directory,
            };
            let code = run_tests(&cli.config, overrides, summary_json).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

async fn run_tests(
    config_path: &Path,
    overrides: Overrides,
    summary_json: Option<PathBuf>,
) -> Result<i32> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    overrides.apply(&mut config);

    info!("Loaded configuration from {}", config_path.display());

    let request = config.to_request()?;
    let devices: Vec<Device> = config
        .devices
        .destinations
        .iter()
        .map(Device::new)
        .collect();

    let outcome = RunCoordinator::new(
        request,
        CommandTool::new(config.tool.clone()),
        JunitParser::new(),
        SimulatorKiller::default(),
    )
    .with_devices(devices)
    .with_completion_callback(progress_printer(config.multiscan.max_failed_tests))
    .run()
    .await?;

    print_summary(&outcome.summary, outcome.aborted);

    if let Some(path) = summary_json {
        let json = serde_json::to_string_pretty(&outcome.summary)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    Ok(outcome.exit_code(config.multiscan.fail_build))
}

/// Prints each finished attempt, aborting once more than `max_failed`
/// distinct tests failed their first attempt.
fn progress_printer(max_failed: Option<usize>) -> CompletionCallback {
    let mut first_failures: BTreeSet<String> = BTreeSet::new();

    Box::new(move |event: &AttemptCompleted| {
        let status = if event.failed.is_empty() {
            console::style("passed").green()
        } else {
            console::style("failed").red()
        };
        println!(
            "  batch {} try {} (slot {}): {} - {} passed, {} failed",
            event.batch,
            event.retry + 1,
            event.slot,
            status,
            event.passed.len(),
            event.failed.len()
        );

        if event.retry == 0 {
            first_failures.extend(event.failed.iter().cloned());
        }
        match max_failed {
            Some(max) if first_failures.len() > max => {
                eprintln!(
                    "{}",
                    console::style(format!(
                        "{} tests failed, more than the allowed {}; aborting",
                        first_failures.len(),
                        max
                    ))
                    .red()
                    .bold()
                );
                Flow::Abort
            }
            _ => Flow::Continue,
        }
    })
}

fn validate_config(config_path: &Path) -> Result<()> {
    let validated = config::load_config(config_path).and_then(|config| {
        let request = config.to_request()?;
        Ok((config, request))
    });

    match validated {
        Ok((config, request)) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Try count: {}", request.try_count);
            match request.batch_count {
                Some(count) => println!("  Batch count: {}", count),
                None => println!("  Batch count: 1"),
            }
            println!("  Parallel test runs: {}", request.parallel_testrun_count);
            let types: Vec<&str> = request.output_types.iter().map(|t| t.as_str()).collect();
            println!("  Output types: {}", types.join(", "));
            println!("  Output directory: {}", request.output_directory.display());
            if !config.devices.destinations.is_empty() {
                println!("  Devices: {}", config.devices.destinations.len());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(path: &Path) -> Result<()> {
    let config = r#"# multiscan configuration file

[multiscan]
try_count = 3
batch_count = 2
parallel_testrun_count = 2
output_types = "html,junit"
output_directory = "test_output"
quit_simulators = true
collate_reports = true

[tool]
# {tests} expands to one test_arg per selected test
command = "xcodebuild test-without-building -xctestrun {xctestrun} -destination {destination} {tests} | xcpretty -r junit -o {junit} -r html -o {html}"
test_arg = "-only-testing:{test}"
# Prints one test identifier per line
list_command = "./scripts/list-tests.sh"
build_command = "xcodebuild build-for-testing -scheme App -destination 'generic/platform=iOS Simulator' -derivedDataPath build"
xctestrun = "build/Build/Products/App.xctestrun"
timeout_secs = 3600

[devices]
destinations = [
    "platform=iOS Simulator,name=iPhone 15",
    "platform=iOS Simulator,name=iPhone 15 Pro",
]
"#;

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, config)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  multiscan run");

    Ok(())
}
