//! campus-verify - browser verification CLI
//!
//! Runs the declarative verification scenarios against a checkout of the
//! AlfaOctal Campus site and writes screenshot artifacts and a JSON
//! result document under the output directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use campus_harness::driver::{Browser, Driver, DriverConfig};
use campus_harness::runner::{Runner, RunnerConfig};
use campus_harness::scenario::Transport;

mod output;

use output::{print_list, print_suite, OutputFormat, ScenarioSummary};

/// Browser verification for the AlfaOctal Campus course site
#[derive(Parser)]
#[command(name = "campus-verify")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Checkout of the course site under verification
    #[arg(long, default_value = "site", global = true)]
    site_root: PathBuf,

    /// Directory of scenario YAML files
    #[arg(long, default_value = "verification/scenarios", global = true)]
    scenarios: PathBuf,

    /// Artifact output directory
    #[arg(long, default_value = "verification/output", global = true)]
    output: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run verification scenarios
    Run(RunArgs),

    /// List available scenarios
    List,

    /// Print the generated driver script for a scenario
    Script {
        /// Scenario name
        name: String,
    },

    /// Promote current screenshots to visual baselines
    UpdateBaselines,
}

#[derive(Args)]
struct RunArgs {
    /// Run only the named scenario
    #[arg(long)]
    name: Option<String>,

    /// Run only scenarios carrying this tag
    #[arg(long)]
    tag: Option<String>,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    browser: String,

    /// Show the browser window instead of running headless
    #[arg(long)]
    headed: bool,

    /// Directory whose node_modules provides the playwright package
    #[arg(long)]
    node_root: Option<PathBuf>,

    /// Fixed port for the local static server (0 = ephemeral)
    #[arg(long, default_value = "0")]
    port: u16,

    /// Promote screenshots to baselines after a fully passing run
    #[arg(long)]
    update_baselines: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config = RunnerConfig {
        site_root: cli.site_root.clone(),
        scenario_dir: cli.scenarios.clone(),
        output_dir: cli.output.clone(),
        ..RunnerConfig::default()
    };

    match cli.command {
        Commands::Run(args) => run(config, args, cli.format).await,
        Commands::List => list(config, cli.format),
        Commands::Script { name } => script(config, &name),
        Commands::UpdateBaselines => update_baselines(config),
    }
}

async fn run(mut config: RunnerConfig, args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    let browser: Browser = args
        .browser
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    config.browser = browser;
    config.headless = !args.headed;
    config.node_root = args.node_root;
    config.port = (args.port != 0).then_some(args.port);

    let mut runner = Runner::new(config);

    let suite = match (&args.name, &args.tag) {
        (Some(name), _) => runner.run_named(name).await?,
        (None, Some(tag)) => runner.run_tagged(tag).await?,
        (None, None) => runner.run_all().await?,
    };

    runner.write_results(&suite)?;

    if args.update_baselines && suite.all_passed() {
        let updated = runner.update_baselines()?;
        for name in &updated {
            println!("baseline updated: {name}");
        }
    }

    print_suite(&suite, format);

    if !suite.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn list(config: RunnerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let runner = Runner::new(config);
    let scenarios = runner.load_scenarios().context("loading scenarios")?;
    let rows: Vec<ScenarioSummary> = scenarios.iter().map(ScenarioSummary::from).collect();
    print_list(&rows, format);
    Ok(())
}

fn script(config: RunnerConfig, name: &str) -> anyhow::Result<()> {
    let runner = Runner::new(config.clone());
    let scenario = runner
        .load_scenarios()?
        .into_iter()
        .find(|s| s.name == name)
        .with_context(|| format!("scenario not found: {name}"))?;

    let site_root = if config.site_root.is_absolute() {
        config.site_root.clone()
    } else {
        std::env::current_dir()?.join(&config.site_root)
    };

    // The real base URL is only known once the server binds; the printed
    // script uses the conventional local address instead.
    let base_url = (scenario.transport == Transport::Http)
        .then(|| "http://127.0.0.1:8000".to_string());

    let driver = Driver::new(DriverConfig {
        site_root,
        base_url,
        screenshot_dir: config.output_dir.join("screenshots"),
        ..DriverConfig::default()
    });

    print!("{}", driver.build_script(&scenario)?);
    Ok(())
}

fn update_baselines(config: RunnerConfig) -> anyhow::Result<()> {
    let runner = Runner::new(config);
    let updated = runner.update_baselines().context("updating baselines")?;
    if updated.is_empty() {
        println!("No screenshots to promote.");
    } else {
        for name in &updated {
            println!("baseline updated: {name}");
        }
    }
    Ok(())
}
