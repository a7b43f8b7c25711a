mod summary;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use zoneflow_core::{Action, Config, Orchestrator, RsaKeyGenerator};
use zoneflow_terraform::{DEFAULT_BIN, TerraformCli};

#[derive(Parser, Debug)]
#[command(name = "zoneflow", version)]
#[command(
    about = "Apply, destroy, query and clean per-zone terraform projects",
    long_about = None
)]
struct Cli {
    /// Action to run: apply, destroy, output or clean
    #[arg(value_parser = parse_action)]
    action: Action,

    /// Cloud account API key
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Comma-separated zone identifiers, or "all"
    #[arg(long, env = "ZONES")]
    zones: Option<String>,

    /// Image name pattern handed to image import tooling
    #[arg(long, env = "IMAGE_MATCH")]
    image_match: Option<String>,

    /// Installation directory holding vpcs/ (defaults to the executable's directory)
    #[arg(long, env = "ZONEFLOW_HOME")]
    home: Option<PathBuf>,

    /// terraform executable
    #[arg(long, env = "TERRAFORM_BIN", default_value = DEFAULT_BIN)]
    terraform_bin: String,

    /// Zones processed at the same time
    #[arg(long, env = "ZONEFLOW_PARALLELISM", default_value_t = 1)]
    parallelism: usize,

    /// Timeout for a single terraform command, in seconds
    #[arg(long, env = "ZONEFLOW_TIMEOUT_SECS", default_value_t = 3600)]
    timeout_secs: u64,

    /// Generate a fresh SSH key pair for every zone on apply
    #[arg(long, env = "ZONEFLOW_SSH_KEYS")]
    ssh_keys: bool,

    /// Inventory file (relative paths resolve against the home directory)
    #[arg(long, env = "ZONEFLOW_INVENTORY_FILE")]
    inventory_file: Option<PathBuf>,
}

fn parse_action(value: &str) -> Result<Action, String> {
    value.parse()
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let home = match &self.home {
            Some(home) => home.clone(),
            None => Config::default_home()?,
        };

        let config = Config::builder(home)
            .api_key(self.api_key.clone())
            .zones(self.zones.clone())
            .image_match(self.image_match.clone())
            .provision_credentials(self.ssh_keys)
            .inventory_file(self.inventory_file.clone())
            .parallelism(self.parallelism)
            .zone_timeout(Duration::from_secs(self.timeout_secs))
            .build()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.config()?;
    tracing::debug!(?config, "Loaded configuration");

    let tool = Arc::new(TerraformCli::new(cli.terraform_bin.clone()));
    let mut orchestrator = Orchestrator::configure(config, tool, Arc::new(RsaKeyGenerator::new()))?;

    println!(
        "{}",
        format!(
            "{} zones ({})",
            cli.action,
            orchestrator.config().zones()
        )
        .yellow()
    );

    let report = orchestrator.run(cli.action).await?;
    summary::print(&report);

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
