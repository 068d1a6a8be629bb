use anyhow::{bail, Context};
use clap::Parser;
use gf_engine::{CommandFitter, GenerationController};
use gf_exec::{CommandModel, ExecutionContext, TcpTransport, Transport};
use gf_types::{ExecutionMode, GeneticConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "genfit")]
#[command(about = "Fit external models with a genetic search", long_about = None)]
#[command(version)]
struct Cli {
    /// Run configuration (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Number of generations to run
    #[arg(long, default_value_t = 1)]
    generations: usize,

    /// First generation to run; earlier generations must already exist
    #[arg(long, default_value_t = 1)]
    start: usize,

    /// This process's rank (distributed mode)
    #[arg(long)]
    rank: Option<usize>,

    /// Number of ranks (distributed mode)
    #[arg(long)]
    size: Option<usize>,

    /// Coordinator address: rank 0 listens here, workers connect to it
    #[arg(long)]
    coordinator: Option<String>,

    /// Seconds to wait for the cluster to assemble
    #[arg(long, default_value_t = 60)]
    connect_timeout: u64,
}

async fn execution_context(cli: &Cli, mode: ExecutionMode) -> anyhow::Result<ExecutionContext> {
    if mode == ExecutionMode::Local {
        return Ok(ExecutionContext::single());
    }
    let (Some(rank), Some(size), Some(addr)) = (cli.rank, cli.size, cli.coordinator.as_deref())
    else {
        bail!("distributed mode needs --rank, --size and --coordinator");
    };
    let wait = Duration::from_secs(cli.connect_timeout);
    let transport: Arc<dyn Transport> = if rank == 0 {
        Arc::new(TcpTransport::bind_coordinator(addr, size, wait).await?)
    } else {
        Arc::new(TcpTransport::worker(addr, rank, size, wait).await?)
    };
    Ok(ExecutionContext::distributed(transport)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if cli.start == 0 {
        bail!("generations are numbered from 1");
    }

    let mut config = GeneticConfig::from_json_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.start > 1 {
        config.existing = true;
    }
    let model = config
        .model
        .clone()
        .context("configuration has no model command")?;
    let fitter = config
        .fitter
        .clone()
        .context("configuration has no fitter command")?;

    let context = execution_context(&cli, config.mode).await?;
    info!(run = %config.name, ?context, start = cli.start, generations = cli.generations, "starting genfit");

    let mut controller = GenerationController::from_config(
        config,
        context,
        Arc::new(CommandModel::new(model)),
        Arc::new(CommandFitter::new(fitter)),
    )?;
    controller.run(cli.start, cli.generations).await?;

    println!("{}", serde_json::to_string_pretty(controller.status())?);
    Ok(())
}
