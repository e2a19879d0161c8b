use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use droid_explorer::annotate::LabelAnnotator;
use droid_explorer::brain::OpenAiOracle;
use droid_explorer::hands::AdbDevice;
use droid_explorer::{Explorer, ExplorerConfig, RunOutcome};

/// Explore an Android app toward a task and document what its controls do.
#[derive(Debug, Parser)]
#[command(name = "agent", version)]
struct Args {
    /// Task description, e.g. "turn on dark mode".
    task: String,

    /// adb serial of the target device; overrides DEVICE_SERIAL.
    #[arg(long)]
    serial: Option<String>,

    /// Safety bound on the number of rounds; overrides MAX_ROUNDS.
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Root for task workspaces and documentation; overrides WORK_DIR.
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ExplorerConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Some(serial) = args.serial {
        config.device.serial = Some(serial);
    }
    if let Some(rounds) = args.max_rounds {
        config = config.max_rounds(rounds);
    }
    if let Some(dir) = args.work_dir {
        config = config.work_dir(dir);
    }

    let mapping = config.load_app_mapping()?;
    let oracle = Arc::new(OpenAiOracle::new(&config.oracle, config.oracle.api_key()?)?);
    let device = Arc::new(AdbDevice::new(
        config.device.serial.clone(),
        config.device.screenshot_dir.clone(),
        config.device.xml_dir.clone(),
    ));
    let annotator = Arc::new(LabelAnnotator::new(config.dark_mode));

    info!(model = %config.oracle.model, "explorer ready");
    let explorer =
        Explorer::new(config, device, oracle.clone(), oracle, annotator).with_app_mapping(mapping);
    let report = explorer.run(&args.task).await;

    if let Some(dir) = &report.task_dir {
        info!(dir = %dir.display(), "task artifacts saved");
    }
    info!(
        rounds = report.rounds,
        docs = report.doc_count,
        denied = report.deny.len(),
        "exploration summary"
    );
    match report.outcome {
        RunOutcome::Completed => info!("task completed"),
        RunOutcome::Finished => info!("oracle finished the task"),
        RunOutcome::Failed(err) => {
            error!("exploration failed: {err}");
            std::process::exit(1);
        }
    }
    Ok(())
}
