use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lb_core::{telemetry, version};
use podlb::Config;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Use config from file
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	#[arg(long, value_name = "validate-only")]
	validate_only: bool,

	/// Print version
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	let _log_flush = telemetry::setup_logging();

	let args = Args::parse();
	if args.version {
		println!("{}", version::BuildInfo::new());
		return Ok(());
	}

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("tokio runtime builds")
		.block_on(async move {
			let contents = match &args.file {
				Some(file) => std::fs::read_to_string(file)
					.with_context(|| format!("reading {}", file.display()))?,
				None if Path::new("config.yaml").exists() => {
					std::fs::read_to_string("config.yaml").context("reading config.yaml")?
				},
				None => "{}".to_string(),
			};
			let config = podlb::config::parse_config(contents)?;
			if args.validate_only {
				println!("Configuration is valid!");
				return Ok(());
			}
			proxy(Arc::new(config)).await
		})
}

async fn proxy(config: Arc<Config>) -> anyhow::Result<()> {
	info!("version: {}", version::BuildInfo::new());
	info!("running with config:\n{}", serde_yaml::to_string(config.as_ref())?);
	podlb::app::run(config).await?.wait_termination().await
}
