use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use xchain_witness::{cfg, launcher::App};

#[derive(Parser, Debug)]
struct Args {
    /// Path to the witness configuration file.
    #[clap(long, short, default_value = "witness.toml")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true);
    builder.init();

    let config = cfg::read_config(&args.config_file)?;
    App::new(config)?.run().await
}
