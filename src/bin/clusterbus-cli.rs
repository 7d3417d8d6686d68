//! clusterbus CLI binary
//!
//! Thin operator CLI: points the server at a configuration file and lets
//! the log level be overridden without touching `RUST_LOG`.

use clap::Parser;
use clusterbus::config::PlaneConfig;
use clusterbus::observability::{init_logging, LogFormat};

/// clusterbus - cluster-controller message layer CLI
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to a JSON configuration file. Defaults to the development preset.
    #[arg(long)]
    config: Option<String>,

    /// Emit logs as newline-delimited JSON instead of human-readable text.
    #[arg(long)]
    json_logs: bool,

    /// Validate the configuration and exit without starting anything.
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(if args.json_logs { LogFormat::Json } else { LogFormat::Pretty });

    let config = match &args.config {
        Some(path) => PlaneConfig::load_from_file(path)?,
        None => PlaneConfig::development(),
    };
    config.validate()?;

    if args.check {
        println!("configuration is valid");
        return Ok(());
    }

    println!(
        "clusterbus would start against bounce proxy {} and broker {}",
        config.bounce_proxy_base_url, config.broker_url
    );
    println!("run the `clusterbus` binary to actually start the process");
    Ok(())
}
