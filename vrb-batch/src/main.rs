//! vrb-batch - batch vocal removal
//!
//! Runs every audio file under `--input` through the separation model and the
//! converter, keeping at most `--numthreads` files in flight.
//!
//! External tool locations come from the command line, the environment
//! (optionally via a `.env` file) or the TOML config file, in that order.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vrb_batch::progress::BoardLogWriter;
use vrb_batch::services::{Id3TagWriter, LoftyTagReader, ProcessRunner};
use vrb_batch::{InputResolver, PipelineExecutor, ProgressBoard, ResolverSettings, Scheduler};
use vrb_common::config::{
    default_config_path, load_toml_config, ToolConfig, ToolOverrides, ENV_CONVERTER_PATH,
    ENV_DEBUG, ENV_PYTHON_PATH, ENV_VOC_REMOVER_PATH,
};

/// Command-line arguments for vrb-batch
#[derive(Parser, Debug)]
#[command(name = "vrb-batch")]
#[command(about = "Remove vocals from audio files and convert the instrumentals to tagged MP3")]
#[command(version)]
struct Args {
    /// Input file or directory
    #[arg(short, long)]
    input: PathBuf,

    /// Number of simultaneous conversions
    #[arg(
        short = 'n',
        long = "numthreads",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    numthreads: u16,

    /// TOML config file (default: <config dir>/vrb/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interpreter used to run the separation model
    #[arg(long, env = ENV_PYTHON_PATH)]
    python_path: Option<PathBuf>,

    /// Separation toolkit root
    #[arg(long, env = ENV_VOC_REMOVER_PATH)]
    vocal_remover_path: Option<PathBuf>,

    /// Converter executable
    #[arg(long, env = ENV_CONVERTER_PATH)]
    converter_path: Option<PathBuf>,

    /// Dump full job descriptors and log at debug level
    #[arg(long, env = ENV_DEBUG)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tool paths may live in a .env file next to the working directory
    dotenv::dotenv().ok();

    let args = Args::parse();

    // Created first so log lines can be written around the lanes
    let board = ProgressBoard::new();

    let explicit_config = args.config.is_some();
    let config_path = args.config.clone().or_else(default_config_path);
    let file_config = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => None,
    };

    let overrides = ToolOverrides {
        python_path: args.python_path.clone(),
        vocal_remover_path: args.vocal_remover_path.clone(),
        converter_path: args.converter_path.clone(),
        debug: args.debug,
    };
    let config = Arc::new(ToolConfig::resolve(&overrides, file_config.as_ref())?);

    init_tracing(
        config.logging.level.as_deref(),
        config.debug,
        board.log_writer(),
    );

    info!("Starting vrb-batch {}", env!("CARGO_PKG_VERSION"));
    match (&config_path, &file_config) {
        (Some(path), None) if explicit_config => {
            warn!("Config file not found, using defaults: {}", path.display())
        }
        (Some(path), None) => debug!("No config file at {}", path.display()),
        (Some(path), Some(_)) => info!("Loaded config file: {}", path.display()),
        (None, _) => debug!("No config directory on this platform"),
    }
    info!("Separation toolkit: {}", config.vocal_remover_path.display());
    info!("Converter: {}", config.converter_path.display());

    let resolver = InputResolver::new(
        ResolverSettings {
            separated_root: config.separated_root(),
            model_tag: config.separation.model_tag(),
        },
        Arc::new(LoftyTagReader),
    );
    let jobs = resolver
        .parse(&args.input)
        .await
        .with_context(|| format!("Failed to resolve input {}", args.input.display()))?;

    if config.debug {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        println!("{}", args.numthreads);
    } else {
        for job in &jobs {
            println!("{}", job.file_name);
        }
    }

    let executor = Arc::new(PipelineExecutor::new(
        Arc::clone(&config),
        ProcessRunner::new(),
        Arc::new(Id3TagWriter),
    ));
    let scheduler = Scheduler::new(
        usize::from(args.numthreads),
        jobs,
        executor,
        board,
    )?;

    let summary = scheduler.run().await;
    info!(
        "{} of {} file(s) converted, {} failed",
        summary.succeeded.len(),
        summary.total(),
        summary.failed.len()
    );

    println!("Done!");
    Ok(())
}

/// Initialize tracing on stderr, routed around the progress lanes
///
/// `RUST_LOG` wins over the config file level, which wins over the default.
fn init_tracing(config_level: Option<&str>, debug: bool, writer: BoardLogWriter) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter(config_level, debug))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();
}

/// Filter used when `RUST_LOG` is unset
fn default_filter(config_level: Option<&str>, debug: bool) -> String {
    match config_level {
        Some(level) => level.to_string(),
        None if debug => "vrb_batch=debug,vrb_common=debug,info".to_string(),
        None => "info".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_precedence() {
        assert_eq!(default_filter(Some("warn"), true), "warn");
        assert_eq!(
            default_filter(None, true),
            "vrb_batch=debug,vrb_common=debug,info"
        );
        assert_eq!(default_filter(None, false), "info");
    }

    #[test]
    fn test_numthreads_must_be_positive() {
        let parsed = Args::try_parse_from(["vrb-batch", "-i", "music", "-n", "0"]);
        assert!(parsed.is_err());

        let parsed = Args::try_parse_from(["vrb-batch", "-i", "music", "-n", "3"]).unwrap();
        assert_eq!(parsed.numthreads, 3);
        assert_eq!(parsed.input, PathBuf::from("music"));
    }
}
