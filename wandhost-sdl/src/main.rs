//! Desktop frontend: runs a wandhost guest in an SDL2 window.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use wandhost_core::config::Config;

mod app;
mod audio;
mod input;
mod video;

#[derive(Debug, Parser)]
#[command(name = "wandhost", version, about = "Run a wandhost WebAssembly game")]
struct Args {
    /// Guest module, `.wasm` or `.wat`.
    guest: PathBuf,

    /// TOML configuration file. Missing keys take their defaults.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Integer window scale, overrides `video.scale`.
    #[arg(long, value_name = "N")]
    scale: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(scale) = args.scale {
        config.video.scale = scale;
    }
    config.validate()?;

    let guest_bytes = std::fs::read(&args.guest)
        .with_context(|| format!("failed to read guest {}", args.guest.display()))?;
    let title = args
        .guest
        .file_stem()
        .map(|stem| format!("wandhost - {}", stem.to_string_lossy()))
        .unwrap_or_else(|| "wandhost".to_owned());

    app::run(&guest_bytes, &config, &title)
}
