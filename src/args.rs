use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera index (overrides config)
    #[arg(short, long)]
    pub cam_index: Option<u32>,

    /// Start with this image instead of the camera
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Overlay asset key to try on first (e.g. classic-black)
    #[arg(short, long)]
    pub asset: Option<String>,

    /// Configuration file
    #[arg(long, default_value = rusty_frames::config::AppConfig::DEFAULT_PATH)]
    pub config: PathBuf,

    /// List available cameras
    #[arg(long)]
    pub list: bool,

    /// Show camera frames unmirrored
    #[arg(long, default_value_t = false)]
    pub no_mirror: bool,

    /// Log level for this crate (trace, debug, info, warn, error). Falls back to RUST_LOG.
    #[arg(long)]
    pub log_level: Option<String>,
}
