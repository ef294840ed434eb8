use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use zxrom_core::Variant;

/// Runs a board variant against a simulated Spectrum on the host machine.
#[derive(Parser, Debug)]
#[command(name = "zxrom-sim", version, about, long_about = None)]
pub struct Args {
    /// Board variant (cycler, cycler-direct, interface1, button-nmi, lower-border)
    #[arg(short, long, default_value = "cycler")]
    pub variant: Variant,

    /// 16 KiB ROM images, cycled in order. Demo images are generated when omitted.
    pub roms: Vec<PathBuf>,

    /// Template image for the "switching to" screen
    #[arg(long)]
    pub announcement: Option<PathBuf>,

    /// Interface 1 shadow ROM
    #[arg(long)]
    pub if1: Option<PathBuf>,

    /// Simulated button presses (switching variants) or frames (lower-border)
    #[arg(short, long, default_value_t = 2)]
    pub presses: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: Level,

    /// Write the log to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
