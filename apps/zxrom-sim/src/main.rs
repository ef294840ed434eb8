mod args;
mod session;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;
use zxrom_core::{
    RomSet,
    config::Features,
    image::{ROM_SIZE, RomImage, load_rom_image_from_file},
};

use crate::{args::Args, session::Session};

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(&args)?;

    let images = load_images(&args)?;
    Session::start(args.variant, images)?.run(args.presses)
}

fn init_tracing(args: &Args) -> Result<Option<WorkerGuard>> {
    let builder = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let Some(path) = &args.log_file else {
        tracing::subscriber::set_global_default(builder.compact().finish())?;
        return Ok(None);
    };
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path.file_name().context("log file path has no file name")?;
    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let subscriber = builder
        .with_ansi(false)
        .with_writer(writer)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(Some(guard))
}

fn load_images(args: &Args) -> Result<RomSet> {
    let mut images = RomSet::default();
    if args.roms.is_empty() {
        for (index, name) in ["48K", "Demo A", "Demo B"].into_iter().enumerate() {
            images = images.bank(name, demo_image(index as u8 + 1)?);
        }
    } else {
        for path in &args.roms {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("rom")
                .to_owned();
            images = images.bank(name, load(path)?);
        }
    }

    let features = args.variant.features();
    if features.contains(Features::ANNOUNCE) {
        let template = match &args.announcement {
            Some(path) => load(path)?,
            None => RomImage::filled(0x00),
        };
        images = images.announcement(template);
    }
    if features.contains(Features::ADDRESS_TRIGGERS) {
        let if1 = match &args.if1 {
            Some(path) => load(path)?,
            None => demo_image(0x80)?,
        };
        images = images.aux("if1", if1);
    }
    Ok(images)
}

fn load(path: &Path) -> Result<RomImage> {
    load_rom_image_from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// Starts like the 48K ROM (`DI; XOR A`) and fills the rest with a pattern
/// seeded by `seed` so banks are told apart in dumps.
fn demo_image(seed: u8) -> Result<RomImage> {
    let mut bytes: Vec<u8> = (0..ROM_SIZE)
        .map(|offset| (offset as u8).wrapping_mul(seed))
        .collect();
    bytes[..2].copy_from_slice(&[0xF3, 0xAF]);
    bytes[2] = seed;
    Ok(RomImage::from_bytes(&bytes)?)
}
