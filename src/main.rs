//! Famicore - a cycle-driven NES emulator core
//!
//! Headless command-line runner for the core: loads a ROM, drives a number of
//! frames, and can dump the final frame as a PPM image or save/restore full
//! machine states. Rendering and audio output belong to embedding hosts; this
//! binary exists to exercise the core end to end.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use famicore::{Nes, SCREEN_HEIGHT, SCREEN_WIDTH};

/// Command line arguments for famicore
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the NES ROM file
    #[clap(name = "ROM")]
    rom_path: PathBuf,

    /// Number of frames to emulate
    #[clap(short, long, default_value = "60")]
    frames: u64,

    /// Audio sample rate in Hz
    #[clap(long, default_value = "44100")]
    sample_rate: u32,

    /// Emulation speed factor
    #[clap(long, default_value = "1.0")]
    speed: f64,

    /// Controller 1 button byte held for the whole run
    /// (A=$80, B=$40, Select=$20, Start=$10, Up=$08, Down=$04, Left=$02, Right=$01)
    #[clap(long, default_value = "0")]
    buttons: u8,

    /// Load a save state before running
    #[clap(long)]
    load_state: Option<PathBuf>,

    /// Write a save state after the run
    #[clap(long)]
    save_state: Option<PathBuf>,

    /// Write the final frame as a binary PPM image
    #[clap(long)]
    dump_frame: Option<PathBuf>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let rom_path = args.rom_path.to_string_lossy().into_owned();
    info!("loading ROM: {}", rom_path);
    let rom = std::fs::read(&args.rom_path)
        .with_context(|| format!("failed to read ROM file: {rom_path}"))?;

    let mut nes = Nes::new(&rom).with_context(|| format!("failed to load ROM: {rom_path}"))?;
    nes.set_sample_rate(args.sample_rate, args.speed);
    nes.set_controller(0, args.buttons);

    if let Some(path) = &args.load_state {
        let file = File::open(path)
            .with_context(|| format!("failed to open save state: {}", path.display()))?;
        nes.load_state(&mut BufReader::new(file))
            .with_context(|| format!("failed to load save state: {}", path.display()))?;
        info!("save state loaded from {}", path.display());
    }

    for _ in 0..args.frames {
        nes.drive_one_frame();
    }
    info!(
        "ran {} frames ({} CPU cycles, {} master clocks)",
        args.frames,
        nes.cpu.cycle_count,
        nes.system_clock()
    );

    if let Some(path) = &args.save_state {
        let file = File::create(path)
            .with_context(|| format!("failed to create save state: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        nes.save_state(&mut writer)
            .with_context(|| format!("failed to write save state: {}", path.display()))?;
        info!("save state written to {}", path.display());
    }

    if let Some(path) = &args.dump_frame {
        let file = File::create(path)
            .with_context(|| format!("failed to create frame dump: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        write!(writer, "P6\n{SCREEN_WIDTH} {SCREEN_HEIGHT}\n255\n")?;
        writer.write_all(nes.framebuffer())?;
        info!("frame written to {}", path.display());
    }

    Ok(())
}
