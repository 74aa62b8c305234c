use anyhow::{anyhow, Context, Result};
use clap::Parser;
use emu_core::audio::AudioRing;
use emu_core::display::Display;
use emu_core::logging::{LogConfig, LogLevel};
use emu_core::types::Frame;
use emu_core::System;
use emu_ep128::{Ep128System, MachineConfig};
use log::{info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(about = "Headless Enterprise 128 runner")]
struct Args {
    /// ROM images, mounted at rom0, rom1, ... in order
    #[arg(required = true)]
    roms: Vec<PathBuf>,

    /// Machine configuration as JSON (defaults to the Enterprise 128 preset)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Raw 16-bit mono tape image; the play button is pressed at start
    #[arg(long)]
    tape: Option<PathBuf>,

    /// Number of fields to run
    #[arg(long, default_value_t = 50)]
    frames: u32,

    /// Emulated time per field in microseconds
    #[arg(long, default_value_t = 20_000)]
    field_us: u64,

    /// Load a snapshot before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a snapshot after running
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Record a demo for the whole run
    #[arg(long, conflicts_with = "play_demo")]
    record_demo: Option<PathBuf>,

    /// Play back a demo file
    #[arg(long)]
    play_demo: Option<PathBuf>,

    /// Write the last assembled frame as a binary PPM
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Print debug_state as JSON after running
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Engine log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Send engine logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<MachineConfig> {
    let Some(path) = path else {
        return Ok(MachineConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn write_ppm(path: &Path, frame: &Frame) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P6\n{} {}\n255\n", frame.width, frame.height)?;
    for &p in &frame.pixels {
        out.write_all(&[(p >> 16) as u8, (p >> 8) as u8, p as u8])?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let level = LogLevel::from_str(&args.log_level)
        .ok_or_else(|| anyhow!("unknown log level '{}'", args.log_level))?;
    let log_config = LogConfig::global();
    log_config.set_global_level(level);
    if let Some(path) = &args.log_file {
        log_config
            .set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }

    let config = load_config(args.config.as_deref())?;
    let mut display = Display::new(config.display);
    display.start()?;
    let ring = Arc::new(AudioRing::new(config.audio));

    let mut sys = Ep128System::new(config)?;
    sys.set_video_sink(Box::new(display.producer()));
    sys.set_audio_sink(Box::new(Arc::clone(&ring)));

    for (i, path) in args.roms.iter().enumerate() {
        let id = format!("rom{}", i);
        sys.mount(&id, &read(path)?)
            .with_context(|| format!("mounting {} at {}", path.display(), id))?;
        info!("Mounted {} at {}", path.display(), id);
    }
    if let Some(path) = &args.tape {
        sys.mount("tape", &read(path)?)
            .with_context(|| format!("mounting tape {}", path.display()))?;
        sys.tape_play();
    }
    sys.reset(true);

    if let Some(path) = &args.load_state {
        sys.load_state(&read(path)?)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
    }
    if let Some(path) = &args.play_demo {
        sys.load_demo(&read(path)?)
            .with_context(|| format!("loading demo {}", path.display()))?;
    }
    if args.record_demo.is_some() {
        sys.record_demo();
    }

    let mut samples = Vec::new();
    for _ in 0..args.frames {
        sys.run(args.field_us);

        // Nobody is listening; keep the ring from overrunning.
        let frames = ring.available_frames();
        samples.resize(frames * 2, 0);
        ring.forward_audio_data(&mut samples, frames);

        while let Some(geometry) = display.poll_resolution_change() {
            info!("Resolution changed to {}x{}", geometry.width, geometry.height);
        }
    }

    if let Some(path) = &args.record_demo {
        match sys.stop_demo() {
            Some(bytes) => {
                fs::write(path, bytes)
                    .with_context(|| format!("writing demo {}", path.display()))?;
            }
            None => warn!("No demo was recorded"),
        }
    }
    if let Some(path) = &args.save_state {
        fs::write(path, sys.save_state()?)
            .with_context(|| format!("writing snapshot {}", path.display()))?;
    }
    if let Some(path) = &args.screenshot {
        write_ppm(path, &display.take_ready_frame())
            .with_context(|| format!("writing screenshot {}", path.display()))?;
    }

    info!(
        "Ran {} nick cycles, {} frames assembled",
        sys.nick_cycle_count(),
        display.frames_assembled()
    );
    if args.debug {
        println!("{}", serde_json::to_string_pretty(&sys.debug_state())?);
    }

    Ok(())
}
