//! Enterprise 64/128 emulator implementation
//!
//! # Architecture
//!
//! - **CPU**: Zilog Z80A @ 4 MHz
//! - **Nick**: video chip, one slot per nick cycle (889 846 Hz)
//! - **Dave**: sound, interrupts, keyboard and memory paging (500 kHz)
//! - **RAM**: 64 KiB to 3.6 MiB in 16 KiB segments; segments 0xFC-0xFF are video RAM
//! - **EXDOS**: floppy controller port block
//!
//! [`Ep128System::run`] advances all three clock domains against each other
//! in fixed-point nick cycle steps. Snapshots and demo recordings use the
//! chunk file format from [`emu_core::state`].

mod bus;
mod clock;
mod config;
mod dave;
mod floppy;
mod memory;
mod nick;
mod snapshot;
mod system;
mod tape;

pub use clock::{Accumulators, ClockSettings};
pub use config::{
    MachineConfig, CPU_FREQUENCY_RANGE, SOUND_FREQUENCY_RANGE, VIDEO_FREQUENCY_RANGE,
};
pub use system::{DemoStatus, Ep128System};

use emu_core::state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Ep128Error {
    #[error("Invalid mount point")]
    InvalidMountPoint,
    #[error("Invalid ROM image: {0}")]
    InvalidRom(String),
    #[error("Invalid tape image: {0}")]
    InvalidTape(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{name} frequency {value} Hz outside {min}..={max} Hz")]
    FrequencyOutOfRange {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error(transparent)]
    State(#[from] StateError),
}
