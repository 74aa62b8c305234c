//! Machine configuration and presets.

use crate::Ep128Error;
use emu_core::audio::AudioRingConfig;
use emu_core::display::DisplayConfig;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Accepted Z80 clock frequencies in Hz.
pub const CPU_FREQUENCY_RANGE: RangeInclusive<u32> = 2_000_000..=250_000_000;
/// Accepted Nick clock frequencies in Hz (10 to 100 fields per second).
pub const VIDEO_FREQUENCY_RANGE: RangeInclusive<u32> = 178_125..=1_781_250;
/// Accepted Dave clock frequencies in Hz.
pub const SOUND_FREQUENCY_RANGE: RangeInclusive<u32> = 250_000..=1_000_000;

/// Check `value` against `range`, naming the clock in the error.
pub(crate) fn check_frequency(
    name: &'static str,
    value: u32,
    range: RangeInclusive<u32>,
) -> Result<u32, Ep128Error> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(Ep128Error::FrequencyOutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub cpu_frequency: u32,
    pub video_frequency: u32,
    pub sound_frequency: u32,
    /// Emulate wait states and video memory contention
    pub memory_timing: bool,
    /// RAM size in KiB, rounded up to whole 16 KiB segments (64..=3712)
    pub ram_size_kb: u32,
    /// Sample rate of raw tape images
    pub tape_sample_rate: u32,
    /// Host audio output rate
    pub audio_sample_rate: u32,
    pub display: DisplayConfig,
    pub audio: AudioRingConfig,
}

impl MachineConfig {
    pub fn enterprise_128() -> Self {
        Self {
            cpu_frequency: 4_000_000,
            video_frequency: 889_846,
            sound_frequency: 500_000,
            memory_timing: true,
            ram_size_kb: 128,
            tape_sample_rate: 44_100,
            audio_sample_rate: 44_100,
            display: DisplayConfig::default(),
            audio: AudioRingConfig::default(),
        }
    }

    pub fn enterprise_64() -> Self {
        Self {
            ram_size_kb: 64,
            ..Self::enterprise_128()
        }
    }

    pub fn validate(&self) -> Result<(), Ep128Error> {
        check_frequency("CPU", self.cpu_frequency, CPU_FREQUENCY_RANGE)?;
        check_frequency("video", self.video_frequency, VIDEO_FREQUENCY_RANGE)?;
        check_frequency("sound", self.sound_frequency, SOUND_FREQUENCY_RANGE)?;
        if self.tape_sample_rate == 0 || self.tape_sample_rate > self.sound_frequency {
            return Err(Ep128Error::InvalidConfig(format!(
                "tape sample rate {} must be between 1 and the sound clock",
                self.tape_sample_rate
            )));
        }
        if self.audio_sample_rate == 0 {
            return Err(Ep128Error::InvalidConfig(
                "audio sample rate must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::enterprise_128()
    }
}
