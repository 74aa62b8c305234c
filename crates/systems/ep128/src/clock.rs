//! Clock-domain bookkeeping shared by the CPU, Dave and Nick.
//!
//! Every domain keeps a signed fixed-point "debt" counter. The per nick cycle
//! budget is added to it and real work (instructions, Dave cycles, tape
//! samples) subtracts whole units. Ratios between the domains are derived
//! from the frequencies and must be recomputed, with the counters zeroed,
//! whenever a frequency or the memory timing flag changes.

use crate::config::{
    check_frequency, CPU_FREQUENCY_RANGE, SOUND_FREQUENCY_RANGE, VIDEO_FREQUENCY_RANGE,
};
use crate::Ep128Error;
use emu_core::fixed::Fixed32;
use emu_core::state::{StateBuffer, StateError};
use serde::Serialize;

/// Fixed video memory latency of 0.5625 CPU cycles plus one cycle of rounding.
const VIDEO_WAIT_LATENCY: Fixed32 = Fixed32::from_bits(0x1_9000_0000);

/// Saved counters of all clock domains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accumulators {
    pub cpu_remaining: Fixed32,
    pub cpu_sync_to_nick: Fixed32,
    pub dave_remaining: Fixed32,
    pub nick_remaining: Fixed32,
    pub tape_remaining: Fixed32,
}

impl Accumulators {
    pub fn save(&self, buf: &mut StateBuffer) {
        for v in [
            self.cpu_remaining,
            self.cpu_sync_to_nick,
            self.dave_remaining,
            self.nick_remaining,
            self.tape_remaining,
        ] {
            buf.write_fixed(v);
        }
    }

    pub fn load(buf: &mut StateBuffer) -> Result<Self, StateError> {
        Ok(Self {
            cpu_remaining: buf.read_fixed()?,
            cpu_sync_to_nick: buf.read_fixed()?,
            dave_remaining: buf.read_fixed()?,
            nick_remaining: buf.read_fixed()?,
            tape_remaining: buf.read_fixed()?,
        })
    }
}

/// Frequencies and timing flag that determine the domain ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockSettings {
    pub cpu_frequency: u32,
    pub video_frequency: u32,
    pub sound_frequency: u32,
    pub memory_timing: bool,
}

#[derive(Debug, Clone)]
pub struct ClockState {
    settings: ClockSettings,
    tape_sample_rate: u32,
    cpu_per_nick: Fixed32,
    dave_per_nick: Fixed32,
    tape_per_dave: Fixed32,
    acc: Accumulators,
    nick_cycle_count: u64,
}

impl ClockState {
    pub fn new(settings: ClockSettings, tape_sample_rate: u32) -> Result<Self, Ep128Error> {
        check_frequency("CPU", settings.cpu_frequency, CPU_FREQUENCY_RANGE)?;
        check_frequency("video", settings.video_frequency, VIDEO_FREQUENCY_RANGE)?;
        check_frequency("sound", settings.sound_frequency, SOUND_FREQUENCY_RANGE)?;
        let mut clock = Self {
            settings,
            tape_sample_rate: tape_sample_rate.max(1),
            cpu_per_nick: Fixed32::ZERO,
            dave_per_nick: Fixed32::ZERO,
            tape_per_dave: Fixed32::ZERO,
            acc: Accumulators::default(),
            nick_cycle_count: 0,
        };
        clock.update_timing_parameters();
        Ok(clock)
    }

    pub fn settings(&self) -> ClockSettings {
        self.settings
    }

    pub fn memory_timing(&self) -> bool {
        self.settings.memory_timing
    }

    pub fn accumulators(&self) -> Accumulators {
        self.acc
    }

    /// Install saved counters. They are only meaningful if the settings
    /// they were saved with match the current ones; otherwise the counters
    /// are zeroed.
    pub fn restore_accumulators(&mut self, acc: Accumulators, saved_with: ClockSettings) {
        if saved_with == self.settings {
            self.acc = acc;
        } else {
            self.acc = Accumulators::default();
        }
    }

    /// Nick cycles run since construction.
    pub fn nick_cycle_count(&self) -> u64 {
        self.nick_cycle_count
    }

    pub fn cpu_per_nick(&self) -> Fixed32 {
        self.cpu_per_nick
    }

    pub fn dave_per_nick(&self) -> Fixed32 {
        self.dave_per_nick
    }

    pub fn tape_per_dave(&self) -> Fixed32 {
        self.tape_per_dave
    }

    /// The setters return whether anything changed. Re-applying the current
    /// value leaves the counters alone.
    pub fn set_cpu_frequency(&mut self, hz: u32) -> Result<bool, Ep128Error> {
        let cpu_frequency = check_frequency("CPU", hz, CPU_FREQUENCY_RANGE)?;
        Ok(self.install(ClockSettings {
            cpu_frequency,
            ..self.settings
        }))
    }

    pub fn set_video_frequency(&mut self, hz: u32) -> Result<bool, Ep128Error> {
        let video_frequency = check_frequency("video", hz, VIDEO_FREQUENCY_RANGE)?;
        Ok(self.install(ClockSettings {
            video_frequency,
            ..self.settings
        }))
    }

    pub fn set_sound_frequency(&mut self, hz: u32) -> Result<bool, Ep128Error> {
        let sound_frequency = check_frequency("sound", hz, SOUND_FREQUENCY_RANGE)?;
        Ok(self.install(ClockSettings {
            sound_frequency,
            ..self.settings
        }))
    }

    /// Install all settings at once. Nothing changes if any frequency is
    /// out of range.
    pub fn apply_settings(&mut self, settings: ClockSettings) -> Result<bool, Ep128Error> {
        check_frequency("CPU", settings.cpu_frequency, CPU_FREQUENCY_RANGE)?;
        check_frequency("video", settings.video_frequency, VIDEO_FREQUENCY_RANGE)?;
        check_frequency("sound", settings.sound_frequency, SOUND_FREQUENCY_RANGE)?;
        Ok(self.install(settings))
    }

    pub fn set_memory_timing(&mut self, enabled: bool) -> bool {
        self.install(ClockSettings {
            memory_timing: enabled,
            ..self.settings
        })
    }

    fn install(&mut self, settings: ClockSettings) -> bool {
        if settings == self.settings {
            return false;
        }
        self.settings = settings;
        self.update_timing_parameters();
        true
    }

    /// Recompute the domain ratios and zero every counter.
    fn update_timing_parameters(&mut self) {
        let s = &self.settings;
        let nick = s.video_frequency as u64;
        self.cpu_per_nick = Fixed32::ratio(s.cpu_frequency as u64, nick);
        self.dave_per_nick = Fixed32::ratio(s.sound_frequency as u64, nick);
        self.tape_per_dave = Fixed32::ratio(self.tape_sample_rate as u64, s.sound_frequency as u64);
        self.acc = Accumulators::default();
    }

    /// Extend the nick cycle budget by `microseconds` of emulated time.
    pub fn add_time(&mut self, microseconds: u64) {
        let numerator = microseconds.saturating_mul(self.settings.video_frequency as u64);
        self.acc.nick_remaining += Fixed32::ratio(numerator, 1_000_000);
    }

    pub fn nick_cycle_due(&self) -> bool {
        self.acc.nick_remaining.is_positive()
    }

    pub fn finish_nick_cycle(&mut self) {
        self.acc.nick_remaining -= Fixed32::ONE;
        self.nick_cycle_count = self.nick_cycle_count.wrapping_add(1);
    }

    pub fn add_dave_budget(&mut self) {
        self.acc.dave_remaining += self.dave_per_nick;
    }

    /// Consume one Dave cycle if the budget allows it.
    pub fn take_dave_cycle(&mut self) -> bool {
        if self.acc.dave_remaining.is_positive() {
            self.acc.dave_remaining -= Fixed32::ONE;
            true
        } else {
            false
        }
    }

    /// Advance tape time by one Dave cycle. Returns true when a tape sample
    /// is due. The tape rate never exceeds the Dave rate, so at most one
    /// sample is due per call.
    pub fn take_tape_sample(&mut self) -> bool {
        self.acc.tape_remaining += self.tape_per_dave;
        if self.acc.tape_remaining.is_positive() {
            self.acc.tape_remaining -= Fixed32::ONE;
            true
        } else {
            false
        }
    }

    pub fn add_cpu_budget(&mut self) {
        self.acc.cpu_remaining += self.cpu_per_nick;
        self.acc.cpu_sync_to_nick += self.cpu_per_nick;
    }

    pub fn cpu_has_budget(&self) -> bool {
        self.acc.cpu_remaining.is_positive()
    }

    /// Charge `cycles` CPU cycles and keep the nick slot counter behind the
    /// CPU position.
    pub fn update_cpu_cycles(&mut self, cycles: i32) {
        self.acc.cpu_remaining -= Fixed32::from_int(cycles as i64);
        if self.settings.memory_timing {
            while self.acc.cpu_sync_to_nick >= self.acc.cpu_remaining {
                self.acc.cpu_sync_to_nick -= self.cpu_per_nick;
            }
        }
    }

    /// Stall the CPU until the next video memory slot.
    pub fn video_memory_wait(&mut self) {
        let gap = (self.acc.cpu_remaining - self.acc.cpu_sync_to_nick) + VIDEO_WAIT_LATENCY;
        self.acc.cpu_remaining -= gap.floor();
        self.acc.cpu_sync_to_nick -= self.cpu_per_nick;
    }
}
