use crate::bus::Ep128Bus;
use crate::clock::{ClockSettings, ClockState};
use crate::config::MachineConfig;
use crate::memory::Memory;
use crate::snapshot::{self, LoadPlan, Staging};
use crate::tape::Tape;
use crate::Ep128Error;
use emu_core::audio::SampleRateConverter;
use emu_core::cpu_z80::{CpuZ80, Z80Registers};
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::state::{
    ChunkFile, ChunkType, DemoEvent, DemoEventKind, DemoWriter, StateError, DEMO_STREAM_VERSION,
};
use emu_core::{AudioSink, MountPointInfo, System, VideoSink};
use serde_json::{json, Value};
use std::collections::VecDeque;

/// First segment of each ROM mount point.
const ROM_SLOTS: [(&str, u8); 4] = [("rom0", 0x00), ("rom1", 0x04), ("rom2", 0x10), ("rom3", 0x20)];

struct NullVideo;

impl VideoSink for NullVideo {
    fn draw_line(&mut self, _bytes: &[u8]) {}

    fn vsync_state_change(&mut self, _new_state: bool, _current_slot: u32) {}
}

struct NullAudio;

impl AudioSink for NullAudio {
    fn send_audio_data(&mut self, _samples: &[i16]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoStatus {
    Idle,
    Recording,
    /// Recording stopped by tape activity or a configuration change; the
    /// events so far are kept until [`Ep128System::stop_demo`].
    RecordingAborted,
    Playing,
}

enum DemoState {
    Idle,
    Recording {
        file: ChunkFile,
        writer: DemoWriter,
        /// Nick cycles since the last recorded event
        time_cnt: u64,
        active: bool,
    },
    Playing {
        events: VecDeque<DemoEvent>,
        /// Nick cycles until the event at the front is due
        time_cnt: u64,
    },
}

pub struct Ep128System {
    config: MachineConfig,
    cpu: CpuZ80<Ep128Bus>,
    video: Box<dyn VideoSink + Send>,
    audio: Box<dyn AudioSink + Send>,
    converter: SampleRateConverter,
    audio_batch: Vec<i16>,
    tape: Option<Tape>,
    demo: DemoState,
    /// A recording finalized implicitly, waiting to be collected
    finished_demo: Option<Vec<u8>>,
    snapshot_load_flag: bool,
    /// Segment count of the image mounted in each ROM slot
    roms: [Option<usize>; 4],
}

impl Ep128System {
    pub fn new(config: MachineConfig) -> Result<Self, Ep128Error> {
        config.validate()?;
        let clock = ClockState::new(
            ClockSettings {
                cpu_frequency: config.cpu_frequency,
                video_frequency: config.video_frequency,
                sound_frequency: config.sound_frequency,
                memory_timing: config.memory_timing,
            },
            config.tape_sample_rate,
        )?;
        let mut memory = Memory::new();
        memory.configure_ram(config.ram_size_kb);

        let mut system = Self {
            converter: SampleRateConverter::new(config.sound_frequency, config.audio_sample_rate),
            config,
            cpu: CpuZ80::new(Ep128Bus::new(memory, clock)),
            video: Box::new(NullVideo),
            audio: Box::new(NullAudio),
            audio_batch: Vec::new(),
            tape: None,
            demo: DemoState::Idle,
            finished_demo: None,
            snapshot_load_flag: false,
            roms: [None; 4],
        };
        system.reset(true);
        Ok(system)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn set_video_sink(&mut self, sink: Box<dyn VideoSink + Send>) {
        self.video = sink;
    }

    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink + Send>) {
        self.audio = sink;
    }

    pub fn registers(&self) -> &Z80Registers {
        &self.cpu.regs
    }

    /// Nick cycles run since the system was created.
    pub fn nick_cycle_count(&self) -> u64 {
        self.cpu.bus.clock.nick_cycle_count()
    }

    pub fn clock_settings(&self) -> ClockSettings {
        self.cpu.bus.clock.settings()
    }

    pub fn set_cpu_frequency(&mut self, hz: u32) -> Result<(), Ep128Error> {
        if self.cpu.bus.clock.set_cpu_frequency(hz)? {
            self.timing_changed();
        }
        Ok(())
    }

    pub fn set_video_frequency(&mut self, hz: u32) -> Result<(), Ep128Error> {
        if self.cpu.bus.clock.set_video_frequency(hz)? {
            self.timing_changed();
        }
        Ok(())
    }

    pub fn set_sound_frequency(&mut self, hz: u32) -> Result<(), Ep128Error> {
        if self.cpu.bus.clock.set_sound_frequency(hz)? {
            self.timing_changed();
        }
        Ok(())
    }

    pub fn set_memory_timing(&mut self, enabled: bool) {
        if self.cpu.bus.clock.set_memory_timing(enabled) {
            self.timing_changed();
        }
    }

    /// Clock settings changed and the accumulators were zeroed; demos
    /// cannot survive that.
    fn timing_changed(&mut self) {
        self.stop_demo_playback();
        self.abort_recording("clock settings changed");
        let settings = self.cpu.bus.clock.settings();
        self.config.cpu_frequency = settings.cpu_frequency;
        self.config.video_frequency = settings.video_frequency;
        self.config.memory_timing = settings.memory_timing;
        if self.config.sound_frequency != settings.sound_frequency {
            self.config.sound_frequency = settings.sound_frequency;
            self.converter =
                SampleRateConverter::new(settings.sound_frequency, self.config.audio_sample_rate);
        }
        log(LogCategory::Timing, LogLevel::Info, || {
            format!(
                "Timing: cpu {} Hz, nick {} Hz, dave {} Hz, memory timing {}",
                settings.cpu_frequency,
                settings.video_frequency,
                settings.sound_frequency,
                settings.memory_timing
            )
        });
    }

    /// Press the play button. A demo cannot run alongside a moving tape, so
    /// one in progress is stopped when the motor is already on.
    pub fn tape_play(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.play();
        }
        if self.tape_moving() {
            self.stop_all_demos();
        }
    }

    pub fn tape_stop(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.stop();
        }
    }

    pub fn tape_rewind(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.rewind();
        }
    }

    /// Tape is attached, its button is pressed and the motor is on.
    fn tape_moving(&self) -> bool {
        self.cpu.bus.dave.remote_on() && self.tape.as_ref().is_some_and(Tape::is_playing)
    }

    pub fn demo_status(&self) -> DemoStatus {
        match &self.demo {
            DemoState::Idle => DemoStatus::Idle,
            DemoState::Recording { active: true, .. } => DemoStatus::Recording,
            DemoState::Recording { active: false, .. } => DemoStatus::RecordingAborted,
            DemoState::Playing { .. } => DemoStatus::Playing,
        }
    }

    pub fn is_recording_demo(&self) -> bool {
        self.demo_status() == DemoStatus::Recording
    }

    pub fn is_playing_demo(&self) -> bool {
        self.demo_status() == DemoStatus::Playing
    }

    fn set_demo(&mut self, demo: DemoState) {
        let active = matches!(
            demo,
            DemoState::Recording { active: true, .. } | DemoState::Playing { .. }
        );
        self.demo = demo;
        self.cpu.bus.set_demo_active(active);
    }

    fn stop_demo_playback(&mut self) {
        if matches!(self.demo, DemoState::Playing { .. }) {
            self.set_demo(DemoState::Idle);
            self.cpu.bus.dave.clear_keyboard();
            log(LogCategory::Demo, LogLevel::Info, || "Demo: playback stopped".to_string());
        }
    }

    /// Stop appending events but keep what was recorded.
    fn abort_recording(&mut self, reason: &str) {
        if let DemoState::Recording { active, .. } = &mut self.demo {
            if *active {
                *active = false;
                self.cpu.bus.set_demo_active(false);
                log(LogCategory::Demo, LogLevel::Warn, || {
                    format!("Demo: recording aborted, {}", reason)
                });
            }
        }
    }

    /// Close the current recording, if any, with an End event.
    fn finish_recording(&mut self) -> Option<Vec<u8>> {
        if !matches!(self.demo, DemoState::Recording { .. }) {
            return None;
        }
        match std::mem::replace(&mut self.demo, DemoState::Idle) {
            DemoState::Recording {
                mut file,
                writer,
                time_cnt,
                ..
            } => {
                self.cpu.bus.set_demo_active(false);
                file.add_chunk(ChunkType::DemoStream, DEMO_STREAM_VERSION, writer.finish(time_cnt));
                log(LogCategory::Demo, LogLevel::Info, || "Demo: recording finished".to_string());
                Some(file.to_bytes())
            }
            other => {
                self.demo = other;
                None
            }
        }
    }

    /// Stop playback and finalize any recording into the pending slot.
    fn stop_all_demos(&mut self) {
        self.stop_demo_playback();
        if let Some(bytes) = self.finish_recording() {
            self.finished_demo = Some(bytes);
        }
    }

    /// Start recording a demo from the current state.
    ///
    /// The recording starts from a clean baseline: remote outputs off, tape
    /// input silent, keyboard released and floppy controller reset.
    pub fn record_demo(&mut self) {
        self.stop_all_demos();
        let bus = &mut self.cpu.bus;
        bus.dave.remote_off();
        bus.dave.set_tape_input(0);
        bus.dave.clear_keyboard();
        bus.floppy.reset();

        let mut file = ChunkFile::new();
        snapshot::write_vm_config(&mut file, &bus.clock.settings());
        snapshot::write_snapshot(&mut file, bus, &self.cpu.regs);
        self.set_demo(DemoState::Recording {
            file,
            writer: DemoWriter::new(),
            time_cnt: 0,
            active: true,
        });
        log(LogCategory::Demo, LogLevel::Info, || "Demo: recording started".to_string());
    }

    /// Stop recording or playback. Returns the finished demo file when a
    /// recording (possibly aborted earlier) was in progress.
    pub fn stop_demo(&mut self) -> Option<Vec<u8>> {
        self.stop_demo_playback();
        self.finish_recording().or_else(|| self.finished_demo.take())
    }

    /// Restore the snapshot in a demo file and replay its events.
    pub fn load_demo(&mut self, data: &[u8]) -> Result<(), Ep128Error> {
        let staging = Staging::decode(data)?;
        if !staging.has_demo() {
            return Err(StateError::MissingChunk(ChunkType::DemoStream).into());
        }
        let plan = staging.validate(&self.cpu.bus.memory)?;
        self.apply(plan);
        Ok(())
    }

    fn apply(&mut self, plan: LoadPlan) {
        self.stop_all_demos();
        self.tape_stop();

        if let Some(settings) = plan.config {
            match self.cpu.bus.clock.apply_settings(settings) {
                Ok(true) => self.timing_changed(),
                Ok(false) => {}
                Err(e) => log(LogCategory::State, LogLevel::Error, || format!("State: {}", e)),
            }
        }

        let s = plan.snapshot;
        let bus = &mut self.cpu.bus;
        self.cpu.regs = s.cpu;
        bus.memory.restore_ram(s.ram);
        for (page, segment) in s.vm.pages.iter().enumerate() {
            bus.memory.set_page(page, *segment);
        }
        bus.set_wait_mode(s.vm.wait_mode);
        bus.restore_port_latch(s.ports);
        bus.dave = s.dave;
        bus.nick = s.nick;
        if s.vm.settings != bus.clock.settings() {
            log(LogCategory::State, LogLevel::Warn, || {
                "State: clock settings differ from the snapshot, cycle counters reset".to_string()
            });
        }
        bus.clock.restore_accumulators(s.vm.accumulators, s.vm.settings);
        bus.floppy.reset();
        self.snapshot_load_flag = true;

        if let Some(events) = plan.demo {
            self.cpu.bus.dave.remote_off();
            self.cpu.bus.dave.set_tape_input(0);
            self.cpu.bus.dave.clear_keyboard();
            let events: VecDeque<DemoEvent> = events.into();
            let time_cnt = events.front().map_or(0, |e| e.delta);
            self.set_demo(DemoState::Playing { events, time_cnt });
            log(LogCategory::Demo, LogLevel::Info, || "Demo: playback started".to_string());
        }
    }

    /// Apply every demo event that is due this nick cycle.
    fn step_demo_playback(&mut self) {
        let tape_moving = self.tape_moving();
        let DemoState::Playing { events, time_cnt } = &mut self.demo else {
            return;
        };
        let mut finished = false;
        while *time_cnt == 0 {
            if tape_moving {
                finished = true;
                break;
            }
            match events.pop_front().map(|e| e.kind) {
                Some(DemoEventKind::KeyDown(code)) => self.cpu.bus.dave.set_key(code, true),
                Some(DemoEventKind::KeyUp(code)) => self.cpu.bus.dave.set_key(code, false),
                Some(DemoEventKind::End) | None => {
                    finished = true;
                    break;
                }
            }
            match events.front() {
                Some(next) => *time_cnt = next.delta,
                None => {
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            self.stop_demo_playback();
        } else {
            *time_cnt -= 1;
        }
    }

    fn run_dave(&mut self) {
        let bus = &mut self.cpu.bus;
        bus.clock.add_dave_budget();
        while bus.clock.take_dave_cycle() {
            let (left, right) = bus.dave.run_one_cycle();
            if let Some(frame) = self.converter.push(left, right) {
                self.audio_batch.extend_from_slice(&frame);
            }
            if let Some(tape) = self.tape.as_mut() {
                if bus.clock.take_tape_sample() {
                    let level = tape.run(bus.dave.remote_on());
                    bus.dave.set_tape_input(level);
                }
            }
        }
    }

    fn run_cpu(&mut self) {
        self.cpu.bus.clock.add_cpu_budget();
        while self.cpu.bus.clock.cpu_has_budget() {
            if self.cpu.bus.dave.irq() && self.cpu.interrupt() {
                continue;
            }
            self.cpu.execute_instruction();
        }
    }

    fn flush_audio(&mut self) {
        if !self.audio_batch.is_empty() {
            self.audio.send_audio_data(&self.audio_batch);
            self.audio_batch.clear();
        }
    }

    fn rom_slot(mount_point_id: &str) -> Option<usize> {
        ROM_SLOTS.iter().position(|(id, _)| *id == mount_point_id)
    }

    fn mount_rom(&mut self, slot: usize, data: &[u8]) -> Result<(), Ep128Error> {
        let first = ROM_SLOTS[slot].1 as usize;
        let count = data.len().div_ceil(crate::memory::SEGMENT_SIZE);
        let clash = self.roms.iter().enumerate().find(|(other, mounted)| {
            *other != slot
                && mounted.is_some_and(|n| {
                    let start = ROM_SLOTS[*other].1 as usize;
                    first < start + n && start < first + count
                })
        });
        if let Some((other, _)) = clash {
            return Err(Ep128Error::InvalidRom(format!(
                "overlaps the image in {}",
                ROM_SLOTS[other].0
            )));
        }
        if let Some(n) = self.roms[slot].take() {
            self.cpu.bus.memory.unload_rom(ROM_SLOTS[slot].1, n);
        }
        let count = self.cpu.bus.memory.load_rom(ROM_SLOTS[slot].1, data)?;
        self.roms[slot] = Some(count);
        Ok(())
    }
}

impl System for Ep128System {
    type Error = Ep128Error;

    fn reset(&mut self, cold: bool) {
        self.stop_demo_playback();
        self.abort_recording("machine reset");
        self.cpu.reset();
        self.cpu.bus.reset();
        if cold {
            self.cpu.bus.memory.clear_ram();
            self.cpu.bus.dave.clear_keyboard();
        }
        self.converter.reset();
    }

    fn run(&mut self, microseconds: u64) {
        if self.snapshot_load_flag {
            self.snapshot_load_flag = false;
            if !self.is_playing_demo() {
                self.cpu.bus.dave.clear_keyboard();
            }
        }
        self.cpu.bus.clock.add_time(microseconds);
        while self.cpu.bus.clock.nick_cycle_due() {
            if self.is_recording_demo() && self.tape_moving() {
                self.abort_recording("tape is running");
            }
            self.step_demo_playback();
            self.run_dave();
            self.run_cpu();

            let bus = &mut self.cpu.bus;
            bus.nick.run_one_slot(&bus.memory, self.video.as_mut());
            bus.dave.set_video_interrupt(bus.nick.interrupt_line());
            bus.clock.finish_nick_cycle();

            if let DemoState::Recording {
                time_cnt,
                active: true,
                ..
            } = &mut self.demo
            {
                *time_cnt += 1;
            }
        }
        self.flush_audio();
    }

    fn set_keyboard_state(&mut self, key_code: u8, pressed: bool) {
        if !self.is_playing_demo() {
            self.cpu.bus.dave.set_key(key_code, pressed);
        }
        if !self.is_recording_demo() {
            return;
        }
        if self.tape_moving() {
            self.abort_recording("tape is running");
            return;
        }
        if let DemoState::Recording {
            writer, time_cnt, ..
        } = &mut self.demo
        {
            let code = key_code & 0x7F;
            writer.push(DemoEvent {
                delta: *time_cnt,
                kind: if pressed {
                    DemoEventKind::KeyDown(code)
                } else {
                    DemoEventKind::KeyUp(code)
                },
            });
            *time_cnt = 0;
        }
    }

    fn save_state(&self) -> Result<Vec<u8>, Self::Error> {
        let mut file = ChunkFile::new();
        snapshot::write_snapshot(&mut file, &self.cpu.bus, &self.cpu.regs);
        Ok(file.to_bytes())
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let plan = Staging::decode(data)?.validate(&self.cpu.bus.memory)?;
        self.apply(plan);
        log(LogCategory::State, LogLevel::Info, || {
            format!("State: loaded snapshot of {} bytes", data.len())
        });
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn debug_state(&self) -> Value {
        let bus = &self.cpu.bus;
        let demo = match self.demo_status() {
            DemoStatus::Idle => "idle",
            DemoStatus::Recording => "recording",
            DemoStatus::RecordingAborted => "recording_aborted",
            DemoStatus::Playing => "playing",
        };
        json!({
            "cpu": self.cpu.regs,
            "pages": bus.memory.pages(),
            "wait_mode": bus.wait_mode(),
            "clock": bus.clock.settings(),
            "cpu_cycles_per_nick_cycle": bus.clock.cpu_per_nick().to_bits(),
            "dave_cycles_per_nick_cycle": bus.clock.dave_per_nick().to_bits(),
            "tape_samples_per_dave_cycle": bus.clock.tape_per_dave().to_bits(),
            "nick_cycle_count": bus.clock.nick_cycle_count(),
            "ram_segments": bus.memory.ram_segment_count(),
            "dave": bus.dave,
            "keys_down": (0..128u8).filter(|&c| bus.dave.is_key_pressed(c)).collect::<Vec<_>>(),
            "nick": bus.nick,
            "floppy": bus.floppy,
            "demo": demo,
            "tape": self.tape.as_ref().map(|t| json!({
                "position": t.position(),
                "length": t.len(),
                "playing": t.is_playing(),
            })),
        })
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        let mut points: Vec<MountPointInfo> = ROM_SLOTS
            .iter()
            .map(|(id, segment)| MountPointInfo {
                id: id.to_string(),
                name: format!("ROM at segment 0x{:02X}", segment),
                extensions: vec!["rom".to_string(), "bin".to_string()],
                required: *segment == 0,
            })
            .collect();
        points.push(MountPointInfo {
            id: "tape".to_string(),
            name: "Tape".to_string(),
            extensions: vec!["raw".to_string(), "pcm".to_string()],
            required: false,
        });
        points
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        if let Some(slot) = Self::rom_slot(mount_point_id) {
            self.mount_rom(slot, data)
        } else if mount_point_id == "tape" {
            self.tape = Some(Tape::from_bytes(data)?);
            Ok(())
        } else {
            Err(Ep128Error::InvalidMountPoint)
        }
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        if let Some(slot) = Self::rom_slot(mount_point_id) {
            if let Some(n) = self.roms[slot].take() {
                self.cpu.bus.memory.unload_rom(ROM_SLOTS[slot].1, n);
            }
            Ok(())
        } else if mount_point_id == "tape" {
            self.tape = None;
            self.cpu.bus.dave.set_tape_input(0);
            Ok(())
        } else {
            Err(Ep128Error::InvalidMountPoint)
        }
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        match Self::rom_slot(mount_point_id) {
            Some(slot) => self.roms[slot].is_some(),
            None => mount_point_id == "tape" && self.tape.is_some(),
        }
    }
}
