//! Chunk handlers for snapshots and demo files.
//!
//! Loading happens in two steps. Every chunk is first decoded into a
//! [`Staging`] record without touching the machine; the record is then
//! validated into a [`LoadPlan`] that the system applies in one go. A file
//! that fails either step leaves the machine as it was.

use crate::bus::Ep128Bus;
use crate::clock::{Accumulators, ClockSettings};
use crate::config::{
    check_frequency, CPU_FREQUENCY_RANGE, SOUND_FREQUENCY_RANGE, VIDEO_FREQUENCY_RANGE,
};
use crate::dave::Dave;
use crate::memory::{Memory, RamImage};
use crate::nick::Nick;
use crate::Ep128Error;
use emu_core::cpu_z80::Z80Registers;
use emu_core::state::{
    parse_demo_stream, ChunkFile, ChunkRegistry, ChunkType, DemoEvent, StateBuffer, StateError,
    DEMO_STREAM_VERSION,
};

pub const VM_CONFIG_VERSION: u32 = 0x0100_0000;
pub const VM_STATE_VERSION: u32 = 0x0100_0001;
pub const Z80_STATE_VERSION: u32 = 0x0100_0000;
pub const MEMORY_STATE_VERSION: u32 = 0x0100_0000;
pub const IO_PORTS_STATE_VERSION: u32 = 0x0100_0000;
pub const DAVE_STATE_VERSION: u32 = 0x0100_0000;
pub const NICK_STATE_VERSION: u32 = 0x0100_0000;

/// Video memory latency word, kept in the file layout for compatibility.
const VIDEO_LATENCY_COMPAT: u32 = 62;

/// Chunks that together make up a snapshot.
const SNAPSHOT_CHUNKS: [ChunkType; 6] = [
    ChunkType::VmState,
    ChunkType::Z80State,
    ChunkType::MemoryState,
    ChunkType::IoPortsState,
    ChunkType::DaveState,
    ChunkType::NickState,
];

fn write_settings(buf: &mut StateBuffer, settings: &ClockSettings) {
    buf.write_u32(settings.cpu_frequency);
    buf.write_u32(settings.sound_frequency);
    buf.write_u32(settings.video_frequency);
    buf.write_u32(VIDEO_LATENCY_COMPAT);
    buf.write_bool(settings.memory_timing);
}

fn read_settings(buf: &mut StateBuffer) -> Result<ClockSettings, StateError> {
    let cpu_frequency = buf.read_u32()?;
    let sound_frequency = buf.read_u32()?;
    let video_frequency = buf.read_u32()?;
    let _latency = buf.read_u32()?;
    let memory_timing = buf.read_bool()?;
    Ok(ClockSettings {
        cpu_frequency,
        video_frequency,
        sound_frequency,
        memory_timing,
    })
}

/// Page registers, wait mode and clock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmState {
    pub pages: [u8; 4],
    pub wait_mode: u8,
    pub settings: ClockSettings,
    pub accumulators: Accumulators,
}

impl VmState {
    pub fn capture(bus: &Ep128Bus) -> Self {
        Self {
            pages: bus.memory.pages(),
            wait_mode: bus.wait_mode(),
            settings: bus.clock.settings(),
            accumulators: bus.clock.accumulators(),
        }
    }

    fn save(&self, buf: &mut StateBuffer) {
        buf.write_bytes(&self.pages);
        buf.write_u8(self.wait_mode & 3);
        write_settings(buf, &self.settings);
        self.accumulators.save(buf);
    }

    fn load(buf: &mut StateBuffer) -> Result<Self, StateError> {
        let mut pages = [0u8; 4];
        pages.copy_from_slice(buf.read_bytes(4)?);
        let wait_mode = buf.read_u8()? & 3;
        let settings = read_settings(buf)?;
        let accumulators = Accumulators::load(buf)?;
        Ok(Self {
            pages,
            wait_mode,
            settings,
            accumulators,
        })
    }
}

/// Decoded but not yet validated file contents.
#[derive(Debug, Default)]
pub struct Staging {
    config: Option<ClockSettings>,
    vm: Option<VmState>,
    cpu: Option<Z80Registers>,
    ram: Option<RamImage>,
    ports: Option<[u8; 256]>,
    dave: Option<Dave>,
    nick: Option<Nick>,
    demo: Option<Vec<DemoEvent>>,
}

fn read_vm_config(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.config = Some(read_settings(buf)?);
    Ok(())
}

fn read_vm_state(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.vm = Some(VmState::load(buf)?);
    Ok(())
}

fn read_z80_state(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.cpu = Some(Z80Registers::load(buf)?);
    Ok(())
}

fn read_memory_state(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.ram = Some(Memory::load(buf)?);
    Ok(())
}

fn read_io_ports_state(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.ports = Some(Ep128Bus::load_ports(buf)?);
    Ok(())
}

fn read_dave_state(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.dave = Some(Dave::load(buf)?);
    Ok(())
}

fn read_nick_state(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.nick = Some(Nick::load(buf)?);
    Ok(())
}

fn read_demo_stream(s: &mut Staging, buf: &mut StateBuffer) -> Result<(), StateError> {
    s.demo = Some(parse_demo_stream(buf)?);
    Ok(())
}

fn registry() -> ChunkRegistry<Staging> {
    ChunkRegistry::new()
        .with(ChunkType::VmConfig, VM_CONFIG_VERSION, read_vm_config)
        .with(ChunkType::VmState, VM_STATE_VERSION, read_vm_state)
        .with(ChunkType::Z80State, Z80_STATE_VERSION, read_z80_state)
        .with(ChunkType::MemoryState, MEMORY_STATE_VERSION, read_memory_state)
        .with(ChunkType::IoPortsState, IO_PORTS_STATE_VERSION, read_io_ports_state)
        .with(ChunkType::DaveState, DAVE_STATE_VERSION, read_dave_state)
        .with(ChunkType::NickState, NICK_STATE_VERSION, read_nick_state)
        .with(ChunkType::DemoStream, DEMO_STREAM_VERSION, read_demo_stream)
}

/// Full machine state restored by a snapshot.
#[derive(Debug)]
pub struct Snapshot {
    pub vm: VmState,
    pub cpu: Z80Registers,
    pub ram: RamImage,
    pub ports: [u8; 256],
    pub dave: Dave,
    pub nick: Nick,
}

/// Validated file contents, ready to apply.
#[derive(Debug)]
pub struct LoadPlan {
    pub config: Option<ClockSettings>,
    pub snapshot: Snapshot,
    pub demo: Option<Vec<DemoEvent>>,
}

impl Staging {
    pub fn decode(data: &[u8]) -> Result<Self, StateError> {
        let file = ChunkFile::from_bytes(data)?;
        let mut staging = Staging::default();
        registry().process_all_chunks(&file, &mut staging)?;
        Ok(staging)
    }

    pub fn has_demo(&self) -> bool {
        self.demo.is_some()
    }

    fn missing(&self) -> Option<ChunkType> {
        let present = [
            self.vm.is_some(),
            self.cpu.is_some(),
            self.ram.is_some(),
            self.ports.is_some(),
            self.dave.is_some(),
            self.nick.is_some(),
        ];
        SNAPSHOT_CHUNKS
            .iter()
            .zip(present)
            .find(|(_, present)| !present)
            .map(|(kind, _)| *kind)
    }

    /// Check the decoded chunks against the machine they will be applied to.
    pub fn validate(self, memory: &Memory) -> Result<LoadPlan, Ep128Error> {
        if let Some(kind) = self.missing() {
            return Err(StateError::MissingChunk(kind).into());
        }
        if let Some(settings) = &self.config {
            check_frequency("CPU", settings.cpu_frequency, CPU_FREQUENCY_RANGE)?;
            check_frequency("video", settings.video_frequency, VIDEO_FREQUENCY_RANGE)?;
            check_frequency("sound", settings.sound_frequency, SOUND_FREQUENCY_RANGE)?;
        }
        let (Some(vm), Some(cpu), Some(ram), Some(ports), Some(dave), Some(nick)) =
            (self.vm, self.cpu, self.ram, self.ports, self.dave, self.nick)
        else {
            return Err(StateError::MissingChunk(ChunkType::VmState).into());
        };
        memory.check_ram_image(&ram)?;
        if let Some(events) = &self.demo {
            if events.is_empty() {
                return Err(StateError::TruncatedDemo.into());
            }
        }
        Ok(LoadPlan {
            config: self.config,
            snapshot: Snapshot {
                vm,
                cpu,
                ram,
                ports,
                dave,
                nick,
            },
            demo: self.demo,
        })
    }
}

pub fn write_vm_config(file: &mut ChunkFile, settings: &ClockSettings) {
    let mut buf = StateBuffer::new();
    write_settings(&mut buf, settings);
    file.add_chunk(ChunkType::VmConfig, VM_CONFIG_VERSION, buf);
}

/// Append every snapshot chunk describing `bus` and `cpu` to `file`.
pub fn write_snapshot(file: &mut ChunkFile, bus: &Ep128Bus, cpu: &Z80Registers) {
    let mut buf = StateBuffer::new();
    bus.save_ports(&mut buf);
    file.add_chunk(ChunkType::IoPortsState, IO_PORTS_STATE_VERSION, buf);

    let mut buf = StateBuffer::new();
    bus.memory.save(&mut buf);
    file.add_chunk(ChunkType::MemoryState, MEMORY_STATE_VERSION, buf);

    let mut buf = StateBuffer::new();
    bus.nick.save(&mut buf);
    file.add_chunk(ChunkType::NickState, NICK_STATE_VERSION, buf);

    let mut buf = StateBuffer::new();
    bus.dave.save(&mut buf);
    file.add_chunk(ChunkType::DaveState, DAVE_STATE_VERSION, buf);

    let mut buf = StateBuffer::new();
    cpu.save(&mut buf);
    file.add_chunk(ChunkType::Z80State, Z80_STATE_VERSION, buf);

    let mut buf = StateBuffer::new();
    VmState::capture(bus).save(&mut buf);
    file.add_chunk(ChunkType::VmState, VM_STATE_VERSION, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockState;

    fn settings() -> ClockSettings {
        ClockSettings {
            cpu_frequency: 4_000_000,
            video_frequency: 889_846,
            sound_frequency: 500_000,
            memory_timing: true,
        }
    }

    fn bus() -> Ep128Bus {
        let mut memory = Memory::new();
        memory.configure_ram(64);
        Ep128Bus::new(memory, ClockState::new(settings(), 44_100).unwrap())
    }

    #[test]
    fn test_vm_state_roundtrip() {
        let mut bus = bus();
        bus.memory.set_page(2, 0xFD);
        bus.set_wait_mode(2);
        bus.clock.add_time(100);
        let state = VmState::capture(&bus);

        let mut buf = StateBuffer::new();
        state.save(&mut buf);
        let mut buf = StateBuffer::from_bytes(buf.into_inner());
        assert_eq!(VmState::load(&mut buf).unwrap(), state);
        buf.expect_end("vm state").unwrap();
    }

    #[test]
    fn test_snapshot_decodes_and_validates() {
        let bus = bus();
        let mut file = ChunkFile::new();
        write_vm_config(&mut file, &settings());
        write_snapshot(&mut file, &bus, &Z80Registers::default());

        let staging = Staging::decode(&file.to_bytes()).unwrap();
        assert!(!staging.has_demo());
        let plan = staging.validate(&Memory::new()).unwrap();
        assert_eq!(plan.config, Some(settings()));
        assert_eq!(plan.snapshot.vm.settings, settings());
    }

    #[test]
    fn test_incomplete_snapshot_is_rejected() {
        let mut file = ChunkFile::new();
        write_vm_config(&mut file, &settings());
        let staging = Staging::decode(&file.to_bytes()).unwrap();
        assert!(matches!(
            staging.validate(&Memory::new()),
            Err(Ep128Error::State(StateError::MissingChunk(ChunkType::VmState)))
        ));
    }

    #[test]
    fn test_config_out_of_range_is_rejected() {
        let bus = bus();
        let mut file = ChunkFile::new();
        let bad = ClockSettings {
            video_frequency: 10,
            ..settings()
        };
        write_vm_config(&mut file, &bad);
        write_snapshot(&mut file, &bus, &Z80Registers::default());
        let staging = Staging::decode(&file.to_bytes()).unwrap();
        assert!(matches!(
            staging.validate(&Memory::new()),
            Err(Ep128Error::FrequencyOutOfRange { name: "video", .. })
        ));
    }

    #[test]
    fn test_version_mismatch_is_a_decode_error() {
        let mut file = ChunkFile::new();
        let mut buf = StateBuffer::new();
        write_settings(&mut buf, &settings());
        file.add_chunk(ChunkType::VmConfig, 0x0200_0000, buf);
        assert!(matches!(
            Staging::decode(&file.to_bytes()),
            Err(StateError::VersionMismatch {
                chunk: ChunkType::VmConfig,
                ..
            })
        ));
    }
}
