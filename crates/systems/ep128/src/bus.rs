//! Memory and I/O bus for the Enterprise.
//!
//! Every CPU access is charged to the clock here: 3 cycles per memory
//! access and 4 per opcode fetch, one extra wait state on non-video pages
//! depending on the wait mode, and a stall to the next Nick slot for video
//! RAM and Nick ports.

use crate::clock::ClockState;
use crate::dave::Dave;
use crate::floppy::{Floppy, CONTROL_OFFSET};
use crate::memory::{Memory, VIDEO_SEGMENT};
use crate::nick::Nick;
use emu_core::cpu_z80::Z80Bus;
use emu_core::state::{StateBuffer, StateError};

/// Cycles of one I/O bus cycle.
const IO_CYCLES: i32 = 4;

pub struct Ep128Bus {
    pub memory: Memory,
    pub clock: ClockState,
    pub dave: Dave,
    pub nick: Nick,
    pub floppy: Floppy,
    /// Last value written to each port
    port_latch: [u8; 256],
    /// From port 0xBF bits 2-3: 0 waits on every access, 1 on opcode
    /// fetches only, 2 and 3 never
    wait_mode: u8,
    /// EXDOS ports are inert while a demo is recorded or played
    demo_active: bool,
}

impl Ep128Bus {
    pub fn new(memory: Memory, clock: ClockState) -> Self {
        Self {
            memory,
            clock,
            dave: Dave::new(),
            nick: Nick::new(),
            floppy: Floppy::new(),
            port_latch: [0; 256],
            wait_mode: 0,
            demo_active: false,
        }
    }

    pub fn wait_mode(&self) -> u8 {
        self.wait_mode
    }

    pub fn set_wait_mode(&mut self, mode: u8) {
        self.wait_mode = mode & 3;
    }

    pub fn set_demo_active(&mut self, active: bool) {
        self.demo_active = active;
    }

    pub fn port_latch(&self) -> &[u8; 256] {
        &self.port_latch
    }

    pub fn restore_port_latch(&mut self, latch: [u8; 256]) {
        self.port_latch = latch;
    }

    pub fn reset(&mut self) {
        for page in 0..4 {
            self.memory.set_page(page, 0);
        }
        self.wait_mode = 0;
        self.port_latch = [0; 256];
        self.dave.reset();
        self.nick.reset();
        self.floppy.reset();
    }

    fn charge_access(&mut self, addr: u16, cycles: i32, wait: bool) {
        let mut cycles = cycles;
        if self.clock.memory_timing() {
            if self.memory.segment_at(addr) < VIDEO_SEGMENT {
                if wait {
                    cycles += 1;
                }
            } else {
                self.clock.video_memory_wait();
            }
        }
        self.clock.update_cpu_cycles(cycles);
    }

    fn exdos_offset(port: u8) -> Option<u8> {
        match port {
            0x10..=0x17 => Some(port & 3),
            0x18 | 0x1C => Some(CONTROL_OFFSET),
            _ => None,
        }
    }

    pub fn save_ports(&self, buf: &mut StateBuffer) {
        buf.write_bytes(&self.port_latch);
    }

    pub fn load_ports(buf: &mut StateBuffer) -> Result<[u8; 256], StateError> {
        let mut latch = [0u8; 256];
        latch.copy_from_slice(buf.read_bytes(256)?);
        Ok(latch)
    }
}

impl Z80Bus for Ep128Bus {
    fn read_memory(&mut self, addr: u16) -> u8 {
        self.charge_access(addr, 3, self.wait_mode == 0);
        self.memory.read(addr)
    }

    fn write_memory(&mut self, addr: u16, value: u8) {
        self.charge_access(addr, 3, self.wait_mode == 0);
        self.memory.write(addr, value);
    }

    fn read_opcode_first_byte(&mut self, addr: u16) -> u8 {
        self.charge_access(addr, 4, self.wait_mode < 2);
        self.memory.read(addr)
    }

    fn do_in(&mut self, port: u16) -> u8 {
        self.clock.update_cpu_cycles(IO_CYCLES);
        let port = port as u8;
        if let Some(offset) = Self::exdos_offset(port) {
            return if self.demo_active {
                0x00
            } else {
                self.floppy.read(offset)
            };
        }
        match port {
            0x80..=0x8F => {
                if self.clock.memory_timing() {
                    self.clock.video_memory_wait();
                }
                self.nick.read_port(port)
            }
            0xB0..=0xB3 => self.memory.page((port & 3) as usize),
            0xA0..=0xBF => self.dave.read_port(port),
            _ => 0xFF,
        }
    }

    fn do_out(&mut self, port: u16, value: u8) {
        self.clock.update_cpu_cycles(IO_CYCLES);
        let port = port as u8;
        self.port_latch[port as usize] = value;
        if let Some(offset) = Self::exdos_offset(port) {
            if !self.demo_active {
                self.floppy.write(offset, value);
            }
            return;
        }
        match port {
            0x80..=0x8F => {
                if self.clock.memory_timing() {
                    self.clock.video_memory_wait();
                }
                self.nick.write_port(port, value);
            }
            0xB0..=0xB3 => self.memory.set_page((port & 3) as usize, value),
            0xBF => {
                self.wait_mode = (value >> 2) & 3;
                self.dave.write_port(port, value);
            }
            0xA0..=0xBF => self.dave.write_port(port, value),
            _ => {}
        }
    }

    fn update_cycles(&mut self, cycles: i32) {
        self.clock.update_cpu_cycles(cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSettings;
    use emu_core::fixed::Fixed32;

    fn bus(memory_timing: bool) -> Ep128Bus {
        let clock = ClockState::new(
            ClockSettings {
                cpu_frequency: 4_000_000,
                video_frequency: 889_846,
                sound_frequency: 500_000,
                memory_timing,
            },
            44_100,
        )
        .unwrap();
        let mut memory = Memory::new();
        memory.configure_ram(128);
        let mut bus = Ep128Bus::new(memory, clock);
        bus.do_out(0xB0, 0xF8);
        bus.do_out(0xB1, 0xFC);
        bus
    }

    fn cycles_of(bus: &mut Ep128Bus, f: impl FnOnce(&mut Ep128Bus)) -> Fixed32 {
        let before = bus.clock.accumulators().cpu_remaining;
        f(bus);
        before - bus.clock.accumulators().cpu_remaining
    }

    #[test]
    fn test_wait_modes() {
        let mut bus = bus(true);
        bus.do_out(0xBF, 0x00);
        assert_eq!(cycles_of(&mut bus, |b| {
            b.read_memory(0x0000);
        }), Fixed32::from_int(4));
        assert_eq!(cycles_of(&mut bus, |b| {
            b.read_opcode_first_byte(0);
        }), Fixed32::from_int(5));

        bus.do_out(0xBF, 0x04);
        assert_eq!(bus.wait_mode(), 1);
        assert_eq!(cycles_of(&mut bus, |b| {
            b.read_memory(0x0000);
        }), Fixed32::from_int(3));
        assert_eq!(cycles_of(&mut bus, |b| {
            b.read_opcode_first_byte(0);
        }), Fixed32::from_int(5));

        bus.do_out(0xBF, 0x08);
        assert_eq!(cycles_of(&mut bus, |b| {
            b.read_opcode_first_byte(0);
        }), Fixed32::from_int(4));
    }

    #[test]
    fn test_timing_disabled_has_no_waits() {
        let mut bus = bus(false);
        assert_eq!(cycles_of(&mut bus, |b| {
            b.read_memory(0x0000);
        }), Fixed32::from_int(3));
        assert_eq!(cycles_of(&mut bus, |b| b.write_memory(0x4000, 1)), Fixed32::from_int(3));
    }

    #[test]
    fn test_video_page_stalls() {
        let mut bus = bus(true);
        bus.clock.add_cpu_budget();
        let stall = cycles_of(&mut bus, |b| b.write_memory(0x4000, 1));
        assert!(stall > Fixed32::from_int(3));
        assert_eq!(bus.memory.video_read(0x0000), 1);
    }

    #[test]
    fn test_page_registers_read_back() {
        let mut bus = bus(true);
        assert_eq!(bus.do_in(0xB0), 0xF8);
        assert_eq!(bus.do_in(0xB1), 0xFC);
        assert_eq!(bus.port_latch()[0xB1], 0xFC);
    }

    #[test]
    fn test_exdos_disabled_during_demo() {
        let mut bus = bus(true);
        bus.do_out(0x18, 0x01);
        bus.do_out(0x11, 7);
        assert_eq!(bus.do_in(0x11), 7);
        bus.set_demo_active(true);
        bus.do_out(0x11, 9);
        assert_eq!(bus.do_in(0x11), 0x00);
        bus.set_demo_active(false);
        assert_eq!(bus.do_in(0x15), 7);
    }

    #[test]
    fn test_keyboard_through_ports() {
        let mut bus = bus(true);
        bus.dave.set_key(0x0A, true);
        bus.do_out(0xB5, 1);
        assert_eq!(bus.do_in(0xB5), 0xFB);
        assert_eq!(bus.do_in(0x00), 0xFF);
    }
}
