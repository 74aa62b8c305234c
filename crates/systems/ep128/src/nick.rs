//! Nick: video chip timing and a single pixel-art display mode.
//!
//! Nick runs one slot per nick cycle, 57 slots per line and 312 lines per
//! field. Every line is emitted as 48 run codes of 16 pixels each: border
//! codes left and right, and when the display is enabled, 32 codes whose
//! colors come from video RAM, one byte per code.

use crate::memory::Memory;
use emu_core::state::{StateBuffer, StateError};
use emu_core::VideoSink;
use serde::Serialize;

pub const SLOTS_PER_LINE: u32 = 57;
pub const LINES_PER_FIELD: u32 = 312;

const VSYNC_START_LINE: u32 = 0;
const VSYNC_END_LINE: u32 = 3;
/// Vsync begins mid-line on odd fields when interlace is enabled.
const ODD_FIELD_VSYNC_SLOT: u32 = 28;

const FIRST_VISIBLE_LINE: u32 = 40;
const VISIBLE_LINES: u32 = 256;
const BORDER_CODES: usize = 8;
const CONTENT_CODES: usize = 32;
const LINE_CODES: usize = BORDER_CODES * 2 + CONTENT_CODES;
const LINE_BYTES: usize = LINE_CODES * 2;

const CTRL_INTERLACE: u8 = 0x40;
const CTRL_ENABLE: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Nick {
    /// Ports 0x80-0x83
    regs: [u8; 4],
    slot: u32,
    line: u32,
    odd_field: bool,
    vsync: bool,
}

impl Nick {
    pub fn new() -> Self {
        Self {
            regs: [0; 4],
            slot: 0,
            line: 0,
            odd_field: false,
            vsync: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn write_port(&mut self, port: u8, value: u8) {
        self.regs[(port & 3) as usize] = value;
    }

    /// Nick registers are write-only.
    pub fn read_port(&self, _port: u8) -> u8 {
        0xFF
    }

    pub fn border(&self) -> u8 {
        self.regs[1]
    }

    fn display_enabled(&self) -> bool {
        self.regs[3] & CTRL_ENABLE != 0
    }

    fn interlace(&self) -> bool {
        self.regs[3] & CTRL_INTERLACE != 0
    }

    /// Start of the 8 KiB bitmap in the video address space.
    fn base(&self) -> u16 {
        u16::from_le_bytes([self.regs[2], self.regs[3] & 0x0F]) << 4
    }

    /// Level of the video interrupt output.
    pub fn interrupt_line(&self) -> bool {
        self.vsync
    }

    fn vsync_slot(&self) -> u32 {
        if self.odd_field && self.interlace() {
            ODD_FIELD_VSYNC_SLOT
        } else {
            0
        }
    }

    /// Advance one slot. Emits a vsync edge and, at the end of a line, the
    /// encoded line.
    pub fn run_one_slot(&mut self, memory: &Memory, sink: &mut dyn VideoSink) {
        if self.slot == self.vsync_slot() {
            let wanted = match self.line {
                VSYNC_START_LINE => Some(true),
                VSYNC_END_LINE => Some(false),
                _ => None,
            };
            if let Some(state) = wanted {
                if state != self.vsync {
                    self.vsync = state;
                    sink.vsync_state_change(state, self.slot);
                }
            }
        }

        self.slot += 1;
        if self.slot == SLOTS_PER_LINE {
            let mut bytes = [0u8; LINE_BYTES];
            self.render_line(memory, &mut bytes);
            sink.draw_line(&bytes);

            self.slot = 0;
            self.line += 1;
            if self.line == LINES_PER_FIELD {
                self.line = 0;
                self.odd_field = !self.odd_field;
            }
        }
    }

    fn render_line(&self, memory: &Memory, out: &mut [u8; LINE_BYTES]) {
        let row_base = self
            .line
            .checked_sub(FIRST_VISIBLE_LINE)
            .filter(|&row| self.display_enabled() && row < VISIBLE_LINES)
            .map(|row| self.base().wrapping_add((row as usize * CONTENT_CODES) as u16));
        let content = BORDER_CODES..BORDER_CODES + CONTENT_CODES;

        for (i, code) in out.chunks_exact_mut(2).enumerate() {
            let color = match row_base {
                Some(base) if content.contains(&i) => {
                    memory.video_read(base.wrapping_add((i - BORDER_CODES) as u16))
                }
                _ => self.border(),
            };
            code[0] = 0x01;
            code[1] = color;
        }
    }

    pub fn save(&self, buf: &mut StateBuffer) {
        buf.write_bytes(&self.regs);
        buf.write_u8(self.slot as u8);
        buf.write_u16(self.line as u16);
        buf.write_bool(self.odd_field);
        buf.write_bool(self.vsync);
    }

    pub fn load(buf: &mut StateBuffer) -> Result<Self, StateError> {
        let mut nick = Self::new();
        nick.regs.copy_from_slice(buf.read_bytes(4)?);
        nick.slot = buf.read_u8()? as u32;
        nick.line = buf.read_u16()? as u32;
        nick.odd_field = buf.read_bool()?;
        nick.vsync = buf.read_bool()?;
        if nick.slot >= SLOTS_PER_LINE || nick.line >= LINES_PER_FIELD {
            return Err(StateError::Invalid(format!(
                "Nick position line {} slot {}",
                nick.line, nick.slot
            )));
        }
        Ok(nick)
    }
}

impl Default for Nick {
    fn default() -> Self {
        Self::new()
    }
}
