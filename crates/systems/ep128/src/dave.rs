//! Dave: sound generator, interrupt controller, keyboard and tape interface.
//!
//! Only the parts the machine loop depends on are modelled: three square
//! tone channels, the 1 kHz/50 Hz and 1 Hz interrupt timers, the video
//! interrupt latch, the 16 row keyboard matrix, the remote (tape motor)
//! bits and the tape input level.

use emu_core::state::{StateBuffer, StateError};
use serde::Serialize;

const TIMER_1KHZ_CYCLES: u32 = 500;
const TIMER_50HZ_CYCLES: u32 = 10_000;
const TIMER_1HZ_CYCLES: u32 = 500_000;

const INT_TIMER: u8 = 0x01;
const INT_1HZ: u8 = 0x04;
const INT_VIDEO: u8 = 0x10;

/// Per-channel output scale, so three channels at full volume stay in range.
const AMPLITUDE: i32 = 160;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
struct ToneChannel {
    counter: u16,
    output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dave {
    regs: [u8; 32],
    channels: [ToneChannel; 3],
    timer_counter: u32,
    one_hz_counter: u32,
    /// Enable bits 0/2/4/6 and latch bits 1/3/5/7, as port 0xB4 reports them
    int_enable: u8,
    int_latch: u8,
    video_int: bool,
    keyboard: [u8; 16],
    tape_input: i32,
}

impl Dave {
    pub fn new() -> Self {
        Self {
            regs: [0; 32],
            channels: [ToneChannel::default(); 3],
            timer_counter: TIMER_1KHZ_CYCLES,
            one_hz_counter: TIMER_1HZ_CYCLES,
            int_enable: 0,
            int_latch: 0,
            video_int: false,
            keyboard: [0xFF; 16],
            tape_input: 0,
        }
    }

    /// Reset registers and timers. The keyboard matrix is preserved.
    pub fn reset(&mut self) {
        let keyboard = self.keyboard;
        *self = Self::new();
        self.keyboard = keyboard;
    }

    pub fn set_key(&mut self, code: u8, pressed: bool) {
        let row = ((code >> 3) & 15) as usize;
        let mask = 1u8 << (code & 7);
        if pressed {
            self.keyboard[row] &= !mask;
        } else {
            self.keyboard[row] |= mask;
        }
    }

    pub fn clear_keyboard(&mut self) {
        self.keyboard = [0xFF; 16];
    }

    pub fn is_key_pressed(&self, code: u8) -> bool {
        self.keyboard[((code >> 3) & 15) as usize] & (1 << (code & 7)) == 0
    }

    pub fn set_tape_input(&mut self, level: i32) {
        self.tape_input = level;
    }

    /// Either remote output is on, which runs the tape motor.
    pub fn remote_on(&self) -> bool {
        self.regs[0x17] & 0xC0 != 0
    }

    /// Clear both remote bits.
    pub fn remote_off(&mut self) {
        self.regs[0x17] &= 0x3F;
    }

    /// Level of the video interrupt input, driven by Nick.
    pub fn set_video_interrupt(&mut self, active: bool) {
        if active && !self.video_int && self.int_enable & INT_VIDEO != 0 {
            self.int_latch |= INT_VIDEO << 1;
        }
        self.video_int = active;
    }

    /// An enabled interrupt source is latched.
    pub fn irq(&self) -> bool {
        self.int_latch & (self.int_enable << 1) != 0
    }

    pub fn read_port(&self, port: u8) -> u8 {
        match port & 0x1F {
            0x14 => {
                let timer_high = self.timer_counter > self.timer_period() / 2;
                let one_hz_high = self.one_hz_counter > TIMER_1HZ_CYCLES / 2;
                self.int_latch
                    | u8::from(timer_high)
                    | (u8::from(one_hz_high) << 2)
                    | (u8::from(self.video_int) << 4)
            }
            0x15 => self.keyboard[(self.regs[0x15] & 15) as usize],
            0x16 => {
                if self.tape_input > 0 {
                    0xFF
                } else {
                    0xBF
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write_port(&mut self, port: u8, value: u8) {
        let reg = (port & 0x1F) as usize;
        if reg == 0x14 {
            self.int_enable = value & 0x55;
            self.int_latch &= !(value & 0xAA);
            self.int_latch &= self.int_enable << 1;
            return;
        }
        let old = std::mem::replace(&mut self.regs[reg], value);
        if reg == 0x07 && (old ^ value) & 0x60 != 0 {
            self.timer_counter = self.timer_period();
        }
    }

    fn timer_period(&self) -> u32 {
        if self.regs[0x07] & 0x20 != 0 {
            TIMER_50HZ_CYCLES
        } else {
            TIMER_1KHZ_CYCLES
        }
    }

    fn tone_period(&self, channel: usize) -> u16 {
        u16::from_le_bytes([self.regs[channel * 2], self.regs[channel * 2 + 1] & 0x0F])
    }

    /// Advance one Dave cycle and return the stereo output sample.
    pub fn run_one_cycle(&mut self) -> (i16, i16) {
        for ch in 0..3 {
            let period = self.tone_period(ch);
            let tone = &mut self.channels[ch];
            if tone.counter == 0 {
                tone.counter = period;
                tone.output = !tone.output;
            } else {
                tone.counter -= 1;
            }
        }

        self.timer_counter -= 1;
        if self.timer_counter == 0 {
            self.timer_counter = self.timer_period();
            if self.int_enable & INT_TIMER != 0 {
                self.int_latch |= INT_TIMER << 1;
            }
        }
        self.one_hz_counter -= 1;
        if self.one_hz_counter == 0 {
            self.one_hz_counter = TIMER_1HZ_CYCLES;
            if self.int_enable & INT_1HZ != 0 {
                self.int_latch |= INT_1HZ << 1;
            }
        }

        let mut left = 0i32;
        let mut right = 0i32;
        for (ch, tone) in self.channels.iter().enumerate() {
            if tone.output {
                left += (self.regs[0x08 + ch] & 0x3F) as i32;
                right += (self.regs[0x0C + ch] & 0x3F) as i32;
            }
        }
        ((left * AMPLITUDE) as i16, (right * AMPLITUDE) as i16)
    }

    pub fn save(&self, buf: &mut StateBuffer) {
        buf.write_bytes(&self.regs);
        for tone in &self.channels {
            buf.write_u16(tone.counter);
            buf.write_bool(tone.output);
        }
        buf.write_u32(self.timer_counter);
        buf.write_u32(self.one_hz_counter);
        buf.write_u8(self.int_enable);
        buf.write_u8(self.int_latch);
        buf.write_bool(self.video_int);
        buf.write_bytes(&self.keyboard);
        buf.write_u32(self.tape_input as u32);
    }

    pub fn load(buf: &mut StateBuffer) -> Result<Self, StateError> {
        let mut dave = Self::new();
        dave.regs.copy_from_slice(buf.read_bytes(32)?);
        for tone in dave.channels.iter_mut() {
            tone.counter = buf.read_u16()?;
            tone.output = buf.read_bool()?;
        }
        dave.timer_counter = buf.read_u32()?;
        dave.one_hz_counter = buf.read_u32()?;
        if !(1..=TIMER_50HZ_CYCLES).contains(&dave.timer_counter)
            || !(1..=TIMER_1HZ_CYCLES).contains(&dave.one_hz_counter)
        {
            return Err(StateError::Invalid("Dave timer counter".to_string()));
        }
        dave.int_enable = buf.read_u8()? & 0x55;
        dave.int_latch = buf.read_u8()? & 0xAA;
        dave.video_int = buf.read_bool()?;
        dave.keyboard.copy_from_slice(buf.read_bytes(16)?);
        dave.tape_input = buf.read_u32()? as i32;
        Ok(dave)
    }
}

impl Default for Dave {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_matrix() {
        let mut dave = Dave::new();
        dave.set_key(0x13, true);
        dave.write_port(0xB5, 2);
        assert_eq!(dave.read_port(0xB5), 0xF7);
        assert!(dave.is_key_pressed(0x13));
        dave.set_key(0x13, false);
        assert_eq!(dave.read_port(0xB5), 0xFF);
    }

    #[test]
    fn test_reset_keeps_keyboard() {
        let mut dave = Dave::new();
        dave.set_key(0x05, true);
        dave.write_port(0xA8, 0x3F);
        dave.reset();
        assert!(dave.is_key_pressed(0x05));
        dave.clear_keyboard();
        assert!(!dave.is_key_pressed(0x05));
    }

    #[test]
    fn test_1khz_interrupt_latch() {
        let mut dave = Dave::new();
        dave.write_port(0xB4, 0x01);
        for _ in 0..TIMER_1KHZ_CYCLES - 1 {
            dave.run_one_cycle();
        }
        assert!(!dave.irq());
        dave.run_one_cycle();
        assert!(dave.irq());
        assert_eq!(dave.read_port(0xB4) & 0x02, 0x02);

        // acknowledge
        dave.write_port(0xB4, 0x03);
        assert!(!dave.irq());
    }

    #[test]
    fn test_video_interrupt_on_rising_edge() {
        let mut dave = Dave::new();
        dave.write_port(0xB4, 0x10);
        dave.set_video_interrupt(true);
        assert!(dave.irq());
        dave.write_port(0xB4, 0x30);
        dave.set_video_interrupt(true);
        assert!(!dave.irq());
    }

    #[test]
    fn test_tone_output() {
        let mut dave = Dave::new();
        dave.write_port(0xA0, 1);
        dave.write_port(0xA8, 0x3F);
        dave.write_port(0xAC, 0x20);
        let samples: Vec<_> = (0..4).map(|_| dave.run_one_cycle()).collect();
        assert_eq!(samples[0], (0x3F * AMPLITUDE as i16, 0x20 * AMPLITUDE as i16));
        assert_eq!(samples[1], samples[0]);
        assert_eq!(samples[2], (0, 0));
    }

    #[test]
    fn test_remote_bits() {
        let mut dave = Dave::new();
        assert!(!dave.remote_on());
        dave.write_port(0xB7, 0x40);
        assert!(dave.remote_on());
        dave.remote_off();
        assert!(!dave.remote_on());
        dave.write_port(0xB7, 0x80);
        assert!(dave.remote_on());
    }

    #[test]
    fn test_state_roundtrip() {
        let mut dave = Dave::new();
        dave.write_port(0xA0, 7);
        dave.write_port(0xB4, 0x01);
        dave.set_key(0x22, true);
        for _ in 0..1234 {
            dave.run_one_cycle();
        }
        let mut buf = StateBuffer::new();
        dave.save(&mut buf);
        let mut buf = StateBuffer::from_bytes(buf.into_inner());
        let loaded = Dave::load(&mut buf).unwrap();
        buf.expect_end("dave").unwrap();
        assert_eq!(loaded, dave);
    }
}
