//! Zilog Z80 CPU interface and a compact interpreter.
//!
//! The machine drives the CPU one instruction at a time through
//! [`CpuZ80::execute_instruction`]. Every bus access goes through a
//! [`Z80Bus`] hook, and the hooks are responsible for charging clock cycles;
//! the interpreter only reports extra internal cycles via
//! [`Z80Bus::update_cycles`].
//!
//! The interpreter covers the unprefixed instruction set plus `IM n` and
//! `LD I,A`. Other prefixed opcodes execute as two-byte no-ops.

use crate::logging::{log, LogCategory, LogLevel};
use crate::state::{StateBuffer, StateError};
use serde::{Deserialize, Serialize};

const FLAG_S: u8 = 0x80;
const FLAG_Z: u8 = 0x40;
const FLAG_H: u8 = 0x10;
const FLAG_PV: u8 = 0x04;
const FLAG_N: u8 = 0x02;
const FLAG_C: u8 = 0x01;

/// Bus hooks called by the CPU for every access.
pub trait Z80Bus {
    fn read_memory(&mut self, addr: u16) -> u8;

    fn write_memory(&mut self, addr: u16, value: u8);

    /// M1 fetch of the first byte of an instruction (or of a prefix).
    fn read_opcode_first_byte(&mut self, addr: u16) -> u8;

    /// Operand fetch from the instruction stream.
    fn read_opcode_byte(&mut self, addr: u16) -> u8 {
        self.read_memory(addr)
    }

    fn do_in(&mut self, port: u16) -> u8;

    fn do_out(&mut self, port: u16, value: u8);

    /// Internal cycles not covered by a bus access.
    fn update_cycles(&mut self, cycles: i32);
}

/// Register file, kept separate from the bus so it can be staged and copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Z80Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,

    /// Shadow registers
    pub a_prime: u8,
    pub f_prime: u8,
    pub b_prime: u8,
    pub c_prime: u8,
    pub d_prime: u8,
    pub e_prime: u8,
    pub h_prime: u8,
    pub l_prime: u8,

    pub ix: u16,
    pub iy: u16,
    pub i: u8,
    pub r: u8,
    pub sp: u16,
    pub pc: u16,

    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,
}

impl Z80Registers {
    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    pub fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f])
    }

    fn set_bc(&mut self, v: u16) {
        [self.b, self.c] = v.to_be_bytes();
    }

    fn set_de(&mut self, v: u16) {
        [self.d, self.e] = v.to_be_bytes();
    }

    fn set_hl(&mut self, v: u16) {
        [self.h, self.l] = v.to_be_bytes();
    }

    fn set_af(&mut self, v: u16) {
        [self.a, self.f] = v.to_be_bytes();
    }

    pub fn save(&self, buf: &mut StateBuffer) {
        for v in [
            self.a, self.f, self.b, self.c, self.d, self.e, self.h, self.l,
            self.a_prime, self.f_prime, self.b_prime, self.c_prime,
            self.d_prime, self.e_prime, self.h_prime, self.l_prime,
        ] {
            buf.write_u8(v);
        }
        buf.write_u16(self.ix);
        buf.write_u16(self.iy);
        buf.write_u8(self.i);
        buf.write_u8(self.r);
        buf.write_u16(self.sp);
        buf.write_u16(self.pc);
        buf.write_bool(self.iff1);
        buf.write_bool(self.iff2);
        buf.write_u8(self.im);
        buf.write_bool(self.halted);
    }

    pub fn load(buf: &mut StateBuffer) -> Result<Self, StateError> {
        let mut bytes = [0u8; 16];
        for b in bytes.iter_mut() {
            *b = buf.read_u8()?;
        }
        let [a, f, b, c, d, e, h, l, a_prime, f_prime, b_prime, c_prime, d_prime, e_prime, h_prime, l_prime] =
            bytes;
        let regs = Self {
            a,
            f,
            b,
            c,
            d,
            e,
            h,
            l,
            a_prime,
            f_prime,
            b_prime,
            c_prime,
            d_prime,
            e_prime,
            h_prime,
            l_prime,
            ix: buf.read_u16()?,
            iy: buf.read_u16()?,
            i: buf.read_u8()?,
            r: buf.read_u8()?,
            sp: buf.read_u16()?,
            pc: buf.read_u16()?,
            iff1: buf.read_bool()?,
            iff2: buf.read_bool()?,
            im: buf.read_u8()?,
            halted: buf.read_bool()?,
        };
        if regs.im > 2 {
            return Err(StateError::Invalid(format!("interrupt mode {}", regs.im)));
        }
        Ok(regs)
    }
}

fn parity(v: u8) -> u8 {
    if v.count_ones() % 2 == 0 {
        FLAG_PV
    } else {
        0
    }
}

fn sz(v: u8) -> u8 {
    (v & FLAG_S) | if v == 0 { FLAG_Z } else { 0 }
}

/// Zilog Z80 CPU state
#[derive(Debug)]
pub struct CpuZ80<B: Z80Bus> {
    pub regs: Z80Registers,
    pub bus: B,
}

impl<B: Z80Bus> CpuZ80<B> {
    pub fn new(bus: B) -> Self {
        Self {
            regs: Z80Registers::default(),
            bus,
        }
    }

    /// Power-on/reset state. Memory and bus devices are untouched.
    pub fn reset(&mut self) {
        self.regs.pc = 0;
        self.regs.i = 0;
        self.regs.r = 0;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.im = 0;
        self.regs.halted = false;
        self.regs.sp = 0xFFFF;
        self.regs.a = 0xFF;
        self.regs.f = 0xFF;
    }

    /// Accept a maskable interrupt (mode 1 or 2). Returns false while
    /// interrupts are disabled.
    pub fn interrupt(&mut self) -> bool {
        if !self.regs.iff1 {
            return false;
        }
        self.regs.halted = false;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
        self.bus.update_cycles(7);
        let pc = self.regs.pc;
        self.push(pc);
        self.regs.pc = if self.regs.im == 2 {
            let vector = u16::from_be_bytes([self.regs.i, 0xFF]);
            self.read_word(vector)
        } else {
            0x0038
        };
        true
    }

    fn fetch_opcode(&mut self) -> u8 {
        let op = self.bus.read_opcode_first_byte(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
        op
    }

    fn fetch_byte(&mut self) -> u8 {
        let v = self.bus.read_opcode_byte(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        v
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte();
        let hi = self.fetch_byte();
        u16::from_le_bytes([lo, hi])
    }

    fn read_word(&mut self, addr: u16) -> u16 {
        let lo = self.bus.read_memory(addr);
        let hi = self.bus.read_memory(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn write_word(&mut self, addr: u16, v: u16) {
        let [lo, hi] = v.to_le_bytes();
        self.bus.write_memory(addr, lo);
        self.bus.write_memory(addr.wrapping_add(1), hi);
    }

    fn push(&mut self, v: u16) {
        let [lo, hi] = v.to_le_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.bus.write_memory(self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.bus.write_memory(self.regs.sp, lo);
    }

    fn pop(&mut self) -> u16 {
        let v = self.read_word(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        v
    }

    /// Register by its 3-bit encoding; 6 is `(HL)`.
    fn get_r(&mut self, index: u8) -> u8 {
        match index & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => self.bus.read_memory(self.regs.hl()),
            _ => self.regs.a,
        }
    }

    fn set_r(&mut self, index: u8, v: u8) {
        match index & 7 {
            0 => self.regs.b = v,
            1 => self.regs.c = v,
            2 => self.regs.d = v,
            3 => self.regs.e = v,
            4 => self.regs.h = v,
            5 => self.regs.l = v,
            6 => self.bus.write_memory(self.regs.hl(), v),
            _ => self.regs.a = v,
        }
    }

    /// Register pair by its 2-bit encoding, with SP as pair 3.
    fn get_rp(&self, index: u8) -> u16 {
        match index & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_rp(&mut self, index: u8, v: u16) {
        match index & 3 {
            0 => self.regs.set_bc(v),
            1 => self.regs.set_de(v),
            2 => self.regs.set_hl(v),
            _ => self.regs.sp = v,
        }
    }

    fn condition(&self, cc: u8) -> bool {
        let f = self.regs.f;
        match cc & 7 {
            0 => f & FLAG_Z == 0,
            1 => f & FLAG_Z != 0,
            2 => f & FLAG_C == 0,
            3 => f & FLAG_C != 0,
            4 => f & FLAG_PV == 0,
            5 => f & FLAG_PV != 0,
            6 => f & FLAG_S == 0,
            _ => f & FLAG_S != 0,
        }
    }

    fn alu(&mut self, op: u8, v: u8) {
        let a = self.regs.a;
        let carry = (self.regs.f & FLAG_C) as u16;
        match op & 7 {
            // ADD, ADC
            0 | 1 => {
                let c = if op & 7 == 1 { carry } else { 0 };
                let wide = a as u16 + v as u16 + c;
                let r = wide as u8;
                let overflow = (a ^ r) & (v ^ r) & 0x80 != 0;
                self.regs.f = sz(r)
                    | (((a & 0x0F) + (v & 0x0F) + c as u8) & FLAG_H)
                    | if overflow { FLAG_PV } else { 0 }
                    | if wide > 0xFF { FLAG_C } else { 0 };
                self.regs.a = r;
            }
            // SUB, SBC, CP
            2 | 3 | 7 => {
                let c = if op & 7 == 3 { carry } else { 0 };
                let wide = (a as u16).wrapping_sub(v as u16).wrapping_sub(c);
                let r = wide as u8;
                let overflow = (a ^ v) & (a ^ r) & 0x80 != 0;
                self.regs.f = sz(r)
                    | FLAG_N
                    | (((a & 0x0F).wrapping_sub(v & 0x0F).wrapping_sub(c as u8)) & FLAG_H)
                    | if overflow { FLAG_PV } else { 0 }
                    | if wide > 0xFF { FLAG_C } else { 0 };
                if op & 7 != 7 {
                    self.regs.a = r;
                }
            }
            4 => {
                self.regs.a = a & v;
                self.regs.f = sz(self.regs.a) | FLAG_H | parity(self.regs.a);
            }
            5 => {
                self.regs.a = a ^ v;
                self.regs.f = sz(self.regs.a) | parity(self.regs.a);
            }
            _ => {
                self.regs.a = a | v;
                self.regs.f = sz(self.regs.a) | parity(self.regs.a);
            }
        }
    }

    fn inc8(&mut self, v: u8) -> u8 {
        let r = v.wrapping_add(1);
        self.regs.f = (self.regs.f & FLAG_C)
            | sz(r)
            | if r & 0x0F == 0 { FLAG_H } else { 0 }
            | if r == 0x80 { FLAG_PV } else { 0 };
        r
    }

    fn dec8(&mut self, v: u8) -> u8 {
        let r = v.wrapping_sub(1);
        self.regs.f = (self.regs.f & FLAG_C)
            | sz(r)
            | FLAG_N
            | if r & 0x0F == 0x0F { FLAG_H } else { 0 }
            | if r == 0x7F { FLAG_PV } else { 0 };
        r
    }

    fn jump_relative(&mut self, taken: bool) {
        let offset = self.fetch_byte() as i8;
        if taken {
            self.bus.update_cycles(5);
            self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
        }
    }

    /// Execute one instruction. A halted CPU repeats dummy opcode fetches.
    pub fn execute_instruction(&mut self) {
        if self.regs.halted {
            self.bus.read_opcode_first_byte(self.regs.pc);
            self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
            return;
        }
        let op = self.fetch_opcode();
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;

        match op {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let v = self.fetch_word();
                self.set_rp(p, v);
            }
            0x02 => self.bus.write_memory(self.regs.bc(), self.regs.a),
            0x12 => self.bus.write_memory(self.regs.de(), self.regs.a),
            0x0A => self.regs.a = self.bus.read_memory(self.regs.bc()),
            0x1A => self.regs.a = self.bus.read_memory(self.regs.de()),
            0x22 => {
                let addr = self.fetch_word();
                self.write_word(addr, self.regs.hl());
            }
            0x2A => {
                let addr = self.fetch_word();
                let v = self.read_word(addr);
                self.regs.set_hl(v);
            }
            0x32 => {
                let addr = self.fetch_word();
                self.bus.write_memory(addr, self.regs.a);
            }
            0x3A => {
                let addr = self.fetch_word();
                self.regs.a = self.bus.read_memory(addr);
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                self.bus.update_cycles(2);
                self.set_rp(p, self.get_rp(p).wrapping_add(1));
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                self.bus.update_cycles(2);
                self.set_rp(p, self.get_rp(p).wrapping_sub(1));
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                self.bus.update_cycles(7);
                let hl = self.regs.hl();
                let v = self.get_rp(p);
                let (r, carry) = hl.overflowing_add(v);
                self.regs.f = (self.regs.f & (FLAG_S | FLAG_Z | FLAG_PV))
                    | (((hl & 0x0FFF) + (v & 0x0FFF)) >> 8) as u8 & FLAG_H
                    | if carry { FLAG_C } else { 0 };
                self.regs.set_hl(r);
            }
            _ if op & 0xC7 == 0x04 => {
                if y == 6 {
                    self.bus.update_cycles(1);
                }
                let v = self.get_r(y);
                let r = self.inc8(v);
                self.set_r(y, r);
            }
            _ if op & 0xC7 == 0x05 => {
                if y == 6 {
                    self.bus.update_cycles(1);
                }
                let v = self.get_r(y);
                let r = self.dec8(v);
                self.set_r(y, r);
            }
            _ if op & 0xC7 == 0x06 => {
                let v = self.fetch_byte();
                self.set_r(y, v);
            }
            0x07 => {
                let c = self.regs.a >> 7;
                self.regs.a = self.regs.a.rotate_left(1);
                self.regs.f = (self.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | c;
            }
            0x0F => {
                let c = self.regs.a & 1;
                self.regs.a = self.regs.a.rotate_right(1);
                self.regs.f = (self.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | c;
            }
            0x17 => {
                let c = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | (self.regs.f & FLAG_C);
                self.regs.f = (self.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | c;
            }
            0x1F => {
                let c = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | ((self.regs.f & FLAG_C) << 7);
                self.regs.f = (self.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | c;
            }
            0x08 => {
                let af = self.regs.af();
                self.regs.set_af(u16::from_be_bytes([self.regs.a_prime, self.regs.f_prime]));
                [self.regs.a_prime, self.regs.f_prime] = af.to_be_bytes();
            }
            0x10 => {
                self.bus.update_cycles(1);
                self.regs.b = self.regs.b.wrapping_sub(1);
                let taken = self.regs.b != 0;
                self.jump_relative(taken);
            }
            0x18 => self.jump_relative(true),
            0x20 | 0x28 | 0x30 | 0x38 => {
                let taken = self.condition(y - 4);
                self.jump_relative(taken);
            }
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f |= FLAG_H | FLAG_N;
            }
            0x37 => self.regs.f = (self.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | FLAG_C,
            0x3F => {
                let c = self.regs.f & FLAG_C;
                self.regs.f = (self.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | if c != 0 { FLAG_H } else { FLAG_C };
            }
            0x76 => self.regs.halted = true,
            0x40..=0x7F => {
                let v = self.get_r(z);
                self.set_r(y, v);
            }
            0x80..=0xBF => {
                let v = self.get_r(z);
                self.alu(y, v);
            }
            _ if op & 0xC7 == 0xC6 => {
                let v = self.fetch_byte();
                self.alu(y, v);
            }
            _ if op & 0xC7 == 0xC0 => {
                self.bus.update_cycles(1);
                if self.condition(y) {
                    self.regs.pc = self.pop();
                }
            }
            0xC9 => self.regs.pc = self.pop(),
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let v = self.pop();
                match p {
                    0 => self.regs.set_bc(v),
                    1 => self.regs.set_de(v),
                    2 => self.regs.set_hl(v),
                    _ => self.regs.set_af(v),
                }
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                self.bus.update_cycles(1);
                let v = match p {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.hl(),
                    _ => self.regs.af(),
                };
                self.push(v);
            }
            0xC3 => self.regs.pc = self.fetch_word(),
            _ if op & 0xC7 == 0xC2 => {
                let addr = self.fetch_word();
                if self.condition(y) {
                    self.regs.pc = addr;
                }
            }
            0xCD => {
                let addr = self.fetch_word();
                self.bus.update_cycles(1);
                let pc = self.regs.pc;
                self.push(pc);
                self.regs.pc = addr;
            }
            _ if op & 0xC7 == 0xC4 => {
                let addr = self.fetch_word();
                if self.condition(y) {
                    self.bus.update_cycles(1);
                    let pc = self.regs.pc;
                    self.push(pc);
                    self.regs.pc = addr;
                }
            }
            _ if op & 0xC7 == 0xC7 => {
                self.bus.update_cycles(1);
                let pc = self.regs.pc;
                self.push(pc);
                self.regs.pc = (y as u16) << 3;
            }
            0xD3 => {
                let n = self.fetch_byte();
                let port = u16::from_be_bytes([self.regs.a, n]);
                self.bus.do_out(port, self.regs.a);
            }
            0xDB => {
                let n = self.fetch_byte();
                let port = u16::from_be_bytes([self.regs.a, n]);
                self.regs.a = self.bus.do_in(port);
            }
            0xD9 => {
                let r = &mut self.regs;
                std::mem::swap(&mut r.b, &mut r.b_prime);
                std::mem::swap(&mut r.c, &mut r.c_prime);
                std::mem::swap(&mut r.d, &mut r.d_prime);
                std::mem::swap(&mut r.e, &mut r.e_prime);
                std::mem::swap(&mut r.h, &mut r.h_prime);
                std::mem::swap(&mut r.l, &mut r.l_prime);
            }
            0xE3 => {
                let v = self.read_word(self.regs.sp);
                self.bus.update_cycles(3);
                self.write_word(self.regs.sp, self.regs.hl());
                self.regs.set_hl(v);
            }
            0xE9 => self.regs.pc = self.regs.hl(),
            0xEB => {
                let de = self.regs.de();
                self.regs.set_de(self.regs.hl());
                self.regs.set_hl(de);
            }
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
            }
            0xF9 => {
                self.bus.update_cycles(2);
                self.regs.sp = self.regs.hl();
            }
            0xED => self.execute_ed(),
            0xCB | 0xDD | 0xFD => {
                let second = self.fetch_opcode();
                log(LogCategory::Cpu, LogLevel::Debug, || {
                    format!(
                        "CPU: unimplemented opcode {:02X} {:02X} at {:04X}",
                        op,
                        second,
                        self.regs.pc.wrapping_sub(2)
                    )
                });
            }
            // DAA
            _ => log(LogCategory::Cpu, LogLevel::Debug, || {
                format!("CPU: unimplemented opcode {:02X}", op)
            }),
        }
    }

    fn execute_ed(&mut self) {
        let op = self.fetch_opcode();
        match op {
            0x46 | 0x66 => self.regs.im = 0,
            0x56 | 0x76 => self.regs.im = 1,
            0x5E | 0x7E => self.regs.im = 2,
            0x47 => {
                self.bus.update_cycles(1);
                self.regs.i = self.regs.a;
            }
            0x4D | 0x45 => {
                self.regs.iff1 = self.regs.iff2;
                self.regs.pc = self.pop();
            }
            _ => log(LogCategory::Cpu, LogLevel::Debug, || {
                format!(
                    "CPU: unimplemented opcode ED {:02X} at {:04X}",
                    op,
                    self.regs.pc.wrapping_sub(2)
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat 64K RAM that charges 3 cycles per access and 4 per M1 fetch.
    struct TestBus {
        ram: Vec<u8>,
        cycles: i64,
        outputs: Vec<(u16, u8)>,
    }

    impl TestBus {
        fn with_program(program: &[u8]) -> Self {
            let mut ram = vec![0; 0x10000];
            ram[..program.len()].copy_from_slice(program);
            Self {
                ram,
                cycles: 0,
                outputs: Vec::new(),
            }
        }
    }

    impl Z80Bus for TestBus {
        fn read_memory(&mut self, addr: u16) -> u8 {
            self.cycles += 3;
            self.ram[addr as usize]
        }

        fn write_memory(&mut self, addr: u16, value: u8) {
            self.cycles += 3;
            self.ram[addr as usize] = value;
        }

        fn read_opcode_first_byte(&mut self, addr: u16) -> u8 {
            self.cycles += 4;
            self.ram[addr as usize]
        }

        fn do_in(&mut self, port: u16) -> u8 {
            self.cycles += 4;
            (port & 0xFF) as u8 ^ 0xFF
        }

        fn do_out(&mut self, port: u16, value: u8) {
            self.cycles += 4;
            self.outputs.push((port, value));
        }

        fn update_cycles(&mut self, cycles: i32) {
            self.cycles += cycles as i64;
        }
    }

    fn run(program: &[u8], steps: usize) -> CpuZ80<TestBus> {
        let mut cpu = CpuZ80::new(TestBus::with_program(program));
        cpu.reset();
        for _ in 0..steps {
            cpu.execute_instruction();
        }
        cpu
    }

    #[test]
    fn test_nop_costs_one_m1_cycle() {
        let cpu = run(&[0x00], 1);
        assert_eq!(cpu.bus.cycles, 4);
        assert_eq!(cpu.regs.pc, 1);
        assert_eq!(cpu.regs.r, 1);
    }

    #[test]
    fn test_store_and_load_absolute() {
        // LD A,42h; LD (8000h),A; XOR A; LD A,(8000h)
        let cpu = run(&[0x3E, 0x42, 0x32, 0x00, 0x80, 0xAF, 0x3A, 0x00, 0x80], 4);
        assert_eq!(cpu.bus.ram[0x8000], 0x42);
        assert_eq!(cpu.regs.a, 0x42);
    }

    #[test]
    fn test_djnz_loop() {
        // LD B,5; LD A,0; INC A; DJNZ -3; HALT
        let cpu = run(&[0x06, 0x05, 0x3E, 0x00, 0x3C, 0x10, 0xFD, 0x76], 13);
        assert_eq!(cpu.regs.a, 5);
        assert_eq!(cpu.regs.b, 0);
        assert!(cpu.regs.halted);
    }

    #[test]
    fn test_halt_keeps_fetching() {
        let mut cpu = run(&[0x76], 1);
        let before = cpu.bus.cycles;
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.bus.cycles - before, 8);
        assert_eq!(cpu.regs.pc, 1);
    }

    #[test]
    fn test_call_and_return() {
        // LD SP,0; CALL 0010h; HALT ... 0010h: LD A,7; RET
        let mut program = vec![0x31, 0x00, 0x00, 0xCD, 0x10, 0x00, 0x76];
        program.resize(0x10, 0);
        program.extend_from_slice(&[0x3E, 0x07, 0xC9]);
        let cpu = run(&program, 5);
        assert_eq!(cpu.regs.a, 7);
        assert_eq!(cpu.regs.sp, 0);
        assert!(cpu.regs.halted);
    }

    #[test]
    fn test_port_io_uses_accumulator_as_high_byte() {
        // LD A,12h; OUT (0B5h),A; IN A,(0B5h)
        let cpu = run(&[0x3E, 0x12, 0xD3, 0xB5, 0xDB, 0xB5], 3);
        assert_eq!(cpu.bus.outputs, vec![(0x12B5, 0x12)]);
        assert_eq!(cpu.regs.a, 0xB5 ^ 0xFF);
    }

    #[test]
    fn test_sub_sets_carry_and_zero() {
        // LD A,3; SUB 4; CP 0FFh
        let mut cpu = run(&[0x3E, 0x03, 0xD6, 0x04], 2);
        assert_eq!(cpu.regs.a, 0xFF);
        assert_ne!(cpu.regs.f & FLAG_C, 0);
        assert_ne!(cpu.regs.f & FLAG_N, 0);
        cpu.bus.ram[4..6].copy_from_slice(&[0xFE, 0xFF]);
        cpu.execute_instruction();
        assert_ne!(cpu.regs.f & FLAG_Z, 0);
        assert_eq!(cpu.regs.a, 0xFF);
    }

    #[test]
    fn test_interrupt_mode_1() {
        // IM 1; EI; HALT
        let mut cpu = run(&[0xED, 0x56, 0xFB, 0x76], 3);
        cpu.regs.sp = 0x8000;
        assert!(cpu.regs.halted);
        assert!(cpu.interrupt());
        assert!(!cpu.regs.halted);
        assert_eq!(cpu.regs.pc, 0x38);
        assert_eq!(cpu.bus.ram[0x7FFE], 0x04);
        assert!(!cpu.interrupt());
    }

    #[test]
    fn test_registers_state_roundtrip() {
        let cpu = run(&[0x21, 0x34, 0x12, 0xD9, 0x3E, 0x99, 0x08], 4);
        let mut buf = StateBuffer::new();
        cpu.regs.save(&mut buf);
        let mut read = StateBuffer::from_bytes(buf.into_inner());
        let regs = Z80Registers::load(&mut read).unwrap();
        assert_eq!(regs, cpu.regs);
        assert_eq!(regs.h_prime, 0x12);
        assert_eq!(regs.a_prime, 0x99);
        assert!(read.remaining() == 0);
    }
}
