//! Segmented memory map.
//!
//! The 4 MiB address space is split into 256 segments of 16 KiB. Each of the
//! four 16 KiB CPU pages maps one segment, selected by Dave ports 0xB0-0xB3.
//! Segments 0xFC-0xFF are the video RAM shared with Nick.

use crate::Ep128Error;
use emu_core::state::{StateBuffer, StateError};

pub const SEGMENT_SIZE: usize = 0x4000;
pub const SEGMENT_COUNT: usize = 256;
/// First segment of video RAM.
pub const VIDEO_SEGMENT: u8 = 0xFC;

const MIN_RAM_SEGMENTS: usize = 4;
const MAX_RAM_SEGMENTS: usize = 232;

#[derive(Debug, Clone)]
enum Segment {
    Empty,
    Ram(Box<[u8]>),
    Rom(Box<[u8]>),
}

impl Segment {
    fn is_ram(&self) -> bool {
        matches!(self, Segment::Ram(_))
    }

    fn is_rom(&self) -> bool {
        matches!(self, Segment::Rom(_))
    }
}

/// Segments decoded from a snapshot, not yet installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamImage {
    segments: Vec<(u8, Box<[u8]>)>,
}

pub struct Memory {
    segments: Vec<Segment>,
    pages: [u8; 4],
}

impl Memory {
    pub fn new() -> Self {
        Self {
            segments: vec![Segment::Empty; SEGMENT_COUNT],
            pages: [0; 4],
        }
    }

    /// Allocate `size_kb` of RAM from segment 0xFF downward, replacing any
    /// previous RAM. Returns the number of segments allocated.
    ///
    /// The size is rounded up to whole segments and clamped to 64..=3712 KiB.
    /// Segments holding ROM are skipped.
    pub fn configure_ram(&mut self, size_kb: u32) -> usize {
        let wanted = ((size_kb as usize + 15) >> 4).clamp(MIN_RAM_SEGMENTS, MAX_RAM_SEGMENTS);
        for seg in self.segments.iter_mut().filter(|s| s.is_ram()) {
            *seg = Segment::Empty;
        }
        let mut allocated = 0;
        for seg in self.segments.iter_mut().rev() {
            if allocated == wanted {
                break;
            }
            if !seg.is_rom() {
                *seg = Segment::Ram(vec![0u8; SEGMENT_SIZE].into_boxed_slice());
                allocated += 1;
            }
        }
        allocated
    }

    /// Install a ROM image starting at `first_segment`. A partial last
    /// segment is padded with 0xFF. Returns the number of segments used.
    pub fn load_rom(&mut self, first_segment: u8, data: &[u8]) -> Result<usize, Ep128Error> {
        if data.is_empty() {
            return Err(Ep128Error::InvalidRom("empty image".to_string()));
        }
        let count = data.len().div_ceil(SEGMENT_SIZE);
        let first = first_segment as usize;
        if first + count > SEGMENT_COUNT {
            return Err(Ep128Error::InvalidRom(format!(
                "{} segments at 0x{:02X} exceed the address space",
                count, first_segment
            )));
        }
        if let Some(clash) = (first..first + count).find(|&s| self.segments[s].is_ram()) {
            return Err(Ep128Error::InvalidRom(format!(
                "segment 0x{:02X} is RAM",
                clash
            )));
        }
        for (i, chunk) in data.chunks(SEGMENT_SIZE).enumerate() {
            let mut seg = vec![0xFFu8; SEGMENT_SIZE];
            seg[..chunk.len()].copy_from_slice(chunk);
            self.segments[first + i] = Segment::Rom(seg.into_boxed_slice());
        }
        Ok(count)
    }

    /// Remove `count` ROM segments starting at `first_segment`.
    pub fn unload_rom(&mut self, first_segment: u8, count: usize) {
        let first = first_segment as usize;
        for seg in self.segments.iter_mut().skip(first).take(count) {
            if seg.is_rom() {
                *seg = Segment::Empty;
            }
        }
    }

    pub fn clear_ram(&mut self) {
        for seg in self.segments.iter_mut() {
            if let Segment::Ram(data) = seg {
                data.fill(0);
            }
        }
    }

    pub fn ram_segment_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_ram()).count()
    }

    pub fn page(&self, index: usize) -> u8 {
        self.pages[index & 3]
    }

    pub fn pages(&self) -> [u8; 4] {
        self.pages
    }

    pub fn set_page(&mut self, index: usize, segment: u8) {
        self.pages[index & 3] = segment;
    }

    /// Segment mapped at CPU address `addr`.
    pub fn segment_at(&self, addr: u16) -> u8 {
        self.pages[(addr >> 14) as usize]
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.read_segment(self.segment_at(addr), addr)
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        let segment = self.segment_at(addr) as usize;
        if let Segment::Ram(data) = &mut self.segments[segment] {
            data[addr as usize & (SEGMENT_SIZE - 1)] = value;
        }
    }

    /// Read from the 64 KiB video RAM window as Nick sees it.
    pub fn video_read(&self, addr: u16) -> u8 {
        let segment = VIDEO_SEGMENT | (addr >> 14) as u8;
        self.read_segment(segment, addr)
    }

    fn read_segment(&self, segment: u8, addr: u16) -> u8 {
        match &self.segments[segment as usize] {
            Segment::Ram(data) | Segment::Rom(data) => data[addr as usize & (SEGMENT_SIZE - 1)],
            Segment::Empty => 0xFF,
        }
    }

    /// Write every RAM segment as its index followed by its contents.
    pub fn save(&self, buf: &mut StateBuffer) {
        buf.write_u16(self.ram_segment_count() as u16);
        for (index, seg) in self.segments.iter().enumerate() {
            if let Segment::Ram(data) = seg {
                buf.write_u8(index as u8);
                buf.write_bytes(data);
            }
        }
    }

    pub fn load(buf: &mut StateBuffer) -> Result<RamImage, StateError> {
        let count = buf.read_u16()? as usize;
        if count > MAX_RAM_SEGMENTS {
            return Err(StateError::Invalid(format!("{} RAM segments", count)));
        }
        let mut segments: Vec<(u8, Box<[u8]>)> = Vec::with_capacity(count);
        for _ in 0..count {
            let index = buf.read_u8()?;
            if segments.iter().any(|(i, _)| *i == index) {
                return Err(StateError::Invalid(format!(
                    "duplicate RAM segment 0x{:02X}",
                    index
                )));
            }
            let data = buf.read_bytes(SEGMENT_SIZE)?.to_vec().into_boxed_slice();
            segments.push((index, data));
        }
        Ok(RamImage { segments })
    }

    /// Check that `image` can be installed without overwriting ROM.
    pub fn check_ram_image(&self, image: &RamImage) -> Result<(), StateError> {
        match image
            .segments
            .iter()
            .find(|(i, _)| self.segments[*i as usize].is_rom())
        {
            Some((i, _)) => Err(StateError::Invalid(format!(
                "RAM segment 0x{:02X} overlaps ROM",
                i
            ))),
            None => Ok(()),
        }
    }

    /// Replace all RAM with `image`. Call [`Memory::check_ram_image`] first.
    pub fn restore_ram(&mut self, image: RamImage) {
        for seg in self.segments.iter_mut().filter(|s| s.is_ram()) {
            *seg = Segment::Empty;
        }
        for (index, data) in image.segments {
            let slot = &mut self.segments[index as usize];
            if !slot.is_rom() {
                *slot = Segment::Ram(data);
            }
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_allocated_from_top() {
        let mut mem = Memory::new();
        assert_eq!(mem.configure_ram(128), 8);
        mem.set_page(3, 0xF8);
        mem.write(0xC000, 0x42);
        assert_eq!(mem.read(0xC000), 0x42);
        mem.set_page(3, 0xF7);
        mem.write(0xC000, 0x42);
        assert_eq!(mem.read(0xC000), 0xFF);
    }

    #[test]
    fn test_ram_size_rounding_and_clamp() {
        let mut mem = Memory::new();
        assert_eq!(mem.configure_ram(1), 4);
        assert_eq!(mem.configure_ram(65), 5);
        assert_eq!(mem.configure_ram(100_000), 232);
        assert_eq!(mem.ram_segment_count(), 232);
    }

    #[test]
    fn test_rom_is_read_only_and_padded() {
        let mut mem = Memory::new();
        assert_eq!(mem.load_rom(0, &[0x3E, 0x01]).unwrap(), 1);
        mem.write(0x0000, 0x00);
        assert_eq!(mem.read(0x0000), 0x3E);
        assert_eq!(mem.read(0x0002), 0xFF);
    }

    #[test]
    fn test_rom_may_not_replace_ram() {
        let mut mem = Memory::new();
        mem.configure_ram(64);
        assert!(matches!(
            mem.load_rom(0xFC, &[0; 16]),
            Err(Ep128Error::InvalidRom(_))
        ));
        assert!(mem.load_rom(0xFE, &vec![0; SEGMENT_SIZE * 3]).is_err());
    }

    #[test]
    fn test_video_window() {
        let mut mem = Memory::new();
        mem.configure_ram(64);
        mem.set_page(1, 0xFD);
        mem.write(0x4010, 0x99);
        assert_eq!(mem.video_read(0x4010), 0x99);
        assert_eq!(mem.video_read(0x0010), 0x00);
    }

    #[test]
    fn test_ram_image_roundtrip() {
        let mut mem = Memory::new();
        mem.configure_ram(64);
        mem.set_page(0, 0xFE);
        mem.write(0x1234, 0x56);

        let mut buf = StateBuffer::new();
        mem.save(&mut buf);
        let mut buf = StateBuffer::from_bytes(buf.into_inner());
        let image = Memory::load(&mut buf).unwrap();

        let mut other = Memory::new();
        other.configure_ram(128);
        other.check_ram_image(&image).unwrap();
        other.restore_ram(image);
        other.set_page(0, 0xFE);
        assert_eq!(other.read(0x1234), 0x56);
        assert_eq!(other.ram_segment_count(), 4);
    }

    #[test]
    fn test_ram_image_over_rom_is_rejected() {
        let mut mem = Memory::new();
        mem.configure_ram(64);
        let mut buf = StateBuffer::new();
        mem.save(&mut buf);
        let image = Memory::load(&mut StateBuffer::from_bytes(buf.into_inner())).unwrap();

        let mut other = Memory::new();
        other.load_rom(0xFC, &[0; 16]).unwrap();
        assert!(other.check_ram_image(&image).is_err());
    }
}
