//! EXDOS floppy interface: a WD1770-style register file per drive.
//!
//! No disk images are attached, so sector commands finish at once with
//! "record not found". Head positioning commands update the track register.

use serde::Serialize;

const STATUS_TRACK0: u8 = 0x04;
const STATUS_NOT_FOUND: u8 = 0x10;

/// Drive select, side and disk change register, at port 0x18/0x1C.
pub const CONTROL_OFFSET: u8 = 0x08;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
struct Wd177x {
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    irq: bool,
    drq: bool,
    disk_changed: bool,
}

impl Wd177x {
    fn reset(&mut self) {
        *self = Self {
            disk_changed: self.disk_changed,
            ..Self::default()
        };
    }

    fn write_command(&mut self, command: u8) {
        self.drq = false;
        match command {
            0x00..=0x0F => {
                self.track = 0;
                self.status = STATUS_TRACK0;
            }
            0x10..=0x1F => {
                self.track = self.data;
                self.status = if self.track == 0 { STATUS_TRACK0 } else { 0 };
            }
            0x20..=0x7F => {
                match command & 0x60 {
                    0x40 => self.track = self.track.wrapping_add(1),
                    0x60 => self.track = self.track.saturating_sub(1),
                    _ => {}
                }
                self.status = if self.track == 0 { STATUS_TRACK0 } else { 0 };
            }
            0xD0..=0xDF => {
                self.status = 0;
                self.irq = command & 0x0F != 0;
                return;
            }
            _ => self.status = STATUS_NOT_FOUND,
        }
        self.irq = true;
    }

    fn read_status(&mut self) -> u8 {
        self.irq = false;
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Floppy {
    drives: [Wd177x; 4],
    current: Option<usize>,
    side: bool,
}

impl Floppy {
    pub fn new() -> Self {
        Self {
            drives: Default::default(),
            current: None,
            side: false,
        }
    }

    /// Deselect all drives and reset every controller.
    pub fn reset(&mut self) {
        self.current = None;
        self.side = false;
        for drive in self.drives.iter_mut() {
            drive.reset();
        }
    }

    /// Read a register at `offset` (0-3, or [`CONTROL_OFFSET`]).
    pub fn read(&mut self, offset: u8) -> u8 {
        let Some(drive) = self.current.map(|i| &mut self.drives[i]) else {
            return 0x00;
        };
        match offset {
            0 => drive.read_status(),
            1 => drive.track,
            2 => drive.sector,
            3 => drive.data,
            CONTROL_OFFSET => {
                (if drive.irq { 0x02 } else { 0 })
                    | (if drive.disk_changed { 0x40 } else { 0 })
                    | (if drive.drq { 0x80 } else { 0 })
            }
            _ => 0x00,
        }
    }

    pub fn write(&mut self, offset: u8, value: u8) {
        if offset == CONTROL_OFFSET {
            self.current = (0..4usize).find(|&bit| value & (1u8 << bit) != 0);
            if let Some(i) = self.current {
                if value & 0x40 != 0 {
                    self.drives[i].disk_changed = false;
                }
                self.side = value & 0x10 != 0;
            }
            return;
        }
        let Some(drive) = self.current.map(|i| &mut self.drives[i]) else {
            return;
        };
        match offset {
            0 => drive.write_command(value),
            1 => drive.track = value,
            2 => drive.sector = value,
            3 => drive.data = value,
            _ => {}
        }
    }
}

impl Default for Floppy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_drive_selected() {
        let mut fdc = Floppy::new();
        fdc.write(1, 5);
        assert_eq!(fdc.read(1), 0x00);
        assert_eq!(fdc.read(CONTROL_OFFSET), 0x00);
    }

    #[test]
    fn test_seek_and_irq() {
        let mut fdc = Floppy::new();
        fdc.write(CONTROL_OFFSET, 0x02);
        assert_eq!(fdc.current, Some(1));
        fdc.write(3, 40);
        fdc.write(0, 0x10);
        assert_eq!(fdc.read(1), 40);
        assert_eq!(fdc.read(CONTROL_OFFSET) & 0x02, 0x02);
        assert_eq!(fdc.read(0), 0x00);
        assert_eq!(fdc.read(CONTROL_OFFSET) & 0x02, 0x00);

        fdc.write(0, 0x00);
        assert_eq!(fdc.read(0), STATUS_TRACK0);
        fdc.write(0, 0x80);
        assert_eq!(fdc.read(0), STATUS_NOT_FOUND);
    }

    #[test]
    fn test_disk_change_flag() {
        let mut fdc = Floppy::new();
        fdc.drives[0].disk_changed = true;
        fdc.write(CONTROL_OFFSET, 0x01);
        assert_eq!(fdc.read(CONTROL_OFFSET), 0x40);
        fdc.write(CONTROL_OFFSET, 0x41);
        assert_eq!(fdc.read(CONTROL_OFFSET), 0x00);
    }

    #[test]
    fn test_reset_deselects() {
        let mut fdc = Floppy::new();
        fdc.write(CONTROL_OFFSET, 0x04);
        fdc.write(1, 9);
        fdc.reset();
        assert_eq!(fdc.current, None);
        fdc.write(CONTROL_OFFSET, 0x04);
        assert_eq!(fdc.read(1), 0);
    }
}
