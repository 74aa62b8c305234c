use super::VsyncConfig;
use crate::scanline::MAX_LINE_INDEX;

/// What the producer should do with the line the video chip just emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineStep {
    /// Output line index, or `None` while outside the visible field
    pub line: Option<usize>,
    /// A field ended after this line
    pub frame_done: bool,
}

/// Producer-side field timing.
///
/// Lines advance by two per emitted scanline so that the odd and even
/// fields of an interlaced picture interleave. A field starts a fixed
/// number of lines after the vsync pulse; a pulse that begins in the middle
/// of a line marks an odd field and keeps interlaced output alive for a few
/// more fields.
#[derive(Debug, Clone)]
pub struct FieldTracker {
    config: VsyncConfig,
    cur_line: i32,
    vsync_cnt: i32,
    vsync_state: bool,
    odd_field: bool,
    interlaced_frame_count: u32,
    frame_count: u64,
}

impl FieldTracker {
    pub fn new(config: VsyncConfig) -> Self {
        Self {
            config,
            cur_line: 0,
            vsync_cnt: 0,
            vsync_state: false,
            odd_field: false,
            interlaced_frame_count: 0,
            frame_count: 0,
        }
    }

    fn restart_count(&self) -> i32 {
        2 - self.config.offset_lines as i32
    }

    fn min_count(&self) -> i32 {
        self.config.min_lines as i32 + self.restart_count()
    }

    fn max_count(&self) -> i32 {
        self.config.max_lines as i32 + self.restart_count()
    }

    /// Account for one scanline from the video chip.
    pub fn line_step(&mut self) -> LineStep {
        let line = (0..=MAX_LINE_INDEX as i32)
            .contains(&self.cur_line)
            .then_some(self.cur_line as usize);

        let mut frame_done = false;
        if self.vsync_cnt != 0 {
            self.cur_line += 2;
            if self.vsync_cnt >= self.min_count()
                && (self.vsync_state || self.vsync_cnt >= self.max_count())
            {
                self.vsync_cnt = self.restart_count();
            }
            self.vsync_cnt += 1;
        } else {
            self.cur_line = if self.odd_field { -1 } else { 0 };
            self.vsync_cnt += 1;
            self.frame_count += 1;
            frame_done = true;
        }

        LineStep { line, frame_done }
    }

    /// Record a vsync edge reported at `slot` within the current line.
    pub fn vsync_state_change(&mut self, new_state: bool, slot: u32) {
        self.vsync_state = new_state;
        if new_state && self.vsync_cnt >= self.min_count() {
            self.vsync_cnt = self.restart_count();
            self.odd_field = (self.config.odd_slot_min..self.config.odd_slot_max).contains(&slot);
            if self.odd_field {
                self.interlaced_frame_count = self.config.interlace_hold_fields;
            } else {
                self.interlaced_frame_count = self.interlaced_frame_count.saturating_sub(1);
            }
        }
    }

    pub fn is_interlaced(&self) -> bool {
        self.interlaced_frame_count > 0
    }

    pub fn interlaced_frame_count(&self) -> u32 {
        self.interlaced_frame_count
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_odd_field(&self) -> bool {
        self.odd_field
    }
}
