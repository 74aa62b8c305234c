use super::queue::{lock, Message, MessageQueue};
use super::viewport::{BorderScan, ViewportRect, SCREEN_HEIGHT, SCREEN_WIDTH};
use super::{DisplayConfig, Geometry};
use crate::logging::{log, LogCategory, LogLevel};
use crate::scanline::{ScanLine, LINE_WIDTH, MAX_LINE_INDEX};
use crate::types::Frame;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// Role of one of the three frame buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// Target of the frame being assembled
    Active,
    /// Last completed frame, read by the host
    Ready,
    /// Previous field, used to fill missing lines in interlaced output
    Spare,
    /// Host-supplied buffer standing in for the active one for a single frame
    External,
}

/// Three owned frame buffers whose roles rotate instead of their contents.
///
/// The host only ever locks the buffer tagged [`BufferRole::Ready`]; the
/// assembler locks the others. Roles are swapped under a separate short lock.
pub struct FrameBuffers {
    slots: [Mutex<Frame>; 3],
    roles: Mutex<[BufferRole; 3]>,
}

impl FrameBuffers {
    pub fn new() -> Self {
        Self {
            slots: [
                Mutex::new(Frame::new(0, 0)),
                Mutex::new(Frame::new(0, 0)),
                Mutex::new(Frame::new(0, 0)),
            ],
            roles: Mutex::new([BufferRole::Active, BufferRole::Ready, BufferRole::Spare]),
        }
    }

    fn index_of(&self, role: BufferRole) -> usize {
        let roles = lock(&self.roles);
        roles.iter().position(|&r| r == role).unwrap_or(0)
    }

    pub fn role_of(&self, index: usize) -> BufferRole {
        lock(&self.roles)[index % 3]
    }

    fn set_role(&self, index: usize, role: BufferRole) {
        lock(&self.roles)[index] = role;
    }

    /// Publish the assembled buffer: it becomes ready and the previous ready
    /// buffer becomes the next assembly target.
    fn publish(&self) {
        let mut roles = lock(&self.roles);
        for role in roles.iter_mut() {
            *role = match *role {
                BufferRole::Active | BufferRole::External => BufferRole::Ready,
                BufferRole::Ready => BufferRole::Active,
                BufferRole::Spare => BufferRole::Spare,
            };
        }
    }

    pub fn with_ready<R>(&self, f: impl FnOnce(&Frame) -> R) -> R {
        let index = self.index_of(BufferRole::Ready);
        let frame = lock(&self.slots[index]);
        f(&frame)
    }

    pub fn take_ready(&self) -> Frame {
        let index = self.index_of(BufferRole::Ready);
        let mut frame = lock(&self.slots[index]);
        std::mem::replace(&mut *frame, Frame::new(0, 0))
    }
}

impl Default for FrameBuffers {
    fn default() -> Self {
        Self::new()
    }
}

fn resize(frame: &mut Frame, width: usize, height: usize) {
    if frame.width as usize != width || frame.height as usize != height {
        frame.width = width as u32;
        frame.height = height as u32;
        frame.pixels.clear();
        frame.pixels.resize(width * height, 0);
    }
}

fn grayscale_palette() -> Box<[u32; 256]> {
    let mut p = Box::new([0u32; 256]);
    for (i, c) in p.iter_mut().enumerate() {
        let v = i as u32;
        *c = (v << 16) | (v << 8) | v;
    }
    p
}

/// Consumer side of the display pipeline.
///
/// Keeps the latest line for every line index, and turns them into a frame
/// each time a field ends.
pub struct FrameAssembler {
    config: DisplayConfig,
    lines: Vec<Option<Box<ScanLine>>>,
    palette: Box<[u32; 256]>,
    decoded: Box<[u8; LINE_WIDTH]>,
    row: Vec<u32>,
    viewport: ViewportRect,
    interlaced: bool,
    pending_interlaced: bool,
    dirty: bool,
    scan_requested: bool,
    external: Option<Frame>,
    notify: Sender<Geometry>,
}

impl FrameAssembler {
    pub(crate) fn new(config: DisplayConfig, notify: Sender<Geometry>) -> Self {
        Self {
            config,
            lines: (0..=MAX_LINE_INDEX).map(|_| None).collect(),
            palette: grayscale_palette(),
            decoded: Box::new([0; LINE_WIDTH]),
            row: vec![0; LINE_WIDTH],
            viewport: ViewportRect::FULL,
            interlaced: false,
            pending_interlaced: false,
            dirty: true,
            scan_requested: false,
            external: None,
            notify,
        }
    }

    pub fn viewport(&self) -> ViewportRect {
        self.viewport
    }

    pub fn is_interlaced(&self) -> bool {
        self.interlaced
    }

    /// Output geometry for the current mode and viewport.
    pub fn geometry(&self) -> Geometry {
        let vp = self.viewport;
        let height = if !self.interlaced && self.config.half_frame {
            vp.height().div_ceil(2)
        } else {
            vp.height()
        };
        let aspect = (4.0 / 3.0)
            * (vp.width() as f32 / SCREEN_WIDTH as f32)
            / (vp.height() as f32 / SCREEN_HEIGHT as f32);
        Geometry {
            width: vp.width() as u32,
            height: height as u32,
            aspect,
        }
    }

    fn change_viewport(&mut self, viewport: ViewportRect) {
        self.viewport = viewport;
        self.dirty = true;
        self.announce();
    }

    fn announce(&self) {
        let geometry = self.geometry();
        log(LogCategory::Video, LogLevel::Info, || {
            format!(
                "Display: resolution {}x{} aspect {:.3}",
                geometry.width, geometry.height, geometry.aspect
            )
        });
        // the host may have stopped listening; the change is still applied
        let _ = self.notify.send(geometry);
    }

    /// Drain queued messages until a field boundary. Returns true if a field
    /// ended and the frame should be drawn.
    pub(crate) fn check_events(&mut self, queue: &MessageQueue) -> bool {
        while let Some(message) = queue.pop() {
            match message {
                Message::Line(line) => {
                    let index = line.line();
                    if index > MAX_LINE_INDEX {
                        queue.recycle(line);
                        continue;
                    }
                    match &self.lines[index] {
                        Some(current) if **current == *line => queue.recycle(line),
                        _ => {
                            if let Some(old) = self.lines[index].replace(line) {
                                queue.recycle(old);
                            }
                            self.dirty = true;
                        }
                    }
                }
                Message::FrameDone { interlaced } => {
                    self.pending_interlaced = interlaced;
                    return true;
                }
                Message::SetPalette(palette) => {
                    self.palette = palette;
                    self.dirty = true;
                }
                Message::SetViewport(viewport) => self.change_viewport(viewport),
                Message::ResetViewport => self.change_viewport(ViewportRect::FULL),
                Message::FitViewport => {
                    self.scan_requested = true;
                    self.dirty = true;
                }
                Message::ExternalBuffer(frame) => self.external = Some(frame),
            }
        }
        false
    }

    /// Assemble buffered lines into the active buffer and publish it.
    ///
    /// Returns false if nothing changed since the previous frame, in which
    /// case the ready frame is left as is.
    pub fn draw(&mut self, buffers: &FrameBuffers) -> bool {
        if self.pending_interlaced != self.interlaced {
            self.interlaced = self.pending_interlaced;
            self.viewport = ViewportRect::FULL;
            self.dirty = true;
            self.announce();
        }
        if !self.dirty && self.external.is_none() {
            return false;
        }

        let geometry = self.geometry();
        let (width, height) = (geometry.width as usize, geometry.height as usize);
        let active_index = buffers.index_of(BufferRole::Active);
        let spare_index = buffers.index_of(BufferRole::Spare);
        let mut active = lock(&buffers.slots[active_index]);
        let mut spare = lock(&buffers.slots[spare_index]);
        if let Some(external) = self.external.take() {
            *active = external;
            buffers.set_role(active_index, BufferRole::External);
        }
        resize(&mut active, width, height);
        resize(&mut spare, width, height);

        let mut scan = self.scan_requested.then(|| BorderScan::new(self.config.border));
        let vp = self.viewport;
        for y in 0..SCREEN_HEIGHT {
            if !self.interlaced && y & 1 != 0 {
                continue;
            }
            let visible = vp.contains_row(y);
            if !visible && scan.is_none() {
                continue;
            }
            let Some(line) = &self.lines[y] else {
                continue;
            };
            line.decode(&mut self.decoded);
            for (dst, &index) in self.row.iter_mut().zip(self.decoded.iter()) {
                *dst = self.palette[index as usize];
            }
            if let Some(scan) = scan.as_mut() {
                scan.scan_row(y, &self.row);
            }
            if !visible {
                continue;
            }

            let src = &self.row[vp.left()..=vp.right()];
            let cur = y - vp.top();
            let row = |r: usize| r * width..(r + 1) * width;
            if self.interlaced {
                active.pixels[row(cur)].copy_from_slice(src);
                spare.pixels[row(cur)].copy_from_slice(src);
                if cur + 1 < height {
                    active.pixels[row(cur + 1)].copy_from_slice(&spare.pixels[row(cur + 1)]);
                }
            } else if self.config.half_frame {
                active.pixels[row(cur / 2)].copy_from_slice(src);
            } else {
                active.pixels[row(cur)].copy_from_slice(src);
                if cur + 1 < height {
                    active.pixels[row(cur + 1)].copy_from_slice(src);
                }
            }
        }
        drop(active);
        drop(spare);
        buffers.publish();
        self.dirty = false;

        if let Some(scan) = scan {
            self.scan_requested = false;
            match scan.result() {
                Some(rect) if rect != self.viewport => self.change_viewport(rect),
                Some(_) => {}
                None => log(LogCategory::Video, LogLevel::Debug, || {
                    "Display: no plausible content area found".to_string()
                }),
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{channel, Receiver};

    fn solid(color: u8) -> Vec<u8> {
        (0..48).flat_map(|_| [0x01, color]).collect()
    }

    fn setup(half_frame: bool) -> (FrameAssembler, MessageQueue, FrameBuffers, Receiver<Geometry>) {
        let (tx, rx) = channel();
        let config = DisplayConfig {
            half_frame,
            ..Default::default()
        };
        (FrameAssembler::new(config, tx), MessageQueue::new(), FrameBuffers::new(), rx)
    }

    fn push_line(q: &MessageQueue, index: usize, bytes: &[u8]) {
        let mut line = q.allocate_line();
        line.copy_line(bytes, index);
        q.push(Message::Line(line));
    }

    #[test]
    fn test_half_frame_packs_even_lines() {
        let (mut a, q, buffers, _rx) = setup(true);
        push_line(&q, 0, &solid(1));
        push_line(&q, 2, &solid(2));
        push_line(&q, 3, &solid(9)); // odd lines are skipped outside interlace
        q.push(Message::FrameDone { interlaced: false });
        assert!(a.check_events(&q));
        assert!(a.draw(&buffers));

        buffers.with_ready(|f| {
            assert_eq!((f.width, f.height), (768, 288));
            assert_eq!(f.pixels[0], 0x010101);
            assert_eq!(f.pixels[768], 0x020202);
            assert!(!f.pixels.contains(&0x090909));
        });
    }

    #[test]
    fn test_double_scan_duplicates_lines() {
        let (mut a, q, buffers, _rx) = setup(false);
        push_line(&q, 4, &solid(3));
        q.push(Message::FrameDone { interlaced: false });
        a.check_events(&q);
        a.draw(&buffers);
        buffers.with_ready(|f| {
            assert_eq!((f.width, f.height), (768, 576));
            assert_eq!(f.pixels[4 * 768], 0x030303);
            assert_eq!(f.pixels[5 * 768 + 767], 0x030303);
            assert_eq!(f.pixels[6 * 768], 0);
        });
    }

    #[test]
    fn test_duplicate_line_is_dropped_and_frame_unchanged() {
        let (mut a, q, buffers, _rx) = setup(true);
        push_line(&q, 10, &solid(5));
        q.push(Message::FrameDone { interlaced: false });
        a.check_events(&q);
        assert!(a.draw(&buffers));

        push_line(&q, 10, &solid(5));
        q.push(Message::FrameDone { interlaced: false });
        a.check_events(&q);
        assert!(!a.draw(&buffers), "identical field should not be redrawn");
        // the duplicate went back to the free list
        assert_eq!(q.free_len(), 1);
    }

    #[test]
    fn test_buffer_roles_rotate() {
        let (mut a, q, buffers, _rx) = setup(true);
        assert_eq!(buffers.role_of(0), BufferRole::Active);
        push_line(&q, 0, &solid(1));
        q.push(Message::FrameDone { interlaced: false });
        a.check_events(&q);
        a.draw(&buffers);
        assert_eq!(buffers.role_of(0), BufferRole::Ready);
        assert_eq!(buffers.role_of(1), BufferRole::Active);
        assert_eq!(buffers.role_of(2), BufferRole::Spare);
    }

    #[test]
    fn test_external_buffer_is_used_once() {
        let (mut a, q, buffers, _rx) = setup(true);
        let mut external = Frame::new(768, 288);
        external.pixels[0] = 0xDEAD;
        q.push(Message::ExternalBuffer(external));
        push_line(&q, 2, &solid(4));
        q.push(Message::FrameDone { interlaced: false });
        a.check_events(&q);
        assert!(a.draw(&buffers));
        buffers.with_ready(|f| {
            // untouched row 0 keeps the host's content
            assert_eq!(f.pixels[0], 0xDEAD);
            assert_eq!(f.pixels[768], 0x040404);
        });
        assert!(a.external.is_none());
    }

    #[test]
    fn test_interlace_transition_resets_viewport_and_notifies() {
        let (mut a, q, buffers, rx) = setup(true);
        q.push(Message::SetViewport(ViewportRect::new(10, 10, 500, 400).unwrap()));
        q.push(Message::FrameDone { interlaced: false });
        a.check_events(&q);
        a.draw(&buffers);
        assert_eq!(rx.try_iter().count(), 1);

        q.push(Message::FrameDone { interlaced: true });
        a.check_events(&q);
        a.draw(&buffers);
        let changes: Vec<Geometry> = rx.try_iter().collect();
        assert_eq!(changes.len(), 1);
        assert_eq!((changes[0].width, changes[0].height), (768, 576));
        assert!(a.viewport().is_full());
    }

    #[test]
    fn test_interlaced_lines_fill_both_fields() {
        let (mut a, q, buffers, _rx) = setup(true);
        push_line(&q, 6, &solid(6));
        push_line(&q, 7, &solid(7));
        q.push(Message::FrameDone { interlaced: true });
        a.check_events(&q);
        a.draw(&buffers);
        buffers.with_ready(|f| {
            assert_eq!(f.height, 576);
            assert_eq!(f.pixels[6 * 768], 0x060606);
            assert_eq!(f.pixels[7 * 768], 0x070707);
        });
    }
}
