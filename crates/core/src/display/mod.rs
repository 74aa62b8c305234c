//! Display pipeline between the emulation thread and a dedicated display
//! thread.
//!
//! The emulation side ([`DisplayProducer`]) turns video chip output into
//! line and field messages. The display side ([`FrameAssembler`]) decodes
//! buffered lines into a frame whenever a field ends. The host owns the
//! [`Display`] handle, which starts and stops the thread and exposes the
//! last assembled frame.
//!
//! # Modes
//!
//! - **interlace**: both fields at full height, entered when a vsync pulse
//!   starts mid-line and left after a few fields without one
//! - **half-frame**: one field packed into half height
//! - **double-scan**: one field with every line doubled

mod assembler;
mod field;
mod queue;
mod viewport;

pub use assembler::{BufferRole, FrameAssembler, FrameBuffers};
pub use field::{FieldTracker, LineStep};
pub use viewport::{BorderDetectConfig, ViewportError, ViewportRect, SCREEN_HEIGHT, SCREEN_WIDTH};

use crate::logging::{log, LogCategory, LogLevel};
use crate::types::Frame;
use crate::VideoSink;
use queue::{Message, MessageQueue, Signal};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Field timing thresholds, in lines and chip slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VsyncConfig {
    /// A vsync pulse is only accepted this many lines into a field
    pub min_lines: u32,
    /// A field is closed without vsync after this many lines
    pub max_lines: u32,
    /// Lines between the start of vsync and the first visible line
    pub offset_lines: u32,
    /// Vsync starting in this slot window marks an odd field
    pub odd_slot_min: u32,
    pub odd_slot_max: u32,
    /// Non-odd fields tolerated before interlaced output is dropped
    pub interlace_hold_fields: u32,
}

impl Default for VsyncConfig {
    fn default() -> Self {
        Self {
            min_lines: 261,
            max_lines: 342,
            offset_lines: 30,
            odd_slot_min: 20,
            odd_slot_max: 48,
            interlace_hold_fields: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Pack non-interlaced output into half height instead of doubling lines
    pub half_frame: bool,
    pub border: BorderDetectConfig,
    pub vsync: VsyncConfig,
    /// Upper bound for every wait between the two threads
    pub sync_timeout_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            half_frame: false,
            border: BorderDetectConfig::default(),
            vsync: VsyncConfig::default(),
            sync_timeout_ms: 10,
        }
    }
}

/// Output dimensions reported to the host on every resolution change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub aspect: f32,
}

pub(crate) struct Shared {
    queue: MessageQueue,
    /// Producer to consumer: new messages are queued
    wake: Signal,
    /// Consumer to producer: the queue has been drained
    caught_up: Signal,
    buffers: FrameBuffers,
    frames_assembled: AtomicU64,
    timeout: Duration,
}

impl Shared {
    /// Drain the queue, drawing a frame at every field boundary.
    fn pump(&self, assembler: &mut FrameAssembler) -> usize {
        let mut frames = 0;
        while assembler.check_events(&self.queue) {
            if assembler.draw(&self.buffers) {
                self.frames_assembled.fetch_add(1, Ordering::Release);
            }
            frames += 1;
        }
        frames
    }
}

fn display_thread(shared: Arc<Shared>, mut assembler: FrameAssembler) {
    log(LogCategory::Video, LogLevel::Info, || {
        "Display: thread started".to_string()
    });
    while !shared.queue.is_exiting() {
        shared.wake.wait(shared.timeout);
        shared.pump(&mut assembler);
        shared.caught_up.notify();
    }
    log(LogCategory::Video, LogLevel::Info, || {
        "Display: thread stopped".to_string()
    });
}

/// Host handle of the display pipeline.
///
/// Construction does not spawn anything; call [`start`](Self::start) to run
/// assembly on its own thread, or [`process_pending`](Self::process_pending)
/// to assemble on the calling thread instead.
pub struct Display {
    config: DisplayConfig,
    shared: Arc<Shared>,
    assembler: Option<FrameAssembler>,
    worker: Option<JoinHandle<()>>,
    resolution_changes: Receiver<Geometry>,
    geometry: Geometry,
}

impl Display {
    pub fn new(config: DisplayConfig) -> Self {
        let (tx, rx) = channel();
        let assembler = FrameAssembler::new(config, tx);
        let geometry = assembler.geometry();
        Self {
            config,
            shared: Arc::new(Shared {
                queue: MessageQueue::new(),
                wake: Signal::new(false),
                caught_up: Signal::new(true),
                buffers: FrameBuffers::new(),
                frames_assembled: AtomicU64::new(0),
                timeout: Duration::from_millis(config.sync_timeout_ms),
            }),
            assembler: Some(assembler),
            worker: None,
            resolution_changes: rx,
            geometry,
        }
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Emulation-side handle to hand to the video chip.
    pub fn producer(&self) -> DisplayProducer {
        DisplayProducer {
            shared: Arc::clone(&self.shared),
            field: FieldTracker::new(self.config.vsync),
        }
    }

    /// Spawn the display thread. Calling it again is a no-op.
    pub fn start(&mut self) -> io::Result<()> {
        let Some(assembler) = self.assembler.take() else {
            return Ok(());
        };
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("display".to_string())
            .spawn(move || display_thread(shared, assembler))?;
        self.worker = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Assemble queued fields on the calling thread. Does nothing once the
    /// display thread has been started. Returns the number of fields seen.
    pub fn process_pending(&mut self) -> usize {
        match self.assembler.as_mut() {
            Some(assembler) => self.shared.pump(assembler),
            None => 0,
        }
    }

    /// Wake the display thread and, if `sync_required`, wait a bounded time
    /// for it to drain the queue.
    pub fn wake_display(&self, sync_required: bool) {
        self.shared.wake.notify();
        if sync_required && self.worker.is_some() {
            self.shared.caught_up.wait(self.shared.timeout);
        }
    }

    /// Replace the color-index to XRGB mapping.
    pub fn set_palette(&self, palette: [u32; 256]) {
        self.shared.queue.push(Message::SetPalette(Box::new(palette)));
    }

    pub fn set_viewport(
        &self,
        left: usize,
        top: usize,
        right: usize,
        bottom: usize,
    ) -> Result<(), ViewportError> {
        let rect = ViewportRect::new(left, top, right, bottom)?;
        self.shared.queue.push(Message::SetViewport(rect));
        Ok(())
    }

    pub fn reset_viewport(&self) {
        self.shared.queue.push(Message::ResetViewport);
    }

    /// Detect the content area on the next assembled frame and crop to it.
    pub fn fit_viewport_to_content(&self) {
        self.shared.queue.push(Message::FitViewport);
    }

    /// Assemble the next frame into `frame` instead of an internal buffer.
    pub fn submit_external_buffer(&self, frame: Frame) {
        self.shared.queue.push(Message::ExternalBuffer(frame));
    }

    pub fn with_ready_frame<R>(&self, f: impl FnOnce(&Frame) -> R) -> R {
        self.shared.buffers.with_ready(f)
    }

    pub fn ready_frame(&self) -> Frame {
        self.with_ready_frame(Frame::clone)
    }

    /// Move the ready frame out, leaving an empty one in its place.
    pub fn take_ready_frame(&self) -> Frame {
        self.shared.buffers.take_ready()
    }

    /// Number of frames that produced new output.
    pub fn frames_assembled(&self) -> u64 {
        self.shared.frames_assembled.load(Ordering::Acquire)
    }

    /// Next pending resolution change, oldest first.
    pub fn poll_resolution_change(&mut self) -> Option<Geometry> {
        let change = self.resolution_changes.try_recv().ok()?;
        self.geometry = change;
        Some(change)
    }

    /// Geometry as of the last polled resolution change.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.shared.queue.set_exit();
        self.shared.wake.notify();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log(LogCategory::Video, LogLevel::Error, || {
                    "Display: thread panicked".to_string()
                });
            }
        }
        self.shared.queue.drain();
    }
}

/// Emulation-side end of the display pipeline.
pub struct DisplayProducer {
    shared: Arc<Shared>,
    field: FieldTracker,
}

impl DisplayProducer {
    pub fn field(&self) -> &FieldTracker {
        &self.field
    }
}

impl VideoSink for DisplayProducer {
    fn draw_line(&mut self, bytes: &[u8]) {
        let step = self.field.line_step();
        if let Some(index) = step.line {
            let mut line = self.shared.queue.allocate_line();
            line.copy_line(bytes, index);
            self.shared.queue.push(Message::Line(line));
        }
        if step.frame_done {
            self.shared.queue.push(Message::FrameDone {
                interlaced: self.field.is_interlaced(),
            });
        }
        self.shared.wake.notify();
    }

    fn vsync_state_change(&mut self, new_state: bool, current_slot: u32) {
        self.field.vsync_state_change(new_state, current_slot);
    }
}
