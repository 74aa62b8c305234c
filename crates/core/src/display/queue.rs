use super::viewport::ViewportRect;
use crate::scanline::ScanLine;
use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Messages from the emulation and host threads to the display thread.
pub(crate) enum Message {
    Line(Box<ScanLine>),
    /// End of a field; carries the interlace state at the vsync that closed it
    FrameDone { interlaced: bool },
    SetPalette(Box<[u32; 256]>),
    SetViewport(ViewportRect),
    ResetViewport,
    FitViewport,
    ExternalBuffer(Frame),
}

struct QueueState {
    messages: VecDeque<Message>,
    free: Vec<Box<ScanLine>>,
    exit: bool,
}

/// FIFO shared by producer and consumer, with a free list of line buffers.
///
/// The mutex is only held while splicing a message in or out.
pub(crate) struct MessageQueue {
    state: Mutex<QueueState>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                free: Vec::new(),
                exit: false,
            }),
        }
    }

    /// Take a recycled line buffer, or allocate one if the free list is empty.
    pub fn allocate_line(&self) -> Box<ScanLine> {
        let recycled = lock(&self.state).free.pop();
        recycled.unwrap_or_default()
    }

    /// Return a line buffer to the free list.
    pub fn recycle(&self, line: Box<ScanLine>) {
        let mut state = lock(&self.state);
        if !state.exit {
            state.free.push(line);
        }
    }

    /// Append a message. Messages queued after shutdown are dropped.
    pub fn push(&self, message: Message) {
        let mut state = lock(&self.state);
        if state.exit {
            return;
        }
        state.messages.push_back(message);
    }

    pub fn pop(&self) -> Option<Message> {
        lock(&self.state).messages.pop_front()
    }

    pub fn set_exit(&self) {
        lock(&self.state).exit = true;
    }

    pub fn is_exiting(&self) -> bool {
        lock(&self.state).exit
    }

    /// Release everything still queued or on the free list.
    pub fn drain(&self) {
        let mut state = lock(&self.state);
        state.messages.clear();
        state.free.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.state).messages.len()
    }

    #[cfg(test)]
    pub fn free_len(&self) -> usize {
        lock(&self.state).free.len()
    }
}

/// Auto-resetting event: a notify wakes at most one wait, or the next one.
pub(crate) struct Signal {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    pub fn new(signaled: bool) -> Self {
        Self {
            flag: Mutex::new(signaled),
            cv: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        *lock(&self.flag) = true;
        self.cv.notify_one();
    }

    /// Wait until notified or until `timeout` elapses. Returns true if the
    /// signal was set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = lock(&self.flag);
        let (mut guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_list_recycles_lines() {
        let q = MessageQueue::new();
        let mut line = q.allocate_line();
        line.copy_line(&[0x01, 5], 2);
        let ptr = &*line as *const ScanLine;
        q.recycle(line);
        assert_eq!(q.free_len(), 1);
        let again = q.allocate_line();
        assert_eq!(&*again as *const ScanLine, ptr);
        assert_eq!(q.free_len(), 0);
    }

    #[test]
    fn test_push_after_exit_is_dropped() {
        let q = MessageQueue::new();
        q.push(Message::ResetViewport);
        q.set_exit();
        q.push(Message::FrameDone { interlaced: false });
        assert_eq!(q.len(), 1);
        q.drain();
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_signal_is_auto_reset() {
        let s = Signal::new(false);
        assert!(!s.wait(Duration::from_millis(1)));
        s.notify();
        assert!(s.wait(Duration::from_millis(1)));
        assert!(!s.wait(Duration::from_millis(1)));
    }
}
