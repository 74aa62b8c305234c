use super::{StateBuffer, StateError};

/// Version of the demo event stream chunk.
pub const DEMO_STREAM_VERSION: u32 = 0x0002_0001;

const EVENT_END: u8 = 0;
const EVENT_KEY_DOWN: u8 = 1;
const EVENT_KEY_UP: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoEventKind {
    End,
    KeyDown(u8),
    KeyUp(u8),
}

/// An input event preceded by the number of nick cycles since the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoEvent {
    pub delta: u64,
    pub kind: DemoEventKind,
}

/// Write `n` as big-endian 7-bit groups, setting bit 7 on all but the last.
/// At most 8 bytes are produced, covering 56 bits.
fn write_delta(buf: &mut StateBuffer, n: u64) {
    let mut shift = 49u32;
    while shift != 0 && (n >> shift) & 0x7F == 0 {
        shift -= 7;
    }
    while shift != 0 {
        buf.write_u8(((n >> shift) & 0x7F) as u8 | 0x80);
        shift -= 7;
    }
    buf.write_u8(n as u8 & 0x7F);
}

fn read_delta(buf: &mut StateBuffer) -> Result<u64, StateError> {
    let mut n = 0u64;
    for _ in 0..8 {
        let c = buf.read_u8().map_err(|_| StateError::TruncatedDemo)?;
        n = (n << 7) | (c & 0x7F) as u64;
        if c & 0x80 == 0 {
            break;
        }
    }
    Ok(n)
}

/// Accumulates an event stream while a demo is being recorded.
#[derive(Debug, Clone, Default)]
pub struct DemoWriter {
    buf: StateBuffer,
}

impl DemoWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DemoEvent) {
        write_delta(&mut self.buf, event.delta);
        match event.kind {
            DemoEventKind::End => {
                self.buf.write_u8(EVENT_END);
                self.buf.write_u8(0);
            }
            DemoEventKind::KeyDown(code) | DemoEventKind::KeyUp(code) => {
                let tag = if matches!(event.kind, DemoEventKind::KeyDown(_)) {
                    EVENT_KEY_DOWN
                } else {
                    EVENT_KEY_UP
                };
                self.buf.write_u8(tag);
                self.buf.write_u8(1);
                self.buf.write_u8(code & 0x7F);
            }
        }
    }

    /// Terminate the stream with an End event after `delta` cycles.
    pub fn finish(mut self, delta: u64) -> StateBuffer {
        self.push(DemoEvent {
            delta,
            kind: DemoEventKind::End,
        });
        self.buf
    }
}

/// Decode a complete event stream. The stream must end with an End event.
pub fn parse_demo_stream(buf: &mut StateBuffer) -> Result<Vec<DemoEvent>, StateError> {
    let mut events = Vec::new();
    loop {
        let delta = read_delta(buf)?;
        let tag = buf.read_u8().map_err(|_| StateError::TruncatedDemo)?;
        let len = buf.read_u8().map_err(|_| StateError::TruncatedDemo)? as usize;
        let data = buf.read_bytes(len).map_err(|_| StateError::TruncatedDemo)?;
        let code = data.last().copied().unwrap_or(0) & 0x7F;

        let kind = match tag {
            EVENT_END => DemoEventKind::End,
            EVENT_KEY_DOWN => DemoEventKind::KeyDown(code),
            EVENT_KEY_UP => DemoEventKind::KeyUp(code),
            other => return Err(StateError::InvalidDemoEvent(other)),
        };
        events.push(DemoEvent { delta, kind });
        if kind == DemoEventKind::End {
            return Ok(events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(n: u64) -> Vec<u8> {
        let mut b = StateBuffer::new();
        write_delta(&mut b, n);
        b.into_inner()
    }

    #[test]
    fn test_delta_encoding() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(0x7F), vec![0x7F]);
        assert_eq!(encoded(0x80), vec![0x81, 0x00]);
        assert_eq!(encoded(0x3FFF), vec![0xFF, 0x7F]);
        assert_eq!(encoded(1 << 55).len(), 8);
    }

    #[test]
    fn test_large_delta_decodes() {
        let n = (1u64 << 50) + 12345;
        let mut b = StateBuffer::from_bytes(encoded(n));
        assert_eq!(read_delta(&mut b), Ok(n));
        assert_eq!(b.remaining(), 0);
    }

    #[test]
    fn test_event_stream_layout() {
        let mut w = DemoWriter::new();
        w.push(DemoEvent {
            delta: 3,
            kind: DemoEventKind::KeyDown(0x85),
        });
        let buf = w.finish(200);
        assert_eq!(buf.data(), &[3, 1, 1, 0x05, 0x81, 0x48, 0, 0]);

        let mut r = StateBuffer::from_bytes(buf.into_inner());
        let events = parse_demo_stream(&mut r).unwrap();
        assert_eq!(
            events,
            vec![
                DemoEvent {
                    delta: 3,
                    kind: DemoEventKind::KeyDown(5)
                },
                DemoEvent {
                    delta: 200,
                    kind: DemoEventKind::End
                },
            ]
        );
    }

    #[test]
    fn test_truncated_stream() {
        let mut w = DemoWriter::new();
        w.push(DemoEvent {
            delta: 1000,
            kind: DemoEventKind::KeyUp(9),
        });
        let bytes = w.finish(0).into_inner();
        for cut in 0..bytes.len() - 1 {
            let mut r = StateBuffer::from_bytes(bytes[..cut].to_vec());
            assert_eq!(parse_demo_stream(&mut r), Err(StateError::TruncatedDemo));
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let mut r = StateBuffer::from_bytes(vec![0, 7, 0]);
        assert_eq!(parse_demo_stream(&mut r), Err(StateError::InvalidDemoEvent(7)));
    }
}
