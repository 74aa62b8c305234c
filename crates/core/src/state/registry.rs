use super::{ChunkFile, ChunkType, StateBuffer, StateError};

/// Parser for one chunk type. It must consume the whole payload.
pub type ChunkHandler<T> = fn(&mut T, &mut StateBuffer) -> Result<(), StateError>;

/// Dispatch table from chunk type to handler and expected version.
pub struct ChunkRegistry<T> {
    handlers: Vec<(ChunkType, u32, ChunkHandler<T>)>,
}

impl<T> ChunkRegistry<T> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register `handler` for `kind`, replacing any previous registration.
    pub fn register(&mut self, kind: ChunkType, version: u32, handler: ChunkHandler<T>) {
        self.handlers.retain(|(k, _, _)| *k != kind);
        self.handlers.push((kind, version, handler));
    }

    pub fn with(mut self, kind: ChunkType, version: u32, handler: ChunkHandler<T>) -> Self {
        self.register(kind, version, handler);
        self
    }

    /// Feed every chunk of `file`, in order, to its handler.
    ///
    /// Stops at the first chunk that has no handler, carries a different
    /// version than registered, or whose handler fails.
    pub fn process_all_chunks(&self, file: &ChunkFile, target: &mut T) -> Result<(), StateError> {
        for chunk in file.chunks() {
            let (_, expected, handler) = self
                .handlers
                .iter()
                .find(|(k, _, _)| *k == chunk.kind)
                .ok_or(StateError::UnhandledChunk(chunk.kind))?;
            if chunk.version != *expected {
                return Err(StateError::VersionMismatch {
                    chunk: chunk.kind,
                    expected: *expected,
                    found: chunk.version,
                });
            }
            let mut buf = StateBuffer::from_bytes(chunk.payload.clone());
            handler(target, &mut buf)?;
            buf.expect_end("chunk")?;
        }
        Ok(())
    }
}

impl<T> Default for ChunkRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
