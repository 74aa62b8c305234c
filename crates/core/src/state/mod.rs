//! Chunked, versioned binary container for snapshots and demo recordings.
//!
//! A file is an ordered list of chunks. Each chunk carries a type tag, a
//! format version and an opaque payload; readers register one handler per
//! type in a [`ChunkRegistry`] and dispatch the whole file through it.

mod buffer;
mod demo;
mod file;
mod registry;

pub use buffer::StateBuffer;
pub use demo::{parse_demo_stream, DemoEvent, DemoEventKind, DemoWriter, DEMO_STREAM_VERSION};
pub use file::{Chunk, ChunkFile, ChunkType, FILE_MAGIC};
pub use registry::{ChunkHandler, ChunkRegistry};

use thiserror::Error;

/// Errors raised while reading or writing state files
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Unexpected end of data")]
    Truncated,
    #[error("Not a state file")]
    BadMagic,
    #[error("CRC mismatch in {0:?} chunk")]
    CrcMismatch(ChunkType),
    #[error("Unknown chunk type 0x{0:08X}")]
    UnknownChunkType(u32),
    #[error("No handler registered for {0:?} chunk")]
    UnhandledChunk(ChunkType),
    #[error("{chunk:?} chunk version 0x{found:08X} does not match expected 0x{expected:08X}")]
    VersionMismatch {
        chunk: ChunkType,
        expected: u32,
        found: u32,
    },
    #[error("Trailing data after end of {0}")]
    TrailingData(&'static str),
    #[error("Truncated demo stream")]
    TruncatedDemo,
    #[error("Invalid demo event type {0}")]
    InvalidDemoEvent(u8),
    #[error("Missing {0:?} chunk")]
    MissingChunk(ChunkType),
    #[error("Invalid state: {0}")]
    Invalid(String),
}
