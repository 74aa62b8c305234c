use super::{StateBuffer, StateError};

/// Identifies a state file.
pub const FILE_MAGIC: [u8; 8] = *b"EP128SF\x01";

/// Tag identifying the subsystem a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ChunkType {
    /// Clock frequencies and timing flag, written at the start of demos
    VmConfig = 0x4550_0001,
    /// Page registers, wait mode, frequencies and cycle accumulators
    VmState = 0x4550_0002,
    Z80State = 0x4550_0010,
    MemoryState = 0x4550_0011,
    IoPortsState = 0x4550_0012,
    DaveState = 0x4550_0013,
    NickState = 0x4550_0014,
    DemoStream = 0x4550_0020,
    End = 0x4550_FFFF,
}

impl ChunkType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x4550_0001 => ChunkType::VmConfig,
            0x4550_0002 => ChunkType::VmState,
            0x4550_0010 => ChunkType::Z80State,
            0x4550_0011 => ChunkType::MemoryState,
            0x4550_0012 => ChunkType::IoPortsState,
            0x4550_0013 => ChunkType::DaveState,
            0x4550_0014 => ChunkType::NickState,
            0x4550_0020 => ChunkType::DemoStream,
            0x4550_FFFF => ChunkType::End,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkType,
    pub version: u32,
    pub payload: Vec<u8>,
}

/// Ordered sequence of chunks.
///
/// On disk each chunk is `type, version, length, payload, crc32`, with the
/// CRC covering the preceding header and payload. The file starts with
/// [`FILE_MAGIC`] and ends with an [`ChunkType::End`] chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFile {
    chunks: Vec<Chunk>,
}

impl ChunkFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, kind: ChunkType, version: u32, payload: StateBuffer) {
        self.chunks.push(Chunk {
            kind,
            version,
            payload: payload.into_inner(),
        });
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn find(&self, kind: ChunkType) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.kind == kind)
    }

    pub fn contains(&self, kind: ChunkType) -> bool {
        self.find(kind).is_some()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = StateBuffer::new();
        out.write_bytes(&FILE_MAGIC);
        let end = Chunk {
            kind: ChunkType::End,
            version: 0,
            payload: Vec::new(),
        };
        for chunk in self.chunks.iter().chain(std::iter::once(&end)) {
            let start = out.len();
            out.write_u32(chunk.kind as u32);
            out.write_u32(chunk.version);
            out.write_u32(chunk.payload.len() as u32);
            out.write_bytes(&chunk.payload);
            let crc = crc32fast::hash(&out.data()[start..]);
            out.write_u32(crc);
        }
        out.into_inner()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, StateError> {
        let mut buf = StateBuffer::from_bytes(data.to_vec());
        if buf.read_bytes(FILE_MAGIC.len()).map_err(|_| StateError::BadMagic)? != FILE_MAGIC {
            return Err(StateError::BadMagic);
        }

        let mut chunks = Vec::new();
        loop {
            let start = buf.position();
            let tag = buf.read_u32()?;
            let kind = ChunkType::from_u32(tag).ok_or(StateError::UnknownChunkType(tag))?;
            let version = buf.read_u32()?;
            let len = buf.read_u32()? as usize;
            let payload = buf.read_bytes(len)?.to_vec();
            let crc = crc32fast::hash(&buf.data()[start..buf.position()]);
            if buf.read_u32()? != crc {
                return Err(StateError::CrcMismatch(kind));
            }
            if kind == ChunkType::End {
                break;
            }
            chunks.push(Chunk {
                kind,
                version,
                payload,
            });
        }
        buf.expect_end("state file")?;

        Ok(Self { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChunkFile {
        let mut f = ChunkFile::new();
        let mut b = StateBuffer::new();
        b.write_u32(0xDEAD_BEEF);
        f.add_chunk(ChunkType::VmConfig, 0x0100_0000, b);
        f.add_chunk(ChunkType::DemoStream, 0x0002_0001, StateBuffer::from_bytes(vec![1, 2, 3]));
        f
    }

    #[test]
    fn test_file_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[..8], &FILE_MAGIC);
        assert_eq!(&bytes[8..12], &0x4550_0001u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &0x0100_0000u32.to_be_bytes());
        assert_eq!(&bytes[16..20], &4u32.to_be_bytes());
        // the file is terminated by an empty End chunk
        let tail = &bytes[bytes.len() - 16..bytes.len() - 4];
        assert_eq!(&tail[..4], &0x4550_FFFFu32.to_be_bytes());
        assert_eq!(ChunkFile::from_bytes(&bytes), Ok(sample()));
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let mut bytes = sample().to_bytes();
        bytes[21] ^= 0x40;
        assert_eq!(
            ChunkFile::from_bytes(&bytes),
            Err(StateError::CrcMismatch(ChunkType::VmConfig))
        );
    }

    #[test]
    fn test_unknown_chunk_type() {
        let mut bytes = sample().to_bytes();
        bytes[8..12].copy_from_slice(&0x1234_5678u32.to_be_bytes());
        assert_eq!(
            ChunkFile::from_bytes(&bytes),
            Err(StateError::UnknownChunkType(0x1234_5678))
        );
    }

    #[test]
    fn test_missing_end_chunk() {
        let bytes = sample().to_bytes();
        let cut = &bytes[..bytes.len() - 16];
        assert_eq!(ChunkFile::from_bytes(cut), Err(StateError::Truncated));
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(ChunkFile::from_bytes(b"EP"), Err(StateError::BadMagic));
        assert_eq!(
            ChunkFile::from_bytes(b"NOTASTATEFILE___"),
            Err(StateError::BadMagic)
        );
    }
}
