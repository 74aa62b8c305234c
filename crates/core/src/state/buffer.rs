use super::StateError;
use crate::fixed::Fixed32;

/// Growable byte buffer with a read cursor. All multi-byte values are big
/// endian.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl StateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.data.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// Fixed-point values are stored as the high then low word of the raw bits.
    pub fn write_fixed(&mut self, v: Fixed32) {
        let (hi, lo) = v.to_words();
        self.write_u32(hi);
        self.write_u32(lo);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8], StateError> {
        let end = self.pos.checked_add(n).ok_or(StateError::Truncated)?;
        let bytes = self.data.get(self.pos..end).ok_or(StateError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, StateError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, StateError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, StateError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, StateError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_fixed(&mut self) -> Result<Fixed32, StateError> {
        let hi = self.read_u32()?;
        let lo = self.read_u32()?;
        Ok(Fixed32::from_words(hi, lo))
    }

    /// Fail if any unread bytes remain.
    pub fn expect_end(&self, what: &'static str) -> Result<(), StateError> {
        if self.remaining() != 0 {
            return Err(StateError::TrailingData(what));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        let mut b = StateBuffer::new();
        b.write_u32(0x0102_0304);
        b.write_u16(0xABCD);
        b.write_bool(true);
        assert_eq!(b.data(), &[1, 2, 3, 4, 0xAB, 0xCD, 1]);
    }

    #[test]
    fn test_fixed_is_hi_then_lo() {
        let mut b = StateBuffer::new();
        b.write_fixed(Fixed32::from_bits(-2));
        assert_eq!(b.data(), &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);
        let mut r = StateBuffer::from_bytes(b.into_inner());
        assert_eq!(r.read_fixed(), Ok(Fixed32::from_bits(-2)));
    }

    #[test]
    fn test_read_past_end() {
        let mut b = StateBuffer::from_bytes(vec![1, 2, 3]);
        assert_eq!(b.read_u16(), Ok(0x0102));
        assert_eq!(b.read_u32(), Err(StateError::Truncated));
        // a failed read does not consume
        assert_eq!(b.read_u8(), Ok(3));
        assert!(b.expect_end("test").is_ok());
    }

    #[test]
    fn test_trailing_data() {
        let mut b = StateBuffer::from_bytes(vec![1, 2]);
        b.read_u8().unwrap();
        assert_eq!(b.expect_end("chunk"), Err(StateError::TrailingData("chunk")));
    }
}
