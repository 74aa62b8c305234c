//! Compressed scanline format produced by the video chip.
//!
//! A line is a sequence of run codes. Each code is a tag byte followed by
//! 1 to 8 data bytes and always expands to 16 output pixels, so a full line
//! of 768 pixels is exactly 48 codes.
//!
//! | tag  | data bytes | expansion                                      |
//! |------|------------|------------------------------------------------|
//! | 0x00 | 0          | 16 pixels of color 0                           |
//! | 0x01 | 1          | 16 pixels of one color                         |
//! | 0x02 | 2          | two 8-pixel runs                               |
//! | 0x03 | 3          | c0, c1, bitmap: 8 bits, each 2 pixels wide     |
//! | 0x04 | 4          | four 4-pixel runs                              |
//! | 0x06 | 6          | two groups of c0, c1, bitmap at 1 pixel/bit    |
//! | 0x08 | 8          | eight 2-pixel runs                             |

/// Decoded pixels per line.
pub const LINE_WIDTH: usize = 768;

/// Upper bound on the encoded size of one line (48 codes of 9 bytes).
pub const MAX_LINE_BYTES: usize = 432;

/// Line indices run from 0 to this value inclusive.
pub const MAX_LINE_INDEX: usize = 577;

/// Expand one compressed line into `out`.
///
/// Decoding never fails: an unknown tag or an input that ends mid-code
/// zero-fills the rest of the line. The input is never read past its end.
pub fn decode_line(out: &mut [u8; LINE_WIDTH], input: &[u8]) {
    let mut pos = 0usize;
    let mut src = 0usize;

    while pos < LINE_WIDTH {
        let Some(&tag) = input.get(src) else {
            break;
        };
        let group = &mut out[pos..pos + 16];
        let data_len = match tag {
            0x00 => 0,
            0x01 => 1,
            0x02 => 2,
            0x03 => 3,
            0x04 => 4,
            0x06 => 6,
            0x08 => 8,
            _ => break,
        };
        let Some(data) = input.get(src + 1..src + 1 + data_len) else {
            break;
        };

        match tag {
            0x00 => group.fill(0),
            0x01 => group.fill(data[0]),
            0x02 => {
                group[..8].fill(data[0]);
                group[8..].fill(data[1]);
            }
            0x03 => {
                let (c0, c1, bits) = (data[0], data[1], data[2]);
                for (i, pair) in group.chunks_exact_mut(2).enumerate() {
                    pair.fill(if bits & (0x80 >> i) != 0 { c1 } else { c0 });
                }
            }
            0x04 => {
                for (run, &color) in group.chunks_exact_mut(4).zip(data) {
                    run.fill(color);
                }
            }
            0x06 => {
                for (half, colors) in group.chunks_exact_mut(8).zip(data.chunks_exact(3)) {
                    let (c0, c1, bits) = (colors[0], colors[1], colors[2]);
                    for (i, px) in half.iter_mut().enumerate() {
                        *px = if bits & (0x80 >> i) != 0 { c1 } else { c0 };
                    }
                }
            }
            _ => {
                for (run, &color) in group.chunks_exact_mut(2).zip(data) {
                    run.fill(color);
                }
            }
        }

        pos += 16;
        src += 1 + data_len;
    }

    out[pos..].fill(0);
}

/// One encoded line as carried through the display queue.
#[derive(Clone)]
pub struct ScanLine {
    data: [u8; MAX_LINE_BYTES],
    len: usize,
    line: usize,
}

impl ScanLine {
    pub fn new() -> Self {
        Self {
            data: [0; MAX_LINE_BYTES],
            len: 0,
            line: 0,
        }
    }

    /// Replace the contents with `bytes`, truncated to [`MAX_LINE_BYTES`].
    pub fn copy_line(&mut self, bytes: &[u8], line: usize) {
        let n = bytes.len().min(MAX_LINE_BYTES);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
        self.line = line;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn decode(&self, out: &mut [u8; LINE_WIDTH]) {
        decode_line(out, self.bytes());
    }
}

impl Default for ScanLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Lines compare by encoded content only, not by line index.
impl PartialEq for ScanLine {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for ScanLine {}

impl std::fmt::Debug for ScanLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanLine")
            .field("line", &self.line)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(color: u8) -> Vec<u8> {
        (0..48).flat_map(|_| [0x01, color]).collect()
    }

    #[test]
    fn test_solid_line() {
        let mut out = [0xAA; LINE_WIDTH];
        decode_line(&mut out, &solid(7));
        assert!(out.iter().all(|&p| p == 7));
    }

    #[test]
    fn test_each_tag_expands_to_sixteen_pixels() {
        let mut input = vec![0x00];
        input.extend_from_slice(&[0x02, 1, 2]);
        input.extend_from_slice(&[0x03, 3, 4, 0b1000_0001]);
        input.extend_from_slice(&[0x04, 5, 6, 7, 8]);
        input.extend_from_slice(&[0x06, 1, 2, 0b1010_0000, 3, 4, 0b0000_0001]);
        input.extend_from_slice(&[0x08, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut out = [0xAA; LINE_WIDTH];
        decode_line(&mut out, &input);

        assert_eq!(&out[0..16], &[0; 16]);
        assert_eq!(&out[16..24], &[1; 8]);
        assert_eq!(&out[24..32], &[2; 8]);
        assert_eq!(&out[32..48], &[4, 4, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 4]);
        assert_eq!(&out[48..64], &[5, 5, 5, 5, 6, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8, 8]);
        assert_eq!(&out[64..80], &[2, 1, 2, 1, 1, 1, 1, 1, 3, 3, 3, 3, 3, 3, 3, 4]);
        assert_eq!(&out[80..96], &[1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8]);
        // input ran out: the remainder is zero-filled
        assert!(out[96..].iter().all(|&p| p == 0));
    }

    #[test]
    fn test_invalid_tag_zero_fills_remainder() {
        let mut input = vec![0x01, 9, 0x01, 9, 0x05, 9, 9];
        input.extend(solid(3));
        let mut out = [0xAA; LINE_WIDTH];
        decode_line(&mut out, &input);
        assert_eq!(&out[..32], &[9; 32]);
        assert!(out[32..].iter().all(|&p| p == 0));
    }

    #[test]
    fn test_truncated_code_is_not_read() {
        // 0x08 needs eight data bytes but only three remain
        let mut out = [0xAA; LINE_WIDTH];
        decode_line(&mut out, &[0x01, 2, 0x08, 1, 2, 3]);
        assert_eq!(&out[..16], &[2; 16]);
        assert!(out[16..].iter().all(|&p| p == 0));
    }

    #[test]
    fn test_decode_stops_at_line_width() {
        let mut input = solid(1);
        input.extend_from_slice(&[0x01, 2, 0x01, 2]);
        let mut out = [0; LINE_WIDTH];
        decode_line(&mut out, &input);
        assert!(out.iter().all(|&p| p == 1));
    }

    #[test]
    fn test_decode_is_idempotent() {
        let input: Vec<u8> = (0..48u8)
            .flat_map(|i| [0x04, i, i ^ 0x55, i.wrapping_mul(3), 0xFF - i])
            .collect();
        let mut a = [0; LINE_WIDTH];
        let mut b = [0x11; LINE_WIDTH];
        decode_line(&mut a, &input);
        decode_line(&mut b, &input);
        decode_line(&mut b, &input);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scanline_equality_ignores_index() {
        let mut a = ScanLine::new();
        let mut b = ScanLine::new();
        a.copy_line(&solid(4), 10);
        b.copy_line(&solid(4), 12);
        assert_eq!(a, b);
        b.copy_line(&solid(5), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_copy_line_truncates() {
        let mut l = ScanLine::new();
        l.copy_line(&vec![0x01; 500], 3);
        assert_eq!(l.bytes().len(), MAX_LINE_BYTES);
        assert_eq!(l.line(), 3);
    }
}
