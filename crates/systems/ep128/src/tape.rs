//! Raw tape image input.

use crate::Ep128Error;

/// A mono 16-bit little-endian PCM tape image.
#[derive(Debug, Clone)]
pub struct Tape {
    samples: Vec<i16>,
    position: usize,
    playing: bool,
}

impl Tape {
    pub fn from_bytes(data: &[u8]) -> Result<Self, Ep128Error> {
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(Ep128Error::InvalidTape(format!(
                "expected 16-bit samples, got {} bytes",
                data.len()
            )));
        }
        let samples = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(Self {
            samples,
            position: 0,
            playing: false,
        })
    }

    /// Play button state.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Advance one sample if the tape is moving and return the input level.
    pub fn run(&mut self, motor_on: bool) -> i32 {
        if !(self.playing && motor_on) {
            return 0;
        }
        match self.samples.get(self.position) {
            Some(&s) => {
                self.position += 1;
                s as i32
            }
            None => {
                self.playing = false;
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_odd_length() {
        assert!(Tape::from_bytes(&[1, 2, 3]).is_err());
        assert!(Tape::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_runs_only_with_motor_and_button() {
        let mut tape = Tape::from_bytes(&[0x10, 0x00, 0xF0, 0xFF]).unwrap();
        assert_eq!(tape.run(true), 0);
        tape.play();
        assert_eq!(tape.run(false), 0);
        assert_eq!(tape.run(true), 0x10);
        assert_eq!(tape.run(true), -16);
        assert_eq!(tape.run(true), 0);
        assert!(!tape.is_playing());
        tape.rewind();
        assert_eq!(tape.position(), 0);
    }
}
