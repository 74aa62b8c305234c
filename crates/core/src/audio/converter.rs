use crate::fixed::Fixed32;

/// Averaging decimator from the sound chip rate to the host output rate.
///
/// Input frames are summed until the output phase crosses a whole sample,
/// then the mean is emitted. When the output rate is not below the input
/// rate every input frame is passed through unchanged.
#[derive(Debug, Clone)]
pub struct SampleRateConverter {
    step: Fixed32,
    phase: Fixed32,
    sum: [i32; 2],
    count: i32,
}

impl SampleRateConverter {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        let step = Fixed32::ratio(output_rate as u64, input_rate.max(1) as u64).min(Fixed32::ONE);
        Self {
            step,
            phase: Fixed32::ZERO,
            sum: [0; 2],
            count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.phase = Fixed32::ZERO;
        self.sum = [0; 2];
        self.count = 0;
    }

    /// Feed one input frame; returns an output frame when one is due.
    pub fn push(&mut self, left: i16, right: i16) -> Option<[i16; 2]> {
        self.sum[0] += left as i32;
        self.sum[1] += right as i32;
        self.count += 1;
        self.phase += self.step;
        if self.phase < Fixed32::ONE {
            return None;
        }
        self.phase -= Fixed32::ONE;
        let out = [
            (self.sum[0] / self.count) as i16,
            (self.sum[1] / self.count) as i16,
        ];
        self.sum = [0; 2];
        self.count = 0;
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimation_count() {
        let mut c = SampleRateConverter::new(500_000, 44_100);
        let produced = (0..500_000).filter_map(|_| c.push(100, -100)).count();
        assert!((44_099..=44_100).contains(&produced), "{produced}");
    }

    #[test]
    fn test_output_is_mean_of_inputs() {
        let mut c = SampleRateConverter::new(4, 1);
        assert_eq!(c.push(10, 0), None);
        assert_eq!(c.push(20, 0), None);
        assert_eq!(c.push(30, 0), None);
        assert_eq!(c.push(40, 8), Some([25, 2]));
    }

    #[test]
    fn test_upsampling_passes_through() {
        let mut c = SampleRateConverter::new(22_050, 44_100);
        assert_eq!(c.push(5, 6), Some([5, 6]));
        assert_eq!(c.push(7, 8), Some([7, 8]));
    }
}
