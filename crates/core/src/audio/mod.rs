//! Audio transport between the emulation thread and the host.
//!
//! - [`AudioRing`]: period-based ring buffer with adaptive batch sizing on
//!   the consumer side
//! - [`SampleRateConverter`]: box-filter decimator from the sound chip rate
//!   down to the host output rate

mod converter;
mod ring;

pub use converter::SampleRateConverter;
pub use ring::{AudioRing, AudioRingConfig, PERIOD_FRAMES};
