use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut};

/// Duration of one timestamp tick.
pub const TICK: Duration = Duration::from_micros(32);

/// Number of ticks in one second.
pub const TICKS_PER_SECOND: u32 = 31_250;

/// Device clock sample carried by timestamped frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HarpTimestamp {
    pub seconds: u32,
    pub ticks: u16,
}

impl HarpTimestamp {
    pub fn new(seconds: u32, ticks: u16) -> Self {
        Self { seconds, ticks }
    }

    /// Split an elapsed duration into whole seconds and 32 µs ticks.
    pub fn from_duration(elapsed: Duration) -> Self {
        let ticks = elapsed.subsec_micros() / 32;
        Self {
            seconds: u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX),
            ticks: u16::try_from(ticks).unwrap_or(u16::MAX),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.seconds)) + TICK * u32::from(self.ticks)
    }

    pub fn as_secs_f64(&self) -> f64 {
        f64::from(self.seconds) + f64::from(self.ticks) * TICK.as_secs_f64()
    }

    pub(crate) fn put(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.seconds);
        dst.put_u16_le(self.ticks);
    }

    pub(crate) fn get(src: &mut impl Buf) -> Self {
        let seconds = src.get_u32_le();
        let ticks = src.get_u16_le();
        Self { seconds, ticks }
    }
}

impl fmt::Display for HarpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}
