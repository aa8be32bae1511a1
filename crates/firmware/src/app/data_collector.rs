//! Aggregates sensor readings into the collection buffer.
//!
//! Readings arrive in rounds: each registered sensor reports once, with a
//! value or a failure. When the last sensor of a round reports, the
//! successful values are appended and the round outcome is returned: the
//! new buffer size, `Transfer` if every sensor failed, or `Busy` if the
//! buffer is full.

use heapless::Vec;
use platform::{Error, Result};

/// Sensors one collector can aggregate.
pub const MAX_SENSORS: usize = 4;

/// Registration handle of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSlot(u8);

/// Collector with room for `N` readings.
#[derive(Debug)]
pub struct DataCollector<const N: usize> {
    registered: u8,
    reported: u8,
    round: [Option<i32>; MAX_SENSORS],
    readings: Vec<i32, N>,
}

impl<const N: usize> DataCollector<N> {
    /// Empty collector with no sensors.
    pub const fn new() -> Self {
        Self {
            registered: 0,
            reported: 0,
            round: [None; MAX_SENSORS],
            readings: Vec::new(),
        }
    }

    /// Add a sensor to every future round.
    pub fn register(&mut self) -> Result<SensorSlot> {
        if usize::from(self.registered) >= MAX_SENSORS {
            return Err(Error::InvalidConfig("too many sensors"));
        }
        let slot = SensorSlot(self.registered);
        self.registered = self.registered.wrapping_add(1);
        Ok(slot)
    }

    fn all_reported(&self) -> u8 {
        1u8.checked_shl(u32::from(self.registered))
            .map_or(u8::MAX, |bit| bit.wrapping_sub(1))
    }

    /// Record one sensor's result. Returns the round outcome when this was
    /// the last outstanding sensor.
    pub fn report(&mut self, slot: SensorSlot, reading: Result<i32>) -> Option<Result<usize>> {
        let entry = self.round.get_mut(usize::from(slot.0))?;
        *entry = reading.ok();
        self.reported |= 1u8.wrapping_shl(u32::from(slot.0));
        if self.reported != self.all_reported() {
            return None;
        }

        self.reported = 0;
        let mut any = false;
        let mut outcome = Ok(());
        for value in self.round.iter_mut().filter_map(Option::take) {
            any = true;
            if self.readings.push(value).is_err() {
                outcome = Err(Error::Busy);
            }
        }
        Some(match (any, outcome) {
            (false, _) => Err(Error::Transfer),
            (true, Err(error)) => Err(error),
            (true, Ok(())) => Ok(self.readings.len()),
        })
    }

    /// Collected readings, oldest first.
    pub fn readings(&self) -> &[i32] {
        &self.readings
    }

    /// Drop every collected reading.
    pub fn clear(&mut self) {
        self.readings.clear();
    }
}

impl<const N: usize> Default for DataCollector<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn round_closes_when_every_sensor_reported() {
        let mut collector = DataCollector::<8>::new();
        let a = collector.register().unwrap();
        let b = collector.register().unwrap();
        assert_eq!(collector.report(a, Ok(10)), None);
        assert_eq!(collector.report(b, Ok(20)), Some(Ok(2)));
        assert_eq!(collector.readings(), &[10, 20]);
    }

    #[test]
    fn failed_sensors_are_skipped() {
        let mut collector = DataCollector::<8>::new();
        let a = collector.register().unwrap();
        let b = collector.register().unwrap();
        collector.report(a, Err(Error::Transfer));
        assert_eq!(collector.report(b, Ok(7)), Some(Ok(1)));
        collector.report(b, Err(Error::Timeout));
        assert_eq!(collector.report(a, Err(Error::Transfer)), Some(Err(Error::Transfer)));
        assert_eq!(collector.readings(), &[7]);
    }

    #[test]
    fn full_buffer_reports_busy() {
        let mut collector = DataCollector::<2>::new();
        let a = collector.register().unwrap();
        assert_eq!(collector.report(a, Ok(1)), Some(Ok(1)));
        assert_eq!(collector.report(a, Ok(2)), Some(Ok(2)));
        assert_eq!(collector.report(a, Ok(3)), Some(Err(Error::Busy)));
        collector.clear();
        assert_eq!(collector.report(a, Ok(4)), Some(Ok(1)));
    }

    #[test]
    fn registration_is_bounded() {
        let mut collector = DataCollector::<2>::new();
        for _ in 0..MAX_SENSORS {
            collector.register().unwrap();
        }
        assert!(collector.register().is_err());
    }
}
