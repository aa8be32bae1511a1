//! Flight phase tracking.
//!
//! The sequencer only moves forward: Idle, Armed, Launched, Landed. Arming
//! lights the indicator; launch and landing are read off the sensor stream
//! against fixed thresholds, with a short debounce so a single outlier does
//! not change phase.

use embedded_hal::digital::OutputPin;
use platform::{Error, Result};

use crate::config::{LANDING_THRESHOLD, LAUNCH_THRESHOLD};

/// Consecutive readings needed to change phase.
pub const DEBOUNCE: u8 = 3;

/// Flight phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// On the pad, not armed.
    Idle,
    /// Armed and waiting for launch.
    Armed,
    /// In flight.
    Launched,
    /// Back on the ground.
    Landed,
}

/// Phase state machine driving the arming indicator.
pub struct LaunchSequence<P: OutputPin> {
    indicator: P,
    phase: Phase,
    streak: u8,
}

impl<P: OutputPin> LaunchSequence<P> {
    /// Idle sequencer. The indicator is left as the caller configured it.
    pub fn new(indicator: P) -> Self {
        Self {
            indicator,
            phase: Phase::Idle,
            streak: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Arm. Only valid from Idle.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(Error::InvalidConfig("launch sequence already started"));
        }
        self.indicator
            .set_high()
            .map_err(|_| Error::InvalidConfig("arming indicator unavailable"))?;
        self.phase = Phase::Armed;
        #[cfg(feature = "defmt")]
        defmt::info!("launch: armed");
        Ok(())
    }

    /// Feed one reading. Returns the phase after it.
    pub fn update(&mut self, reading: i32) -> Result<Phase> {
        let crossed = match self.phase {
            Phase::Armed => reading > LAUNCH_THRESHOLD,
            Phase::Launched => reading < LANDING_THRESHOLD,
            Phase::Idle | Phase::Landed => return Ok(self.phase),
        };
        self.streak = if crossed { self.streak.saturating_add(1) } else { 0 };
        if self.streak < DEBOUNCE {
            return Ok(self.phase);
        }

        self.streak = 0;
        self.phase = match self.phase {
            Phase::Armed => Phase::Launched,
            _ => {
                self.indicator
                    .set_low()
                    .map_err(|_| Error::InvalidConfig("arming indicator unavailable"))?;
                Phase::Landed
            }
        };
        #[cfg(feature = "defmt")]
        defmt::info!("launch: {}", self.phase);
        Ok(self.phase)
    }

    /// Give the indicator pin back.
    pub fn release(self) -> P {
        self.indicator
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::digital::{Mock, State, Transaction};

    #[test]
    fn full_flight() {
        let pin = Mock::new(&[
            Transaction::set(State::High),
            Transaction::set(State::Low),
        ]);
        let mut seq = LaunchSequence::new(pin);
        assert_eq!(seq.update(9_000).unwrap(), Phase::Idle);
        seq.start().unwrap();

        for _ in 0..DEBOUNCE - 1 {
            assert_eq!(seq.update(4_500).unwrap(), Phase::Armed);
        }
        assert_eq!(seq.update(4_500).unwrap(), Phase::Launched);

        assert_eq!(seq.update(2_000).unwrap(), Phase::Launched);
        assert_eq!(seq.update(3_500).unwrap(), Phase::Launched);
        for _ in 0..DEBOUNCE - 1 {
            assert_eq!(seq.update(2_000).unwrap(), Phase::Launched);
        }
        assert_eq!(seq.update(2_000).unwrap(), Phase::Landed);
        assert_eq!(seq.update(9_000).unwrap(), Phase::Landed);

        seq.release().done();
    }

    #[test]
    fn outlier_does_not_launch() {
        let pin = Mock::new(&[Transaction::set(State::High)]);
        let mut seq = LaunchSequence::new(pin);
        seq.start().unwrap();
        seq.update(5_000).unwrap();
        seq.update(5_000).unwrap();
        seq.update(LAUNCH_THRESHOLD).unwrap();
        assert_eq!(seq.update(5_000).unwrap(), Phase::Armed);
        seq.release().done();
    }

    #[test]
    fn start_twice_fails() {
        let pin = Mock::new(&[Transaction::set(State::High)]);
        let mut seq = LaunchSequence::new(pin);
        seq.start().unwrap();
        assert!(seq.start().is_err());
        assert_eq!(seq.phase(), Phase::Armed);
        seq.release().done();
    }
}
