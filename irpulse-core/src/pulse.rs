//! The core signal representation: timed mark/space pulses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Floor for any stored pulse duration, in microseconds. Anything
/// shorter is electrical noise and is merged away during capture.
pub const MIN_PULSE_US: u32 = 20;

/// Ceiling for any stored pulse duration, in microseconds. Capture
/// clamps to this; the codec rejects stored values above it.
pub const MAX_PULSE_US: u32 = 1_000_000;

/// Hard bound on the number of pulses in one train.
pub const MAX_PULSE_COUNT: usize = 1024;

/// Carrier-on or carrier-off interval.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Mark,
    Space,
}

impl Level {
    pub fn flipped(self) -> Level {
        match self {
            Level::Mark => Level::Space,
            Level::Space => Level::Mark,
        }
    }
}

/// A single timed interval at one level.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub level: Level,
    pub duration_us: u32,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TrainError {
    #[error("pulse train is empty")]
    Empty,
    #[error("pulse train does not start with a mark")]
    LeadingSpace,
    #[error("levels do not alternate at index {0}")]
    NotAlternating(usize),
    #[error("duration {duration_us} us at index {index} is out of range")]
    DurationOutOfRange { index: usize, duration_us: u32 },
    #[error("pulse train has {0} pulses, over the limit")]
    TooLong(usize),
}

/// An ordered sequence of alternating mark/space durations making up
/// one IR signal. Always starts with a mark, never empty, every
/// duration within `[MIN_PULSE_US, MAX_PULSE_US]`. Immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseTrain {
    pulses: Vec<Pulse>,
}

impl PulseTrain {
    pub fn new(pulses: Vec<Pulse>) -> Result<Self, TrainError> {
        check(&pulses)?;
        Ok(PulseTrain { pulses })
    }

    /// Build a train from a flat duration list, inferring levels by
    /// position: even indices are marks, odd indices are spaces.
    pub fn from_durations(durations: &[u32]) -> Result<Self, TrainError> {
        let pulses = durations
            .iter()
            .enumerate()
            .map(|(i, &duration_us)| Pulse {
                level: if i & 1 == 0 { Level::Mark } else { Level::Space },
                duration_us,
            })
            .collect();
        PulseTrain::new(pulses)
    }

    /// Constructor for pulse lists that already went through capture
    /// normalization.
    pub(crate) fn from_normalized(pulses: Vec<Pulse>) -> Self {
        debug_assert!(check(&pulses).is_ok());
        PulseTrain { pulses }
    }

    /// Re-run the construction invariant checks.
    pub fn validate(&self) -> Result<(), TrainError> {
        check(&self.pulses)
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    /// Always false: a valid train is non-empty by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pulse> {
        self.pulses.iter()
    }

    pub fn durations(&self) -> impl Iterator<Item = u32> + '_ {
        self.pulses.iter().map(|p| p.duration_us)
    }

    /// Wall-clock length of the whole signal.
    pub fn total_duration(&self) -> Duration {
        let us: u64 = self.pulses.iter().map(|p| u64::from(p.duration_us)).sum();
        Duration::from_micros(us)
    }
}

impl<'a> IntoIterator for &'a PulseTrain {
    type Item = &'a Pulse;
    type IntoIter = std::slice::Iter<'a, Pulse>;

    fn into_iter(self) -> Self::IntoIter {
        self.pulses.iter()
    }
}

fn check(pulses: &[Pulse]) -> Result<(), TrainError> {
    if pulses.is_empty() {
        return Err(TrainError::Empty);
    }
    if pulses.len() > MAX_PULSE_COUNT {
        return Err(TrainError::TooLong(pulses.len()));
    }
    if pulses[0].level != Level::Mark {
        return Err(TrainError::LeadingSpace);
    }
    let mut expected = Level::Mark;
    for (index, pulse) in pulses.iter().enumerate() {
        if pulse.level != expected {
            return Err(TrainError::NotAlternating(index));
        }
        if pulse.duration_us < MIN_PULSE_US || pulse.duration_us > MAX_PULSE_US {
            return Err(TrainError::DurationOutOfRange {
                index,
                duration_us: pulse.duration_us,
            });
        }
        expected = expected.flipped();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_durations_alternates_by_position() {
        let train = PulseTrain::from_durations(&[9000, 4500, 560, 560]).unwrap();
        let levels: Vec<Level> = train.iter().map(|p| p.level).collect();
        assert_eq!(levels, [Level::Mark, Level::Space, Level::Mark, Level::Space]);
        assert_eq!(train.len(), 4);
        assert!(!train.is_empty());
        assert_eq!(train.total_duration(), Duration::from_micros(14_620));
    }

    #[test]
    fn rejects_empty_train() {
        assert_eq!(PulseTrain::new(vec![]).unwrap_err(), TrainError::Empty);
    }

    #[test]
    fn rejects_leading_space() {
        let pulses = vec![
            Pulse { level: Level::Space, duration_us: 500 },
            Pulse { level: Level::Mark, duration_us: 500 },
        ];
        assert_eq!(PulseTrain::new(pulses).unwrap_err(), TrainError::LeadingSpace);
    }

    #[test]
    fn rejects_non_alternating_levels() {
        let pulses = vec![
            Pulse { level: Level::Mark, duration_us: 500 },
            Pulse { level: Level::Space, duration_us: 500 },
            Pulse { level: Level::Space, duration_us: 500 },
        ];
        assert_eq!(
            PulseTrain::new(pulses).unwrap_err(),
            TrainError::NotAlternating(2)
        );
    }

    #[test]
    fn rejects_out_of_band_durations() {
        let err = PulseTrain::from_durations(&[500, MIN_PULSE_US - 1]).unwrap_err();
        assert_eq!(
            err,
            TrainError::DurationOutOfRange { index: 1, duration_us: MIN_PULSE_US - 1 }
        );

        let err = PulseTrain::from_durations(&[MAX_PULSE_US + 1]).unwrap_err();
        assert_eq!(
            err,
            TrainError::DurationOutOfRange { index: 0, duration_us: MAX_PULSE_US + 1 }
        );
    }

    #[test]
    fn rejects_oversized_train() {
        let durations = vec![500; MAX_PULSE_COUNT + 1];
        assert_eq!(
            PulseTrain::from_durations(&durations).unwrap_err(),
            TrainError::TooLong(MAX_PULSE_COUNT + 1)
        );
    }
}
