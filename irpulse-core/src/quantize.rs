//! Duration-class quantization.
//!
//! A remote means every "short mark" to be the same length, but the
//! receiver reports each one with jitter. Durations are grouped into
//! classes by relative tolerance and every pulse is replaced by its
//! class's integer mean, so repeated captures of one button converge
//! on identical trains. Marks and spaces classify independently.

use crate::pulse::{Level, Pulse, PulseTrain};

/// A set of durations close enough to count as one signal length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalClass {
    pub level: Level,
    pub min_us: u32,
    pub max_us: u32,
    pub mean_us: u32,
    pub count: usize,
}

impl SignalClass {
    fn from_group(level: Level, group: &[u32]) -> Self {
        let sum: u64 = group.iter().map(|&d| u64::from(d)).sum();
        SignalClass {
            level,
            min_us: group[0],
            max_us: group[group.len() - 1],
            mean_us: (sum / group.len() as u64) as u32,
            count: group.len(),
        }
    }

    pub fn contains(&self, duration_us: u32) -> bool {
        self.min_us <= duration_us && duration_us <= self.max_us
    }
}

/// Group sorted durations into runs; a new run starts when a duration
/// exceeds the previous one by more than `tolerance` (relative).
fn group_durations(mut durations: Vec<u32>, tolerance: f32) -> Vec<Vec<u32>> {
    durations.sort_unstable();
    let max_tol = 1.0 + tolerance;
    let mut groups: Vec<Vec<u32>> = Vec::new();
    for duration in durations {
        match groups.last_mut() {
            Some(group)
                if (duration as f32) < *group.last().expect("groups are non-empty") as f32 * max_tol =>
            {
                group.push(duration)
            }
            _ => groups.push(vec![duration]),
        }
    }
    groups
}

/// Classify the train's marks and spaces into duration classes.
pub fn classify(train: &PulseTrain, tolerance: f32) -> Vec<SignalClass> {
    let pick = |wanted: Level| -> Vec<u32> {
        train
            .iter()
            .filter(|p| p.level == wanted)
            .map(|p| p.duration_us)
            .collect()
    };

    let mut classes = Vec::new();
    for group in group_durations(pick(Level::Mark), tolerance) {
        classes.push(SignalClass::from_group(Level::Mark, &group));
    }
    for group in group_durations(pick(Level::Space), tolerance) {
        classes.push(SignalClass::from_group(Level::Space, &group));
    }
    classes
}

/// Replace every duration with its class mean. Classes are built from
/// the train itself, so every pulse lands in exactly one class.
pub fn quantize(train: &PulseTrain, tolerance: f32) -> PulseTrain {
    let classes = classify(train, tolerance);
    let pulses: Vec<Pulse> = train
        .iter()
        .map(|p| {
            let mean = classes
                .iter()
                .find(|c| c.level == p.level && c.contains(p.duration_us))
                .map(|c| c.mean_us)
                .unwrap_or(p.duration_us);
            Pulse { level: p.level, duration_us: mean }
        })
        .collect();
    // Means of in-band durations stay in band; levels are untouched.
    PulseTrain::from_normalized(pulses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_split_on_tolerance_boundaries() {
        let groups = group_durations(vec![560, 548, 9000, 572, 4500, 1690, 1702], 0.1);
        assert_eq!(
            groups,
            vec![vec![548, 560, 572], vec![1690, 1702], vec![4500], vec![9000]]
        );
    }

    #[test]
    fn marks_and_spaces_classify_independently() {
        // Same 560-ish duration appears as mark and as space; the
        // classes must not mix levels.
        let train = PulseTrain::from_durations(&[560, 565, 560, 1690, 560]).unwrap();
        let classes = classify(&train, 0.1);

        let marks: Vec<&SignalClass> =
            classes.iter().filter(|c| c.level == Level::Mark).collect();
        let spaces: Vec<&SignalClass> =
            classes.iter().filter(|c| c.level == Level::Space).collect();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].count, 3);
        assert_eq!(spaces.len(), 2);
    }

    #[test]
    fn jittered_durations_converge_on_the_class_mean() {
        let train = PulseTrain::from_durations(&[548, 4500, 560, 1690, 572, 4510]).unwrap();
        let quantized = quantize(&train, 0.1);
        assert_eq!(
            quantized,
            PulseTrain::from_durations(&[560, 4505, 560, 1690, 560, 4505]).unwrap()
        );
    }

    #[test]
    fn quantization_is_idempotent() {
        let train = PulseTrain::from_durations(&[548, 4500, 560, 1690, 572, 4510]).unwrap();
        let once = quantize(&train, 0.1);
        assert_eq!(quantize(&once, 0.1), once);
    }
}
