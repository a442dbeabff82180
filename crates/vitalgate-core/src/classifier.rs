//! Worn/not-worn heuristic.
//!
//! A watch lying on a table keeps reporting the exact same heart rate, blood
//! pressure and oxygen. Once that has happened `threshold` times in a row the
//! sample is tagged [`WearStatus::NotWorn`].

use crate::types::{VitalsSample, WearStatus};

/// Consecutive unchanged samples before a watch is reported as not worn.
pub const DEFAULT_UNWORN_THRESHOLD: u32 = 2;

/// Per-device classifier state. Owned by one polling loop.
#[derive(Debug, Clone)]
pub struct WearClassifier {
    previous: Option<VitalsSample>,
    unchanged: u32,
    threshold: u32,
}

impl Default for WearClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_UNWORN_THRESHOLD)
    }
}

impl WearClassifier {
    /// Create a classifier that flags a watch after `threshold` repeats.
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            previous: None,
            unchanged: 0,
            threshold,
        }
    }

    /// Tag `sample` and make it the new reference sample.
    pub fn classify(&mut self, mut sample: VitalsSample) -> VitalsSample {
        if let Some(previous) = &self.previous {
            if sample.same_vitals(previous) {
                self.unchanged += 1;
            } else {
                self.unchanged = 0;
            }
        }

        let status = if self.unchanged >= self.threshold {
            WearStatus::NotWorn
        } else {
            WearStatus::Worn
        };
        sample.wear_status = Some(status);
        self.previous = Some(sample.clone());
        sample
    }

    /// Number of consecutive unchanged samples seen so far.
    #[must_use]
    pub const fn unchanged_count(&self) -> u32 {
        self.unchanged
    }

    /// The last sample accepted.
    #[must_use]
    pub const fn previous(&self) -> Option<&VitalsSample> {
        self.previous.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BloodPressure;

    fn sample(hr: u32, spo2: u32) -> VitalsSample {
        VitalsSample {
            heart_rate: hr,
            blood_pressure: BloodPressure {
                systolic: 120,
                diastolic: 80,
            },
            blood_oxygen: spo2,
            blood_glucose: 5,
            battery_level: None,
            wear_status: None,
        }
    }

    #[test]
    fn test_first_sample_is_worn() {
        let mut classifier = WearClassifier::default();
        let tagged = classifier.classify(sample(70, 98));
        assert_eq!(tagged.wear_status, Some(WearStatus::Worn));
        assert_eq!(classifier.unchanged_count(), 0);
    }

    #[test]
    fn test_third_identical_sample_is_not_worn() {
        let mut classifier = WearClassifier::default();
        classifier.classify(sample(70, 98));

        let second = classifier.classify(sample(70, 98));
        assert_eq!(classifier.unchanged_count(), 1);
        assert_eq!(second.wear_status, Some(WearStatus::Worn));

        let third = classifier.classify(sample(70, 98));
        assert_eq!(classifier.unchanged_count(), 2);
        assert_eq!(third.wear_status, Some(WearStatus::NotWorn));

        let fourth = classifier.classify(sample(70, 98));
        assert_eq!(classifier.unchanged_count(), 3);
        assert_eq!(fourth.wear_status, Some(WearStatus::NotWorn));
    }

    #[test]
    fn test_any_change_resets() {
        let mut classifier = WearClassifier::default();
        for _ in 0..3 {
            classifier.classify(sample(70, 98));
        }
        let changed = classifier.classify(sample(70, 97));
        assert_eq!(classifier.unchanged_count(), 0);
        assert_eq!(changed.wear_status, Some(WearStatus::Worn));
    }

    #[test]
    fn test_glucose_and_battery_do_not_count_as_change() {
        let mut classifier = WearClassifier::default();
        classifier.classify(sample(70, 98));
        let mut next = sample(70, 98).with_battery(Some(40));
        next.blood_glucose = 7;
        classifier.classify(next);
        assert_eq!(classifier.unchanged_count(), 1);
    }

    #[test]
    fn test_state_advances_regardless_of_tag() {
        let mut classifier = WearClassifier::new(1);
        classifier.classify(sample(70, 98));
        let tagged = classifier.classify(sample(70, 98));
        assert_eq!(tagged.wear_status, Some(WearStatus::NotWorn));
        assert_eq!(classifier.previous(), Some(&tagged));
    }
}
