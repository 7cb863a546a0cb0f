//! Present-value aggregation.
//!
//! One [`PresentAggregate`] per quantity accumulates the samples of the
//! current half-hour bucket and the current day. The history store drains
//! it at each rollover.

use serde::{Deserialize, Serialize};

/// Running statistics for one quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PresentAggregate {
    pub sum: f32,
    pub count_in_bucket: u32,
    pub running_mean: f32,
    pub day_min: f32,
    pub day_max: f32,
    pub count_in_day: u32,
}

impl PresentAggregate {
    /// Fold one accepted sample into the bucket mean and the day extrema.
    ///
    /// The first sample of a day sets both extrema.
    pub fn update(&mut self, value: f32) {
        self.count_in_bucket += 1;
        self.sum += value;
        self.running_mean = self.sum / self.count_in_bucket as f32;

        self.count_in_day += 1;
        if self.count_in_day == 1 {
            self.day_min = value;
            self.day_max = value;
        } else {
            self.day_min = self.day_min.min(value);
            self.day_max = self.day_max.max(value);
        }
    }

    /// Mean of the current bucket and reset the bucket, or `None` if no
    /// sample arrived during it.
    pub fn take_bucket(&mut self) -> Option<f32> {
        if self.count_in_bucket == 0 {
            return None;
        }
        let mean = self.running_mean;
        self.sum = 0.0;
        self.count_in_bucket = 0;
        Some(mean)
    }

    /// Extrema of the current day and reset the day, or `None` if no sample
    /// arrived during it.
    pub fn take_day(&mut self) -> Option<(f32, f32)> {
        if self.count_in_day == 0 {
            return None;
        }
        let extrema = (self.day_min, self.day_max);
        self.day_min = 0.0;
        self.day_max = 0.0;
        self.count_in_day = 0;
        Some(extrema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_bucket() {
        let mut agg = PresentAggregate::default();
        for v in [400.0, 500.0, 600.0, 700.0] {
            agg.update(v);
        }
        assert_eq!(agg.count_in_bucket, 4);
        assert_eq!(agg.running_mean, 550.0);
        assert_eq!(agg.take_bucket(), Some(550.0));
        assert_eq!(agg.count_in_bucket, 0);
        assert_eq!(agg.sum, 0.0);
        assert_eq!(agg.take_bucket(), None);
    }

    #[test]
    fn test_day_extrema_and_reset() {
        let mut agg = PresentAggregate::default();
        for v in [21.0, 19.5, 23.25, 20.0] {
            agg.update(v);
        }
        assert_eq!((agg.day_min, agg.day_max), (19.5, 23.25));
        assert_eq!(agg.take_day(), Some((19.5, 23.25)));

        // First sample of the new day resets both extrema, even if it lies
        // inside the old range.
        agg.update(20.5);
        assert_eq!((agg.day_min, agg.day_max), (20.5, 20.5));
        assert_eq!(agg.count_in_day, 1);
    }

    #[test]
    fn test_bucket_reset_keeps_day() {
        let mut agg = PresentAggregate::default();
        agg.update(-5.0);
        agg.take_bucket();
        agg.update(5.0);
        assert_eq!(agg.running_mean, 5.0);
        assert_eq!((agg.day_min, agg.day_max), (-5.0, 5.0));
        assert_eq!(agg.count_in_day, 2);
    }
}
