//! Training window selection and train/validation split.

use crate::types::Period;
use chrono::Months;
use serde::{Deserialize, Serialize};

/// Inclusive training window. Rows after `end` form the validation slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainWindow {
    pub start: Period,
    pub end:   Period,
}

impl TrainWindow {
    pub fn new(start: Period, end: Period) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// The last `months` months of the available periods, clamped to the
    /// earliest period. `None` when there are no periods at all.
    pub fn default_for<I>(periods: I, months: u32) -> Option<Self>
    where
        I: IntoIterator<Item = Period>,
    {
        let (min, max) = period_range(periods)?;
        let start = max
            .checked_sub_months(Months::new(months))
            .map_or(min, |s| s.max(min));
        Some(Self { start, end: max })
    }

    /// Shrink the window so it lies within the available periods.
    pub fn clamp_to<I>(self, periods: I) -> Self
    where
        I: IntoIterator<Item = Period>,
    {
        match period_range(periods) {
            Some((min, max)) => Self::new(self.start.clamp(min, max), self.end.clamp(min, max)),
            None => self,
        }
    }

    pub fn in_train(&self, period: Period) -> bool {
        self.start <= period && period <= self.end
    }

    pub fn in_validation(&self, period: Period) -> bool {
        period > self.end
    }
}

fn period_range<I>(periods: I) -> Option<(Period, Period)>
where
    I: IntoIterator<Item = Period>,
{
    periods.into_iter().fold(None, |acc, p| match acc {
        None => Some((p, p)),
        Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
    })
}
