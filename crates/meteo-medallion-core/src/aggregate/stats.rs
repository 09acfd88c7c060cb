//! Null-skipping accumulators.

/// Running min/max/sum/count of the non-null values pushed so far.
#[derive(Debug, Clone, Default)]
pub(crate) struct Stats {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: usize,
}

impl Stats {
    pub(crate) fn push(&mut self, value: Option<f64>) {
        let Some(v) = value.filter(|v| !v.is_nan()) else {
            return;
        };
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
        self.sum += v;
        self.count += 1;
    }

    pub(crate) fn min(&self) -> Option<f64> {
        self.min
    }

    pub(crate) fn max(&self) -> Option<f64> {
        self.max
    }

    pub(crate) fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Sum of the values seen; `0` when every value was null.
    pub(crate) fn sum(&self) -> f64 {
        self.sum
    }

    /// `max - min`, null for an all-null group.
    pub(crate) fn range(&self) -> Option<f64> {
        Some(self.max? - self.min?)
    }
}

/// First non-null value pushed.
#[derive(Debug, Clone)]
pub(crate) struct First<T>(Option<T>);

impl<T> Default for First<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> First<T> {
    pub(crate) fn push(&mut self, value: Option<T>) {
        if self.0.is_none() {
            self.0 = value;
        }
    }

    pub(crate) fn into_inner(self) -> Option<T> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_skip_nulls() {
        let mut stats = Stats::default();
        for v in [Some(3.0), None, Some(1.0), Some(f64::NAN), Some(5.0)] {
            stats.push(v);
        }

        assert_eq!(stats.min(), Some(1.0));
        assert_eq!(stats.max(), Some(5.0));
        assert_eq!(stats.mean(), Some(3.0));
        assert_eq!(stats.sum(), 9.0);
        assert_eq!(stats.range(), Some(4.0));
    }

    #[test]
    fn all_null_group_has_zero_sum_and_null_mean() {
        let mut stats = Stats::default();
        stats.push(None);
        stats.push(None);

        assert_eq!(stats.sum(), 0.0);
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.min(), None);
        assert_eq!(stats.range(), None);
    }

    #[test]
    fn first_keeps_the_earliest_non_null() {
        let mut first = First::default();
        first.push(None);
        first.push(Some("2024-03-01"));
        first.push(Some("2024-03-02"));

        assert_eq!(first.into_inner(), Some("2024-03-01"));
    }
}
