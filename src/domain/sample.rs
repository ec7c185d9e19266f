// Sample and series domain models
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;

/// One point of a series. `value == None` is an explicit gap and must be
/// rendered as a break in the line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub time_ms: i64,
    pub value: Option<f64>,
}

impl Sample {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self {
            time_ms,
            value: Some(value),
        }
    }

    pub fn gap(time_ms: i64) -> Self {
        Self {
            time_ms,
            value: None,
        }
    }

    pub fn is_gap(&self) -> bool {
        self.value.is_none()
    }
}

/// Shared backing array of a plotted series.
///
/// A fresh buffer is created on every window reset; a fill that is still
/// running against a discarded buffer can no longer affect what is plotted.
#[derive(Debug, Clone, Default)]
pub struct SeriesBuffer {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl SeriesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.samples.lock()
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Drops samples older than `start_ms`.
    pub fn trim_before(&self, start_ms: i64) {
        let mut samples = self.samples.lock();
        let keep_from = samples
            .iter()
            .position(|s| s.time_ms >= start_ms)
            .unwrap_or(samples.len());
        samples.drain(..keep_from);
    }
}

/// Largest non-gap value, if any.
pub fn max_value<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Option<f64> {
    samples
        .into_iter()
        .filter_map(|s| s.value)
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_before() {
        let buffer = SeriesBuffer::new();
        buffer.lock().extend([
            Sample::new(1_000, 1.0),
            Sample::gap(2_000),
            Sample::new(3_000, 3.0),
        ]);

        buffer.trim_before(2_000);
        assert_eq!(buffer.snapshot(), vec![Sample::gap(2_000), Sample::new(3_000, 3.0)]);

        buffer.trim_before(10_000);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_max_value_ignores_gaps() {
        let empty: [Sample; 0] = [];
        assert_eq!(max_value(&empty), None);
        assert_eq!(max_value(&[Sample::gap(0)]), None);

        let samples = [Sample::new(0, 4.0), Sample::gap(1), Sample::new(2, 9.5), Sample::new(3, f64::NAN)];
        assert_eq!(max_value(&samples), Some(9.5));
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = SeriesBuffer::new();
        let other = buffer.clone();
        other.lock().push(Sample::new(5, 1.0));
        assert_eq!(buffer.len(), 1);
    }
}
