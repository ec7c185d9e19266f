// Fixed-capacity buffer of recent live samples
pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_INTERVAL_MS: i64 = 2000;

/// Circular buffer of evenly spaced samples. Only the timestamp of the most
/// recent write is stored; the others follow from the interval.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    values: Vec<f64>,
    capacity: usize,
    interval_ms: i64,
    pos: usize,
    count: usize,
    latest_ms: Option<i64>,
    closed: bool,
}

impl RingBuffer {
    pub fn new(capacity: usize, interval_ms: i64) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
            interval_ms: interval_ms.max(1),
            pos: 0,
            count: 0,
            latest_ms: None,
            closed: false,
        }
    }

    pub fn push(&mut self, timestamp_ms: i64, value: f64) {
        if self.values.len() < self.capacity {
            self.values.push(value);
            self.pos = self.values.len() - 1;
        } else {
            self.pos = (self.pos + 1) % self.capacity;
            self.values[self.pos] = value;
        }
        self.count = self.values.len();
        self.latest_ms = Some(timestamp_ms);
    }

    /// Marks the feed as ended. Requests starting after the last sample no
    /// longer return the last value.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    pub fn latest_ms(&self) -> Option<i64> {
        self.latest_ms
    }

    /// Timestamp of the oldest sample still held.
    pub fn oldest_ms(&self) -> Option<i64> {
        self.latest_ms
            .map(|latest| latest - (self.count as i64 - 1) * self.interval_ms)
    }

    /// Average of the samples in `[t1_ms, t2_ms]`.
    ///
    /// Offsets are counted backwards from the latest sample. Requests
    /// reaching into the future are clamped to the latest sample, requests
    /// reaching past the oldest sample are clamped to the oldest one. The
    /// start offset is rounded down and the end offset rounded up, so a
    /// request that does not line up with the sample grid also averages the
    /// neighbouring samples.
    pub fn sample_real_time(&self, t1_ms: i64, t2_ms: i64) -> Option<f64> {
        let latest = self.latest_ms?;
        if self.count == 0 {
            return None;
        }
        if self.closed && t1_ms > latest {
            return None;
        }

        let interval = self.interval_ms as f64;
        let mut p1 = (((t1_ms - latest) as f64) / interval).floor().min(0.0) as i64;
        let p2 = (((t2_ms - latest) as f64) / interval).ceil().min(0.0) as i64;

        let n = self.count as i64;
        if -p1 >= n {
            p1 = -n + 1;
        }
        if p1 > p2 {
            return None;
        }

        let cap = self.capacity as i64;
        let sum: f64 = (p1..=p2)
            .map(|i| self.values[(self.pos as i64 + i).rem_euclid(cap) as usize])
            .sum();
        Some(sum / (p2 - p1 + 1) as f64)
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_INTERVAL_MS)
    }
}
