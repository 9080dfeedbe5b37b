//! Fixed-capacity circular sample history.

/// Circular store holding the most recent `capacity` samples.
///
/// The write cursor counts every sample ever written; the storage slot is the
/// cursor modulo the capacity. Storage is allocated once and never grows.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    storage: Vec<T>,
    /// Total number of samples written so far
    idx: u64,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a ring buffer. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![T::default(); capacity.max(1)],
            idx: 0,
        }
    }

    /// Create a buffer sized for `seconds` of history at `sample_rate` Hz.
    pub fn with_history_seconds(sample_rate: f64, seconds: f64) -> Self {
        Self::new((sample_rate * seconds).round().max(1.0) as usize)
    }

    /// Write one sample, overwriting the oldest once full.
    pub fn push(&mut self, value: T) {
        let pos = self.position(self.idx);
        self.storage[pos] = value;
        self.idx += 1;
    }

    /// Write samples one at a time, in order.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        for value in values {
            self.push(value);
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        (self.idx.min(self.capacity() as u64)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.idx == 0
    }

    /// Whether the buffer has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.idx >= self.capacity() as u64
    }

    /// Total number of samples ever written.
    pub fn write_count(&self) -> u64 {
        self.idx
    }

    /// Most recently written sample.
    pub fn latest(&self) -> Option<T> {
        if self.idx == 0 {
            None
        } else {
            Some(self.storage[self.position(self.idx - 1)])
        }
    }

    /// Retained samples, oldest first.
    ///
    /// Once the buffer has wrapped this is the storage rotated to start at
    /// `idx % capacity`. Before that only the written prefix is returned.
    pub fn chronological(&self) -> Vec<T> {
        if !self.is_full() {
            return self.storage[..self.len()].to_vec();
        }

        let start = self.position(self.idx);
        let mut out = Vec::with_capacity(self.capacity());
        out.extend_from_slice(&self.storage[start..]);
        out.extend_from_slice(&self.storage[..start]);
        out
    }

    /// The last `n` retained samples, oldest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let all = self.chronological();
        let skip = all.len().saturating_sub(n);
        all[skip..].to_vec()
    }

    fn position(&self, cursor: u64) -> usize {
        (cursor % self.capacity() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chronological_after_wrap() {
        let mut buf = RingBuffer::<u32>::new(5);
        buf.extend(0..13);

        assert_eq!(buf.chronological(), vec![8, 9, 10, 11, 12]);
        assert_eq!(buf.latest(), Some(12));
        assert_eq!(buf.write_count(), 13);
        assert_eq!(buf.capacity(), 5);
    }

    #[test]
    fn test_last_c_samples_for_every_overrun() {
        let capacity = 7;
        for n in capacity + 1..capacity * 4 {
            let mut buf = RingBuffer::<u64>::new(capacity);
            buf.extend(0..n as u64);
            let expected: Vec<u64> = ((n - capacity) as u64..n as u64).collect();
            assert_eq!(buf.chronological(), expected, "n = {n}");
        }
    }

    #[test]
    fn test_partial_fill_returns_written_prefix() {
        let mut buf = RingBuffer::<i32>::new(10);
        assert!(buf.is_empty());
        assert_eq!(buf.latest(), None);

        buf.extend([3, 1, 4]);
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_full());
        assert_eq!(buf.chronological(), vec![3, 1, 4]);
    }

    #[test]
    fn test_exactly_full() {
        let mut buf = RingBuffer::<i32>::new(3);
        buf.extend([1, 2, 3]);
        assert!(buf.is_full());
        assert_eq!(buf.chronological(), vec![1, 2, 3]);
    }

    #[test]
    fn test_recent_tail() {
        let mut buf = RingBuffer::<i32>::new(4);
        buf.extend(0..6);
        assert_eq!(buf.recent(2), vec![4, 5]);
        assert_eq!(buf.recent(10), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_history_seconds_capacity() {
        let buf = RingBuffer::<f64>::with_history_seconds(100.0, 20.0);
        assert_eq!(buf.capacity(), 2000);
    }
}
