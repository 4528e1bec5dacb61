//! Circular sample/timestamp buffer
//!
//! Fixed-capacity FIFO that feeds the moving-window stages. A buffer built
//! with [`RingBuffer::timed`] carries a parallel timestamp per element and
//! can expire elements that fall out of a sliding time window.

use crate::{Sample, SfError, SfResult, TimestampMs};

/// Fixed-capacity circular FIFO over samples.
///
/// Readout order is always oldest to newest (tail to head). Invariants:
/// `len() <= capacity()`, and in timed mode every resident element has
/// `timestamp >= newest_timestamp - window_duration_ms` after `expire_old`.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<Sample>,
    timestamps: Option<Vec<TimestampMs>>,
    window_ms: Option<f64>,
    tail: usize,
    count: usize,
}

impl RingBuffer {
    /// Create an untimed buffer. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0.0; capacity],
            timestamps: None,
            window_ms: None,
            tail: 0,
            count: 0,
        }
    }

    /// Create a time-aware buffer with a sliding window in milliseconds.
    pub fn timed(capacity: usize, window_ms: f64) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0.0; capacity],
            timestamps: Some(vec![0.0; capacity]),
            window_ms: Some(window_ms),
            tail: 0,
            count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.data.len()
    }

    #[inline]
    pub fn is_timed(&self) -> bool {
        self.timestamps.is_some()
    }

    pub fn window_duration_ms(&self) -> Option<f64> {
        self.window_ms
    }

    #[inline]
    fn physical(&self, logical: usize) -> usize {
        (self.tail + logical) % self.data.len()
    }

    /// Element at logical index `i` (0 = oldest).
    #[inline]
    pub fn get(&self, i: usize) -> Option<Sample> {
        if i < self.count {
            Some(self.data[self.physical(i)])
        } else {
            None
        }
    }

    /// Timestamp at logical index `i` (0 = oldest); `None` when untimed or
    /// out of range.
    pub fn timestamp_at(&self, i: usize) -> Option<TimestampMs> {
        if i >= self.count {
            return None;
        }
        let idx = self.physical(i);
        self.timestamps.as_ref().map(|ts| ts[idx])
    }

    pub fn newest_timestamp(&self) -> Option<TimestampMs> {
        if self.count == 0 {
            None
        } else {
            self.timestamp_at(self.count - 1)
        }
    }

    /// Push a value; fails with `Full` at capacity.
    pub fn push(&mut self, x: Sample) -> SfResult<()> {
        if self.is_full() {
            return Err(SfError::Full);
        }
        let head = self.physical(self.count);
        self.data[head] = x;
        self.count += 1;
        Ok(())
    }

    /// Push a value, advancing the tail when full. Always succeeds.
    pub fn push_overwrite(&mut self, x: Sample) {
        if self.is_full() {
            let head = self.tail;
            self.data[head] = x;
            self.tail = (self.tail + 1) % self.data.len();
        } else {
            let head = self.physical(self.count);
            self.data[head] = x;
            self.count += 1;
        }
    }

    /// Timed push with overwrite; fails with `Config` on an untimed buffer.
    pub fn push_overwrite_timed(&mut self, x: Sample, t: TimestampMs) -> SfResult<()> {
        if self.timestamps.is_none() {
            return Err(SfError::Config(
                "time-aware push on a non-time-aware buffer".to_string(),
            ));
        }
        let idx = if self.is_full() {
            let head = self.tail;
            self.tail = (self.tail + 1) % self.data.len();
            head
        } else {
            let head = self.physical(self.count);
            self.count += 1;
            head
        };
        self.data[idx] = x;
        if let Some(ts) = self.timestamps.as_mut() {
            ts[idx] = t;
        }
        Ok(())
    }

    /// Pop the oldest element; fails with `Empty`.
    pub fn pop(&mut self) -> SfResult<Sample> {
        if self.count == 0 {
            return Err(SfError::Empty);
        }
        let x = self.data[self.tail];
        self.tail = (self.tail + 1) % self.data.len();
        self.count -= 1;
        Ok(x)
    }

    /// Oldest element without removing it; fails with `Empty`.
    pub fn peek(&self) -> SfResult<Sample> {
        if self.count == 0 {
            return Err(SfError::Empty);
        }
        Ok(self.data[self.tail])
    }

    pub fn clear(&mut self) {
        self.tail = 0;
        self.count = 0;
    }

    /// Oldest-to-newest copy.
    pub fn to_vec(&self) -> Vec<Sample> {
        let mut out = Vec::with_capacity(self.count);
        let (a, b) = self.as_slices();
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        out
    }

    /// Timestamps oldest-to-newest; empty when untimed.
    pub fn timestamps_to_vec(&self) -> Vec<TimestampMs> {
        match &self.timestamps {
            None => Vec::new(),
            Some(ts) => {
                let mut out = Vec::with_capacity(self.count);
                for i in 0..self.count {
                    out.push(ts[self.physical(i)]);
                }
                out
            }
        }
    }

    /// Zero-allocation copy into `dest`; returns the number copied
    /// (`min(len, dest.len())`), oldest first.
    pub fn copy_to(&self, dest: &mut [Sample]) -> usize {
        let n = self.count.min(dest.len());
        for (i, d) in dest.iter_mut().take(n).enumerate() {
            *d = self.data[self.physical(i)];
        }
        n
    }

    /// Clear, then overwrite-push every element of `v`.
    pub fn fill_from(&mut self, v: &[Sample]) {
        self.clear();
        for &x in v {
            self.push_overwrite(x);
        }
    }

    /// Timed variant of [`RingBuffer::fill_from`]; slices must be equal length.
    pub fn fill_from_timed(&mut self, v: &[Sample], t: &[TimestampMs]) -> SfResult<()> {
        if v.len() != t.len() {
            return Err(SfError::invalid(
                "sample and timestamp slices differ in length",
            ));
        }
        self.clear();
        for (&x, &ts) in v.iter().zip(t) {
            self.push_overwrite_timed(x, ts)?;
        }
        Ok(())
    }

    /// Contents as up to two contiguous runs, oldest first.
    pub fn as_slices(&self) -> (&[Sample], &[Sample]) {
        if self.count == 0 {
            return (&[], &[]);
        }
        let cap = self.data.len();
        if self.tail + self.count <= cap {
            (&self.data[self.tail..self.tail + self.count], &[])
        } else {
            let first = &self.data[self.tail..];
            let second = &self.data[..(self.tail + self.count) - cap];
            (first, second)
        }
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        let (a, b) = self.as_slices();
        a.iter().chain(b.iter()).copied()
    }

    /// Pop elements older than `now_ms - window_duration_ms`; returns the
    /// count expired. Fails with `Config` on an untimed buffer.
    pub fn expire_old(&mut self, now_ms: f64) -> SfResult<usize> {
        let window = self.window_ms.ok_or_else(|| {
            SfError::Config("expire_old on a non-time-aware buffer".to_string())
        })?;
        let ts = self
            .timestamps
            .as_ref()
            .expect("timed buffer has timestamps");
        let cutoff = now_ms - window;
        let mut expired = 0;
        while self.count > 0 && (ts[self.tail] as f64) < cutoff {
            self.tail = (self.tail + 1) % self.data.len();
            self.count -= 1;
            expired += 1;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo_order() {
        let mut rb = RingBuffer::new(4);
        for x in 1..=4 {
            rb.push(x as Sample).unwrap();
        }
        assert!(matches!(rb.push(5.0), Err(SfError::Full)));
        assert_eq!(rb.pop().unwrap(), 1.0);
        assert_eq!(rb.pop().unwrap(), 2.0);
        rb.push(5.0).unwrap();
        assert_eq!(rb.to_vec(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn push_overwrite_advances_tail() {
        let mut rb = RingBuffer::new(3);
        for x in 1..=5 {
            rb.push_overwrite(x as Sample);
        }
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.to_vec(), vec![3.0, 4.0, 5.0]);
        assert_eq!(rb.peek().unwrap(), 3.0);
    }

    #[test]
    fn empty_peek_fails() {
        let rb = RingBuffer::new(2);
        assert!(matches!(rb.peek(), Err(SfError::Empty)));
    }

    #[test]
    fn as_slices_wraps() {
        let mut rb = RingBuffer::new(4);
        for x in 1..=6 {
            rb.push_overwrite(x as Sample);
        }
        let (a, b) = rb.as_slices();
        let joined: Vec<Sample> = a.iter().chain(b.iter()).copied().collect();
        assert_eq!(joined, vec![3.0, 4.0, 5.0, 6.0]);
        assert!(!b.is_empty());
    }

    #[test]
    fn expire_old_drops_stale() {
        let mut rb = RingBuffer::timed(8, 10.0);
        for i in 0..5 {
            rb.push_overwrite_timed(i as Sample, (i * 4) as TimestampMs)
                .unwrap();
        }
        // window [6, 16]: timestamps 0 and 4 expire
        let expired = rb.expire_old(16.0).unwrap();
        assert_eq!(expired, 2);
        assert_eq!(rb.to_vec(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn timed_ops_on_untimed_fail() {
        let mut rb = RingBuffer::new(2);
        assert!(matches!(
            rb.push_overwrite_timed(1.0, 0.0),
            Err(SfError::Config(_))
        ));
        assert!(matches!(rb.expire_old(0.0), Err(SfError::Config(_))));
    }

    #[test]
    fn fill_from_replaces_contents() {
        let mut rb = RingBuffer::new(3);
        rb.push(9.0).unwrap();
        rb.fill_from(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rb.to_vec(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn copy_to_is_bounded() {
        let mut rb = RingBuffer::new(4);
        rb.fill_from(&[1.0, 2.0, 3.0]);
        let mut dest = [0.0; 2];
        assert_eq!(rb.copy_to(&mut dest), 2);
        assert_eq!(dest, [1.0, 2.0]);
    }
}
