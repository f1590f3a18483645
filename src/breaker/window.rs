//! Count-based sliding window of call outcomes.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub failure: bool,
    pub slow: bool,
}

/// Ring of the most recent `size` samples with running counts.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<Sample>,
    size: usize,
    failures: usize,
    slow: usize,
}

impl SlidingWindow {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            samples: VecDeque::with_capacity(size),
            size,
            failures: 0,
            slow: 0,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.size {
            self.pop_oldest();
        }
        self.failures += usize::from(sample.failure);
        self.slow += usize::from(sample.slow);
        self.samples.push_back(sample);
    }

    /// Change capacity, keeping the most recent samples.
    pub fn resize(&mut self, size: usize) {
        self.size = size.max(1);
        while self.samples.len() > self.size {
            self.pop_oldest();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.failures = 0;
        self.slow = 0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Failure percentage in [0, 100].
    pub fn failure_rate(&self) -> f64 {
        percentage(self.failures, self.samples.len())
    }

    /// Slow-call percentage in [0, 100].
    pub fn slow_rate(&self) -> f64 {
        percentage(self.slow, self.samples.len())
    }

    fn pop_oldest(&mut self) {
        if let Some(old) = self.samples.pop_front() {
            self.failures -= usize::from(old.failure);
            self.slow -= usize::from(old.slow);
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}
