//! Adaptive chunk-size optimizer for file transfer.
//!
//! Holds no absolute-time assumptions: only the ratio between the most
//! recent measurement and the rolling mean of the last few drives the
//! update rule, so the optimizer behaves identically whether a round trip
//! takes microseconds (a fake device in tests) or milliseconds (a real
//! board over serial).

use std::collections::VecDeque;
use std::time::Duration;

const ROLLING_WINDOW: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Measurement {
    bytes: usize,
    elapsed: Duration,
}

impl Measurement {
    fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            // A sub-measurable round trip (e.g. an in-memory fake device)
            // is effectively infinite throughput; treat it as "fast" so the
            // optimizer still grows the chunk size rather than stalling.
            f64::INFINITY
        } else {
            self.bytes as f64 / secs
        }
    }
}

/// Per-session mutable record tracking chunk size and recent throughput:
/// current chunk size, min, max, last measured throughput, and a rolling
/// window of the last few measurements.
#[derive(Debug, Clone)]
pub struct ChunkOptimizer {
    chunk_size: usize,
    min: usize,
    max: usize,
    history: VecDeque<Measurement>,
}

impl ChunkOptimizer {
    pub fn new(initial: usize, min: usize, max: usize) -> Self {
        let chunk_size = initial.clamp(min, max);
        Self { chunk_size, min, max, history: VecDeque::with_capacity(ROLLING_WINDOW) }
    }

    /// The chunk size to use for the next transfer. Always within `[min, max]`.
    pub fn current(&self) -> usize {
        self.chunk_size
    }

    /// Record a completed chunk transfer and update the chunk size for the
    /// next one, per the update rule:
    /// - last > rolling mean × 1.1 → ×1.25
    /// - last < rolling mean × 0.7 → ×0.5
    /// - otherwise unchanged
    /// always clamped to `[min, max]`.
    pub fn record(&mut self, bytes: usize, elapsed: Duration) {
        let measurement = Measurement { bytes, elapsed };
        let last_throughput = measurement.throughput();

        if !self.history.is_empty() {
            let mean = self.rolling_mean();
            if last_throughput > mean * 1.1 {
                self.chunk_size = scale(self.chunk_size, 1.25);
            } else if last_throughput < mean * 0.7 {
                self.chunk_size = scale(self.chunk_size, 0.5);
            }
            self.chunk_size = self.chunk_size.clamp(self.min, self.max);
        }

        if self.history.len() == ROLLING_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(measurement);
    }

    fn rolling_mean(&self) -> f64 {
        let finite: Vec<f64> = self.history.iter().map(Measurement::throughput).filter(|t| t.is_finite()).collect();
        if finite.is_empty() {
            return f64::INFINITY;
        }
        finite.iter().sum::<f64>() / finite.len() as f64
    }
}

fn scale(chunk_size: usize, factor: f64) -> usize {
    let scaled = (chunk_size as f64 * factor).round();
    if scaled < 1.0 {
        1
    } else {
        scaled as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_initial_clamped() {
        let opt = ChunkOptimizer::new(256, 64, 4096);
        assert_eq!(opt.current(), 256);

        let opt = ChunkOptimizer::new(8, 64, 4096);
        assert_eq!(opt.current(), 64, "below min must clamp up");

        let opt = ChunkOptimizer::new(999_999, 64, 4096);
        assert_eq!(opt.current(), 4096, "above max must clamp down");
    }

    #[test]
    fn grows_on_sustained_improvement() {
        let mut opt = ChunkOptimizer::new(256, 64, 4096);
        for _ in 0..4 {
            opt.record(256, Duration::from_millis(10));
        }
        let before = opt.current();
        opt.record(256, Duration::from_millis(1));
        assert!(opt.current() > before, "a much faster chunk must grow the size");
    }

    #[test]
    fn shrinks_on_sustained_regression() {
        let mut opt = ChunkOptimizer::new(256, 64, 4096);
        for _ in 0..4 {
            opt.record(256, Duration::from_millis(10));
        }
        let before = opt.current();
        opt.record(256, Duration::from_millis(100));
        assert!(opt.current() < before, "a much slower chunk must shrink the size");
    }

    #[test]
    fn never_leaves_bounds() {
        let mut opt = ChunkOptimizer::new(64, 64, 128);
        for _ in 0..50 {
            opt.record(64, Duration::from_nanos(1));
            assert!(opt.current() >= 64 && opt.current() <= 128);
        }
    }
}
