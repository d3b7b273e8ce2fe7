// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A linear trend predictor for the RTT of the next acknowledgment.
//!
//! The RTT a sender observes is always one round trip stale relative to the
//! congestion it describes. The predictor keeps the last N (ack time, RTT)
//! pairs, fits an ordinary least-squares line `rtt = slope * t + intercept`
//! over them and extrapolates one inter-arrival interval past the current ack.
//!
//! The sums of t, rtt, t^2 and t*rtt are maintained incrementally as samples
//! enter and leave the window, so each update is constant time.

use log::*;

/// Bounds of the number of samples the trend is fitted over.
const MIN_CAPACITY: usize = 2;
const MAX_CAPACITY: usize = 1024;

/// Max span in milliseconds between the first buffered sample and a new one.
/// Keeps every term of the least-squares sums within i128.
const MAX_SPAN: u64 = 1 << 40;

/// One (ack time, RTT) pair. Times are relative to the first recorded ack.
#[derive(Debug, Copy, Clone, Default)]
struct RttPoint {
    /// Ack time in milliseconds since the predictor origin.
    time: u64,

    /// RTT sample in milliseconds.
    rtt: u64,
}

#[derive(Debug, Clone)]
pub struct RttPredictor {
    /// Ring buffer of the most recent samples in arrival order.
    points: Vec<RttPoint>,

    /// Max number of samples kept.
    capacity: usize,

    /// Index of the oldest sample, overwritten once the buffer is full.
    oldest: usize,

    /// Absolute ack time of the first recorded sample.
    origin: Option<u64>,

    /// Absolute ack time of the newest sample.
    last_time: Option<u64>,

    /// Absolute ack time of the sample before the newest one.
    prev_time: Option<u64>,

    /// Total number of samples accepted since creation.
    recorded: u64,

    sum_t: i128,
    sum_rtt: i128,
    sum_tt: i128,
    sum_trtt: i128,
}

impl RttPredictor {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
        Self {
            points: Vec::with_capacity(capacity),
            capacity,
            oldest: 0,
            origin: None,
            last_time: None,
            prev_time: None,
            recorded: 0,
            sum_t: 0,
            sum_rtt: 0,
            sum_tt: 0,
            sum_trtt: 0,
        }
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if no sample was recorded.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Check if the buffer holds `capacity` samples.
    pub fn is_full(&self) -> bool {
        self.points.len() == self.capacity
    }

    /// Total number of samples accepted so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Record a new sample. Return false if the sample was dropped because its
    /// ack time does not strictly follow the newest buffered sample, which
    /// would make the slope undefined.
    pub fn record(&mut self, ack_time: u64, rtt: u64) -> bool {
        if let Some(last) = self.last_time {
            if ack_time <= last {
                trace!(
                    "rtt predictor: drop sample at {}ms, newest sample is at {}ms",
                    ack_time,
                    last
                );
                return false;
            }
        }

        if let Some(origin) = self.origin {
            if ack_time - origin > MAX_SPAN {
                trace!(
                    "rtt predictor: restart trend at {}ms, origin is {}ms",
                    ack_time,
                    origin
                );
                self.restart();
            }
        }

        let origin = *self.origin.get_or_insert(ack_time);
        let point = RttPoint {
            time: ack_time - origin,
            rtt,
        };

        if self.is_full() {
            let evicted = self.points[self.oldest];
            self.remove_sums(evicted);
            self.points[self.oldest] = point;
            self.oldest = (self.oldest + 1) % self.capacity;
        } else {
            self.points.push(point);
        }
        self.add_sums(point);

        self.prev_time = self.last_time;
        self.last_time = Some(ack_time);
        self.recorded = self.recorded.saturating_add(1);
        true
    }

    /// Predict the RTT of the ack following the one at `ack_time`.
    ///
    /// Return None until the buffer is full. The prediction is rounded up and
    /// never lower than `min_rtt`.
    pub fn predict(&self, ack_time: u64, min_rtt: u64) -> Option<u64> {
        if !self.is_full() || self.capacity < 2 {
            return None;
        }
        let origin = self.origin?;

        // The gap since the previous ack is assumed to repeat once more.
        let previous = match self.last_time {
            Some(last) if last < ack_time => last,
            _ => self.prev_time?,
        };
        let gap = ack_time.saturating_sub(previous);
        let target = ack_time.saturating_sub(origin).saturating_add(gap);

        let n = self.points.len() as i128;
        let denom = n * self.sum_tt - self.sum_t * self.sum_t;
        if denom == 0 {
            return None;
        }
        let slope = (n * self.sum_trtt - self.sum_t * self.sum_rtt) as f64 / denom as f64;
        let mean_t = self.sum_t as f64 / n as f64;
        let mean_rtt = self.sum_rtt as f64 / n as f64;

        let predicted = (mean_rtt + slope * (target as f64 - mean_t)).ceil();
        if !predicted.is_finite() || predicted < min_rtt as f64 {
            return Some(min_rtt);
        }

        trace!(
            "rtt predictor: slope = {}, target = {}ms, predicted rtt = {}ms",
            slope,
            target,
            predicted
        );
        Some(predicted as u64)
    }

    /// Drop all buffered samples. The next sample becomes the origin.
    fn restart(&mut self) {
        self.points.clear();
        self.oldest = 0;
        self.origin = None;
        self.sum_t = 0;
        self.sum_rtt = 0;
        self.sum_tt = 0;
        self.sum_trtt = 0;
    }

    fn add_sums(&mut self, p: RttPoint) {
        let (t, rtt) = (p.time as i128, p.rtt as i128);
        self.sum_t += t;
        self.sum_rtt += rtt;
        self.sum_tt += t * t;
        self.sum_trtt += t * rtt;
    }

    fn remove_sums(&mut self, p: RttPoint) {
        let (t, rtt) = (p.time as i128, p.rtt as i128);
        self.sum_t -= t;
        self.sum_rtt -= rtt;
        self.sum_tt -= t * t;
        self.sum_trtt -= t * rtt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_predictor_not_full() {
        let mut p = RttPredictor::new(4);
        assert!(p.is_empty());
        assert_eq!(p.predict(0, 10), None);

        for (i, t) in [1000, 1010, 1020].iter().enumerate() {
            assert!(p.record(*t, 50));
            assert_eq!(p.len(), i + 1);
            assert_eq!(p.predict(*t, 10), None);
        }
        assert!(!p.is_full());
    }

    #[test]
    fn rtt_predictor_linear_trend() {
        let mut p = RttPredictor::new(4);
        for (t, rtt) in [(1000, 50), (1010, 60), (1020, 70), (1030, 80)] {
            p.record(t, rtt);
        }
        assert!(p.is_full());

        // One more inter-arrival interval on the same line.
        assert_eq!(p.predict(1030, 10), Some(90));
    }

    #[test]
    fn rtt_predictor_flat() {
        let mut p = RttPredictor::new(4);
        for t in [5, 17, 20, 42] {
            p.record(t, 50);
        }
        assert_eq!(p.predict(42, 50), Some(50));
    }

    #[test]
    fn rtt_predictor_round_up() {
        let mut p = RttPredictor::new(4);
        for (t, rtt) in [(0, 50), (10, 50), (20, 51), (30, 51)] {
            p.record(t, rtt);
        }

        // slope = 0.04, 50.5 + 0.04 * (40 - 15) = 51.5
        assert_eq!(p.predict(30, 10), Some(52));
    }

    #[test]
    fn rtt_predictor_clamp_to_min_rtt() {
        let mut p = RttPredictor::new(4);
        for (t, rtt) in [(0, 100), (10, 80), (20, 60), (30, 40)] {
            p.record(t, rtt);
        }

        // The trend points at 20ms, which is better than ever observed.
        assert_eq!(p.predict(30, 40), Some(40));

        // A steeply falling trend extrapolates below zero.
        let mut p = RttPredictor::new(4);
        for (t, rtt) in [(0, 300), (1, 200), (2, 100), (3, 0)] {
            p.record(t, rtt);
        }
        assert_eq!(p.predict(3, 15), Some(15));
    }

    #[test]
    fn rtt_predictor_overwrite_oldest() {
        let mut p = RttPredictor::new(4);
        for (t, rtt) in [(0, 100), (10, 50), (20, 60), (30, 70), (40, 80)] {
            p.record(t, rtt);
        }
        assert_eq!(p.len(), 4);
        assert_eq!(p.recorded(), 5);

        // The first sample no longer takes part in the fit.
        assert_eq!(p.predict(40, 10), Some(90));

        for (t, rtt) in [(50, 80), (60, 80), (70, 80), (80, 80)] {
            p.record(t, rtt);
        }
        assert_eq!(p.predict(80, 10), Some(80));
    }

    #[test]
    fn rtt_predictor_duplicate_time() {
        let mut p = RttPredictor::new(4);
        assert!(p.record(100, 50));
        assert!(!p.record(100, 70));
        assert_eq!(p.recorded(), 1);
        assert_eq!(p.len(), 1);

        // Out of order samples are dropped as well.
        assert!(p.record(110, 50));
        assert!(!p.record(105, 50));
        assert_eq!(p.recorded(), 2);
    }

    #[test]
    fn rtt_predictor_capacity_bounds() {
        let mut p = RttPredictor::new(0);
        assert!(p.record(100, 50));
        assert!(!p.is_full());
        assert!(p.record(110, 60));
        assert!(p.is_full());
        assert_eq!(p.predict(110, 10), Some(70));

        // The oldest sample is overwritten as with any other capacity.
        assert!(p.record(120, 80));
        assert_eq!(p.len(), 2);
        assert_eq!(p.predict(120, 10), Some(100));

        let p = RttPredictor::new(usize::MAX);
        assert_eq!(p.capacity, MAX_CAPACITY);
    }

    #[test]
    fn rtt_predictor_restart_on_huge_gap() {
        let mut p = RttPredictor::new(2);
        assert!(p.record(0, 10));
        assert!(p.record(u64::MAX, 10));
        assert_eq!(p.len(), 1);
        assert_eq!(p.recorded(), 2);
        assert_eq!(p.predict(u64::MAX, 10), None);

        // Gaps up to the limit keep the trend.
        let mut p = RttPredictor::new(2);
        assert!(p.record(0, 10));
        assert!(p.record(MAX_SPAN, 20));
        assert_eq!(p.len(), 2);
        assert_eq!(p.predict(MAX_SPAN, 10), Some(30));
    }

    #[test]
    fn rtt_predictor_uneven_gap() {
        let mut p = RttPredictor::new(4);
        for (t, rtt) in [(0, 10), (10, 20), (20, 30), (40, 50)] {
            p.record(t, rtt);
        }

        // rtt = t + 10 exactly, extrapolated to 40 + (40 - 20).
        assert_eq!(p.predict(40, 0), Some(70));
    }
}
