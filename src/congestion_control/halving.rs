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

use log::*;

use super::CongestionController;
use super::CongestionStats;
use crate::AckSample;
use crate::Result;

/// RTT in milliseconds above which an ack counts as delayed. It doubles as
/// the timeout.
const DELAY_THRESHOLD: u64 = 80;

/// Waiting period between two reductions, in multiples of the threshold.
const WAIT_FACTOR: u64 = 2;

/// Halving configurable parameters.
#[derive(Debug, Clone)]
pub struct HalvingConfig {
    /// Minimal congestion window in datagrams.
    min_window: u64,

    /// Initial congestion window in datagrams.
    initial_window: u64,

    /// The window never grows past this value. Defaults to the initial window.
    max_window: u64,
}

impl HalvingConfig {
    pub fn new(min_window: u64, initial_window: u64, max_window: Option<u64>) -> Self {
        Self {
            min_window: min_window.max(1),
            initial_window,
            max_window: max_window.unwrap_or(initial_window),
        }
    }
}

impl Default for HalvingConfig {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MIN_WINDOW, crate::DEFAULT_INITIAL_WINDOW, None)
    }
}

/// Halving controller: one datagram more per healthy ack, half the window at
/// most once per waiting period while acks are delayed.
#[derive(Debug)]
pub struct Halving {
    /// Config
    config: HalvingConfig,

    /// Statistics.
    stats: CongestionStats,

    /// Congestion window in datagrams.
    cwnd: u64,

    /// Ack time of the last reduction. None until the first reduction and
    /// after a healthy ack.
    last_resize_time: Option<u64>,
}

impl Halving {
    pub fn new(config: HalvingConfig) -> Self {
        let cwnd = config.initial_window.max(config.min_window);
        Self {
            config,
            stats: Default::default(),
            cwnd,
            last_resize_time: None,
        }
    }
}

impl CongestionController for Halving {
    fn name(&self) -> &str {
        "HALVING"
    }

    fn on_sent(&mut self, _seq: u64, _send_time: u64) {
        self.stats.datagrams_sent = self.stats.datagrams_sent.saturating_add(1);
    }

    fn on_ack(&mut self, ack: &AckSample) -> Result<()> {
        let rtt = ack.rtt().map_err(|e| {
            self.stats.malformed_acks = self.stats.malformed_acks.saturating_add(1);
            e
        })?;
        self.stats.acks_received = self.stats.acks_received.saturating_add(1);

        if rtt > DELAY_THRESHOLD {
            let waited = match self.last_resize_time {
                Some(t) => ack.ack_time.saturating_sub(t) > WAIT_FACTOR * DELAY_THRESHOLD,
                None => true,
            };
            if waited {
                self.cwnd = ((self.cwnd + 1) / 2).max(self.config.min_window);
                self.last_resize_time = Some(ack.ack_time);
                self.stats.window_reductions = self.stats.window_reductions.saturating_add(1);
            } else {
                self.stats.suppressed_reductions =
                    self.stats.suppressed_reductions.saturating_add(1);
            }
        } else {
            self.last_resize_time = None;
            self.cwnd = self.cwnd.saturating_add(1).min(self.config.max_window);
        }

        trace!(
            "{}. ON_ACK. seq = {}, rtt = {}ms, last_resize = {:?}, cwnd = {}",
            self.name(),
            ack.acked_seq,
            rtt,
            self.last_resize_time,
            self.cwnd
        );
        Ok(())
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn timeout_ms(&self) -> u64 {
        DELAY_THRESHOLD
    }

    fn initial_window(&self) -> u64 {
        self.config.initial_window
    }

    fn minimal_window(&self) -> u64 {
        self.config.min_window
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(seq: u64, ack_time: u64, rtt: u64) -> AckSample {
        AckSample {
            acked_seq: seq,
            send_time: ack_time - rtt,
            recv_time: ack_time - rtt / 2,
            ack_time,
        }
    }

    #[test]
    fn halving_init() {
        let h = Halving::new(HalvingConfig::default());
        assert_eq!(h.name(), "HALVING");
        assert_eq!(h.congestion_window(), 50);
        assert_eq!(h.timeout_ms(), 80);
    }

    #[test]
    fn halving_capped_increase() {
        let mut h = Halving::new(HalvingConfig::new(1, 32, None));
        h.on_ack(&ack(0, 1000, 50)).unwrap();
        assert_eq!(h.congestion_window(), 32);

        let mut h = Halving::new(HalvingConfig::new(1, 32, Some(34)));
        for seq in 0..5 {
            h.on_ack(&ack(seq, 1000 + seq, 50)).unwrap();
        }
        assert_eq!(h.congestion_window(), 34);
    }

    #[test]
    fn halving_waits_between_reductions() {
        let mut h = Halving::new(HalvingConfig::new(1, 32, None));
        h.on_ack(&ack(0, 1000, 100)).unwrap();
        assert_eq!(h.congestion_window(), 16);

        // Within 2 * 80ms of the last reduction.
        h.on_ack(&ack(1, 1100, 100)).unwrap();
        h.on_ack(&ack(2, 1160, 100)).unwrap();
        assert_eq!(h.congestion_window(), 16);
        assert_eq!(h.stats().suppressed_reductions, 2);

        h.on_ack(&ack(3, 1161, 100)).unwrap();
        assert_eq!(h.congestion_window(), 8);

        // A healthy ack resets the waiting period.
        h.on_ack(&ack(4, 1170, 20)).unwrap();
        assert_eq!(h.congestion_window(), 9);
        h.on_ack(&ack(5, 1180, 100)).unwrap();
        assert_eq!(h.congestion_window(), 5);
        assert_eq!(h.stats().window_reductions, 3);
    }

    #[test]
    fn halving_first_reduction_at_start() {
        let mut h = Halving::new(HalvingConfig::new(1, 32, None));

        // No reduction happened yet, so an early delayed ack is not suppressed.
        h.on_ack(&ack(0, 100, 100)).unwrap();
        assert_eq!(h.congestion_window(), 16);
        assert_eq!(h.last_resize_time, Some(100));

        h.on_ack(&ack(1, 150, 100)).unwrap();
        assert_eq!(h.congestion_window(), 16);
        assert_eq!(h.stats().suppressed_reductions, 1);

        h.on_ack(&ack(2, 160, 20)).unwrap();
        assert_eq!(h.last_resize_time, None);
    }

    #[test]
    fn halving_never_below_one() {
        let mut h = Halving::new(HalvingConfig::new(1, 3, None));
        for seq in 0..10 {
            h.on_ack(&ack(seq, 1000 + seq * 200, 500)).unwrap();
            assert!(h.congestion_window() >= 1);
        }
        assert_eq!(h.congestion_window(), 1);
    }
}
