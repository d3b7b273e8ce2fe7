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

/// Fixed timeout in milliseconds.
const AIMD_TIMEOUT: u64 = 1000;

/// AIMD configurable parameters.
#[derive(Debug, Clone)]
pub struct AimdConfig {
    /// Minimal congestion window in datagrams.
    min_window: u64,

    /// Initial congestion window in datagrams.
    initial_window: u64,

    /// Maximum congestion window in datagrams.
    max_window: Option<u64>,
}

impl AimdConfig {
    pub fn new(min_window: u64, initial_window: u64, max_window: Option<u64>) -> Self {
        Self {
            min_window: min_window.max(1),
            initial_window,
            max_window,
        }
    }
}

impl Default for AimdConfig {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MIN_WINDOW, crate::DEFAULT_INITIAL_WINDOW, None)
    }
}

/// Additive increase, multiplicative decrease on a fixed RTT timeout.
#[derive(Debug)]
pub struct Aimd {
    /// Config
    config: AimdConfig,

    /// Statistics.
    stats: CongestionStats,

    /// Congestion window in datagrams.
    cwnd: u64,

    /// Fractional congestion window.
    cwnd_acc: f64,
}

impl Aimd {
    pub fn new(config: AimdConfig) -> Self {
        let cwnd = config.initial_window.max(config.min_window);
        Self {
            config,
            stats: Default::default(),
            cwnd,
            cwnd_acc: cwnd as f64,
        }
    }
}

impl CongestionController for Aimd {
    fn name(&self) -> &str {
        "AIMD"
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

        if rtt > self.timeout_ms() {
            self.cwnd = (self.cwnd / 2).max(self.config.min_window);
            self.cwnd_acc = self.cwnd as f64;
            self.stats.window_reductions = self.stats.window_reductions.saturating_add(1);
        } else {
            self.cwnd_acc += 1.0 / self.cwnd as f64;
            if let Some(max_window) = self.config.max_window {
                self.cwnd_acc = self.cwnd_acc.min(max_window as f64);
            }
            self.cwnd = (self.cwnd_acc.floor() as u64).max(self.config.min_window);
        }

        trace!(
            "{}. ON_ACK. seq = {}, rtt = {}ms, cwnd = {}",
            self.name(),
            ack.acked_seq,
            rtt,
            self.cwnd
        );
        Ok(())
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn timeout_ms(&self) -> u64 {
        AIMD_TIMEOUT
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
