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

//! Forecast: a delay-based congestion controller for datagram flows.
//!
//! Forecast judges congestion by queueing delay. The minimum RTT ever seen is
//! the noise-free baseline, and an ack is delayed when its RTT exceeds twice
//! that baseline (bounded by an absolute ceiling). Since an RTT sample only
//! reveals congestion one round trip after it built up, the controller fits a
//! linear trend over the last few samples and judges the predicted RTT of the
//! next ack instead of the raw sample once enough samples are available.
//!
//! While acks are not delayed the window grows additively, faster when the
//! RTT is falling. A delay event cuts the window once per congestion episode:
//! the datagrams that were in flight when the cut happened have to drain
//! before another delay event may cut again.

use log::*;

use super::CongestionController;
use super::CongestionStats;
use super::FlightGovernor;
use super::RttPredictor;
use super::WindowSizer;
use crate::rtt::RttEstimator;
use crate::AckSample;
use crate::Result;

/// Forecast configurable parameters.
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Minimal congestion window in datagrams.
    min_window: u64,

    /// Initial congestion window in datagrams.
    initial_window: u64,

    /// Maximum congestion window in datagrams. None leaves it unbounded.
    max_window: Option<u64>,

    /// Seed of the minimum RTT in milliseconds, used before real samples.
    initial_min_rtt: u64,

    /// Upper limit of the timeout in milliseconds.
    max_delay: u64,

    /// Datagrams added to the window per window worth of acks.
    increase_constant: f64,

    /// Number of samples the RTT trend is fitted over.
    rtt_history_len: usize,

    /// Number of recorded samples required before predictions are used.
    prediction_threshold: u64,
}

impl ForecastConfig {
    pub fn new(
        min_window: u64,
        initial_window: u64,
        max_window: Option<u64>,
        initial_min_rtt: u64,
        max_delay: u64,
    ) -> Self {
        Self {
            min_window,
            initial_window,
            max_window,
            initial_min_rtt,
            max_delay,
            ..Self::default()
        }
    }

    /// Set the additive increase constant.
    pub fn with_increase_constant(mut self, v: f64) -> Self {
        self.increase_constant = v;
        self
    }

    /// Set the RTT history length and the number of samples needed before the
    /// predicted RTT replaces the raw sample.
    pub fn with_prediction(mut self, history_len: usize, threshold: u64) -> Self {
        self.rtt_history_len = history_len;
        self.prediction_threshold = threshold;
        self
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_window: crate::DEFAULT_MIN_WINDOW,
            initial_window: crate::DEFAULT_INITIAL_WINDOW,
            max_window: None,
            initial_min_rtt: crate::DEFAULT_INITIAL_MIN_RTT,
            max_delay: crate::DEFAULT_MAX_DELAY,
            increase_constant: crate::DEFAULT_INCREASE_CONSTANT,
            rtt_history_len: crate::DEFAULT_RTT_HISTORY_LEN,
            prediction_threshold: crate::DEFAULT_RTT_HISTORY_LEN as u64,
        }
    }
}

/// Forecast congestion controller.
#[derive(Debug)]
pub struct Forecast {
    /// Config
    config: ForecastConfig,

    /// Statistics.
    stats: CongestionStats,

    /// Congestion window and its fractional accumulator.
    window: WindowSizer,

    /// Minimum and latest RTT.
    rtt: RttEstimator,

    /// Trend of recent RTT samples.
    predictor: RttPredictor,

    /// Suppresses repeated reductions within one congestion episode.
    governor: FlightGovernor,

    /// The largest sequence number sent.
    last_sent_seq: u64,
}

impl Forecast {
    pub fn new(config: ForecastConfig) -> Self {
        let window = WindowSizer::new(
            config.initial_window,
            config.min_window,
            config.max_window,
            config.increase_constant,
        );
        let rtt = RttEstimator::new(config.initial_min_rtt);
        let predictor = RttPredictor::new(config.rtt_history_len);

        Self {
            config,
            stats: Default::default(),
            window,
            rtt,
            predictor,
            governor: FlightGovernor::new(),
            last_sent_seq: 0,
        }
    }

    /// Current fractional congestion window.
    pub fn accumulator(&self) -> f64 {
        self.window.accumulator()
    }

    /// Pick the RTT that decides this ack: the predicted RTT of the next ack
    /// if the trend is usable, otherwise the raw sample.
    fn effective_rtt(&self, ack_time: u64, sample: u64, recorded: bool) -> (u64, bool) {
        if !recorded || self.predictor.recorded() < self.config.prediction_threshold {
            return (sample, false);
        }

        match self.predictor.predict(ack_time, self.rtt.min_rtt()) {
            Some(predicted) => (predicted, true),
            None => (sample, false),
        }
    }
}

impl CongestionController for Forecast {
    fn name(&self) -> &str {
        "FORECAST"
    }

    fn on_sent(&mut self, seq: u64, _send_time: u64) {
        self.last_sent_seq = self.last_sent_seq.max(seq);
        self.stats.datagrams_sent = self.stats.datagrams_sent.saturating_add(1);
    }

    fn on_ack(&mut self, ack: &AckSample) -> Result<()> {
        let sample = match ack.rtt() {
            Ok(rtt) => rtt,
            Err(e) => {
                warn!("{}. drop ack: {}", self.name(), e);
                self.stats.malformed_acks = self.stats.malformed_acks.saturating_add(1);
                return Err(e);
            }
        };
        self.stats.acks_received = self.stats.acks_received.saturating_add(1);

        self.rtt.update(sample);
        let recorded = self.predictor.record(ack.ack_time, sample);
        let (rtt, predicted) = self.effective_rtt(ack.ack_time, sample, recorded);
        if predicted {
            self.stats.predicted_samples = self.stats.predicted_samples.saturating_add(1);
        }

        let timeout = self.timeout_ms();
        if rtt > timeout {
            if self.governor.should_react() {
                let in_flight = self.last_sent_seq.saturating_sub(ack.acked_seq);
                self.window.decrease(rtt, timeout, predicted);
                self.governor.arm(in_flight);
                self.stats.window_reductions = self.stats.window_reductions.saturating_add(1);

                trace!(
                    "{}. delay event, rtt = {}ms, timeout = {}ms, episode = {} datagrams",
                    self.name(),
                    rtt,
                    timeout,
                    in_flight
                );
            } else {
                self.governor.tick();
                self.window.hold(rtt);
                self.stats.suppressed_reductions =
                    self.stats.suppressed_reductions.saturating_add(1);
            }
        } else {
            self.governor.tick();
            self.window.increase(rtt);
        }

        trace!(
            "{}. ON_ACK. seq = {}, latest_rtt = {}ms, rtt = {}ms, predicted = {}, min_rtt = {}ms, max_rtt = {}ms, episode_left = {}, cwnd = {}",
            self.name(),
            ack.acked_seq,
            self.rtt.latest_rtt(),
            rtt,
            predicted,
            self.rtt.min_rtt(),
            self.rtt.max_rtt(),
            self.governor.remaining(),
            self.window.window()
        );

        Ok(())
    }

    fn congestion_window(&self) -> u64 {
        self.window.window()
    }

    fn timeout_ms(&self) -> u64 {
        // Floored at the timer granularity once a 0ms sample sets min_rtt to 0.
        self.rtt
            .min_rtt()
            .saturating_mul(2)
            .min(self.config.max_delay)
            .max(crate::TIMER_GRANULARITY.as_millis() as u64)
    }

    fn min_rtt(&self) -> Option<u64> {
        Some(self.rtt.min_rtt())
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
