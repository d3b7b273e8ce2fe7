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

/// Decrease factor applied when the delay signal is a prediction.
const PREDICTED_DECREASE_FACTOR: f64 = 2.0;

/// Additive increase is scaled by this gain while the RTT is falling.
const DECREASING_RTT_GAIN: f64 = 2.0;

/// Window sizer keeps the congestion window in datagrams.
///
/// The visible window is the truncated value of a real-valued accumulator,
/// so increments smaller than one datagram build up until they take effect.
#[derive(Debug, Clone)]
pub struct WindowSizer {
    /// Congestion window in datagrams.
    window: u64,

    /// Fractional congestion window, never less than `window`.
    accumulator: f64,

    /// RTT used on the previous update.
    prev_rtt: u64,

    /// Lower bound of the window.
    min_window: u64,

    /// Upper bound of the window, if any.
    max_window: Option<u64>,

    /// Datagrams added per window worth of acks.
    increase_constant: f64,
}

impl WindowSizer {
    pub fn new(
        initial_window: u64,
        min_window: u64,
        max_window: Option<u64>,
        increase_constant: f64,
    ) -> Self {
        let min_window = min_window.max(1);
        let window = initial_window.max(min_window);
        Self {
            window,
            accumulator: window as f64,
            prev_rtt: 0,
            min_window,
            max_window,
            increase_constant,
        }
    }

    /// Current congestion window in datagrams.
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Current fractional congestion window.
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Shrink the window after `rtt` exceeded `timeout`.
    ///
    /// A measured RTT cuts the window in proportion to how far it overshoots
    /// half of the timeout. A predicted RTT is less certain and always halves
    /// the window.
    pub fn decrease(&mut self, rtt: u64, timeout: u64, predicted: bool) {
        let half_timeout = timeout.max(1) as f64 / 2.0;
        let factor = if predicted {
            PREDICTED_DECREASE_FACTOR
        } else {
            (rtt as f64 - half_timeout) / half_timeout
        };

        // A factor below one would grow the window.
        let factor = if factor.is_finite() {
            factor.max(1.0)
        } else {
            PREDICTED_DECREASE_FACTOR
        };

        let window = (self.window as f64 / factor).ceil() as u64;
        self.window = window.max(self.min_window);
        self.accumulator = self.window as f64;
        self.prev_rtt = rtt;

        trace!(
            "window sizer: decrease, rtt = {}ms, timeout = {}ms, predicted = {}, factor = {}, window = {}",
            rtt,
            timeout,
            predicted,
            factor,
            self.window
        );
    }

    /// Grow the window after an ack that was not delayed.
    pub fn increase(&mut self, rtt: u64) {
        let scale = if rtt < self.prev_rtt {
            let prev = self.prev_rtt as f64;
            DECREASING_RTT_GAIN * ((prev - rtt as f64) / prev + 1.0)
        } else {
            1.0
        };

        self.accumulator += scale * self.increase_constant / self.window as f64;
        if let Some(max_window) = self.max_window {
            self.accumulator = self.accumulator.min(max_window as f64);
        }
        self.window = (self.accumulator.floor() as u64).max(self.min_window);
        self.prev_rtt = rtt;

        trace!(
            "window sizer: increase, rtt = {}ms, scale = {}, accumulator = {}, window = {}",
            rtt,
            scale,
            self.accumulator,
            self.window
        );
    }

    /// Remember `rtt` without changing the window.
    pub fn hold(&mut self, rtt: u64) {
        self.prev_rtt = rtt;
    }
}
