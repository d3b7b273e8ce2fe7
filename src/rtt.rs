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

use std::cmp;

/// RTT estimation for a datagram flow, in milliseconds.
///
/// The minimum is a running minimum and never increases.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// The most recent RTT sample.
    latest_rtt: u64,

    /// The minimum RTT observed on the path. It is seeded with a conservative
    /// default before the first sample arrives.
    min_rtt: u64,

    /// The maximum RTT observed on the path.
    max_rtt: u64,
}

impl RttEstimator {
    pub fn new(initial_min_rtt: u64) -> Self {
        Self {
            latest_rtt: initial_min_rtt,
            min_rtt: initial_min_rtt,
            max_rtt: 0,
        }
    }

    /// Return the latest rtt sample
    pub fn latest_rtt(&self) -> u64 {
        self.latest_rtt
    }

    /// Return the Minimum RTT observed so far for this estimator.
    pub fn min_rtt(&self) -> u64 {
        self.min_rtt
    }

    /// Return the Maximum RTT observed so far for this estimator.
    pub fn max_rtt(&self) -> u64 {
        self.max_rtt
    }

    /// Update estimator with the given RTT sample
    pub fn update(&mut self, rtt: u64) {
        self.latest_rtt = rtt;
        self.min_rtt = cmp::min(self.min_rtt, rtt);
        self.max_rtt = cmp::max(self.max_rtt, rtt);
    }
}
