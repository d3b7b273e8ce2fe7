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

/// Flight governor collapses a burst of delayed acks caused by one congestion
/// episode into a single window reduction.
///
/// When a delay event fires while the governor is idle, it is armed with the
/// number of datagrams in flight at that moment. Every later ack drains one
/// datagram of the episode, and delay detection is re-armed once all of them
/// have been acknowledged.
#[derive(Debug, Default, Clone)]
pub struct FlightGovernor {
    /// Datagrams of the current episode that are still to be acknowledged.
    remaining: u64,
}

impl FlightGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a delay event should trigger a window reduction.
    pub fn should_react(&self) -> bool {
        self.remaining == 0
    }

    /// Start a new episode covering `in_flight` datagrams.
    pub fn arm(&mut self, in_flight: u64) {
        self.remaining = in_flight;
    }

    /// Retire one datagram of the current episode and return the number of
    /// datagrams still to drain.
    pub fn tick(&mut self) -> u64 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    /// Datagrams of the current episode still to be acknowledged.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}
