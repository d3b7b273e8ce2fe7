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

use core::str::FromStr;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::ControllerConfig;
use crate::Error;
use crate::Result;
pub use aimd::Aimd;
pub use aimd::AimdConfig;
pub use flight_governor::FlightGovernor;
pub use forecast::Forecast;
pub use forecast::ForecastConfig;
pub use halving::Halving;
pub use halving::HalvingConfig;
pub use rtt_predictor::RttPredictor;
pub use window_sizer::WindowSizer;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionControlAlgorithm {
    /// Forecast reacts to queueing delay rather than loss. It fits a linear
    /// trend over recent RTT samples to anticipate the delay of the next ack,
    /// grows the window additively while the path is healthy and cuts it once
    /// per congestion episode.
    #[default]
    Forecast,

    /// AIMD with a fixed one second timeout. The window is halved whenever an
    /// RTT sample exceeds the timeout.
    Aimd,

    /// Halving uses a fixed delay threshold. The window grows by one datagram
    /// per ack up to its initial size, and is halved at most once per waiting
    /// period while acks are delayed.
    Halving,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("forecast") {
            Ok(CongestionControlAlgorithm::Forecast)
        } else if algor.eq_ignore_ascii_case("aimd") {
            Ok(CongestionControlAlgorithm::Aimd)
        } else if algor.eq_ignore_ascii_case("halving") {
            Ok(CongestionControlAlgorithm::Halving)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// One acknowledgment as seen by the sender.
///
/// All timestamps are in milliseconds and must share a clock domain; the
/// receive timestamp is informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckSample {
    /// Sequence number of the acknowledged datagram.
    pub acked_seq: u64,

    /// When the acknowledged datagram was sent (sender's clock).
    pub send_time: u64,

    /// When the acknowledged datagram was received (receiver's clock).
    pub recv_time: u64,

    /// When the ack was received by the sender.
    pub ack_time: u64,
}

impl AckSample {
    /// Round trip time implied by the ack.
    pub fn rtt(&self) -> Result<u64> {
        self.ack_time.checked_sub(self.send_time).ok_or_else(|| {
            Error::MalformedTimestamp(format!(
                "datagram {} acked at {}ms before it was sent at {}ms",
                self.acked_seq, self.ack_time, self.send_time
            ))
        })
    }
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CongestionStats {
    /// Total datagrams sent.
    pub datagrams_sent: u64,

    /// Total acks processed.
    pub acks_received: u64,

    /// Total acks rejected because of inconsistent timestamps.
    pub malformed_acks: u64,

    /// Times the window was reduced.
    pub window_reductions: u64,

    /// Delay events that did not reduce the window because an earlier event
    /// of the same episode already did.
    pub suppressed_reductions: u64,

    /// Acks whose delay was judged on a predicted RTT.
    pub predicted_samples: u64,
}

/// Congestion control interfaces shared by different algorithms.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback after a datagram was sent out.
    fn on_sent(&mut self, seq: u64, send_time: u64);

    /// Callback for processing an ack. No window or RTT state is changed if
    /// an error is returned.
    fn on_ack(&mut self, ack: &AckSample) -> Result<()>;

    /// Current congestion window in datagrams.
    fn congestion_window(&self) -> u64;

    /// Time in milliseconds to wait for an ack before treating a send as lost.
    fn timeout_ms(&self) -> u64;

    /// Minimum RTT observed so far, if the algorithm tracks one.
    fn min_rtt(&self) -> Option<u64> {
        None
    }

    /// Initial congestion window.
    fn initial_window(&self) -> u64;

    /// Minimal congestion window.
    fn minimal_window(&self) -> u64;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller {}.", self.name())
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &ControllerConfig) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Forecast => Box::new(Forecast::new(
            ForecastConfig::new(
                conf.min_window,
                conf.initial_window,
                conf.max_window,
                conf.initial_min_rtt_ms,
                conf.max_delay_ms,
            )
            .with_increase_constant(conf.increase_constant)
            .with_prediction(conf.rtt_history_len, conf.prediction_threshold),
        )),
        CongestionControlAlgorithm::Aimd => Box::new(Aimd::new(AimdConfig::new(
            conf.min_window,
            conf.initial_window,
            conf.max_window,
        ))),
        CongestionControlAlgorithm::Halving => Box::new(Halving::new(HalvingConfig::new(
            conf.min_window,
            conf.initial_window,
            conf.max_window,
        ))),
    }
}


mod aimd;
mod flight_governor;
mod forecast;
mod halving;
mod rtt_predictor;
mod window_sizer;
