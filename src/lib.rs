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

//! Datagrump is the sender-side congestion window controller of a simple
//! reliable-delivery-over-UDP transport.
//!
//! On every sent datagram and every received acknowledgment it decides how
//! many unacknowledged datagrams the sender may keep in flight, and how long
//! the sender should wait for an acknowledgment before treating a send as
//! lost. Socket I/O, framing, retransmission and the receiver are left to the
//! embedding transport, which calls into a [`Controller`] from its event
//! loop.
//!
//! ## Get started
//!
//! ```
//! let conf = datagrump::Config::new();
//! let mut controller = datagrump::Controller::new(&conf)?;
//!
//! controller.datagram_was_sent(0, 1000);
//! controller.ack_received(0, 1000, 1020, 1045)?;
//! assert!(controller.window_size() >= 1);
//! assert_eq!(controller.timeout_ms(), 90);
//! # Ok::<(), datagrump::error::Error>(())
//! ```
//!
//! ## Feature flags
//!
//! * `ffi`: Build and expose the FFI API.

use std::cmp;
use std::time::Duration;

use log::*;
use serde::Deserialize;
use serde::Serialize;

use crate::congestion_control::build_congestion_controller;
use crate::congestion_control::CongestionController;

/// The timer granularity of the controller. Timeouts are never shorter.
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// Default initial congestion window in datagrams.
const DEFAULT_INITIAL_WINDOW: u64 = 50;

/// Default minimal congestion window in datagrams.
const DEFAULT_MIN_WINDOW: u64 = 1;

/// Default seed of the minimum RTT in milliseconds. It is the largest
/// queueing delay the controller tolerates before any sample arrives.
const DEFAULT_INITIAL_MIN_RTT: u64 = 80;

/// Default upper limit of the timeout in milliseconds.
const DEFAULT_MAX_DELAY: u64 = 100;

/// Default additive increase, in datagrams per window of acks.
const DEFAULT_INCREASE_CONSTANT: f64 = 1.0;

/// Default number of samples the RTT trend is fitted over.
const DEFAULT_RTT_HISTORY_LEN: usize = 4;

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about the congestion controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// The congestion control algorithm.
    pub congestion_control_algorithm: CongestionControlAlgorithm,

    /// The initial congestion window in datagrams.
    pub initial_window: u64,

    /// The minimal congestion window in datagrams.
    pub min_window: u64,

    /// The maximum congestion window in datagrams. The window is unbounded if
    /// not set.
    pub max_window: Option<u64>,

    /// The minimum RTT assumed before the first sample, in milliseconds.
    pub initial_min_rtt_ms: u64,

    /// The upper limit of the timeout, in milliseconds.
    pub max_delay_ms: u64,

    /// Datagrams added to the window per window worth of healthy acks.
    pub increase_constant: f64,

    /// Number of recent RTT samples used to predict the next RTT.
    pub rtt_history_len: usize,

    /// Number of samples recorded before the predicted RTT is used in place
    /// of the raw sample.
    pub prediction_threshold: u64,

    /// Log every event at debug level.
    pub debug: bool,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            congestion_control_algorithm: CongestionControlAlgorithm::Forecast,
            initial_window: DEFAULT_INITIAL_WINDOW,
            min_window: DEFAULT_MIN_WINDOW,
            max_window: None,
            initial_min_rtt_ms: DEFAULT_INITIAL_MIN_RTT,
            max_delay_ms: DEFAULT_MAX_DELAY,
            increase_constant: DEFAULT_INCREASE_CONSTANT,
            rtt_history_len: DEFAULT_RTT_HISTORY_LEN,
            prediction_threshold: DEFAULT_RTT_HISTORY_LEN as u64,
            debug: false,
        }
    }
}

impl ControllerConfig {
    /// Check that the configuration describes a usable controller.
    pub fn validate(&self) -> Result<()> {
        if self.min_window == 0 {
            return Err(Error::InvalidConfig("min_window is zero".into()));
        }
        if self.initial_window < self.min_window {
            return Err(Error::InvalidConfig(format!(
                "initial_window {} is less than min_window {}",
                self.initial_window, self.min_window
            )));
        }
        if let Some(max_window) = self.max_window {
            if max_window < self.initial_window {
                return Err(Error::InvalidConfig(format!(
                    "max_window {} is less than initial_window {}",
                    max_window, self.initial_window
                )));
            }
        }
        if self.initial_min_rtt_ms == 0 || self.max_delay_ms == 0 {
            return Err(Error::InvalidConfig("zero rtt or delay".into()));
        }
        if !self.increase_constant.is_finite() || self.increase_constant <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "increase_constant {}",
                self.increase_constant
            )));
        }
        if self.rtt_history_len < 2 {
            return Err(Error::InvalidConfig(format!(
                "rtt_history_len {} is less than 2",
                self.rtt_history_len
            )));
        }
        if self.prediction_threshold < self.rtt_history_len as u64 {
            return Err(Error::InvalidConfig(format!(
                "prediction_threshold {} is less than rtt_history_len {}",
                self.prediction_threshold, self.rtt_history_len
            )));
        }
        Ok(())
    }
}

/// Configurations of a controller.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Congestion controller configurations.
    controller: ControllerConfig,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut conf = datagrump::Config::new();
    /// conf.set_initial_window(32);
    /// conf.set_max_window(Some(64));
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from controller configurations, e.g. loaded
    /// from a file.
    pub fn from_controller_config(controller: ControllerConfig) -> Self {
        Self { controller }
    }

    /// Controller configurations.
    pub fn controller_config(&self) -> &ControllerConfig {
        &self.controller
    }

    /// Set congestion control algorithm that the controller would use.
    /// The default value is Forecast.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.controller.congestion_control_algorithm = cca;
    }

    /// Set the initial congestion window in datagrams.
    /// The default value is 50.
    pub fn set_initial_window(&mut self, datagrams: u64) {
        self.controller.initial_window = datagrams;
    }

    /// Set the minimal congestion window in datagrams.
    /// The default value is 1. Lower values will be ignored.
    pub fn set_min_window(&mut self, datagrams: u64) {
        if datagrams >= 1 {
            self.controller.min_window = datagrams;
        }
    }

    /// Set the maximum congestion window in datagrams.
    /// The window is not capped by default.
    pub fn set_max_window(&mut self, datagrams: Option<u64>) {
        self.controller.max_window = datagrams;
    }

    /// Set the minimum RTT assumed before the first sample, in milliseconds.
    /// The default value is 80ms.
    pub fn set_initial_min_rtt(&mut self, millis: u64) {
        self.controller.initial_min_rtt_ms =
            cmp::max(millis, TIMER_GRANULARITY.as_millis() as u64);
    }

    /// Set the upper limit of the timeout in milliseconds.
    /// The default value is 100ms.
    pub fn set_max_delay(&mut self, millis: u64) {
        self.controller.max_delay_ms = cmp::max(millis, TIMER_GRANULARITY.as_millis() as u64);
    }

    /// Set the additive increase constant.
    /// The default value is 1.0.
    pub fn set_increase_constant(&mut self, v: f64) {
        self.controller.increase_constant = v;
    }

    /// Set the number of RTT samples the trend is fitted over. The prediction
    /// threshold is raised along if it would fall below the history length.
    /// The default value is 4.
    pub fn set_rtt_history_len(&mut self, v: usize) {
        self.controller.rtt_history_len = v;
        self.controller.prediction_threshold =
            cmp::max(self.controller.prediction_threshold, v as u64);
    }

    /// Set the number of samples required before the predicted RTT is used.
    /// The default value is the RTT history length.
    pub fn set_prediction_threshold(&mut self, v: u64) {
        self.controller.prediction_threshold = v;
    }

    /// Enable debug output for every event.
    /// The default value is false.
    pub fn enable_debug(&mut self, v: bool) {
        self.controller.debug = v;
    }
}

/// A congestion window controller for one connection.
///
/// All state is owned by the instance, so controllers of different
/// connections never interfere. Calls must be serialized by the caller.
pub struct Controller {
    /// The congestion control algorithm.
    cc: Box<dyn CongestionController>,

    /// Log every event at debug level.
    debug: bool,
}

impl Controller {
    /// Create a controller with the given configuration.
    pub fn new(conf: &Config) -> Result<Self> {
        conf.controller.validate()?;

        Ok(Self {
            cc: build_congestion_controller(&conf.controller),
            debug: conf.controller.debug,
        })
    }

    /// Name of the congestion control algorithm.
    pub fn algorithm(&self) -> &str {
        self.cc.name()
    }

    /// Current window size, in datagrams.
    pub fn window_size(&self) -> u64 {
        let cwnd = self.cc.congestion_window();
        if self.debug {
            debug!("{}. window size is {}", self.cc.name(), cwnd);
        }
        cwnd
    }

    /// A datagram was sent.
    pub fn datagram_was_sent(&mut self, sequence_number: u64, send_timestamp: u64) {
        self.cc.on_sent(sequence_number, send_timestamp);

        if self.debug {
            debug!(
                "At time {} sent datagram {}",
                send_timestamp, sequence_number
            );
        }
    }

    /// An ack was received.
    ///
    /// `send_timestamp_acked` is when the acknowledged datagram was sent
    /// (sender's clock), `recv_timestamp_acked` when it was received
    /// (receiver's clock) and `timestamp_ack_received` when the ack arrived
    /// at the sender. All values are in milliseconds.
    pub fn ack_received(
        &mut self,
        sequence_number_acked: u64,
        send_timestamp_acked: u64,
        recv_timestamp_acked: u64,
        timestamp_ack_received: u64,
    ) -> Result<()> {
        let ack = AckSample {
            acked_seq: sequence_number_acked,
            send_time: send_timestamp_acked,
            recv_time: recv_timestamp_acked,
            ack_time: timestamp_ack_received,
        };
        self.cc.on_ack(&ack)?;

        if self.debug {
            debug!(
                "At time {} received ack for datagram {} (send @ time {}, received @ time {} by receiver's clock), cwnd {}",
                timestamp_ack_received,
                sequence_number_acked,
                send_timestamp_acked,
                recv_timestamp_acked,
                self.cc.congestion_window()
            );
        }
        Ok(())
    }

    /// How long to wait (in milliseconds) if there are no acks before
    /// treating a send as lost.
    pub fn timeout_ms(&self) -> u64 {
        self.cc.timeout_ms()
    }

    /// The timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms())
    }

    /// Minimum RTT observed so far, if the algorithm tracks one.
    pub fn min_rtt(&self) -> Option<u64> {
        self.cc.min_rtt()
    }

    /// Congestion control statistics.
    pub fn stats(&self) -> &CongestionStats {
        self.cc.stats()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cwnd={} timeout={}ms",
            self.cc.name(),
            self.cc.congestion_window(),
            self.cc.timeout_ms()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .format_timestamp_millis()
            .is_test(true)
            .init();
    }

    fn new_controller(initial_window: u64) -> Result<Controller> {
        let mut conf = Config::new();
        conf.set_initial_window(initial_window);
        conf.enable_debug(true);
        Controller::new(&conf)
    }

    #[test]
    fn config_defaults() {
        let conf = Config::new();
        let c = conf.controller_config();
        assert_eq!(
            c.congestion_control_algorithm,
            CongestionControlAlgorithm::Forecast
        );
        assert_eq!(c.initial_window, 50);
        assert_eq!(c.min_window, 1);
        assert_eq!(c.max_window, None);
        assert_eq!(c.initial_min_rtt_ms, 80);
        assert_eq!(c.max_delay_ms, 100);
        assert_eq!(c.rtt_history_len, 4);
        assert_eq!(c.prediction_threshold, 4);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn config_setters() {
        let mut conf = Config::new();

        conf.set_min_window(0);
        assert_eq!(conf.controller.min_window, 1);

        conf.set_initial_min_rtt(0);
        assert_eq!(conf.controller.initial_min_rtt_ms, 1);
        conf.set_max_delay(0);
        assert_eq!(conf.controller.max_delay_ms, 1);

        conf.set_rtt_history_len(8);
        assert_eq!(conf.controller.rtt_history_len, 8);
        assert_eq!(conf.controller.prediction_threshold, 8);

        conf.set_prediction_threshold(9);
        conf.set_rtt_history_len(6);
        assert_eq!(conf.controller.prediction_threshold, 9);
        assert!(conf.controller.validate().is_ok());
    }

    #[test]
    fn config_validate() {
        let cases = [
            ControllerConfig {
                min_window: 0,
                ..ControllerConfig::default()
            },
            ControllerConfig {
                initial_window: 0,
                ..ControllerConfig::default()
            },
            ControllerConfig {
                max_window: Some(10),
                ..ControllerConfig::default()
            },
            ControllerConfig {
                max_delay_ms: 0,
                ..ControllerConfig::default()
            },
            ControllerConfig {
                increase_constant: f64::NAN,
                ..ControllerConfig::default()
            },
            ControllerConfig {
                increase_constant: 0.0,
                ..ControllerConfig::default()
            },
            ControllerConfig {
                rtt_history_len: 1,
                prediction_threshold: 1,
                ..ControllerConfig::default()
            },
            ControllerConfig {
                prediction_threshold: 3,
                ..ControllerConfig::default()
            },
        ];

        for case in cases {
            assert!(matches!(case.validate(), Err(Error::InvalidConfig(_))));
            let conf = Config::from_controller_config(case);
            assert!(Controller::new(&conf).is_err());
        }
    }

    #[test]
    fn config_from_json() {
        let c: ControllerConfig = serde_json::from_str(
            r#"{"congestion_control_algorithm": "halving", "max_window": 64, "debug": true}"#,
        )
        .unwrap();
        assert_eq!(
            c.congestion_control_algorithm,
            CongestionControlAlgorithm::Halving
        );
        assert_eq!(c.max_window, Some(64));
        assert!(c.debug);
        assert_eq!(c.initial_window, DEFAULT_INITIAL_WINDOW);

        let c = Config::from_controller_config(c);
        let controller = Controller::new(&c).unwrap();
        assert_eq!(controller.algorithm(), "HALVING");
        assert_eq!(controller.timeout_ms(), 80);
    }

    #[test]
    fn controller_queries_are_idempotent() -> Result<()> {
        let mut c = new_controller(32)?;
        c.datagram_was_sent(0, 1000);
        c.ack_received(0, 1000, 1010, 1030)?;

        let (window, timeout) = (c.window_size(), c.timeout_ms());
        for _ in 0..3 {
            assert_eq!(c.window_size(), window);
            assert_eq!(c.timeout_ms(), timeout);
        }
        assert_eq!(timeout, 60);
        assert_eq!(c.timeout(), Duration::from_millis(60));
        assert_eq!(c.min_rtt(), Some(30));
        assert_eq!(format!("{:?}", c), "FORECAST cwnd=32 timeout=60ms");

        Ok(())
    }

    #[test]
    fn controller_scenario_predicted_halving() -> Result<()> {
        let mut c = new_controller(32)?;
        assert_eq!(c.min_rtt(), Some(80));

        for seq in 0..4 {
            let sent = 1000 + seq * 100;
            c.datagram_was_sent(seq, sent);
            c.ack_received(seq, sent, sent + 40, sent + 80)?;
        }
        assert_eq!(c.window_size(), 32);

        // One delayed ack with nothing else in flight.
        c.datagram_was_sent(4, 1400);
        c.ack_received(4, 1400, 1500, 1600)?;
        assert_eq!(c.window_size(), 16);
        assert_eq!(c.stats().window_reductions, 1);

        Ok(())
    }

    #[test]
    fn controller_scenario_additive_increase() -> Result<()> {
        let mut c = new_controller(32)?;
        for seq in 0..10 {
            let sent = 1000 + seq * 10;
            c.datagram_was_sent(seq, sent);
            c.ack_received(seq, sent, sent + 25, sent + 50)?;
            assert_eq!(c.window_size(), 32);
        }

        // 32 more acks at a window of 32 add one datagram.
        for seq in 10..32 {
            let sent = 1000 + seq * 10;
            c.datagram_was_sent(seq, sent);
            c.ack_received(seq, sent, sent + 25, sent + 50)?;
        }
        assert_eq!(c.window_size(), 33);

        Ok(())
    }

    #[test]
    fn controller_scenario_duplicate_ack_time() -> Result<()> {
        let mut c = new_controller(32)?;
        for seq in 0..8 {
            c.datagram_was_sent(seq, seq);
        }

        // Pairs of acks arrive at the same millisecond. Only the first ack of
        // each pair feeds the trend, so the seventh ack is the first one
        // judged on a prediction.
        for seq in 0..8 {
            c.ack_received(seq, seq, 30, 60 + seq / 2 * 10)?;
        }
        assert_eq!(c.stats().acks_received, 8);
        assert_eq!(c.stats().predicted_samples, 1);

        Ok(())
    }

    #[test]
    fn controller_rejects_malformed_timestamps() -> Result<()> {
        let mut c = new_controller(32)?;
        c.datagram_was_sent(0, 500);

        let res = c.ack_received(0, 500, 400, 300);
        assert!(matches!(res, Err(Error::MalformedTimestamp(_))));
        assert_eq!(c.window_size(), 32);
        assert_eq!(c.min_rtt(), Some(80));
        assert_eq!(c.stats().malformed_acks, 1);

        Ok(())
    }

    #[test]
    fn controllers_are_independent() -> Result<()> {
        let mut a = new_controller(32)?;
        let b = new_controller(32)?;

        a.datagram_was_sent(0, 0);
        a.ack_received(0, 0, 100, 500)?;
        assert!(a.window_size() < 32);
        assert_eq!(b.window_size(), 32);
        assert_eq!(b.min_rtt(), Some(80));

        Ok(())
    }
}

pub use crate::congestion_control::AckSample;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionStats;
pub use crate::error::Error;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

#[cfg(feature = "ffi")]
mod ffi;

pub mod error;
pub mod rtt;
