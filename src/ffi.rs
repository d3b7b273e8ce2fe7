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

// Note: The API is not stable and may change in future versions.

use std::ptr;
use std::sync::atomic;

use libc::c_void;
use libc::size_t;
use libc::ssize_t;

use crate::CongestionControlAlgorithm;
use crate::Config;
use crate::Controller;

struct LogWriter {
    cb: extern "C" fn(data: *const u8, data_len: size_t, argp: *mut c_void),
    argp: atomic::AtomicPtr<c_void>,
}

impl log::Log for LogWriter {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let line = format!("{}: {}\n", record.target(), record.args());
        (self.cb)(
            line.as_ptr(),
            line.len(),
            self.argp.load(atomic::Ordering::Relaxed),
        );
    }

    fn flush(&self) {}
}

/// Create default configuration.
/// The caller is responsible for the memory of the Config and should properly
/// destroy it by calling `datagrump_config_free`.
#[no_mangle]
pub extern "C" fn datagrump_config_new() -> *mut Config {
    Box::into_raw(Box::new(Config::new()))
}

/// Destroy a Config instance.
#[no_mangle]
pub extern "C" fn datagrump_config_free(config: *mut Config) {
    if config.is_null() {
        return;
    }
    unsafe {
        let _ = Box::from_raw(config);
    };
}

/// Set congestion control algorithm that the controller would use.
#[no_mangle]
pub extern "C" fn datagrump_config_set_congestion_control_algorithm(
    config: &mut Config,
    v: CongestionControlAlgorithm,
) {
    config.set_congestion_control_algorithm(v);
}

/// Set the initial congestion window in datagrams.
/// The default value is 50.
#[no_mangle]
pub extern "C" fn datagrump_config_set_initial_window(config: &mut Config, v: u64) {
    config.set_initial_window(v);
}

/// Set the minimal congestion window in datagrams.
/// The default value is 1.
#[no_mangle]
pub extern "C" fn datagrump_config_set_min_window(config: &mut Config, v: u64) {
    config.set_min_window(v);
}

/// Set the maximum congestion window in datagrams. Zero leaves the window
/// unbounded, which is the default.
#[no_mangle]
pub extern "C" fn datagrump_config_set_max_window(config: &mut Config, v: u64) {
    config.set_max_window(if v == 0 { None } else { Some(v) });
}

/// Set the minimum RTT assumed before the first sample, in milliseconds.
/// The default value is 80ms.
#[no_mangle]
pub extern "C" fn datagrump_config_set_initial_min_rtt(config: &mut Config, v: u64) {
    config.set_initial_min_rtt(v);
}

/// Set the upper limit of the timeout in milliseconds.
/// The default value is 100ms.
#[no_mangle]
pub extern "C" fn datagrump_config_set_max_delay(config: &mut Config, v: u64) {
    config.set_max_delay(v);
}

/// Set the additive increase constant. The default value is 1.0.
#[no_mangle]
pub extern "C" fn datagrump_config_set_increase_constant(config: &mut Config, v: f64) {
    config.set_increase_constant(v);
}

/// Set the number of RTT samples the trend is fitted over.
/// The default value is 4.
#[no_mangle]
pub extern "C" fn datagrump_config_set_rtt_history_len(config: &mut Config, v: size_t) {
    config.set_rtt_history_len(v);
}

/// Set the number of samples required before the predicted RTT is used.
#[no_mangle]
pub extern "C" fn datagrump_config_set_prediction_threshold(config: &mut Config, v: u64) {
    config.set_prediction_threshold(v);
}

/// Enable debug output for every event.
#[no_mangle]
pub extern "C" fn datagrump_config_enable_debug(config: &mut Config, v: bool) {
    config.enable_debug(v);
}

/// Create a controller. Return null if the configuration is invalid.
/// The caller is responsible for the memory of the Controller and should
/// properly destroy it by calling `datagrump_controller_free`.
#[no_mangle]
pub extern "C" fn datagrump_controller_new(config: &Config) -> *mut Controller {
    match Controller::new(config) {
        Ok(c) => Box::into_raw(Box::new(c)),
        Err(e) => {
            log::error!("create controller failed: {:?}", e);
            ptr::null_mut()
        }
    }
}

/// Destroy a Controller instance.
#[no_mangle]
pub extern "C" fn datagrump_controller_free(controller: *mut Controller) {
    if controller.is_null() {
        return;
    }
    unsafe {
        let _ = Box::from_raw(controller);
    };
}

/// Return the current window size in datagrams.
#[no_mangle]
pub extern "C" fn datagrump_controller_window_size(controller: &Controller) -> u64 {
    controller.window_size()
}

/// Notify the controller that a datagram was sent.
#[no_mangle]
pub extern "C" fn datagrump_controller_datagram_was_sent(
    controller: &mut Controller,
    sequence_number: u64,
    send_timestamp: u64,
) {
    controller.datagram_was_sent(sequence_number, send_timestamp);
}

/// Notify the controller that an ack was received.
/// Return 0 on success or a negative error code if the ack was rejected.
#[no_mangle]
pub extern "C" fn datagrump_controller_ack_received(
    controller: &mut Controller,
    sequence_number_acked: u64,
    send_timestamp_acked: u64,
    recv_timestamp_acked: u64,
    timestamp_ack_received: u64,
) -> ssize_t {
    match controller.ack_received(
        sequence_number_acked,
        send_timestamp_acked,
        recv_timestamp_acked,
        timestamp_ack_received,
    ) {
        Ok(_) => 0,
        Err(e) => e.to_errno(),
    }
}

/// Return the timeout in milliseconds.
#[no_mangle]
pub extern "C" fn datagrump_controller_timeout_ms(controller: &Controller) -> u64 {
    controller.timeout_ms()
}

/// Set logger.
/// The `cb` will be called with log messages. The `argp` is passed through
/// to the callback.
#[no_mangle]
pub extern "C" fn datagrump_set_logger(
    cb: extern "C" fn(data: *const u8, data_len: size_t, argp: *mut c_void),
    argp: *mut c_void,
    level: log::LevelFilter,
) {
    let argp = atomic::AtomicPtr::new(argp);
    let logger = Box::new(LogWriter { cb, argp });
    let _ = log::set_boxed_logger(logger);
    log::set_max_level(level);
}
