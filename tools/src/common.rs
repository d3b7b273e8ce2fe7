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

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;

use log::debug;
use log::trace;
use log::warn;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use datagrump::Controller;
use datagrump::ControllerConfig;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Return the log target for the given log file. Logs go to `stderr` if no
/// file is specified.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    match log_file {
        Some(path) => Ok(env_logger::Target::Pipe(Box::new(File::create(path)?))),
        None => Ok(env_logger::Target::Stderr),
    }
}

/// Load controller configurations from a JSON file. Missing fields take their
/// default values.
pub fn load_controller_config(path: &str) -> Result<ControllerConfig> {
    let file = File::open(path)?;
    let conf: ControllerConfig = serde_json::from_reader(BufReader::new(file))?;
    conf.validate()?;
    Ok(conf)
}

/// Load a delivery trace: one millisecond timestamp per line, each granting
/// one datagram delivery opportunity. The trace repeats after its last entry.
pub fn load_trace(path: &str) -> Result<Vec<u64>> {
    parse_trace(BufReader::new(File::open(path)?))
}

fn parse_trace<R: BufRead>(reader: R) -> Result<Vec<u64>> {
    let mut ops = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let t: u64 = line
            .parse()
            .map_err(|e| format!("trace line {}: {:?}: {}", lineno + 1, line, e))?;
        if let Some(&last) = ops.last() {
            if t < last {
                return Err(format!("trace line {}: {} goes back in time", lineno + 1, t).into());
            }
        }
        ops.push(t);
    }

    if ops.is_empty() {
        return Err("empty trace".into());
    }
    Ok(ops)
}

/// How the bottleneck link hands out delivery opportunities.
#[derive(Debug, Clone)]
pub enum DeliverySchedule {
    /// Fixed rate in datagrams per second.
    Constant(f64),

    /// Delivery opportunities in milliseconds, repeated periodically.
    Trace(Vec<u64>),
}

/// Walks a periodic delivery trace.
#[derive(Debug)]
struct TraceCursor {
    ops: Vec<u64>,
    index: usize,
    base: u64,
    period: u64,
}

impl TraceCursor {
    fn new(ops: Vec<u64>) -> Self {
        let period = ops.last().copied().unwrap_or(0).max(1);
        Self {
            ops,
            index: 0,
            base: 0,
            period,
        }
    }

    /// Number of delivery opportunities up to and including `now` that were
    /// not handed out yet.
    fn opportunities(&mut self, now: u64) -> u64 {
        let mut n = 0;
        while !self.ops.is_empty() && self.base + self.ops[self.index] <= now {
            n += 1;
            self.index += 1;
            if self.index == self.ops.len() {
                self.index = 0;
                self.base += self.period;
            }
        }
        n
    }
}

/// Bottleneck link configurations.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Delivery schedule of the bottleneck.
    pub schedule: DeliverySchedule,

    /// One-way propagation delay in milliseconds, applied in both directions.
    pub one_way_delay: u64,

    /// Max random extra delay of the ack path in milliseconds.
    pub jitter: u64,

    /// Max number of queued datagrams. Zero leaves the queue unbounded.
    pub queue_limit: usize,

    /// Probability that a datagram is lost before entering the queue.
    pub loss: f64,

    /// Seed of the random generator.
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            schedule: DeliverySchedule::Constant(1000.0),
            one_way_delay: 20,
            jitter: 0,
            queue_limit: 0,
            loss: 0.0,
            seed: 0,
        }
    }
}

/// An ack travelling back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ack {
    /// When the ack reaches the sender.
    pub ack_time: u64,

    /// Sequence number of the acknowledged datagram.
    pub seq: u64,

    /// When the datagram was sent.
    pub send_time: u64,

    /// When the datagram left the bottleneck.
    pub recv_time: u64,
}

/// A single bottleneck link with a FIFO queue and a fixed delay path back.
pub struct Link {
    config: LinkConfig,
    queue: VecDeque<(u64, u64)>,
    credit: f64,
    cursor: Option<TraceCursor>,
    acks: BinaryHeap<Reverse<Ack>>,
    rng: StdRng,
    dropped: u64,
}

impl Link {
    pub fn new(config: LinkConfig) -> Self {
        let cursor = match &config.schedule {
            DeliverySchedule::Trace(ops) => Some(TraceCursor::new(ops.clone())),
            DeliverySchedule::Constant(_) => None,
        };
        let rng = StdRng::seed_from_u64(config.seed);

        Self {
            config,
            queue: VecDeque::new(),
            credit: 0.0,
            cursor,
            acks: BinaryHeap::new(),
            rng,
            dropped: 0,
        }
    }

    /// Offer a datagram to the link. Return false if it was dropped.
    pub fn send(&mut self, seq: u64, now: u64) -> bool {
        if self.config.loss > 0.0 && self.rng.gen::<f64>() < self.config.loss {
            self.dropped += 1;
            trace!("link: lost datagram {} at {}", seq, now);
            return false;
        }
        if self.config.queue_limit > 0 && self.queue.len() >= self.config.queue_limit {
            self.dropped += 1;
            trace!("link: queue full, drop datagram {} at {}", seq, now);
            return false;
        }

        self.queue.push_back((seq, now));
        true
    }

    /// Serve the queue for the millisecond `now`.
    pub fn tick(&mut self, now: u64) {
        let opportunities = match (&self.config.schedule, self.cursor.as_mut()) {
            (_, Some(cursor)) => cursor.opportunities(now),
            (DeliverySchedule::Constant(rate), None) => {
                self.credit += rate / 1000.0;
                let n = self.credit.floor();
                self.credit -= n;
                n as u64
            }
            (DeliverySchedule::Trace(_), None) => 0,
        };

        for _ in 0..opportunities {
            let (seq, send_time) = match self.queue.pop_front() {
                Some(d) => d,
                None => break,
            };

            let recv_time = now + self.config.one_way_delay;
            let jitter = if self.config.jitter > 0 {
                self.rng.gen_range(0..=self.config.jitter)
            } else {
                0
            };
            self.acks.push(Reverse(Ack {
                ack_time: recv_time + self.config.one_way_delay + jitter,
                seq,
                send_time,
                recv_time,
            }));
        }
    }

    /// Pop the next ack arriving at or before `now`.
    pub fn poll_ack(&mut self, now: u64) -> Option<Ack> {
        match self.acks.peek() {
            Some(Reverse(ack)) if ack.ack_time <= now => self.acks.pop().map(|Reverse(a)| a),
            _ => None,
        }
    }

    /// Number of datagrams waiting at the bottleneck.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of datagrams dropped by the link.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Result of a simulation run.
#[derive(Debug, Default)]
pub struct Report {
    /// Simulated time in milliseconds.
    pub duration: u64,

    /// Datagrams sent, including those sent on timeout.
    pub sent: u64,

    /// Datagrams sent on timeout while the window was closed.
    pub forced_sends: u64,

    /// Acks delivered to the controller.
    pub acked: u64,

    /// Datagrams dropped by the link.
    pub dropped: u64,

    /// Acks rejected by the controller.
    pub rejected: u64,

    /// RTT of every accepted ack, in milliseconds.
    pub rtt_samples: Vec<f64>,

    /// (time, window) pairs taken at the sample interval.
    pub window_samples: Vec<(u64, u64)>,
}

impl Report {
    /// Acked datagrams per second.
    pub fn throughput(&self) -> f64 {
        if self.duration == 0 {
            return 0.0;
        }
        self.acked as f64 * 1000.0 / self.duration as f64
    }
}

/// Drives a controller against a simulated link, the way a datagram sender
/// does: send while the window is open, send one datagram anyway when no
/// event happened within the timeout, and never retransmit.
pub struct Simulation {
    controller: Controller,
    link: Link,
    next_seq: u64,
    next_ack_expected: u64,
    last_activity: u64,
}

impl Simulation {
    pub fn new(controller: Controller, link: Link) -> Self {
        Self {
            controller,
            link,
            next_seq: 0,
            next_ack_expected: 0,
            last_activity: 0,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    fn send(&mut self, now: u64, report: &mut Report) {
        let seq = self.next_seq;
        self.controller.datagram_was_sent(seq, now);
        self.link.send(seq, now);
        self.next_seq += 1;
        self.last_activity = now;
        report.sent += 1;
    }

    /// Run for `duration` milliseconds, sampling the window every
    /// `sample_interval` milliseconds.
    pub fn run(&mut self, duration: u64, sample_interval: u64) -> Report {
        let mut report = Report {
            duration,
            ..Report::default()
        };
        let sample_interval = sample_interval.max(1);

        for now in 0..duration {
            self.link.tick(now);

            while let Some(ack) = self.link.poll_ack(now) {
                match self
                    .controller
                    .ack_received(ack.seq, ack.send_time, ack.recv_time, ack.ack_time)
                {
                    Ok(_) => {
                        report.acked += 1;
                        report
                            .rtt_samples
                            .push(ack.ack_time.saturating_sub(ack.send_time) as f64);
                    }
                    Err(e) => {
                        warn!("ack {} rejected: {:?}", ack.seq, e);
                        report.rejected += 1;
                    }
                }
                self.next_ack_expected = self.next_ack_expected.max(ack.seq + 1);
                self.last_activity = now;
            }

            while self.next_seq - self.next_ack_expected < self.controller.window_size() {
                self.send(now, &mut report);
            }

            if now.saturating_sub(self.last_activity) >= self.controller.timeout_ms() {
                debug!(
                    "timeout at {}, {} datagrams outstanding",
                    now,
                    self.next_seq - self.next_ack_expected
                );
                self.send(now, &mut report);
                report.forced_sends += 1;
            }

            if now % sample_interval == 0 {
                report
                    .window_samples
                    .push((now, self.controller.window_size()));
            }
        }

        report.dropped = self.link.dropped();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datagrump::Config;

    #[test]
    fn trace_parse() {
        let ops = parse_trace("1\n1\n\n 3 \n".as_bytes()).unwrap();
        assert_eq!(ops, vec![1, 1, 3]);

        assert!(parse_trace("".as_bytes()).is_err());
        assert!(parse_trace("5\n4\n".as_bytes()).is_err());
        assert!(parse_trace("1\nx\n".as_bytes()).is_err());
    }

    #[test]
    fn trace_cursor_repeats() {
        let mut cursor = TraceCursor::new(vec![1, 1, 3]);
        let counts: Vec<u64> = (0..7).map(|now| cursor.opportunities(now)).collect();
        assert_eq!(counts, vec![0, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn link_constant_rate() {
        let mut link = Link::new(LinkConfig {
            one_way_delay: 10,
            ..LinkConfig::default()
        });
        assert!(link.send(0, 0));
        assert!(link.send(1, 0));

        link.tick(0);
        link.tick(1);
        assert_eq!(link.queue_len(), 0);

        assert_eq!(link.poll_ack(19), None);
        let ack = link.poll_ack(20).unwrap();
        assert_eq!((ack.seq, ack.send_time, ack.recv_time), (0, 0, 10));
        assert_eq!(link.poll_ack(20), None);
        assert_eq!(link.poll_ack(21).map(|a| a.seq), Some(1));
    }

    #[test]
    fn link_queue_limit() {
        let mut link = Link::new(LinkConfig {
            queue_limit: 2,
            ..LinkConfig::default()
        });
        assert!(link.send(0, 0));
        assert!(link.send(1, 0));
        assert!(!link.send(2, 0));
        assert_eq!(link.dropped(), 1);
    }

    #[test]
    fn simulation_run() {
        let controller = Controller::new(&Config::new()).unwrap();
        let link = Link::new(LinkConfig {
            queue_limit: 100,
            ..LinkConfig::default()
        });
        let mut sim = Simulation::new(controller, link);

        let report = sim.run(2000, 100);
        assert!(report.acked > 0);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.window_samples.len(), 20);
        assert!(report.window_samples.iter().all(|&(_, w)| w >= 1));
        assert!(report.rtt_samples.iter().all(|&rtt| rtt >= 40.0));
        assert!(report.throughput() <= 1000.0);
    }
}
