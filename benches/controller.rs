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

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

use datagrump::CongestionControlAlgorithm;
use datagrump::Config;
use datagrump::Controller;

const ACKS: u64 = 10_000;

/// Drive a controller with acks whose RTT oscillates around the timeout.
fn run(controller: &mut Controller) -> u64 {
    let mut now = 0;
    for seq in 0..ACKS {
        now += 5;
        controller.datagram_was_sent(seq, now);
        let rtt = 40 + (seq * 7) % 90;
        let _ = controller.ack_received(seq, now, now + rtt / 2, now + rtt);
    }
    controller.window_size()
}

pub fn ack_received_benchmark(c: &mut Criterion) {
    let algors = [
        ("forecast", CongestionControlAlgorithm::Forecast),
        ("aimd", CongestionControlAlgorithm::Aimd),
        ("halving", CongestionControlAlgorithm::Halving),
    ];

    for (name, algor) in algors {
        let mut conf = Config::new();
        conf.set_congestion_control_algorithm(algor);
        c.bench_function(&format!("{} ack received", name), |b| {
            b.iter(|| match Controller::new(&conf) {
                Ok(mut controller) => run(&mut controller),
                Err(_) => 0,
            })
        });
    }
}

pub fn rtt_history_benchmark(c: &mut Criterion) {
    for len in [4, 16, 64] {
        let mut conf = Config::new();
        conf.set_rtt_history_len(len);
        c.bench_function(&format!("forecast rtt history {}", len), |b| {
            b.iter(|| match Controller::new(&conf) {
                Ok(mut controller) => run(&mut controller),
                Err(_) => 0,
            })
        });
    }
}

criterion_group!(benches, ack_received_benchmark, rtt_history_benchmark);
criterion_main!(benches);
