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

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use log::info;
use statrs::statistics::Data;
use statrs::statistics::Distribution;
use statrs::statistics::Max;
use statrs::statistics::Min;
use statrs::statistics::OrderStatistics;

use datagrump::Config;
use datagrump::CongestionControlAlgorithm;
use datagrump::Controller;
use datagrump::ControllerConfig;
use datagrump_tools::DeliverySchedule;
use datagrump_tools::Link;
use datagrump_tools::LinkConfig;
use datagrump_tools::Report;
use datagrump_tools::Result;
use datagrump_tools::Simulation;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser, Debug, Clone)]
#[clap(name = "datagrump_sim")]
pub struct SimOpt {
    /// Controller configuration file in JSON. Missing fields take their
    /// default values.
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<String>,

    /// Congestion control algorithm, support FORECAST/AIMD/HALVING.
    /// Overrides the configuration file.
    #[clap(long, value_name = "STR")]
    pub congestion_control_algorithm: Option<CongestionControlAlgorithm>,

    /// Initial congestion window in datagrams. Overrides the configuration
    /// file.
    #[clap(long, value_name = "NUM")]
    pub initial_window: Option<u64>,

    /// Delivery trace of the bottleneck, one millisecond timestamp per
    /// delivery opportunity. Overrides `--rate`.
    #[clap(short, long, value_name = "FILE")]
    pub trace: Option<String>,

    /// Bottleneck rate in datagrams per second.
    #[clap(long, default_value = "1000", value_name = "NUM")]
    pub rate: f64,

    /// One-way propagation delay in milliseconds.
    #[clap(long, default_value = "20", value_name = "TIME")]
    pub delay: u64,

    /// Max random extra delay of acks in milliseconds.
    #[clap(long, default_value = "0", value_name = "TIME")]
    pub jitter: u64,

    /// Max number of datagrams queued at the bottleneck. "0" means unbounded.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub queue_limit: usize,

    /// Random loss rate before the bottleneck.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub loss: f64,

    /// Simulated time in milliseconds.
    #[clap(short, long, default_value = "10000", value_name = "TIME")]
    pub duration: u64,

    /// Seed of the random generator.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub seed: u64,

    /// Interval of window samples in milliseconds.
    #[clap(long, default_value = "100", value_name = "TIME")]
    pub sample_interval: u64,

    /// Print the window trajectory to stdout.
    #[clap(short, long)]
    pub print_window: bool,

    /// Log every controller event at debug level.
    #[clap(long)]
    pub debug: bool,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

fn parse_option() -> std::result::Result<SimOpt, clap::error::Error> {
    let option = SimOpt::parse();

    if !(0.0..1.0).contains(&option.loss) {
        return Err(SimOpt::command().error(
            ErrorKind::ValueValidation,
            "Loss rate should be in [0, 1)",
        ));
    }
    if option.trace.is_none() && option.rate <= 0.0 {
        return Err(SimOpt::command().error(
            ErrorKind::ValueValidation,
            "Rate should be positive",
        ));
    }

    Ok(option)
}

fn controller_config(option: &SimOpt) -> Result<ControllerConfig> {
    let mut conf = match &option.config {
        Some(path) => datagrump_tools::load_controller_config(path)?,
        None => ControllerConfig::default(),
    };

    if let Some(cca) = option.congestion_control_algorithm {
        conf.congestion_control_algorithm = cca;
    }
    if let Some(initial_window) = option.initial_window {
        conf.initial_window = initial_window;
    }
    conf.debug |= option.debug;
    Ok(conf)
}

fn link_config(option: &SimOpt) -> Result<LinkConfig> {
    let schedule = match &option.trace {
        Some(path) => DeliverySchedule::Trace(datagrump_tools::load_trace(path)?),
        None => DeliverySchedule::Constant(option.rate),
    };

    Ok(LinkConfig {
        schedule,
        one_way_delay: option.delay,
        jitter: option.jitter,
        queue_limit: option.queue_limit,
        loss: option.loss,
        seed: option.seed,
    })
}

fn print_report(name: &str, report: &Report, option: &SimOpt) {
    if option.print_window {
        println!("time(ms)\twindow");
        for (time, window) in &report.window_samples {
            println!("{}\t{}", time, window);
        }
    }

    println!("algorithm: {}, duration: {}ms", name, report.duration);
    println!(
        "datagrams: sent {}, acked {}, dropped {}, rejected {}, forced {}",
        report.sent, report.acked, report.dropped, report.rejected, report.forced_sends
    );
    println!("throughput: {:.2} datagrams/s", report.throughput());

    if !report.rtt_samples.is_empty() {
        let mut s = Data::new(report.rtt_samples.clone());
        println!("rtt(ms):");
        println!(
            "\tmin: {:.2}, max: {:.2}, mean: {:.2}, sd: {:.2}",
            s.min(),
            s.max(),
            s.mean().unwrap_or(0.0),
            s.std_dev().unwrap_or(0.0),
        );
        println!(
            "\tmedian: {:.2}, p90: {:.2}, p95: {:.2}, p99: {:.2}",
            s.median(),
            s.percentile(90),
            s.percentile(95),
            s.percentile(99),
        );

        let p95 = s.percentile(95);
        if p95 > 0.0 {
            println!("power: {:.2}", report.throughput() / p95);
        }
    }

    if !report.window_samples.is_empty() {
        let windows: Vec<f64> = report
            .window_samples
            .iter()
            .map(|&(_, w)| w as f64)
            .collect();
        let s = Data::new(windows);
        println!(
            "window: min {:.0}, max {:.0}, mean {:.2}",
            s.min(),
            s.max(),
            s.mean().unwrap_or(0.0)
        );
    }
}

fn main() -> Result<()> {
    // Parse simulator option.
    let option = match parse_option() {
        Ok(option) => option,
        Err(e) => e.exit(),
    };

    env_logger::builder()
        .target(datagrump_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let conf = Config::from_controller_config(controller_config(&option)?);
    let controller = Controller::new(&conf)?;
    let name = controller.algorithm().to_string();
    info!("simulate {:?} with {:?}", conf.controller_config(), option);

    let link = Link::new(link_config(&option)?);
    let mut sim = Simulation::new(controller, link);
    let report = sim.run(option.duration, option.sample_interval);
    info!("final state {:?}", sim.controller());

    print_report(&name, &report, &option);
    Ok(())
}
