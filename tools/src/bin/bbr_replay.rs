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


//! Replay an acknowledgment trace through the BBR engine.
//!
//! Each non-empty line of the trace that does not start with `#` is one ACK:
//!
//! ```text
//! time_ms acked lost rtt_us interval_us [tx_in_flight pipe app_limited in_recovery [prior_delivered]]
//! ```
//!
//! `acked`, `lost`, `tx_in_flight` and `pipe` are in bytes. The flags are
//! `0` or `1`. Trailing fields default to zero, except `prior_delivered`.
//! It is the delivered count when the newest acked segment was sent, and
//! defaults to the delivered count before the record, so a record without
//! it always ends a round. For every ACK the tool prints the mode, the gains,
//! the pacing rate and the congestion window.

use std::error::Error;
use std::fs::File;
use std::io::stdin;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use log::debug;
use log::info;

use bbr_engine::Bbr;
use bbr_engine::CongestionController;
use bbr_engine::Config;
use bbr_engine::DeliverySample;
use bbr_engine::InitialWindow;
use bbr_engine::TcpControlBlock;

type Result<T> = std::result::Result<T, Box<dyn Error>>;

#[derive(Parser, Debug, Clone)]
#[clap(name = "bbr_replay")]
pub struct ReplayOpt {
    /// Trace file. If no file is specified, the trace is read from `stdin`.
    ///
    /// One ACK per line: `time_ms acked lost rtt_us interval_us` followed by
    /// the optional `tx_in_flight pipe app_limited in_recovery
    /// prior_delivered`. Without `prior_delivered` every record ends a round.
    #[clap(value_name = "FILE")]
    pub trace: Option<String>,

    /// Sender maximum segment size in bytes.
    #[clap(long, default_value = "1460", value_name = "BYTES")]
    pub mss: u64,

    /// Smoothed RTT known at connection start, in microseconds. "0" means unknown.
    #[clap(long, default_value = "0", value_name = "US")]
    pub srtt: u64,

    /// Initial congestion window, in segments or "rfc5681".
    #[clap(long, default_value = "4", value_name = "WINDOW")]
    pub initial_window: InitialWindow,

    /// Minimal congestion window in segments.
    #[clap(long, default_value = "4", value_name = "NUM")]
    pub min_cwnd: u64,

    /// Cwnd gain in ProbeBW.
    #[clap(long, default_value = "2.0", value_name = "GAIN")]
    pub cwnd_gain: f64,

    /// Pacing margin in percent.
    #[clap(long, default_value = "1", value_name = "PERCENT")]
    pub pacing_margin: u64,

    /// Allow extra cwnd for ACK aggregation.
    #[clap(long)]
    pub aggregation_budget: bool,

    /// Seed of the ProbeBW wait randomization, for reproducible replays.
    #[clap(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Print the congestion stats as JSON when the trace ends.
    #[clap(long)]
    pub stats: bool,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,
}

/// One acknowledgment of the trace.
#[derive(Debug, Default, Clone, PartialEq)]
struct AckRecord {
    time: Duration,
    acked: u64,
    lost: u64,
    rtt: Duration,
    interval: Duration,
    tx_in_flight: u64,
    pipe: u64,
    app_limited: bool,
    in_recovery: bool,
    /// Delivered count when the newest acked segment was sent.
    prior_delivered: Option<u64>,
}

impl FromStr for AckRecord {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let mut fields = [0_u64; 10];
        let mut n = 0;
        for field in s.split_whitespace() {
            if n == fields.len() {
                return Err(format!("too many fields in \"{}\"", s));
            }
            fields[n] = field
                .parse()
                .map_err(|e| format!("field {} \"{}\": {}", n + 1, field, e))?;
            n += 1;
        }
        if n < 5 {
            return Err(format!("expect at least 5 fields, got {}", n));
        }

        Ok(AckRecord {
            time: Duration::from_millis(fields[0]),
            acked: fields[1],
            lost: fields[2],
            rtt: Duration::from_micros(fields[3]),
            interval: Duration::from_micros(fields[4]),
            tx_in_flight: fields[5],
            pipe: fields[6],
            app_limited: fields[7] != 0,
            in_recovery: fields[8] != 0,
            prior_delivered: if n == fields.len() {
                Some(fields[9])
            } else {
                None
            },
        })
    }
}

fn build_config(option: &ReplayOpt) -> Result<Config> {
    let mut conf = Config::new();
    conf.set_initial_window(option.initial_window)?;
    conf.set_min_pipe_cwnd_segments(option.min_cwnd)?;
    conf.set_cwnd_gain(option.cwnd_gain)?;
    conf.set_pacing_margin_percent(option.pacing_margin)?;
    conf.enable_aggregation_budget(option.aggregation_budget);
    if let Some(seed) = option.seed {
        conf.set_random_seed(seed);
    }
    Ok(conf)
}

/// Feed the trace into a fresh controller and print one line per ACK.
fn replay(option: &ReplayOpt, input: impl BufRead, out: &mut impl Write) -> Result<Bbr> {
    let conf = build_config(option)?;
    let mut conn = TcpControlBlock::new(option.mss);
    conn.srtt_us = option.srtt;

    let start = Instant::now();
    let mut bbr = Bbr::new(&conf, &mut conn, start);
    writeln!(out, "# time_ms mode pacing_gain cwnd_gain pacing_rate cwnd")?;

    for (i, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: AckRecord = line
            .parse()
            .map_err(|e| format!("line {}: {}", i + 1, e))?;
        debug!("line {}: {:?}", i + 1, record);

        let prior_delivered = record.prior_delivered.unwrap_or(conn.delivered);
        conn.delivered += record.acked;
        conn.pipe = record.pipe;
        conn.app_limited = record.app_limited;
        conn.in_recovery = record.in_recovery;
        if !record.rtt.is_zero() {
            conn.srtt_us = record.rtt.as_micros() as u64;
        }

        let mut sample = DeliverySample::new(record.acked, record.interval)
            .with_rtt(record.rtt)
            .with_prior_delivered(prior_delivered)
            .with_loss(record.lost, record.tx_in_flight)
            .with_app_limited(record.app_limited);
        sample.newly_lost = record.lost;

        let now = start + record.time;
        bbr.on_ack(&mut conn, &sample, now);
        bbr.on_transmit(&mut conn, now);

        let gains = bbr.gains();
        writeln!(
            out,
            "{} {} {:.2} {:.2} {} {}",
            record.time.as_millis(),
            bbr.mode().name(),
            gains.pacing,
            gains.cwnd,
            bbr.pacing_rate().unwrap_or(0),
            bbr.congestion_window(),
        )?;
    }

    Ok(bbr)
}

fn main() -> Result<()> {
    let option = ReplayOpt::parse();

    env_logger::builder()
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let input: Box<dyn BufRead> = match &option.trace {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(stdin())),
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let bbr = replay(&option, input, &mut out)?;

    info!(
        "replay done: mode {}, {} rounds, max_bw {}, min_rtt {:?}",
        bbr.mode().name(),
        bbr.round_count(),
        bbr.max_bw(),
        bbr.min_rtt()
    );

    if option.stats {
        writeln!(out, "{}", serde_json::to_string(bbr.stats())?)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(args: &[&str]) -> ReplayOpt {
        let mut argv = vec!["bbr_replay"];
        argv.extend_from_slice(args);
        ReplayOpt::parse_from(argv)
    }

    #[test]
    fn parse_record() {
        let record: AckRecord = "10 2920 0 50000 10000".parse().unwrap();
        assert_eq!(record.time, Duration::from_millis(10));
        assert_eq!(record.acked, 2920);
        assert_eq!(record.rtt, Duration::from_millis(50));
        assert_eq!(record.interval, Duration::from_millis(10));
        assert!(!record.app_limited);

        let record: AckRecord = "10 2920 1460 50000 10000 8760 5840 1 1".parse().unwrap();
        assert_eq!(record.lost, 1460);
        assert_eq!(record.tx_in_flight, 8760);
        assert_eq!(record.pipe, 5840);
        assert!(record.app_limited);
        assert!(record.in_recovery);
        assert_eq!(record.prior_delivered, None);

        let record: AckRecord = "10 2920 0 50000 10000 0 0 0 0 1460".parse().unwrap();
        assert_eq!(record.prior_delivered, Some(1460));

        assert!("10 2920 0 50000".parse::<AckRecord>().is_err());
        assert!("10 2920 0 50000 x".parse::<AckRecord>().is_err());
        assert!("1 2 3 4 5 6 7 8 9 10 11".parse::<AckRecord>().is_err());
    }

    #[test]
    fn options() {
        let opt = option(&["--initial-window", "rfc5681", "--seed", "3"]);
        assert_eq!(opt.initial_window, InitialWindow::Rfc5681);
        assert_eq!(opt.seed, Some(3));
        assert!(opt.trace.is_none());

        let opt = option(&[]);
        assert_eq!(opt.initial_window, InitialWindow::Segments(4));

        assert!(ReplayOpt::try_parse_from(["bbr_replay", "--initial-window", "0"]).is_err());
        assert!(build_config(&option(&["--cwnd-gain", "0"])).is_err());
    }

    #[test]
    fn replay_trace() {
        let mut trace = String::from("# time acked lost rtt interval\n\n");
        for i in 1..=40 {
            trace.push_str(&format!("{} 14600 0 50000 50000 0 14600\n", i * 50));
        }

        let mut out = Vec::new();
        let bbr = replay(&option(&["--seed", "7"]), trace.as_bytes(), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(out.lines().count(), 41);
        assert!(out.lines().nth(1).unwrap().contains("Startup"));
        assert!(bbr.is_filled_pipe());
        assert_eq!(bbr.stats().bytes_delivered_in_total, 40 * 14600);
    }

    #[test]
    fn replay_mid_round_acks() {
        let lines = [
            "50 14600 0 50000 50000 0 14600 0 0",
            "100 14600 0 50000 50000 0 14600 0 0",
            "150 14600 0 50000 50000 0 14600 0 0",
            "200 14600 0 50000 50000 0 14600 0 0",
        ];

        // Each record ends a round by default.
        let trace = lines.join("\n");
        let mut out = Vec::new();
        let bbr = replay(&option(&[]), trace.as_bytes(), &mut out).unwrap();
        assert_eq!(bbr.round_count(), 4);

        // The second and fourth ACK cover segments sent within the round.
        let prior = ["0", "0", "14600", "14600"];
        let trace = lines
            .iter()
            .zip(prior)
            .map(|(line, prior)| format!("{} {}\n", line, prior))
            .collect::<String>();
        let mut out = Vec::new();
        let bbr = replay(&option(&[]), trace.as_bytes(), &mut out).unwrap();
        assert_eq!(bbr.round_count(), 2);
        assert_eq!(bbr.stats().bytes_delivered_in_total, 4 * 14600);
    }

    #[test]
    fn replay_reports_bad_line() {
        let mut out = Vec::new();
        let err = replay(&option(&[]), "50 1460 0 50000 50000\noops\n".as_bytes(), &mut out)
            .unwrap_err();
        assert!(err.to_string().starts_with("line 2:"), "{}", err);
    }
}
