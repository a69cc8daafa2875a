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

//! The decision engine of a BBR congestion controller.
//!
//! The engine sits inside a reliable transport and, on every acknowledgment
//! and every transmission, decides two outputs for the connection: the
//! pacing rate (bytes per second) and the congestion window (bytes). It
//! keeps an explicit model of the path (windowed max bandwidth, windowed
//! min RTT, loss-driven bounds) and cycles through the BBR modes Startup,
//! Drain, ProbeBW (DOWN, CRUISE, REFILL, UP) and ProbeRTT.
//!
//! The engine does not send, receive or time anything itself. The transport
//! owns the connection record and exposes it through [`ConnectionState`];
//! delivery-rate samples are computed by the transport and handed in as
//! [`DeliverySample`]s.
//!
//! ## Get started
//!
//! ```
//! use std::time::{Duration, Instant};
//! use bbr_engine::{Config, CongestionController, DeliverySample, TcpControlBlock};
//!
//! let mut conn = TcpControlBlock::new(1460);
//! conn.srtt_us = 50_000;
//!
//! let conf = Config::new();
//! let now = Instant::now();
//! let mut cc = bbr_engine::build_congestion_controller(&conf, &mut conn, now);
//!
//! conn.delivered += 14600;
//! let sample = DeliverySample::new(14600, Duration::from_millis(50))
//!     .with_rtt(Duration::from_millis(50));
//! cc.on_ack(&mut conn, &sample, now + Duration::from_millis(50));
//!
//! assert!(cc.pacing_rate().is_some());
//! assert_eq!(conn.cwnd, cc.congestion_window());
//! ```
//!
//! ## Feature flags
//!
//! * `ffi`: Build and expose the FFI API.

use std::cmp;
use std::str::FromStr;
use std::time::Duration;

use crate::congestion_control::STARTUP_PACING_GAIN;

/// Timer granularity. Also the smallest RTT the engine divides by.
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// Default initial congestion window in segments.
const DEFAULT_INITIAL_WINDOW_SEGMENTS: u64 = 4;

/// BBRMinPipeCwnd in segments.
const DEFAULT_MIN_PIPE_CWND_SEGMENTS: u64 = 4;

/// Default cwnd gain, used outside of ProbeBW_UP and ProbeRTT.
const DEFAULT_CWND_GAIN: f64 = 2.0;

/// Pacing rate is set lower than the bandwidth estimate by this percent.
const DEFAULT_PACING_MARGIN_PERCENT: u64 = 1;

/// Upper limit of the pacing margin in percent.
const MAX_PACING_MARGIN_PERCENT: u64 = 99;

/// BBR.full_bw growth rate needed to keep Startup going.
const DEFAULT_FULL_BW_GROWTH_RATE: f64 = 0.25;

/// Rounds without much bandwidth growth before the pipe is filled.
const DEFAULT_FULL_BW_COUNT_THRESHOLD: u64 = 3;

/// Window length of the max bandwidth filter in rounds.
const DEFAULT_BW_FILTER_ROUNDS: u64 = 10;

/// Drain exits once inflight is at most this multiple of the BDP.
const DEFAULT_DRAIN_TARGET_GAIN: f64 = 1.0;

/// Lossy ACKs in a round needed to leave Startup early.
const DEFAULT_STARTUP_FULL_LOSS_COUNT: u64 = 6;

/// BBRLossThresh: the maximum tolerated per-round-trip packet loss rate.
const DEFAULT_LOSS_THRESHOLD: f64 = 0.02;

/// BBRBeta: the multiplicative decrease of the lower bounds upon loss.
const DEFAULT_BETA: f64 = 0.7;

/// BBRHeadroom: the share of inflight_hi used in CRUISE and ProbeRTT.
const DEFAULT_HEADROOM: f64 = 0.85;

/// ProbeRTTDuration.
const DEFAULT_PROBE_RTT_DURATION: Duration = Duration::from_millis(200);

/// ProbeRTTInterval.
const DEFAULT_PROBE_RTT_INTERVAL: Duration = Duration::from_secs(5);

/// MinRTTFilterLen.
const DEFAULT_MIN_RTT_FILTER_LEN: Duration = Duration::from_secs(10);

/// BBRProbeRTTCwndGain.
const DEFAULT_PROBE_RTT_CWND_GAIN: f64 = 0.5;

/// Initial congestion window policy.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum InitialWindow {
    /// A fixed number of segments.
    Segments(u64),

    /// The RFC 5681 window: 2, 3 or 4 segments depending on SMSS.
    Rfc5681,
}

impl InitialWindow {
    /// The initial window in bytes for the given SMSS.
    pub fn bytes(&self, smss: u64) -> u64 {
        match self {
            InitialWindow::Segments(n) => n.saturating_mul(smss),
            InitialWindow::Rfc5681 => connection::initial_window(smss),
        }
    }
}

impl Default for InitialWindow {
    fn default() -> Self {
        InitialWindow::Segments(DEFAULT_INITIAL_WINDOW_SEGMENTS)
    }
}

impl FromStr for InitialWindow {
    type Err = Error;

    /// Parse `rfc5681` (case-insensitive) or a number of segments.
    fn from_str(s: &str) -> Result<InitialWindow> {
        if s.eq_ignore_ascii_case("rfc5681") {
            return Ok(InitialWindow::Rfc5681);
        }

        match s.parse::<u64>() {
            Ok(n) if n > 0 => Ok(InitialWindow::Segments(n)),
            _ => Err(Error::InvalidConfig(format!("initial window {}", s))),
        }
    }
}

/// Configurations about the congestion controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// The initial congestion window policy.
    pub(crate) initial_window: InitialWindow,

    /// BBRMinPipeCwnd in segments.
    pub(crate) min_pipe_cwnd_segments: u64,

    /// BBRStartupPacingGain.
    pub(crate) startup_pacing_gain: f64,

    /// The default cwnd gain.
    pub(crate) cwnd_gain: f64,

    /// Pacing margin in percent.
    pub(crate) pacing_margin_percent: u64,

    /// Bandwidth growth rate to check if pipe is filled.
    pub(crate) full_bw_growth_rate: f64,

    /// Rounds without much growth before pipe is filled.
    pub(crate) full_bw_count_threshold: u64,

    /// Window length of the max bandwidth filter in rounds.
    pub(crate) bw_filter_rounds: u64,

    /// Drain target as a multiple of the BDP.
    pub(crate) drain_target_gain: f64,

    /// Lossy ACKs in a loss round to exit Startup. Zero disables the check.
    pub(crate) startup_full_loss_count: u64,

    /// BBRLossThresh.
    pub(crate) loss_threshold: f64,

    /// BBRBeta.
    pub(crate) beta: f64,

    /// BBRHeadroom.
    pub(crate) headroom: f64,

    /// ProbeRTTDuration.
    pub(crate) probe_rtt_duration: Duration,

    /// ProbeRTTInterval.
    pub(crate) probe_rtt_interval: Duration,

    /// MinRTTFilterLen.
    pub(crate) min_rtt_filter_len: Duration,

    /// BBRProbeRTTCwndGain.
    pub(crate) probe_rtt_cwnd_gain: f64,

    /// Add the ACK aggregation estimate to the cwnd target.
    pub(crate) enable_aggregation_budget: bool,

    /// Seed of the probe scheduler. `None` seeds from the operating system.
    pub(crate) random_seed: Option<u64>,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut conf = bbr_engine::Config::new();
    /// conf.set_initial_window(bbr_engine::InitialWindow::Segments(10))?;
    /// conf.set_probe_rtt_duration(100);
    /// # Ok::<(), bbr_engine::error::Error>(())
    /// ```
    pub fn new() -> Self {
        Self {
            initial_window: InitialWindow::default(),
            min_pipe_cwnd_segments: DEFAULT_MIN_PIPE_CWND_SEGMENTS,
            startup_pacing_gain: STARTUP_PACING_GAIN,
            cwnd_gain: DEFAULT_CWND_GAIN,
            pacing_margin_percent: DEFAULT_PACING_MARGIN_PERCENT,
            full_bw_growth_rate: DEFAULT_FULL_BW_GROWTH_RATE,
            full_bw_count_threshold: DEFAULT_FULL_BW_COUNT_THRESHOLD,
            bw_filter_rounds: DEFAULT_BW_FILTER_ROUNDS,
            drain_target_gain: DEFAULT_DRAIN_TARGET_GAIN,
            startup_full_loss_count: DEFAULT_STARTUP_FULL_LOSS_COUNT,
            loss_threshold: DEFAULT_LOSS_THRESHOLD,
            beta: DEFAULT_BETA,
            headroom: DEFAULT_HEADROOM,
            probe_rtt_duration: DEFAULT_PROBE_RTT_DURATION,
            probe_rtt_interval: DEFAULT_PROBE_RTT_INTERVAL,
            min_rtt_filter_len: DEFAULT_MIN_RTT_FILTER_LEN,
            probe_rtt_cwnd_gain: DEFAULT_PROBE_RTT_CWND_GAIN,
            enable_aggregation_budget: false,
            random_seed: None,
        }
    }

    /// Set the initial congestion window policy.
    /// The default value is 4 segments.
    pub fn set_initial_window(&mut self, v: InitialWindow) -> Result<()> {
        if v == InitialWindow::Segments(0) {
            return Err(Error::InvalidConfig("initial window empty".into()));
        }

        self.initial_window = v;
        Ok(())
    }

    /// Set the minimal congestion window in segments.
    /// The default value is 4.
    pub fn set_min_pipe_cwnd_segments(&mut self, v: u64) -> Result<()> {
        if v == 0 {
            return Err(Error::InvalidConfig("min pipe cwnd empty".into()));
        }

        self.min_pipe_cwnd_segments = v;
        Ok(())
    }

    /// Set the pacing gain of Startup. It must be larger than 1.
    /// The default value is 2.77.
    pub fn set_startup_pacing_gain(&mut self, v: f64) -> Result<()> {
        self.startup_pacing_gain = check_range("startup pacing gain", v, 1.0, f64::MAX)?;
        Ok(())
    }

    /// Set the default cwnd gain.
    /// The default value is 2.0.
    pub fn set_cwnd_gain(&mut self, v: f64) -> Result<()> {
        self.cwnd_gain = check_range("cwnd gain", v, 0.0, f64::MAX)?;
        Ok(())
    }

    /// Set the pacing margin in percent, in `0..=99`.
    /// The default value is 1.
    pub fn set_pacing_margin_percent(&mut self, v: u64) -> Result<()> {
        if v > MAX_PACING_MARGIN_PERCENT {
            return Err(Error::InvalidConfig(format!("pacing margin {}%", v)));
        }

        self.pacing_margin_percent = v;
        Ok(())
    }

    /// Set the bandwidth growth rate that keeps Startup going.
    /// The default value is 0.25.
    pub fn set_full_bw_growth_rate(&mut self, v: f64) -> Result<()> {
        self.full_bw_growth_rate = check_range("full bw growth rate", v, 0.0, f64::MAX)?;
        Ok(())
    }

    /// Set the rounds without much bandwidth growth before the pipe is
    /// considered full.
    /// The default value is 3.
    pub fn set_full_bw_count_threshold(&mut self, v: u64) -> Result<()> {
        if v == 0 {
            return Err(Error::InvalidConfig("full bw count threshold".into()));
        }

        self.full_bw_count_threshold = v;
        Ok(())
    }

    /// Set the window length of the max bandwidth filter in rounds.
    /// The default value is 10.
    pub fn set_bw_filter_rounds(&mut self, v: u64) -> Result<()> {
        if v == 0 {
            return Err(Error::InvalidConfig("bw filter rounds".into()));
        }

        self.bw_filter_rounds = v;
        Ok(())
    }

    /// Set the Drain target as a multiple of the estimated BDP.
    /// The default value is 1.0.
    pub fn set_drain_target_gain(&mut self, v: f64) -> Result<()> {
        self.drain_target_gain = check_range("drain target gain", v, 0.0, f64::MAX)?;
        Ok(())
    }

    /// Set the number of lossy ACKs in a round that ends Startup. Zero
    /// disables the check.
    /// The default value is 6.
    pub fn set_startup_full_loss_count(&mut self, v: u64) {
        self.startup_full_loss_count = v;
    }

    /// Set the tolerated loss rate per round trip, in `(0, 1)`.
    /// The default value is 0.02.
    pub fn set_loss_threshold(&mut self, v: f64) -> Result<()> {
        if v >= 1.0 {
            return Err(Error::InvalidConfig(format!("loss threshold {}", v)));
        }

        self.loss_threshold = check_range("loss threshold", v, 0.0, 1.0)?;
        Ok(())
    }

    /// Set the multiplicative decrease upon loss, in `(0, 1]`.
    /// The default value is 0.7.
    pub fn set_beta(&mut self, v: f64) -> Result<()> {
        self.beta = check_range("beta", v, 0.0, 1.0)?;
        Ok(())
    }

    /// Set the share of inflight_hi kept in flight while cruising, in `(0, 1]`.
    /// The default value is 0.85.
    pub fn set_headroom(&mut self, v: f64) -> Result<()> {
        self.headroom = check_range("headroom", v, 0.0, 1.0)?;
        Ok(())
    }

    /// Set the minimum duration of ProbeRTT in milliseconds.
    /// The default value is 200 milliseconds.
    pub fn set_probe_rtt_duration(&mut self, millis: u64) {
        self.probe_rtt_duration = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the interval between ProbeRTT in milliseconds.
    /// The default value is 5000 milliseconds.
    pub fn set_probe_rtt_interval(&mut self, millis: u64) {
        self.probe_rtt_interval = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the length of the min RTT filter in milliseconds.
    /// The default value is 10000 milliseconds.
    pub fn set_min_rtt_filter_len(&mut self, millis: u64) {
        self.min_rtt_filter_len = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the cwnd gain used in ProbeRTT.
    /// The default value is 0.5.
    pub fn set_probe_rtt_cwnd_gain(&mut self, v: f64) -> Result<()> {
        self.probe_rtt_cwnd_gain = check_range("probe rtt cwnd gain", v, 0.0, f64::MAX)?;
        Ok(())
    }

    /// Add the estimated ACK aggregation to the cwnd target.
    /// The default value is false.
    pub fn enable_aggregation_budget(&mut self, v: bool) {
        self.enable_aggregation_budget = v;
    }

    /// Seed the random source of the bandwidth probe scheduler, which makes
    /// the controller deterministic.
    /// By default the generator is seeded from the operating system.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.random_seed = Some(seed);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a finite `v` lies in `(min, max]`.
fn check_range(name: &str, v: f64, min: f64, max: f64) -> Result<f64> {
    if !v.is_finite() || v <= min || v > max {
        return Err(Error::InvalidConfig(format!("{} {}", name, v)));
    }

    Ok(v)
}


pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::AckPhase;
pub use crate::congestion_control::Bbr;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionStats;
pub use crate::congestion_control::CyclePhase;
pub use crate::congestion_control::DeliverySample;
pub use crate::congestion_control::Gains;
pub use crate::congestion_control::MaxSample;
pub use crate::congestion_control::Mode;
pub use crate::congestion_control::ProbeBwState;
pub use crate::congestion_control::RoundTripCounter;
pub use crate::congestion_control::WindowedMaxFilter;
pub use crate::connection::ConnectionState;
pub use crate::connection::TcpControlBlock;
pub use crate::error::Error;
pub use crate::error::Result;

pub mod connection;

#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

#[cfg(feature = "ffi")]
mod ffi;

pub mod error;
