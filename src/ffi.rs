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

use std::ffi;
use std::str::FromStr;
use std::sync::atomic;
use std::time::Duration;
use std::time::Instant;

use libc::c_char;
use libc::c_int;
use libc::c_void;
use libc::size_t;

use crate::error::Error;
use crate::Bbr;
use crate::Config;
use crate::CongestionController;
use crate::CyclePhase;
use crate::DeliverySample;
use crate::InitialWindow;
use crate::Mode;
use crate::Result;
use crate::TcpControlBlock;

struct LogWriter {
    cb: extern "C" fn(data: *const u8, data_len: size_t, argp: *mut c_void),
    argp: std::sync::atomic::AtomicPtr<c_void>,
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

fn errno(r: Result<()>) -> c_int {
    match r {
        Ok(_) => 0,
        Err(e) => e.to_errno() as c_int,
    }
}

/// Create default configuration.
/// The caller is responsible for the memory of the Config and should properly
/// destroy it by calling `bbr_config_free`.
#[no_mangle]
pub extern "C" fn bbr_config_new() -> *mut Config {
    Box::into_raw(Box::new(Config::new()))
}

/// Destroy a Config instance.
#[no_mangle]
pub extern "C" fn bbr_config_free(config: *mut Config) {
    unsafe {
        let _ = Box::from_raw(config);
    };
}

/// Set the initial congestion window in segments. Zero selects the RFC 5681
/// initial window.
#[no_mangle]
pub extern "C" fn bbr_config_set_initial_window(config: &mut Config, segments: u64) -> c_int {
    let iw = match segments {
        0 => InitialWindow::Rfc5681,
        n => InitialWindow::Segments(n),
    };
    errno(config.set_initial_window(iw))
}

/// Set the initial congestion window from a string, either `rfc5681` or a
/// number of segments.
#[no_mangle]
pub extern "C" fn bbr_config_set_initial_window_str(
    config: &mut Config,
    v: *const c_char,
) -> c_int {
    if v.is_null() {
        return Error::InvalidArgument("initial window".into()).to_errno() as c_int;
    }

    let v = match unsafe { ffi::CStr::from_ptr(v).to_str() } {
        Ok(v) => v,
        Err(_) => return Error::InvalidArgument("initial window".into()).to_errno() as c_int,
    };

    errno(InitialWindow::from_str(v).and_then(|iw| config.set_initial_window(iw)))
}

/// Set the minimal congestion window in segments.
#[no_mangle]
pub extern "C" fn bbr_config_set_min_pipe_cwnd_segments(config: &mut Config, v: u64) -> c_int {
    errno(config.set_min_pipe_cwnd_segments(v))
}

/// Set the pacing gain of Startup.
#[no_mangle]
pub extern "C" fn bbr_config_set_startup_pacing_gain(config: &mut Config, v: f64) -> c_int {
    errno(config.set_startup_pacing_gain(v))
}

/// Set the default cwnd gain.
#[no_mangle]
pub extern "C" fn bbr_config_set_cwnd_gain(config: &mut Config, v: f64) -> c_int {
    errno(config.set_cwnd_gain(v))
}

/// Set the pacing margin in percent.
#[no_mangle]
pub extern "C" fn bbr_config_set_pacing_margin_percent(config: &mut Config, v: u64) -> c_int {
    errno(config.set_pacing_margin_percent(v))
}

/// Set the bandwidth growth rate that keeps Startup going.
#[no_mangle]
pub extern "C" fn bbr_config_set_full_bw_growth_rate(config: &mut Config, v: f64) -> c_int {
    errno(config.set_full_bw_growth_rate(v))
}

/// Set the rounds without bandwidth growth before the pipe is full.
#[no_mangle]
pub extern "C" fn bbr_config_set_full_bw_count_threshold(config: &mut Config, v: u64) -> c_int {
    errno(config.set_full_bw_count_threshold(v))
}

/// Set the window length of the max bandwidth filter in rounds.
#[no_mangle]
pub extern "C" fn bbr_config_set_bw_filter_rounds(config: &mut Config, v: u64) -> c_int {
    errno(config.set_bw_filter_rounds(v))
}

/// Set the Drain target as a multiple of the estimated BDP.
#[no_mangle]
pub extern "C" fn bbr_config_set_drain_target_gain(config: &mut Config, v: f64) -> c_int {
    errno(config.set_drain_target_gain(v))
}

/// Set the number of lossy ACKs in a round that ends Startup.
#[no_mangle]
pub extern "C" fn bbr_config_set_startup_full_loss_count(config: &mut Config, v: u64) {
    config.set_startup_full_loss_count(v);
}

/// Set the tolerated loss rate per round trip.
#[no_mangle]
pub extern "C" fn bbr_config_set_loss_threshold(config: &mut Config, v: f64) -> c_int {
    errno(config.set_loss_threshold(v))
}

/// Set the multiplicative decrease upon loss.
#[no_mangle]
pub extern "C" fn bbr_config_set_beta(config: &mut Config, v: f64) -> c_int {
    errno(config.set_beta(v))
}

/// Set the share of inflight_hi kept in flight while cruising.
#[no_mangle]
pub extern "C" fn bbr_config_set_headroom(config: &mut Config, v: f64) -> c_int {
    errno(config.set_headroom(v))
}

/// Set the minimum duration of ProbeRTT in milliseconds.
#[no_mangle]
pub extern "C" fn bbr_config_set_probe_rtt_duration(config: &mut Config, v: u64) {
    config.set_probe_rtt_duration(v);
}

/// Set the interval between ProbeRTT in milliseconds.
#[no_mangle]
pub extern "C" fn bbr_config_set_probe_rtt_interval(config: &mut Config, v: u64) {
    config.set_probe_rtt_interval(v);
}

/// Set the length of the min RTT filter in milliseconds.
#[no_mangle]
pub extern "C" fn bbr_config_set_min_rtt_filter_len(config: &mut Config, v: u64) {
    config.set_min_rtt_filter_len(v);
}

/// Set the cwnd gain used in ProbeRTT.
#[no_mangle]
pub extern "C" fn bbr_config_set_probe_rtt_cwnd_gain(config: &mut Config, v: f64) -> c_int {
    errno(config.set_probe_rtt_cwnd_gain(v))
}

/// Add the estimated ACK aggregation to the cwnd target.
#[no_mangle]
pub extern "C" fn bbr_config_enable_aggregation_budget(config: &mut Config, v: bool) {
    config.enable_aggregation_budget(v);
}

/// Seed the random source of the bandwidth probe scheduler.
#[no_mangle]
pub extern "C" fn bbr_config_set_random_seed(config: &mut Config, seed: u64) {
    config.set_random_seed(seed);
}

/// Delivery-rate sample of an acknowledgment.
#[repr(C)]
pub struct BbrAckSample {
    /// Bytes delivered over the sampling interval.
    pub delivered: u64,

    /// Sampling interval in microseconds.
    pub interval_us: u64,

    /// RTT of the acked packet in microseconds, `0` if unknown.
    pub rtt_us: u64,

    /// C.delivered when the acked packet was sent.
    pub prior_delivered: u64,

    /// Bytes newly acknowledged.
    pub newly_acked: u64,

    /// Bytes newly marked lost.
    pub newly_lost: u64,

    /// Bytes lost between the send and the ack of the packet.
    pub lost: u64,

    /// Bytes in flight when the packet was sent.
    pub tx_in_flight: u64,

    /// Whether the sample is application-limited.
    pub is_app_limited: bool,
}

impl From<&BbrAckSample> for DeliverySample {
    fn from(s: &BbrAckSample) -> Self {
        DeliverySample {
            delivered: s.delivered,
            interval: Duration::from_micros(s.interval_us),
            rtt: Duration::from_micros(s.rtt_us),
            prior_delivered: s.prior_delivered,
            newly_acked: s.newly_acked,
            newly_lost: s.newly_lost,
            lost: s.lost,
            tx_in_flight: s.tx_in_flight,
            is_app_limited: s.is_app_limited,
        }
    }
}

/// Mode of the controller.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbrMode {
    Startup,
    Drain,
    ProbeBwDown,
    ProbeBwCruise,
    ProbeBwRefill,
    ProbeBwUp,
    ProbeRtt,
}

impl From<Mode> for BbrMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Startup => BbrMode::Startup,
            Mode::Drain => BbrMode::Drain,
            Mode::ProbeBw(state) => match state.phase {
                CyclePhase::Down => BbrMode::ProbeBwDown,
                CyclePhase::Cruise => BbrMode::ProbeBwCruise,
                CyclePhase::Refill => BbrMode::ProbeBwRefill,
                CyclePhase::Up => BbrMode::ProbeBwUp,
            },
            Mode::ProbeRtt => BbrMode::ProbeRtt,
        }
    }
}

/// A controller driven through the C API.
///
/// C callers pass timestamps as microseconds of a monotonic clock. They are
/// mapped onto `Instant`s relative to the timestamp given at creation.
pub struct BbrController {
    bbr: Bbr,
    epoch: Instant,
    epoch_us: u64,
}

impl BbrController {
    fn instant(&self, now_us: u64) -> Instant {
        self.epoch + Duration::from_micros(now_us.saturating_sub(self.epoch_us))
    }
}

/// Create a controller for the connection, and write its initial cwnd into
/// the control block.
/// The caller is responsible for the memory of the controller and should
/// properly destroy it by calling `bbr_free`.
#[no_mangle]
pub extern "C" fn bbr_new(
    config: &Config,
    tcb: &mut TcpControlBlock,
    now_us: u64,
) -> *mut BbrController {
    let epoch = Instant::now();
    let bbr = Bbr::new(config, tcb, epoch);
    Box::into_raw(Box::new(BbrController {
        bbr,
        epoch,
        epoch_us: now_us,
    }))
}

/// Destroy a controller.
#[no_mangle]
pub extern "C" fn bbr_free(bbr: *mut BbrController) {
    unsafe {
        let _ = Box::from_raw(bbr);
    };
}

/// Process an acknowledgment.
#[no_mangle]
pub extern "C" fn bbr_on_ack(
    bbr: &mut BbrController,
    tcb: &mut TcpControlBlock,
    sample: &BbrAckSample,
    now_us: u64,
) {
    let now = bbr.instant(now_us);
    bbr.bbr.on_ack(tcb, &sample.into(), now);
}

/// Notify the controller before data is sent.
#[no_mangle]
pub extern "C" fn bbr_on_transmit(bbr: &mut BbrController, tcb: &mut TcpControlBlock, now_us: u64) {
    let now = bbr.instant(now_us);
    bbr.bbr.on_transmit(tcb, now);
}

/// Current pacing rate in bytes per second.
#[no_mangle]
pub extern "C" fn bbr_pacing_rate(bbr: &BbrController) -> u64 {
    bbr.bbr.pacing_rate().unwrap_or(u64::MAX)
}

/// Current congestion window in bytes.
#[no_mangle]
pub extern "C" fn bbr_congestion_window(bbr: &BbrController) -> u64 {
    bbr.bbr.congestion_window()
}

/// Current pacing gain.
#[no_mangle]
pub extern "C" fn bbr_pacing_gain(bbr: &BbrController) -> f64 {
    bbr.bbr.gains().pacing
}

/// Current cwnd gain.
#[no_mangle]
pub extern "C" fn bbr_cwnd_gain(bbr: &BbrController) -> f64 {
    bbr.bbr.gains().cwnd
}

/// Current mode.
#[no_mangle]
pub extern "C" fn bbr_mode(bbr: &BbrController) -> BbrMode {
    bbr.bbr.mode().into()
}

/// Set logger.
/// The callback is invoked with the log line and `argp`. The logger can be
/// installed only once per process.
#[no_mangle]
pub extern "C" fn bbr_set_logger(
    cb: extern "C" fn(data: *const u8, data_len: size_t, argp: *mut c_void),
    argp: *mut c_void,
    level: log::LevelFilter,
) {
    let argp = atomic::AtomicPtr::new(argp);
    let logger = Box::new(LogWriter { cb, argp });
    let _ = log::set_boxed_logger(logger);
    log::set_max_level(level);
}
