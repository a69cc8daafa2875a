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

//! The BBR network path model: bandwidth and round-trip estimates together
//! with the short-term and long-term bounds derived from loss.
//!
//! See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-network-path-model>.

use std::time::Duration;
use std::time::Instant;

use crate::congestion_control::delivery_rate::DeliverySample;
use crate::congestion_control::minmax::WindowedMaxFilter;
use crate::Config;

/// BBRExtraAckedFilterLen: the window length of the BBR.ExtraACKedFilter max
/// filter window, in packet-timed round trips.
const EXTRA_ACKED_FILTER_LEN: u64 = 10;

/// Saturation limit of the per-round loss event counter.
const MAX_LOSS_EVENTS_IN_ROUND: u64 = 0xf;

/// Full pipe estimator, used mainly during Startup mode.
#[derive(Debug, Default)]
pub(super) struct FullPipeEstimator {
    /// BBR.filled_pipe: A boolean that records whether BBR estimates that it
    /// has ever fully utilized its available bandwidth ("filled the pipe").
    is_filled_pipe: bool,

    /// Baseline level delivery rate for full pipe estimator.
    full_bw: u64,

    /// The number of round for full pipe estimator without much growth.
    full_bw_count: u64,
}

impl FullPipeEstimator {
    pub(super) fn reset(&mut self) {
        self.is_filled_pipe = false;
        self.full_bw = 0;
        self.full_bw_count = 0;
    }

    /// Start tracking growth again from the given baseline.
    pub(super) fn reset_baseline(&mut self, bw: u64) {
        self.full_bw = bw;
        self.full_bw_count = 0;
    }

    pub(super) fn latch(&mut self) {
        self.is_filled_pipe = true;
    }

    pub(super) fn is_filled_pipe(&self) -> bool {
        self.is_filled_pipe
    }

    pub(super) fn full_bw(&self) -> u64 {
        self.full_bw
    }

    pub(super) fn full_bw_count(&self) -> u64 {
        self.full_bw_count
    }

    /// Once per non-app-limited round, check whether `max_bw` is still
    /// growing. Return true if the pipe was found full by this call.
    fn check(&mut self, max_bw: u64, growth_rate: f64, count_threshold: u64) -> bool {
        if self.is_filled_pipe {
            return false;
        }

        // still growing?
        if max_bw >= (self.full_bw as f64 * (1.0_f64 + growth_rate)) as u64 {
            // record new baseline level
            self.full_bw = max_bw;
            self.full_bw_count = 0;
            return false;
        }

        // another round w/o much growth
        self.full_bw_count += 1;
        if self.full_bw_count >= count_threshold {
            self.is_filled_pipe = true;
        }

        self.is_filled_pipe
    }
}

/// Bandwidth and RTT model of the network path.
#[derive(Debug)]
pub(super) struct BandwidthModel {
    /// Window of the max bandwidth filter in rounds.
    bw_filter_rounds: u64,

    /// Bandwidth growth rate to check if pipe is filled.
    full_bw_growth_rate: f64,

    /// Max count of rounds without much growth before pipe is filled.
    full_bw_count_threshold: u64,

    /// BBRLossThresh.
    loss_threshold: f64,

    /// BBRBeta.
    beta: f64,

    /// ProbeRTTInterval.
    probe_rtt_interval: Duration,

    /// MinRTTFilterLen.
    min_rtt_filter_len: Duration,

    /// BBR.MaxBwFilter: The filter for tracking the maximum recent
    /// rs.delivery_rate sample, for estimating BBR.max_bw.
    max_bw_filter: WindowedMaxFilter,

    /// BBR.max_bw: The windowed maximum recent bandwidth sample.
    max_bw: u64,

    /// BBR.bw_lo: The short-term maximum sending bandwidth that is safe based
    /// on loss signals in the current bandwidth probing cycle. `u64::MAX`
    /// while unbounded.
    bw_lo: u64,

    /// BBR.bw: The min() of max_bw and bw_lo.
    bw: u64,

    /// BBR.bw_latest: a 1-round-trip max of delivered bandwidth.
    bw_latest: u64,

    /// BBR.inflight_latest: a 1-round-trip max of delivered volume of data.
    inflight_latest: u64,

    /// BBR.inflight_lo: the short-term maximum volume of in-flight data.
    /// `u64::MAX` while unbounded.
    inflight_lo: u64,

    /// BBR.inflight_hi: the long-term maximum volume of in-flight data that
    /// produces acceptable queue pressure. `u64::MAX` while unbounded.
    pub(super) inflight_hi: u64,

    /// BBR.min_rtt: The windowed minimum round-trip time sample.
    min_rtt: Duration,

    /// BBR.min_rtt_stamp: The time at which the current BBR.min_rtt sample was obtained.
    min_rtt_stamp: Instant,

    /// BBR.probe_rtt_min_delay: The minimum RTT sample recorded in the last ProbeRTTInterval.
    probe_rtt_min_delay: Duration,

    /// BBR.probe_rtt_min_stamp: The time at which the current
    /// BBR.probe_rtt_min_delay sample was obtained.
    pub(super) probe_rtt_min_stamp: Instant,

    /// BBR.probe_rtt_expired: Whether BBR.probe_rtt_min_delay is due for a refresh.
    probe_rtt_expired: bool,

    /// Whether a loss round starts?
    loss_round_start: bool,

    /// Whether loss marked in this round?
    loss_in_round: bool,

    /// Loss round ending.
    loss_round_delivered: u64,

    /// ACKs with newly marked losses in the current loss round.
    loss_events_in_round: u64,

    /// BBR.ExtraACKedFilter: the max filter tracking the recent maximum degree
    /// of aggregation in the path.
    extra_acked_filter: WindowedMaxFilter,

    /// BBR.extra_acked_interval_start.
    extra_acked_interval_start: Instant,

    /// BBR.extra_acked_delivered: data delivered since extra_acked_interval_start.
    extra_acked_delivered: u64,

    /// Estimator of full pipe.
    pub(super) full_pipe: FullPipeEstimator,
}

impl BandwidthModel {
    pub(super) fn new(conf: &Config, initial_rtt: Option<Duration>, now: Instant) -> Self {
        Self {
            bw_filter_rounds: conf.bw_filter_rounds,
            full_bw_growth_rate: conf.full_bw_growth_rate,
            full_bw_count_threshold: conf.full_bw_count_threshold,
            loss_threshold: conf.loss_threshold,
            beta: conf.beta,
            probe_rtt_interval: conf.probe_rtt_interval,
            min_rtt_filter_len: conf.min_rtt_filter_len,
            max_bw_filter: WindowedMaxFilter::new(0, 0),
            max_bw: 0,
            bw_lo: u64::MAX,
            bw: 0,
            bw_latest: 0,
            inflight_latest: 0,
            inflight_lo: u64::MAX,
            inflight_hi: u64::MAX,
            min_rtt: initial_rtt.unwrap_or(Duration::MAX),
            min_rtt_stamp: now,
            probe_rtt_min_delay: Duration::MAX,
            probe_rtt_min_stamp: now,
            probe_rtt_expired: false,
            loss_round_start: false,
            loss_in_round: false,
            loss_round_delivered: 0,
            loss_events_in_round: 0,
            extra_acked_filter: WindowedMaxFilter::new(0, 0),
            extra_acked_interval_start: now,
            extra_acked_delivered: 0,
            full_pipe: FullPipeEstimator::default(),
        }
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-updating-the-bbrmax_bw-max->.
    pub(super) fn update_max_bw(&mut self, sample: &DeliverySample, round_count: u64) {
        let bw = sample.delivery_rate();

        // App-limited samples only count if they raise the estimate.
        if bw >= self.max_bw || !sample.is_app_limited {
            self.max_bw = self
                .max_bw_filter
                .update(self.bw_filter_rounds, bw, round_count);
        }
    }

    // Near start of ACK processing.
    pub(super) fn update_latest_delivery_signals(
        &mut self,
        sample: &DeliverySample,
        delivered: u64,
    ) {
        self.loss_round_start = false;
        self.bw_latest = self.bw_latest.max(sample.delivery_rate());
        self.inflight_latest = self.inflight_latest.max(sample.delivered);

        if sample.prior_delivered >= self.loss_round_delivered {
            self.loss_round_delivered = delivered;
            self.loss_round_start = true;
        }
    }

    // Near end of ACK processing.
    pub(super) fn advance_latest_delivery_signals(&mut self, sample: &DeliverySample) {
        if self.loss_round_start {
            self.bw_latest = sample.delivery_rate();
            self.inflight_latest = sample.delivered;
        }
    }

    /// Track the presence of loss and, at the end of each loss round while
    /// not probing, adapt the lower bounds.
    pub(super) fn update_congestion_signals(
        &mut self,
        sample: &DeliverySample,
        is_probing: bool,
        cwnd: u64,
    ) {
        if sample.lost > 0 || sample.newly_lost > 0 {
            self.loss_in_round = true;
        }

        if !self.loss_round_start {
            // wait until end of round trip.
            return;
        }

        // Lower bounds are only used when not probing: when probing we need
        // to push inflight higher to probe bw.
        if !is_probing && self.loss_in_round {
            self.init_lower_bounds(cwnd);
            self.loss_lower_bounds();
        }

        self.loss_in_round = false;
    }

    fn init_lower_bounds(&mut self, cwnd: u64) {
        if self.bw_lo == u64::MAX {
            self.bw_lo = self.max_bw;
        }

        if self.inflight_lo == u64::MAX {
            self.inflight_lo = cwnd;
        }
    }

    //       bw_lo = max(       bw_latest, BBRBeta *       bw_lo )
    // inflight_lo = max( inflight_latest, BBRBeta * inflight_lo )
    //
    // The bounds never rise here: a latest sample above the bound leaves it as is.
    fn loss_lower_bounds(&mut self) {
        let bw_lo = self.bw_latest.max((self.bw_lo as f64 * self.beta) as u64);
        self.bw_lo = self.bw_lo.min(bw_lo);

        let inflight_lo = self
            .inflight_latest
            .max((self.inflight_lo as f64 * self.beta) as u64);
        self.inflight_lo = self.inflight_lo.min(inflight_lo);
    }

    /// Drop both lower bounds back to unbounded.
    pub(super) fn reset_lower_bounds(&mut self) {
        self.bw_lo = u64::MAX;
        self.inflight_lo = u64::MAX;
    }

    /// Clear the per-round signals. Lifetime state is untouched.
    pub(super) fn reset_congestion_signals(&mut self) {
        self.loss_in_round = false;
        self.bw_latest = 0;
        self.inflight_latest = 0;
    }

    pub(super) fn bound_bw_for_model(&mut self) {
        self.bw = self.max_bw.min(self.bw_lo);
    }

    /// Once per round, check whether bandwidth is still growing in Startup.
    pub(super) fn check_full_bandwidth(&mut self, is_round_start: bool, is_app_limited: bool) {
        if !is_round_start || is_app_limited {
            return;
        }

        self.full_pipe.check(
            self.max_bw,
            self.full_bw_growth_rate,
            self.full_bw_count_threshold,
        );
    }

    /// Count lossy ACKs in the loss round and report whether the loss round
    /// just ending suggests Startup overshot the pipe.
    ///
    /// Criteria: the transport is in loss recovery, the round had at least
    /// `full_loss_count` ACKs marking losses, and the loss rate exceeds
    /// BBRLossThresh.
    pub(super) fn check_startup_high_loss(
        &mut self,
        sample: &DeliverySample,
        in_recovery: bool,
        full_loss_count: u64,
    ) -> bool {
        if sample.newly_lost > 0 && self.loss_events_in_round < MAX_LOSS_EVENTS_IN_ROUND {
            // Update saturating counter.
            self.loss_events_in_round += 1;
        }

        let too_high = full_loss_count > 0
            && self.loss_round_start
            && in_recovery
            && self.loss_events_in_round >= full_loss_count
            && self.is_inflight_too_high(sample);

        if self.loss_round_start {
            self.loss_events_in_round = 0;
        }

        too_high
    }

    /// Whether the loss rate of the sample exceeds BBRLossThresh.
    pub(super) fn is_inflight_too_high(&self, sample: &DeliverySample) -> bool {
        sample.lost > (sample.tx_in_flight as f64 * self.loss_threshold) as u64
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-probertt>.
    pub(super) fn update_min_rtt(&mut self, sample_rtt: Duration, now: Instant) {
        self.probe_rtt_expired =
            now.saturating_duration_since(self.probe_rtt_min_stamp) > self.probe_rtt_interval;

        if !sample_rtt.is_zero()
            && (sample_rtt <= self.probe_rtt_min_delay || self.probe_rtt_expired)
        {
            self.probe_rtt_min_delay = sample_rtt;
            self.probe_rtt_min_stamp = now;
        }

        let min_rtt_expired =
            now.saturating_duration_since(self.min_rtt_stamp) > self.min_rtt_filter_len;

        if self.probe_rtt_min_delay < self.min_rtt || min_rtt_expired {
            self.min_rtt = self.probe_rtt_min_delay;
            self.min_rtt_stamp = self.probe_rtt_min_stamp;
        }
    }

    // Degree of ack aggregation is estimated as extra data acked beyond
    // expected:
    //
    // max_extra_acked = "maximum recent excess data ACKed beyond bw * interval"
    //
    // Max extra_acked is clamped by cwnd.
    //
    // See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-bbrextra_acked>.
    pub(super) fn update_ack_aggregation(
        &mut self,
        newly_acked: u64,
        round_count: u64,
        cwnd: u64,
        now: Instant,
    ) {
        // Find excess ACKed beyond expected amount over this interval.
        let interval = now.saturating_duration_since(self.extra_acked_interval_start);
        let mut expected_delivered =
            ((self.bw as u128).saturating_mul(interval.as_micros()) / 1_000_000) as u64;

        // Reset interval if ACK rate is below expected rate.
        if self.extra_acked_delivered <= expected_delivered {
            self.extra_acked_delivered = 0;
            self.extra_acked_interval_start = now;
            expected_delivered = 0;
        }

        self.extra_acked_delivered = self.extra_acked_delivered.saturating_add(newly_acked);

        let extra = self
            .extra_acked_delivered
            .saturating_sub(expected_delivered)
            .min(cwnd);

        self.extra_acked_filter
            .update(EXTRA_ACKED_FILTER_LEN, extra, round_count);
    }

    /// Start a new extra-ACKed measurement interval.
    pub(super) fn restart_extra_acked(&mut self, now: Instant) {
        self.extra_acked_interval_start = now;
        self.extra_acked_delivered = 0;
    }

    /// `gain * bw * min_rtt`, or `None` without a valid RTT sample yet.
    ///
    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-computing-bbrmax_inflight>.
    pub(super) fn bdp_multiple(&self, bw: u64, gain: f64) -> Option<u64> {
        if self.min_rtt == Duration::MAX {
            return None;
        }

        let bdp = bw as f64 * self.min_rtt.as_secs_f64();
        Some((gain * bdp) as u64)
    }

    pub(super) fn max_bw(&self) -> u64 {
        self.max_bw
    }

    /// The effective bandwidth: the max bandwidth limited by the lower bound.
    pub(super) fn bw(&self) -> u64 {
        self.bw
    }

    pub(super) fn bw_lo(&self) -> u64 {
        self.bw_lo
    }

    pub(super) fn inflight_lo(&self) -> u64 {
        self.inflight_lo
    }

    pub(super) fn bw_latest(&self) -> u64 {
        self.bw_latest
    }

    pub(super) fn inflight_latest(&self) -> u64 {
        self.inflight_latest
    }

    pub(super) fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    pub(super) fn probe_rtt_expired(&self) -> bool {
        self.probe_rtt_expired
    }

    pub(super) fn is_loss_round_start(&self) -> bool {
        self.loss_round_start
    }

    pub(super) fn extra_acked(&self) -> u64 {
        self.extra_acked_filter.get()
    }
}
