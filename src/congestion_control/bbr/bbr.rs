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

//! BBR Congestion Control
//!
//! BBR uses recent measurements of a transport connection's delivery rate
//! and round-trip time to build an explicit model that includes both the
//! maximum recent bandwidth available to that connection, and its
//! minimum recent round-trip delay.  BBR then uses this model to control
//! both how fast it sends data and the maximum amount of data it allows
//! in flight in the network at any time.
//!
//! See <https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control-02>
//! and <https://datatracker.ietf.org/meeting/117/materials/slides-117-ccwg-bbrv3-algorithm-bug-fixes-and-public-internet-deployment-00>.

use std::time::Duration;
use std::time::Instant;

use log::*;

use self::model::BandwidthModel;
use self::pacing::CwndCalculator;
use self::pacing::PacingRate;
use self::probe_wait::ProbeScheduler;
use self::probe_wait::ProbeWait;
use super::delivery_rate::DeliverySample;
use super::round::RoundTripCounter;
use super::CongestionController;
use super::CongestionStats;
use crate::connection::ConnectionState;
use crate::Config;
pub use mode::AckPhase;
pub use mode::CyclePhase;
pub use mode::Gains;
pub use mode::Mode;
pub use mode::ProbeBwState;
pub(crate) use mode::STARTUP_PACING_GAIN;

/// Max doublings of the inflight_hi growth per round while probing up.
const MAX_PROBE_UP_ROUNDS: u64 = 30;

/// BBR Congestion Control Algorithm.
///
/// One instance drives one transport connection. It is fed by the
/// connection's ACK processing path ([`Bbr::on_ack`]) and transmission path
/// ([`Bbr::on_transmit`]), and never initiates activity on its own.
#[derive(Debug)]
pub struct Bbr {
    /// Configurable parameters.
    config: Config,

    /// Statistics.
    stats: CongestionStats,

    /// BBR.pacing_rate.
    pacing: PacingRate,

    /// Congestion window targets.
    calc: CwndCalculator,

    /// cwnd: The transport sender's congestion window, which limits the
    /// amount of data in flight.
    cwnd: u64,

    /// BBR.pacing_gain and BBR.cwnd_gain of the current mode.
    gains: Gains,

    /// BBR.packet_conservation: A boolean indicating whether BBR is currently
    /// using packet conservation dynamics to bound cwnd.
    packet_conservation: bool,

    /// BBR.state: The current state of a BBR flow in the BBR state machine.
    mode: Mode,

    /// Counter of packet-timed round trips.
    round: RoundTripCounter,

    /// C.delivered as of the latest call.
    delivered: u64,

    /// BBR.idle_restart: A boolean that is true if and only if a connection is
    /// restarting after being idle.
    idle_restart: bool,

    /// Bandwidth and RTT model.
    model: BandwidthModel,

    /// Last time when the ProbeBW cycle phase started.
    cycle_stamp: Instant,

    /// Source of the randomized probe waits.
    probe_scheduler: ProbeScheduler,

    /// Bounds to wait for before the next bandwidth probe.
    probe_wait: ProbeWait,

    /// Packet-timed rounds since probed bw.
    rounds_since_bw_probe: u64,

    /// Bytes delivered per inflight_hi increment.
    bw_probe_up_cnt: u64,

    /// Bytes (S)ACKed since inflight_hi increment.
    bw_probe_up_acks: u64,

    /// Cwnd-limited rounds in PROBE_UP.
    bw_probe_up_rounds: u64,

    /// Whether rate samples reflect bw probing?
    bw_probe_samples: bool,

    /// Cwnd before loss recovery or ProbeRTT.
    prior_cwnd: u64,

    /// Cwnd restored on this call, which cwnd bounding must not undercut.
    restored_cwnd: Option<u64>,

    /// Whether the transport is in loss recovery.
    in_recovery: bool,

    /// Timestamp when ProbeRTT state ends.
    probe_rtt_done_stamp: Option<Instant>,

    /// Whether a roundtrip in ProbeRTT state ends.
    probe_rtt_round_done: bool,
}

impl Bbr {
    /// Create a controller for the connection and bootstrap its pacing rate.
    ///
    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-initialization>.
    pub fn new(conf: &Config, conn: &mut dyn ConnectionState, now: Instant) -> Self {
        let smss = conn.smss().max(1);
        let calc = CwndCalculator {
            min_cwnd: conf.min_pipe_cwnd_segments.saturating_mul(smss),
            initial_cwnd: conf.initial_window.bytes(smss),
            smss,
        };
        let srtt = conn.srtt().filter(|rtt| !rtt.is_zero());

        let mut bbr = Self {
            config: conf.clone(),
            stats: CongestionStats::default(),
            pacing: PacingRate::new(conf.pacing_margin_percent),
            calc,
            cwnd: calc.initial_cwnd.max(calc.min_cwnd),
            gains: Mode::Startup.gains(
                conf.startup_pacing_gain,
                conf.cwnd_gain,
                conf.probe_rtt_cwnd_gain,
            ),
            packet_conservation: false,
            mode: Mode::Startup,
            round: RoundTripCounter::default(),
            delivered: conn.delivered(),
            idle_restart: false,
            model: BandwidthModel::new(conf, srtt, now),
            cycle_stamp: now,
            probe_scheduler: ProbeScheduler::new(conf.random_seed),
            probe_wait: ProbeWait {
                rounds: 0,
                wait: Duration::MAX,
            },
            rounds_since_bw_probe: 0,
            bw_probe_up_cnt: u64::MAX,
            bw_probe_up_acks: 0,
            bw_probe_up_rounds: 0,
            bw_probe_samples: false,
            prior_cwnd: 0,
            restored_cwnd: None,
            in_recovery: conn.in_loss_recovery(),
            probe_rtt_done_stamp: None,
            probe_rtt_round_done: false,
        };

        bbr.enter_startup();
        bbr.pacing
            .init(bbr.gains.pacing, bbr.calc.initial_cwnd, srtt);
        conn.set_cwnd(bbr.cwnd);

        trace!(
            "{}. init cwnd = {}, min_cwnd = {}, pacing_rate = {}, srtt = {:?}",
            bbr.name(),
            bbr.cwnd,
            bbr.calc.min_cwnd,
            bbr.pacing.rate(),
            srtt
        );

        bbr
    }

    /// The current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// BBR.bw: the effective bandwidth estimate in bytes per second.
    pub fn bw(&self) -> u64 {
        self.model.bw()
    }

    /// BBR.max_bw: the windowed max bandwidth in bytes per second.
    pub fn max_bw(&self) -> u64 {
        self.model.max_bw()
    }

    /// BBR.min_rtt, `Duration::MAX` without any RTT sample.
    pub fn min_rtt(&self) -> Duration {
        self.model.min_rtt()
    }

    /// Is pipe filled.
    pub fn is_filled_pipe(&self) -> bool {
        self.model.full_pipe.is_filled_pipe()
    }

    /// Count of packet-timed round trips.
    pub fn round_count(&self) -> u64 {
        self.round.round_count()
    }

    /// Whether the flow is in ProbeBW, in any of its phases.
    pub fn is_probing_bandwidth(&self) -> bool {
        self.mode.is_probe_bw()
    }

    fn set_mode(&mut self, mode: Mode) {
        if self.mode.name() != mode.name() {
            debug!(
                "{}. {} -> {}, max_bw = {}, bw = {}, min_rtt = {}us, cwnd = {}, round = {}",
                self.name(),
                self.mode.name(),
                mode.name(),
                self.model.max_bw(),
                self.model.bw(),
                self.model.min_rtt().as_micros(),
                self.cwnd,
                self.round.round_count(),
            );
            self.stats.mode_transitions += 1;
        }

        self.mode = mode;
        self.update_gains();
    }

    fn set_cycle_phase(&mut self, phase: CyclePhase) {
        let ack_phase = self.mode.ack_phase().unwrap_or(AckPhase::ProbeStopping);
        self.set_mode(Mode::ProbeBw(ProbeBwState { phase, ack_phase }));
    }

    fn set_ack_phase(&mut self, ack_phase: AckPhase) {
        if let Mode::ProbeBw(state) = &mut self.mode {
            state.ack_phase = ack_phase;
        }
    }

    fn update_gains(&mut self) {
        self.gains = self.mode.gains(
            self.config.startup_pacing_gain,
            self.config.cwnd_gain,
            self.config.probe_rtt_cwnd_gain,
        );
    }

    fn start_round(&mut self) {
        self.round.start_round(self.delivered);
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-bbrround_count-tracking-pac>.
    fn update_round(&mut self, sample: &DeliverySample) {
        if self.round.on_ack(sample.prior_delivered, self.delivered) {
            self.rounds_since_bw_probe = self.rounds_since_bw_probe.saturating_add(1);
            self.stats.round_count = self.round.round_count();
            // After one round-trip in Fast Recovery:
            //     BBR.packet_conservation = false
            self.packet_conservation = false;
        }
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-modulating-cwnd-in-loss-rec>.
    /// Remember cwnd.
    fn save_cwnd(&mut self) {
        self.prior_cwnd = if !self.in_recovery && self.mode != Mode::ProbeRtt {
            self.cwnd
        } else {
            self.cwnd.max(self.prior_cwnd)
        }
    }

    /// Restore cwnd.
    fn restore_cwnd(&mut self) {
        self.cwnd = self.cwnd.max(self.prior_cwnd);
        self.restored_cwnd = Some(self.cwnd);
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-per-ack-steps>.
    fn update_model_and_state(
        &mut self,
        conn: &mut dyn ConnectionState,
        sample: &DeliverySample,
        now: Instant,
    ) {
        let pipe = conn.pipe();

        self.model
            .update_latest_delivery_signals(sample, self.delivered);
        self.update_congestion_signals(sample);
        self.model.update_ack_aggregation(
            sample.newly_acked,
            self.round.round_count(),
            self.cwnd,
            now,
        );
        self.check_startup_done(sample);
        self.check_drain(now, pipe);
        self.update_probe_bw_cycle_phase(sample, now, pipe);
        self.model.update_min_rtt(sample.rtt, now);
        self.check_probe_rtt(conn, sample, now, pipe);
        self.model.advance_latest_delivery_signals(sample);
        self.model.bound_bw_for_model();
    }

    fn update_control_parameters(&mut self, sample: &DeliverySample, pipe: u64) {
        self.set_pacing_rate();
        self.set_cwnd(sample, pipe);
    }

    // Update (most of) our congestion signals: track the recent rate and volume of
    // delivered data, presence of loss.
    fn update_congestion_signals(&mut self, sample: &DeliverySample) {
        self.update_round(sample);
        self.model.update_max_bw(sample, self.round.round_count());
        self.model
            .update_congestion_signals(sample, self.mode.is_accelerating(), self.cwnd);
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-startup>.
    fn enter_startup(&mut self) {
        self.model.full_pipe.reset();
        self.set_mode(Mode::Startup);
    }

    fn check_startup_done(&mut self, sample: &DeliverySample) {
        self.model
            .check_full_bandwidth(self.round.is_round_start(), sample.is_app_limited);

        let high_loss = self.model.check_startup_high_loss(
            sample,
            self.in_recovery,
            self.config.startup_full_loss_count,
        );
        if high_loss && self.mode == Mode::Startup {
            self.handle_queue_too_high_in_startup();
        }

        if self.mode == Mode::Startup && self.is_filled_pipe() {
            self.enter_drain();
        }
    }

    fn handle_queue_too_high_in_startup(&mut self) {
        self.model.full_pipe.latch();

        // When exiting STARTUP, set inflight_hi based on:
        //      max(estimated BDP, max data delivered in last round trip)
        self.model.inflight_hi = self.inflight(1.0).max(self.model.inflight_latest());

        debug!(
            "{}. high loss in startup, inflight_hi = {}",
            self.name(),
            self.model.inflight_hi
        );
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-drain>.
    fn enter_drain(&mut self) {
        self.set_mode(Mode::Drain);
    }

    fn check_drain(&mut self, now: Instant, pipe: u64) {
        if self.mode == Mode::Drain && pipe <= self.inflight(self.config.drain_target_gain) {
            // BBR estimates the queue was drained.
            self.enter_probe_bw(now);
        }
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-probebw>.
    fn check_time_to_probe_bw(&mut self, now: Instant) -> bool {
        // Is it time to transition from DOWN or CRUISE to REFILL?
        if self.rounds_since_bw_probe >= self.probe_wait.rounds
            && self.has_elapsed_in_phase(now, self.probe_wait.wait)
        {
            self.start_probe_bw_refill();
            return true;
        }

        false
    }

    fn target_inflight(&self) -> u64 {
        // How much data do we want in flight?
        // Our estimated BDP, unless congestion cut cwnd.
        self.model
            .bdp_multiple(self.model.bw(), 1.0)
            .unwrap_or(self.cwnd)
            .min(self.cwnd)
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-probebw-algorithm-details>.
    fn enter_probe_bw(&mut self, now: Instant) {
        self.start_probe_bw_down(now);
    }

    fn start_probe_bw_down(&mut self, now: Instant) {
        self.model.reset_congestion_signals();
        // Not growing inflight_hi.
        self.bw_probe_up_cnt = u64::MAX;
        self.probe_wait = self.probe_scheduler.pick_probe_wait();
        self.rounds_since_bw_probe = 0;
        // Start wall clock.
        self.cycle_stamp = now;
        self.start_round();
        self.set_mode(Mode::ProbeBw(ProbeBwState {
            phase: CyclePhase::Down,
            ack_phase: AckPhase::ProbeStopping,
        }));

        trace!(
            "{}. next probe after {} rounds and {}ms",
            self.name(),
            self.probe_wait.rounds,
            self.probe_wait.wait.as_millis()
        );
    }

    fn start_probe_bw_cruise(&mut self) {
        self.set_cycle_phase(CyclePhase::Cruise);
    }

    fn start_probe_bw_refill(&mut self) {
        self.model.reset_lower_bounds();
        self.bw_probe_up_rounds = 0;
        self.bw_probe_up_acks = 0;
        self.start_round();
        self.set_mode(Mode::ProbeBw(ProbeBwState {
            phase: CyclePhase::Refill,
            ack_phase: AckPhase::Refilling,
        }));
    }

    fn start_probe_bw_up(&mut self, sample: &DeliverySample, now: Instant) {
        self.start_round();
        self.model.full_pipe.reset_baseline(sample.delivery_rate());

        // Start wall clock.
        self.cycle_stamp = now;
        self.set_mode(Mode::ProbeBw(ProbeBwState {
            phase: CyclePhase::Up,
            ack_phase: AckPhase::ProbeStarting,
        }));
        self.raise_inflight_hi_slope();
    }

    /// The core state machine logic for ProbeBW.
    fn update_probe_bw_cycle_phase(&mut self, sample: &DeliverySample, now: Instant, pipe: u64) {
        if !self.is_filled_pipe() {
            // only handling steady-state behavior here.
            return;
        }

        self.adapt_upper_bounds(sample, now);

        let phase = match self.mode.cycle_phase() {
            Some(phase) => phase,
            // only handling ProbeBW states here.
            None => return,
        };

        match phase {
            CyclePhase::Down => {
                if self.check_time_to_probe_bw(now) {
                    // already decided state transition.
                    return;
                }

                if self.check_time_to_cruise(pipe) {
                    self.start_probe_bw_cruise();
                }
            }

            CyclePhase::Cruise => {
                self.check_time_to_probe_bw(now);
            }

            CyclePhase::Refill => {
                // After one round of REFILL, start UP.
                if self.round.is_round_start() {
                    self.bw_probe_samples = true;
                    self.start_probe_bw_up(sample, now);
                }
            }

            // The flow has been in ProbeBW_UP for at least 1*min_rtt, and the
            // estimated queue is high enough that it has robustly probed for
            // available bandwidth. Excessive loss is handled in
            // adapt_upper_bounds().
            CyclePhase::Up => {
                if self.has_elapsed_in_phase(now, self.model.min_rtt())
                    && pipe > self.inflight(self.gains.pacing)
                {
                    self.start_probe_bw_down(now);
                }
            }
        }
    }

    /// Time to transition from DOWN to CRUISE?
    fn check_time_to_cruise(&self, pipe: u64) -> bool {
        if pipe > self.inflight_with_headroom() {
            // Not enough headroom.
            return false;
        }

        // inflight <= estimated BDP
        pipe <= self.inflight(1.0)
    }

    fn has_elapsed_in_phase(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.cycle_stamp) > interval
    }

    // Return a volume of data that tries to leave free headroom in the
    // bottleneck buffer or link for other flows.
    fn inflight_with_headroom(&self) -> u64 {
        if self.model.inflight_hi == u64::MAX {
            return u64::MAX;
        }

        ((self.config.headroom * self.model.inflight_hi as f64) as u64).max(self.calc.min_cwnd)
    }

    /// Raise inflight_hi slope if appropriate.
    fn raise_inflight_hi_slope(&mut self) {
        // Calculate "slope": bytes S/Acked per inflight_hi increment.
        let growth_this_round = 1_u64 << self.bw_probe_up_rounds;
        self.bw_probe_up_rounds = (self.bw_probe_up_rounds + 1).min(MAX_PROBE_UP_ROUNDS);
        self.bw_probe_up_cnt = (self.cwnd / growth_this_round).max(1);
    }

    /// Increase inflight_hi if appropriate.
    fn probe_inflight_hi_upward(&mut self, sample: &DeliverySample) {
        if self.cwnd < self.model.inflight_hi {
            // not fully using inflight_hi, so don't grow it.
            return;
        }

        // For each bw_probe_up_cnt bytes ACKed, increase inflight_hi by 1 segment.
        self.bw_probe_up_acks = self.bw_probe_up_acks.saturating_add(sample.newly_acked);
        if self.bw_probe_up_acks >= self.bw_probe_up_cnt {
            let delta = self.bw_probe_up_acks / self.bw_probe_up_cnt;
            self.bw_probe_up_acks -= delta * self.bw_probe_up_cnt;
            self.model.inflight_hi = self
                .model
                .inflight_hi
                .saturating_add(delta.saturating_mul(self.calc.smss));
        }

        if self.round.is_round_start() {
            self.raise_inflight_hi_slope();
        }
    }

    /// Track ACK state and update BBR.inflight_hi.
    fn adapt_upper_bounds(&mut self, sample: &DeliverySample, now: Instant) {
        if self.round.is_round_start() {
            match self.mode.ack_phase() {
                // starting to get bw probing samples.
                Some(AckPhase::ProbeStarting) => self.set_ack_phase(AckPhase::ProbeFeedback),
                // end of samples from bw probing phase.
                Some(AckPhase::ProbeStopping) => self.bw_probe_samples = false,
                _ => (),
            }
        }

        if !self.check_inflight_too_high(sample, now) {
            // Loss rate is safe. Adjust upper bounds upward.
            if self.model.inflight_hi == u64::MAX {
                // no upper bounds to raise.
                return;
            }

            if sample.tx_in_flight > self.model.inflight_hi {
                self.model.inflight_hi = sample.tx_in_flight;
            }

            if self.mode.cycle_phase() == Some(CyclePhase::Up) {
                self.probe_inflight_hi_upward(sample);
            }
        }
    }

    // When a flow is in ProbeBW, and an ACK covers data sent in one of the
    // accelerating phases (REFILL or UP), and the ACK indicates that the loss
    // rate over the past round trip exceeds the queue pressure objective, and
    // the flow is not application limited, and has not yet responded to
    // congestion signals from the most recent REFILL or UP phase, then the
    // flow reduces BBR.inflight_hi.
    //
    // See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-updating-the-model-upon-pac>.
    fn check_inflight_too_high(&mut self, sample: &DeliverySample, now: Instant) -> bool {
        // Do loss signals suggest inflight is too high? If so, react.
        if self.model.is_inflight_too_high(sample) {
            if self.bw_probe_samples {
                self.handle_inflight_too_high(sample, now);
            }

            return true;
        }

        false
    }

    // Loss rate is too high while probing.
    // Adapt (once per bw probe) by cutting inflight_hi and then restarting cycle.
    fn handle_inflight_too_high(&mut self, sample: &DeliverySample, now: Instant) {
        // Only react once per bw probe.
        self.bw_probe_samples = false;

        // App-limited samples are not robustly probing the max volume of
        // inflight data that might be safe.
        if !sample.is_app_limited {
            self.model.inflight_hi = ((self.target_inflight() as f64 * self.config.beta) as u64)
                .max(sample.tx_in_flight);
        }

        debug!(
            "{}. inflight too high, lost = {}, tx_in_flight = {}, inflight_hi = {}",
            self.name(),
            sample.lost,
            sample.tx_in_flight,
            self.model.inflight_hi
        );

        if self.mode.cycle_phase() == Some(CyclePhase::Up) {
            self.start_probe_bw_down(now);
        }
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-probertt>.
    fn check_probe_rtt(
        &mut self,
        conn: &mut dyn ConnectionState,
        sample: &DeliverySample,
        now: Instant,
        pipe: u64,
    ) {
        if self.mode != Mode::ProbeRtt && self.model.probe_rtt_expired() && !self.idle_restart {
            // Remember the last-known good cwnd and restore it when exiting probe-rtt.
            self.save_cwnd();
            self.set_mode(Mode::ProbeRtt);
            self.probe_rtt_done_stamp = None;
            self.start_round();
            self.stats.probe_rtt_entries += 1;
        }

        if self.mode == Mode::ProbeRtt {
            self.handle_probe_rtt(conn, now, pipe);
        }

        if sample.delivered > 0 {
            self.idle_restart = false;
        }
    }

    fn handle_probe_rtt(&mut self, conn: &mut dyn ConnectionState, now: Instant, pipe: u64) {
        // Ignore low rate samples during ProbeRTT.
        conn.set_app_limited(true);

        if self.probe_rtt_done_stamp.is_some() {
            if self.round.is_round_start() {
                self.probe_rtt_round_done = true;
            }

            if self.probe_rtt_round_done {
                self.check_probe_rtt_done(now);
            }
        } else if pipe <= self.probe_rtt_cwnd() {
            // Wait for at least ProbeRTTDuration to elapse.
            self.probe_rtt_done_stamp = Some(now + self.config.probe_rtt_duration);
            // Wait for at least one round to elapse.
            self.probe_rtt_round_done = false;
            self.start_round();
        }
    }

    fn check_probe_rtt_done(&mut self, now: Instant) {
        if let Some(probe_rtt_done_stamp) = self.probe_rtt_done_stamp {
            if now > probe_rtt_done_stamp {
                // Schedule next ProbeRtt.
                self.model.probe_rtt_min_stamp = now;
                self.restore_cwnd();
                self.exit_probe_rtt(now);
            }
        }
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-exiting-probertt>.
    fn exit_probe_rtt(&mut self, now: Instant) {
        self.model.reset_lower_bounds();
        self.probe_rtt_done_stamp = None;

        if self.is_filled_pipe() {
            self.start_probe_bw_down(now);
            self.start_probe_bw_cruise();
        } else {
            self.enter_startup();
        }
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-restarting-from-idle>.
    fn handle_restart_from_idle(&mut self, conn: &dyn ConnectionState, now: Instant) {
        // When restarting from idle, BBR leaves its cwnd as-is and paces
        // packets at exactly BBR.bw, aiming to return as quickly as possible
        // to its target operating point of rate balance and a full pipe.
        if conn.pipe() == 0 && conn.is_app_limited() {
            // Counted once per idle period, until data is delivered again.
            if !self.idle_restart {
                self.idle_restart = true;
                self.model.restart_extra_acked(now);
                self.stats.idle_restarts += 1;
            }

            if self.is_probing_bandwidth() {
                self.set_pacing_rate_with_gain(1.0);
            } else if self.mode == Mode::ProbeRtt {
                self.check_probe_rtt_done(now);
            }

            trace!(
                "{}. restart from idle in {}, pacing_rate = {}",
                self.name(),
                self.mode.name(),
                self.pacing.rate()
            );
        }
    }

    fn set_pacing_rate_with_gain(&mut self, pacing_gain: f64) {
        self.pacing
            .set_with_gain(pacing_gain, self.model.bw(), self.is_filled_pipe());
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-pacing-rate-bbrpacing_rate>.
    fn set_pacing_rate(&mut self) {
        self.set_pacing_rate_with_gain(self.gains.pacing);
    }

    /// Estimated BDP times `gain`, floored at the minimal pipe cwnd.
    fn inflight(&self, gain: f64) -> u64 {
        let bdp = self.model.bdp_multiple(self.model.max_bw(), gain);
        self.calc
            .target(bdp, 0, self.mode.cycle_phase() == Some(CyclePhase::Up))
    }

    /// BBR.max_inflight.
    fn max_inflight(&self) -> u64 {
        let bdp = self.model.bdp_multiple(self.model.bw(), self.gains.cwnd);
        let extra_acked = if self.config.enable_aggregation_budget {
            self.model.extra_acked()
        } else {
            0
        };

        self.calc.target(
            bdp,
            extra_acked,
            self.mode.cycle_phase() == Some(CyclePhase::Up),
        )
    }

    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-modulating-cwnd-in-loss-rec>.
    fn enter_recovery(&mut self, pipe: u64, sample: &DeliverySample) {
        self.save_cwnd();

        self.cwnd = pipe
            .saturating_add(sample.newly_acked.max(self.calc.smss))
            .max(self.calc.min_cwnd);
        self.packet_conservation = true;
        self.in_recovery = true;

        // After one round-trip in Fast Recovery:
        //   BBR.packet_conservation = false
        self.start_round();

        debug!(
            "{}. enter recovery, prior_cwnd = {}, cwnd = {}",
            self.name(),
            self.prior_cwnd,
            self.cwnd
        );
    }

    fn exit_recovery(&mut self) {
        // Upon exiting loss recovery, either by repairing all losses or
        // undoing recovery, BBR restores the best-known cwnd value we had
        // upon entering loss recovery.
        self.packet_conservation = false;
        self.in_recovery = false;

        self.restore_cwnd();

        debug!("{}. exit recovery, cwnd = {}", self.name(), self.cwnd);
    }

    fn update_recovery(&mut self, conn: &dyn ConnectionState, sample: &DeliverySample) {
        match (self.in_recovery, conn.in_loss_recovery()) {
            (false, true) => self.enter_recovery(conn.pipe(), sample),
            (true, false) => self.exit_recovery(),
            _ => (),
        }
    }

    // In ProbeRTT state, BBR quickly reduce the volume of in-flight data and drain
    // the bottleneck queue, thereby allowing measurement of BBR.min_rtt.
    // See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-modulating-cwnd-in-probertt>.
    fn probe_rtt_cwnd(&self) -> u64 {
        self.model
            .bdp_multiple(self.model.bw(), self.config.probe_rtt_cwnd_gain)
            .unwrap_or(self.calc.min_cwnd)
            .max(self.calc.min_cwnd)
    }

    fn bound_cwnd_for_probe_rtt(&mut self) {
        if self.mode == Mode::ProbeRtt {
            self.cwnd = self.cwnd.min(self.probe_rtt_cwnd());
        }
    }

    fn modulate_cwnd_for_recovery(&mut self, sample: &DeliverySample, pipe: u64) {
        if sample.newly_lost > 0 {
            self.cwnd = self
                .cwnd
                .saturating_sub(sample.newly_lost)
                .max(self.calc.min_cwnd);
        }

        if self.packet_conservation {
            self.cwnd = self.cwnd.max(pipe.saturating_add(sample.newly_acked));
        }
    }

    // BBR uses a conservative strategy to deal with sudden dramatic traffic changes. When cwnd
    // is above the BBR.max_inflight derived from BBR's path model, BBR cuts the cwnd immediately
    // to the BBR.max_inflight. When cwnd is below BBR.max_inflight, BBR raises the cwnd gradually
    // and cautiously, increasing cwnd by no more than the amount of data acknowledged (cumulatively
    // or selectively) upon each ACK.
    //
    // See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-core-cwnd-adjustment-mechan>.
    fn set_cwnd(&mut self, sample: &DeliverySample, pipe: u64) {
        let max_inflight = self.max_inflight();
        self.modulate_cwnd_for_recovery(sample, pipe);

        if !self.packet_conservation {
            self.cwnd = self.calc.grow(
                self.cwnd,
                max_inflight,
                sample.newly_acked,
                self.delivered,
                self.is_filled_pipe(),
            );
        }

        self.bound_cwnd_for_probe_rtt();
        self.bound_cwnd_for_model();

        if let Some(restored) = self.restored_cwnd.take() {
            self.cwnd = self.cwnd.max(restored);
        }
    }

    /// BBR bounds the cwnd based on recent congestion.
    ///
    /// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-bounding-cwnd-based-on-rece>.
    fn bound_cwnd_for_model(&mut self) {
        let cap = match self.mode {
            Mode::ProbeBw(ProbeBwState {
                phase: CyclePhase::Cruise,
                ..
            })
            | Mode::ProbeRtt => self.inflight_with_headroom(),
            Mode::ProbeBw(_) => self.model.inflight_hi,
            Mode::Startup | Mode::Drain => u64::MAX,
        };

        // Apply inflight_lo (possibly infinite)
        let cap = cap.min(self.model.inflight_lo()).max(self.calc.min_cwnd);
        self.cwnd = self.cwnd.min(cap);
    }

    fn update_stats(&mut self, sample: &DeliverySample) {
        self.stats.bytes_delivered_in_total = self
            .stats
            .bytes_delivered_in_total
            .saturating_add(sample.newly_acked);
        self.stats.bytes_lost_in_total = self
            .stats
            .bytes_lost_in_total
            .saturating_add(sample.newly_lost);

        if self.mode == Mode::Startup {
            self.stats.bytes_delivered_in_startup = self
                .stats
                .bytes_delivered_in_startup
                .saturating_add(sample.newly_acked);
            self.stats.bytes_lost_in_startup = self
                .stats
                .bytes_lost_in_startup
                .saturating_add(sample.newly_lost);
        }
    }
}

impl CongestionController for Bbr {
    fn name(&self) -> &str {
        "BBR"
    }

    fn on_init(&mut self, conn: &mut dyn ConnectionState, now: Instant) {
        let conf = self.config.clone();
        *self = Bbr::new(&conf, conn, now);
    }

    fn on_ack(&mut self, conn: &mut dyn ConnectionState, sample: &DeliverySample, now: Instant) {
        self.cwnd = conn.cwnd();
        self.delivered = conn.delivered();
        let pipe = conn.pipe();

        self.update_stats(sample);
        self.update_recovery(conn, sample);

        // Update model and control parameters.
        self.update_model_and_state(conn, sample, now);
        self.update_control_parameters(sample, pipe);
        conn.set_cwnd(self.cwnd);

        trace!(
            "{}. ON_ACK. mode = {}, delivered = {}, rate = {}, max_bw = {}, bw = {}, min_rtt = {}us, \
             pacing_rate = {}, cwnd = {}, pipe = {}, round = {}",
            self.name(),
            self.mode.name(),
            sample.delivered,
            sample.delivery_rate(),
            self.model.max_bw(),
            self.model.bw(),
            self.model.min_rtt().as_micros(),
            self.pacing.rate(),
            self.cwnd,
            pipe,
            self.round.round_count(),
        );
    }

    fn on_transmit(&mut self, conn: &mut dyn ConnectionState, now: Instant) {
        self.cwnd = conn.cwnd();
        self.handle_restart_from_idle(conn, now);
        conn.set_cwnd(self.cwnd);
    }

    fn pacing_rate(&self) -> Option<u64> {
        Some(self.pacing.rate())
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd.max(self.calc.min_cwnd)
    }

    fn initial_window(&self) -> u64 {
        self.calc.initial_cwnd
    }

    fn minimal_window(&self) -> u64 {
        self.calc.min_cwnd
    }

    fn gains(&self) -> Gains {
        self.gains
    }

    fn in_slow_start(&self) -> bool {
        self.mode == Mode::Startup
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TcpControlBlock;

    const MSS: u64 = 1460;
    const INTERVAL: Duration = Duration::from_millis(50);

    /// A connection acked by a fixed-rate path.
    struct Flow {
        conn: TcpControlBlock,
        bbr: Bbr,
        now: Instant,
        /// Path bandwidth in bytes/s.
        bw: u64,
        rtt: Duration,
    }

    impl Flow {
        fn new() -> Self {
            let mut conf = Config::new();
            conf.set_random_seed(7);
            Self::with_config(&conf)
        }

        fn with_config(conf: &Config) -> Self {
            let mut conn = TcpControlBlock::new(MSS);
            conn.srtt_us = 50_000;
            let now = Instant::now();
            let bbr = Bbr::new(conf, &mut conn, now);

            Self {
                conn,
                bbr,
                now,
                bw: 1_000_000,
                rtt: Duration::from_millis(50),
            }
        }

        /// A sample of one interval at the path rate. A round-start sample
        /// acks a packet sent at the current delivered watermark.
        fn sample(&self, round_start: bool) -> DeliverySample {
            let acked = self.bw * INTERVAL.as_millis() as u64 / 1000;
            let prior_delivered = if round_start { self.conn.delivered } else { 0 };

            DeliverySample::new(acked, INTERVAL)
                .with_rtt(self.rtt)
                .with_prior_delivered(prior_delivered)
        }

        fn ack_sample(&mut self, advance: Duration, sample: DeliverySample) {
            self.now += advance;
            self.conn.delivered += sample.delivered;
            self.bbr.on_ack(&mut self.conn, &sample, self.now);
        }

        fn ack(&mut self, advance: Duration, round_start: bool) {
            let sample = self.sample(round_start);
            self.ack_sample(advance, sample);
        }

        fn round(&mut self) {
            self.ack(self.rtt, true);
        }

        fn phase(&self) -> Option<CyclePhase> {
            self.bbr.mode().cycle_phase()
        }

        /// Fill the pipe, drain, and settle in ProbeBW_CRUISE.
        fn cruise(&mut self) {
            self.conn.pipe = 1_000_000;
            for _ in 0..4 {
                self.round();
            }
            assert_eq!(self.bbr.mode(), Mode::Drain);

            self.conn.pipe = 40_000;
            self.round();
            assert_eq!(self.phase(), Some(CyclePhase::Cruise));
        }

        /// Set the next probe wait and restart the cycle clock.
        fn set_probe_wait(&mut self, rounds: u64, wait: Duration) {
            self.bbr.probe_wait = ProbeWait { rounds, wait };
            self.bbr.rounds_since_bw_probe = 0;
            self.bbr.cycle_stamp = self.now;
        }

        /// From CRUISE, wait out the probe and enter ProbeBW_UP.
        fn probe_up(&mut self) {
            self.set_probe_wait(0, Duration::from_secs(2));
            self.ack(Duration::from_millis(2100), false);
            assert_eq!(self.phase(), Some(CyclePhase::Refill));

            self.round();
            assert_eq!(self.phase(), Some(CyclePhase::Up));
        }
    }

    #[test]
    fn bootstrap() {
        let flow = Flow::new();

        assert_eq!(flow.bbr.name(), "BBR");
        assert_eq!(flow.bbr.mode(), Mode::Startup);
        assert!(flow.bbr.in_slow_start());
        assert!(!flow.bbr.is_filled_pipe());
        assert_eq!(
            flow.bbr.gains(),
            Gains {
                pacing: 2.77,
                cwnd: 2.0
            }
        );

        // 4 * 1460 bytes over 50ms at 2.77x.
        assert_eq!(flow.conn.cwnd, 5840);
        assert_eq!(flow.bbr.initial_window(), 5840);
        assert_eq!(flow.bbr.minimal_window(), 5840);
        let pacing_rate = flow.bbr.pacing_rate().unwrap();
        assert!(pacing_rate.abs_diff(323_536) <= 1, "{}", pacing_rate);

        assert_eq!(flow.bbr.min_rtt(), Duration::from_millis(50));
        assert_eq!(flow.bbr.round_count(), 0);
    }

    #[test]
    fn bootstrap_rfc5681_window_without_srtt() {
        let mut conf = Config::new();
        conf.set_initial_window(crate::InitialWindow::Rfc5681)
            .unwrap();

        let mut conn = TcpControlBlock::new(MSS);
        let bbr = Bbr::new(&conf, &mut conn, Instant::now());

        // 3 segments over the 1ms clock granularity, with cwnd held at the
        // minimal pipe cwnd.
        assert_eq!(bbr.initial_window(), 3 * MSS);
        assert_eq!(conn.cwnd, 4 * MSS);
        let pacing_rate = bbr.pacing_rate().unwrap();
        assert!(pacing_rate.abs_diff(12_132_600) <= 1, "{}", pacing_rate);
        assert_eq!(bbr.min_rtt(), Duration::MAX);
    }

    #[test]
    fn full_pipe_after_three_flat_rounds() {
        let mut flow = Flow::new();
        flow.conn.pipe = 1_000_000;

        // The first round records the baseline.
        flow.round();
        assert_eq!(flow.bbr.round_count(), 1);
        assert_eq!(flow.bbr.max_bw(), 1_000_000);

        flow.round();
        flow.round();
        assert!(!flow.bbr.is_filled_pipe());
        assert_eq!(flow.bbr.mode(), Mode::Startup);

        flow.round();
        assert!(flow.bbr.is_filled_pipe());
        assert_eq!(flow.bbr.mode(), Mode::Drain);
        assert_eq!(flow.bbr.gains().pacing, 0.5);
        assert_eq!(flow.bbr.stats().mode_transitions, 1);

        // Still queued above the BDP.
        flow.round();
        assert_eq!(flow.bbr.mode(), Mode::Drain);

        // Drained to the BDP (50000 bytes).
        flow.conn.pipe = 50_000;
        flow.round();
        assert!(flow.bbr.is_probing_bandwidth());
        assert!(!flow.bbr.in_slow_start());
    }

    #[test]
    fn app_limited_rounds_do_not_fill_pipe() {
        let mut flow = Flow::new();
        flow.conn.pipe = 1_000_000;

        for _ in 0..10 {
            let sample = flow.sample(true).with_app_limited(true);
            flow.ack_sample(flow.rtt, sample);
        }

        assert!(!flow.bbr.is_filled_pipe());
        assert_eq!(flow.bbr.mode(), Mode::Startup);
    }

    #[test]
    fn pacing_rate_non_decreasing_before_full_pipe() {
        let mut flow = Flow::new();
        let mut last = flow.bbr.pacing_rate().unwrap();

        for _ in 0..20 {
            flow.bw += flow.bw / 2;
            flow.round();

            // Mid-round samples with a stale low rate.
            let mut stale = flow.sample(false);
            stale.interval = INTERVAL * 10;
            flow.ack_sample(Duration::from_millis(1), stale);

            assert!(!flow.bbr.is_filled_pipe());
            let pacing_rate = flow.bbr.pacing_rate().unwrap();
            assert!(pacing_rate >= last, "{} < {}", pacing_rate, last);
            last = pacing_rate;
        }
    }

    #[test]
    fn cruise_waits_for_round_and_wall_clock() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.set_probe_wait(1, Duration::from_millis(2500));

        // The round bound is met first.
        flow.ack(Duration::from_secs(1), true);
        assert_eq!(flow.phase(), Some(CyclePhase::Cruise));
        flow.ack(Duration::from_millis(1400), false);
        assert_eq!(flow.phase(), Some(CyclePhase::Cruise));

        flow.ack(Duration::from_millis(200), false);
        assert_eq!(flow.phase(), Some(CyclePhase::Refill));
        assert_eq!(flow.bbr.mode().ack_phase(), Some(AckPhase::Refilling));

        // One round of REFILL then UP.
        flow.round();
        assert_eq!(flow.phase(), Some(CyclePhase::Up));
        assert_eq!(flow.bbr.mode().ack_phase(), Some(AckPhase::ProbeStarting));
        assert_eq!(
            flow.bbr.gains(),
            Gains {
                pacing: 1.25,
                cwnd: 2.25
            }
        );
    }

    #[test]
    fn cruise_waits_for_round_after_wall_clock() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.set_probe_wait(1, Duration::from_millis(2500));

        // The wall clock bound is met first.
        flow.ack(Duration::from_secs(3), false);
        assert_eq!(flow.phase(), Some(CyclePhase::Cruise));

        flow.ack(Duration::from_millis(10), true);
        assert_eq!(flow.phase(), Some(CyclePhase::Refill));
    }

    #[test]
    fn idle_restart_in_up_paces_at_bw() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.probe_up();

        let bw = flow.bbr.bw();
        assert_eq!(bw, 1_000_000);
        assert_eq!(
            flow.bbr.pacing_rate(),
            Some(flow.bbr.pacing.with_gain(1.25, bw))
        );

        // Not idle: nothing changes.
        flow.conn.pipe = 10_000;
        flow.conn.app_limited = true;
        flow.bbr.on_transmit(&mut flow.conn, flow.now);
        assert_eq!(flow.bbr.stats().idle_restarts, 0);

        flow.conn.pipe = 0;
        flow.bbr.on_transmit(&mut flow.conn, flow.now);
        assert_eq!(flow.bbr.pacing_rate(), Some(990_000));
        assert_eq!(
            flow.bbr.pacing_rate(),
            Some(flow.bbr.pacing.with_gain(1.0, bw))
        );
        assert_eq!(flow.phase(), Some(CyclePhase::Up));
        assert_eq!(flow.bbr.stats().idle_restarts, 1);
        assert!(flow.bbr.idle_restart);

        // Delivered data ends the restart.
        flow.ack(Duration::from_millis(1), false);
        assert!(!flow.bbr.idle_restart);
    }

    #[test]
    fn repeated_transmits_restart_from_idle_once() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.probe_up();

        flow.conn.pipe = 0;
        flow.conn.app_limited = true;
        flow.bbr.on_transmit(&mut flow.conn, flow.now);
        assert_eq!(flow.bbr.stats().idle_restarts, 1);

        // Same idle period: pacing is held at bw without another restart.
        flow.now += Duration::from_millis(10);
        flow.bbr.on_transmit(&mut flow.conn, flow.now);
        flow.now += Duration::from_millis(10);
        flow.bbr.on_transmit(&mut flow.conn, flow.now);
        assert_eq!(flow.bbr.stats().idle_restarts, 1);
        assert_eq!(flow.bbr.pacing_rate(), Some(990_000));
        assert!(flow.bbr.idle_restart);

        // A delivering ACK ends the idle period, the next one counts again.
        flow.ack(Duration::from_millis(1), false);
        assert!(!flow.bbr.idle_restart);
        flow.bbr.on_transmit(&mut flow.conn, flow.now);
        assert_eq!(flow.bbr.stats().idle_restarts, 2);
        assert_eq!(flow.bbr.pacing_rate(), Some(990_000));
    }

    #[test]
    fn excessive_loss_in_up_cuts_inflight_hi() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.probe_up();
        assert!(flow.bbr.bw_probe_samples);
        assert_eq!(flow.bbr.model.inflight_hi, u64::MAX);

        flow.conn.pipe = 200_000;
        let sample = flow.sample(false).with_loss(5 * MSS, 100 * MSS);
        flow.ack_sample(Duration::from_millis(1), sample);

        assert_eq!(flow.bbr.model.inflight_hi, 100 * MSS);
        assert_eq!(flow.phase(), Some(CyclePhase::Down));
        assert_eq!(flow.bbr.mode().ack_phase(), Some(AckPhase::ProbeStopping));
        assert_eq!(flow.bbr.bw_probe_up_cnt, u64::MAX);
        assert!(!flow.bbr.bw_probe_samples);

        // Bounded by inflight_hi outside CRUISE.
        assert!(flow.conn.cwnd <= 100 * MSS);

        // The first round in DOWN ends the samples from the UP phase.
        flow.bbr.bw_probe_samples = true;
        flow.round();
        assert_eq!(flow.phase(), Some(CyclePhase::Down));
        assert!(!flow.bbr.bw_probe_samples);
    }

    #[test]
    fn up_grows_inflight_hi_per_acked_bytes() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.probe_up();
        assert_eq!(flow.bbr.mode().ack_phase(), Some(AckPhase::ProbeStarting));
        assert_eq!(flow.bbr.bw_probe_up_rounds, 1);
        assert_eq!(flow.bbr.bw_probe_up_acks, 0);

        // cwnd fully uses a finite inflight_hi, one segment per 10 acked.
        flow.bbr.model.inflight_hi = 20 * MSS;
        flow.conn.cwnd = 20 * MSS;
        flow.bbr.bw_probe_up_cnt = 10 * MSS;

        // 50_000 acked bytes: three segments, 6_200 bytes carried over.
        flow.ack(Duration::from_millis(1), false);
        assert_eq!(flow.bbr.model.inflight_hi, 23 * MSS);
        assert_eq!(flow.bbr.bw_probe_up_acks, 6_200);
        assert_eq!(flow.bbr.bw_probe_up_rounds, 1);
        assert_eq!(flow.bbr.mode().ack_phase(), Some(AckPhase::ProbeStarting));
        assert_eq!(flow.conn.cwnd, 23 * MSS);

        // A round start begins the feedback and doubles the slope.
        flow.round();
        assert_eq!(flow.phase(), Some(CyclePhase::Up));
        assert_eq!(flow.bbr.mode().ack_phase(), Some(AckPhase::ProbeFeedback));
        assert_eq!(flow.bbr.model.inflight_hi, 26 * MSS);
        assert_eq!(flow.bbr.bw_probe_up_acks, 12_400);
        assert_eq!(flow.bbr.bw_probe_up_rounds, 2);
        assert_eq!(flow.bbr.bw_probe_up_cnt, 23 * MSS / 2);
    }

    #[test]
    fn up_growth_slope_saturates() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.probe_up();
        assert_eq!(flow.bbr.bw_probe_up_rounds, 1);

        for _ in 0..40 {
            // Keep cwnd at inflight_hi so every round raises the slope.
            flow.bbr.model.inflight_hi = flow.conn.cwnd;
            let cwnd = flow.conn.cwnd;
            let rounds = flow.bbr.bw_probe_up_rounds;

            flow.round();
            assert_eq!(flow.phase(), Some(CyclePhase::Up));
            assert_eq!(
                flow.bbr.bw_probe_up_rounds,
                (rounds + 1).min(MAX_PROBE_UP_ROUNDS)
            );
            assert_eq!(flow.bbr.bw_probe_up_cnt, (cwnd >> rounds).max(1));
        }

        assert_eq!(flow.bbr.bw_probe_up_rounds, MAX_PROBE_UP_ROUNDS);
        assert_eq!(flow.bbr.bw_probe_up_cnt, 1);
    }

    #[test]
    fn up_ends_when_queue_is_built() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.probe_up();

        // Within one min_rtt UP goes on regardless of inflight.
        flow.conn.pipe = 1_000_000;
        flow.ack(Duration::from_millis(10), false);
        assert_eq!(flow.phase(), Some(CyclePhase::Up));

        // 1.25 * BDP is 62500 bytes.
        flow.conn.pipe = 60_000;
        flow.ack(Duration::from_millis(50), false);
        assert_eq!(flow.phase(), Some(CyclePhase::Up));

        flow.conn.pipe = 100_000;
        flow.ack(Duration::from_millis(1), false);
        assert_eq!(flow.phase(), Some(CyclePhase::Down));
        assert_eq!(flow.bbr.gains().pacing, 0.9);
    }

    #[test]
    fn loss_in_cruise_bounds_bw_until_refill() {
        let mut flow = Flow::new();
        flow.cruise();
        flow.set_probe_wait(1, Duration::from_millis(2500));

        let sample = flow.sample(true).with_loss(5 * MSS, 40 * MSS);
        flow.ack_sample(Duration::from_millis(50), sample);
        let bw_lo = flow.bbr.model.bw_lo();
        assert!(bw_lo < u64::MAX);
        assert!(flow.bbr.bw() <= flow.bbr.max_bw());

        // Lower bounds never rise on their own.
        for _ in 0..5 {
            flow.bw *= 2;
            let sample = flow.sample(true).with_loss(MSS, 40 * MSS);
            flow.ack_sample(Duration::from_millis(50), sample);
            assert!(flow.bbr.model.bw_lo() <= bw_lo);
        }

        flow.ack(Duration::from_secs(3), true);
        assert_eq!(flow.phase(), Some(CyclePhase::Refill));
        assert_eq!(flow.bbr.model.bw_lo(), u64::MAX);
        assert_eq!(flow.bbr.model.inflight_lo(), u64::MAX);
    }

    #[test]
    fn probe_rtt_enter_and_exit() {
        let mut flow = Flow::new();
        flow.cruise();
        let saved = flow.conn.cwnd;
        assert!(saved > 25_000);

        // No min RTT sample for longer than the ProbeRTT interval.
        flow.rtt = Duration::from_millis(80);
        flow.conn.pipe = 10_000;
        flow.ack(Duration::from_secs(6), false);
        assert_eq!(flow.bbr.mode(), Mode::ProbeRtt);
        assert_eq!(flow.bbr.mode().cycle_phase(), None);
        assert_eq!(
            flow.bbr.gains(),
            Gains {
                pacing: 1.0,
                cwnd: 0.5
            }
        );
        assert_eq!(flow.bbr.stats().probe_rtt_entries, 1);
        assert_eq!(flow.bbr.prior_cwnd, saved);
        assert!(flow.conn.app_limited);

        // cwnd held at 0.5 * BDP.
        assert!(flow.conn.cwnd <= 25_000);
        assert!(flow.conn.cwnd >= flow.bbr.minimal_window());

        // A round completes before the dwell time.
        flow.rtt = Duration::from_millis(50);
        flow.conn.app_limited = false;
        flow.ack(Duration::from_millis(100), true);
        assert_eq!(flow.bbr.mode(), Mode::ProbeRtt);

        // Dwell time elapses.
        flow.ack(Duration::from_millis(150), false);
        assert_eq!(flow.phase(), Some(CyclePhase::Cruise));
        assert!(flow.conn.cwnd >= saved, "{} < {}", flow.conn.cwnd, saved);
        assert_eq!(flow.bbr.model.bw_lo(), u64::MAX);
        assert_eq!(flow.bbr.stats().probe_rtt_entries, 1);
    }

    #[test]
    fn probe_rtt_exit_on_idle_restart() {
        let mut flow = Flow::new();
        flow.cruise();

        flow.conn.pipe = 10_000;
        flow.ack(Duration::from_secs(6), false);
        assert_eq!(flow.bbr.mode(), Mode::ProbeRtt);
        flow.ack(Duration::from_millis(100), true);

        // Going idle after the dwell time exits ProbeRTT before sending.
        flow.now += Duration::from_millis(150);
        flow.conn.pipe = 0;
        flow.conn.app_limited = true;
        flow.bbr.on_transmit(&mut flow.conn, flow.now);
        assert_eq!(flow.phase(), Some(CyclePhase::Cruise));
    }

    #[test]
    fn probe_rtt_before_full_pipe_returns_to_startup() {
        let mut flow = Flow::new();
        flow.round();

        flow.conn.pipe = 1_000;
        flow.ack(Duration::from_secs(6), false);
        assert_eq!(flow.bbr.mode(), Mode::ProbeRtt);

        flow.ack(Duration::from_millis(100), true);
        flow.ack(Duration::from_millis(150), false);
        assert_eq!(flow.bbr.mode(), Mode::Startup);
        assert!(!flow.bbr.is_filled_pipe());
    }

    #[test]
    fn recovery_restores_saved_cwnd() {
        let mut flow = Flow::new();
        flow.cruise();
        let saved = flow.conn.cwnd;

        flow.conn.in_recovery = true;
        flow.conn.pipe = 10_000;
        flow.round();
        assert!(flow.bbr.in_recovery);
        assert!(flow.bbr.packet_conservation);
        assert_eq!(flow.conn.cwnd, 60_000);

        // Losses shrink cwnd while in recovery.
        let mut sample = flow.sample(false);
        sample.newly_lost = 10 * MSS;
        flow.ack_sample(Duration::from_millis(1), sample);
        assert!(flow.conn.cwnd < saved);

        flow.conn.in_recovery = false;
        flow.round();
        assert!(!flow.bbr.in_recovery);
        assert!(flow.conn.cwnd >= saved, "{} < {}", flow.conn.cwnd, saved);
        assert_eq!(flow.bbr.stats().bytes_lost_in_total, 10 * MSS);
    }

    #[test]
    fn save_and_restore_cwnd() {
        let mut flow = Flow::new();
        let bbr = &mut flow.bbr;

        bbr.cwnd = 50_000;
        bbr.save_cwnd();
        assert_eq!(bbr.prior_cwnd, 50_000);

        // Outside recovery the saved value is replaced.
        bbr.cwnd = 30_000;
        bbr.save_cwnd();
        assert_eq!(bbr.prior_cwnd, 30_000);

        // In recovery it only ratchets up.
        bbr.in_recovery = true;
        for cwnd in [20_000, 80_000, 10_000] {
            bbr.cwnd = cwnd;
            bbr.save_cwnd();
        }
        assert_eq!(bbr.prior_cwnd, 80_000);

        bbr.cwnd = 10_000;
        bbr.restore_cwnd();
        assert_eq!(bbr.cwnd, 80_000);

        // A larger window is kept.
        bbr.cwnd = 90_000;
        bbr.restore_cwnd();
        assert_eq!(bbr.cwnd, 90_000);
    }

    #[test]
    fn high_loss_ends_startup() {
        let mut flow = Flow::new();
        flow.conn.pipe = 1_000_000;
        flow.conn.in_recovery = true;
        flow.round();

        for _ in 0..6 {
            let mut sample = flow.sample(false);
            sample.newly_lost = MSS;
            flow.ack_sample(Duration::from_millis(1), sample);
            assert_eq!(flow.bbr.mode(), Mode::Startup);
        }

        let mut sample = flow.sample(true).with_loss(10 * MSS, 100 * MSS);
        sample.newly_lost = MSS;
        flow.ack_sample(Duration::from_millis(1), sample);

        assert!(flow.bbr.is_filled_pipe());
        assert_eq!(flow.bbr.mode(), Mode::Drain);
        assert!(flow.bbr.model.inflight_hi < u64::MAX);
        assert_eq!(flow.bbr.stats().bytes_lost_in_startup, 7 * MSS);
    }

    #[test]
    fn high_loss_exit_disabled() {
        let mut conf = Config::new();
        conf.set_random_seed(7);
        conf.set_startup_full_loss_count(0);
        let mut flow = Flow::with_config(&conf);
        flow.conn.pipe = 1_000_000;
        flow.conn.in_recovery = true;
        flow.round();

        for _ in 0..6 {
            let mut sample = flow.sample(false);
            sample.newly_lost = MSS;
            flow.ack_sample(Duration::from_millis(1), sample);
        }

        let sample = flow.sample(true).with_loss(10 * MSS, 100 * MSS);
        flow.ack_sample(Duration::from_millis(1), sample);
        assert_eq!(flow.bbr.mode(), Mode::Startup);
    }

    #[test]
    fn cwnd_never_below_minimum() {
        let mut flow = Flow::new();
        flow.bw = 20_000;
        flow.conn.pipe = 0;

        for i in 0..200 {
            let mut sample = flow.sample(i % 3 == 0);
            sample.newly_lost = 3 * MSS;
            flow.conn.in_recovery = i % 7 < 3;
            flow.ack_sample(Duration::from_millis(30), sample);
            assert!(flow.conn.cwnd >= 4 * MSS, "{}", flow.conn.cwnd);
            assert!(flow.bbr.congestion_window() >= 4 * MSS);
        }
    }

    #[test]
    fn seeded_flows_are_reproducible() {
        let run = || {
            let mut flow = Flow::new();
            flow.cruise();
            let mut phases = Vec::new();
            for _ in 0..200 {
                flow.ack(Duration::from_millis(50), true);
                phases.push((flow.bbr.mode(), flow.conn.cwnd, flow.bbr.pacing_rate()));
            }
            phases
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn on_init_resets() {
        let mut flow = Flow::new();
        flow.cruise();
        assert!(flow.bbr.is_filled_pipe());

        flow.bbr.on_init(&mut flow.conn, flow.now);
        assert_eq!(flow.bbr.mode(), Mode::Startup);
        assert!(!flow.bbr.is_filled_pipe());
        assert_eq!(flow.bbr.round_count(), 0);
        assert_eq!(flow.conn.cwnd, 5840);
        assert_eq!(flow.bbr.stats().mode_transitions, 0);
    }
}

mod mode;
mod model;
mod pacing;
mod probe_wait;
