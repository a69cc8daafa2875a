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

use serde::Serialize;
use strum_macros::EnumIter;
use strum_macros::IntoStaticStr;

/// Pacing gain used in Startup: `4*ln(2)` ~= `2.77`, the minimum gain that
/// allows the sending rate to double each round.
pub(crate) const STARTUP_PACING_GAIN: f64 = 2.77;

const DRAIN_PACING_GAIN: f64 = 0.5;

const PROBE_BW_DOWN_PACING_GAIN: f64 = 0.9;

const PROBE_BW_CRUISE_PACING_GAIN: f64 = 1.0;

const PROBE_BW_REFILL_PACING_GAIN: f64 = 1.0;

const PROBE_BW_UP_PACING_GAIN: f64 = 1.25;

/// Larger cwnd gain while probing, so that inflight is not the limit.
const PROBE_BW_UP_CWND_GAIN: f64 = 2.25;

const PROBE_RTT_PACING_GAIN: f64 = 1.0;

/// BBR State Machine.
/// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-state-machine>.
//          |
//          V
// +---> Startup  ------------+
// |        |                 |
// |        V                 |
// |     Drain  --------------+
// |        |                 |
// |        V                 |
// +---> ProbeBW_DOWN  -------+
// | ^      |                 |
// | |      V                 |
// | |   ProbeBW_CRUISE ------+
// | |      |                 |
// | |      V                 |
// | |   ProbeBW_REFILL  -----+
// | |      |                 |
// | |      V                 |
// | |   ProbeBW_UP  ---------+
// | |      |                 |
// | +------+                 |
// |                          |
// +---- ProbeRTT <-----------+
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// Ramp up sending rate rapidly to fill the pipe.
    Startup,

    /// Drain any queue created during startup.
    Drain,

    /// Discover and share bandwidth: pace around the estimated bandwidth.
    ProbeBw(ProbeBwState),

    /// Cut inflight to the minimum to probe min_rtt.
    ProbeRtt,
}

/// Sub-state of ProbeBW. Only exists while the flow is in ProbeBW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeBwState {
    /// Phase of the bandwidth probing cycle.
    pub phase: CyclePhase,

    /// How the incoming ACK stream relates to the probing.
    pub ack_phase: AckPhase,
}

/// The four phases of a ProbeBW cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumIter, IntoStaticStr)]
pub enum CyclePhase {
    /// Send slower than the network is delivering data, to reduce inflight.
    Down,

    /// Send at the same rate the network is delivering data.
    Cruise,

    /// Refill the pipe before probing, without creating a queue.
    Refill,

    /// Probe for possible increases in available bandwidth.
    Up,
}

/// ACK probe phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumIter, IntoStaticStr)]
pub enum AckPhase {
    /// Inflight rising to probe bw.
    ProbeStarting,

    /// Sending at est_bw to fill pipe.
    Refilling,

    /// Stopped probing; still getting feedback.
    ProbeStopping,

    /// Getting feedback from bw probing.
    ProbeFeedback,
}

/// The gain pair applied to the model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gains {
    /// BBR.pacing_gain: scales BBR.bw to produce BBR.pacing_rate.
    pub pacing: f64,

    /// BBR.cwnd_gain: scales the estimated BDP to produce cwnd.
    pub cwnd: f64,
}

impl Mode {
    /// The gains of the mode.
    ///
    /// `cwnd_gain` is the configured default cwnd gain and `probe_rtt_cwnd_gain`
    /// the one used while holding inflight low in ProbeRTT.
    // +-----------------+--------+--------+------+
    // | State           | Tactic | Pacing | Cwnd |
    // |                 |        | Gain   | Gain |
    // +-----------------+--------+--------+------+
    // | Startup         | accel  | 2.77   | 2    |
    // | Drain           | decel  | 0.5    | 2    |
    // | ProbeBW_DOWN    | decel  | 0.9    | 2    |
    // | ProbeBW_CRUISE  | cruise | 1.0    | 2    |
    // | ProbeBW_REFILL  | accel  | 1.0    | 2    |
    // | ProbeBW_UP      | accel  | 1.25   | 2.25 |
    // | ProbeRTT        | decel  | 1.0    | 0.5  |
    // +-----------------+--------+--------+------+
    pub fn gains(
        &self,
        startup_pacing_gain: f64,
        cwnd_gain: f64,
        probe_rtt_cwnd_gain: f64,
    ) -> Gains {
        let (pacing, cwnd) = match self {
            Mode::Startup => (startup_pacing_gain, cwnd_gain),
            Mode::Drain => (DRAIN_PACING_GAIN, cwnd_gain),
            Mode::ProbeBw(state) => match state.phase {
                CyclePhase::Down => (PROBE_BW_DOWN_PACING_GAIN, cwnd_gain),
                CyclePhase::Cruise => (PROBE_BW_CRUISE_PACING_GAIN, cwnd_gain),
                CyclePhase::Refill => (PROBE_BW_REFILL_PACING_GAIN, cwnd_gain),
                CyclePhase::Up => (PROBE_BW_UP_PACING_GAIN, PROBE_BW_UP_CWND_GAIN),
            },
            Mode::ProbeRtt => (PROBE_RTT_PACING_GAIN, probe_rtt_cwnd_gain),
        };

        Gains { pacing, cwnd }
    }

    /// Whether the flow is in ProbeBW, regardless of the cycle phase.
    pub fn is_probe_bw(&self) -> bool {
        matches!(self, Mode::ProbeBw(_))
    }

    /// The cycle phase, if in ProbeBW.
    pub fn cycle_phase(&self) -> Option<CyclePhase> {
        match self {
            Mode::ProbeBw(state) => Some(state.phase),
            _ => None,
        }
    }

    /// The ack phase, if in ProbeBW.
    pub fn ack_phase(&self) -> Option<AckPhase> {
        match self {
            Mode::ProbeBw(state) => Some(state.ack_phase),
            _ => None,
        }
    }

    /// Whether the flow pushes inflight up to probe for bandwidth, which
    /// suspends the loss-driven lower bounds.
    pub fn is_accelerating(&self) -> bool {
        matches!(
            self,
            Mode::Startup
                | Mode::ProbeBw(ProbeBwState {
                    phase: CyclePhase::Refill | CyclePhase::Up,
                    ..
                })
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Startup => "Startup",
            Mode::Drain => "Drain",
            Mode::ProbeBw(state) => match state.phase {
                CyclePhase::Down => "ProbeBW_DOWN",
                CyclePhase::Cruise => "ProbeBW_CRUISE",
                CyclePhase::Refill => "ProbeBW_REFILL",
                CyclePhase::Up => "ProbeBW_UP",
            },
            Mode::ProbeRtt => "ProbeRTT",
        }
    }
}
