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

#![allow(unused_variables)]

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::connection::ConnectionState;
use crate::Config;
pub use bbr::AckPhase;
pub use bbr::Bbr;
pub use bbr::CyclePhase;
pub use bbr::Gains;
pub use bbr::Mode;
pub use bbr::ProbeBwState;
pub(crate) use bbr::STARTUP_PACING_GAIN;
pub use delivery_rate::DeliverySample;
pub use minmax::MaxSample;
pub use minmax::WindowedMaxFilter;
pub use round::RoundTripCounter;

/// Congestion control statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CongestionStats {
    /// Total bytes delivered.
    pub bytes_delivered_in_total: u64,

    /// Total bytes delivered in Startup.
    pub bytes_delivered_in_startup: u64,

    /// Total bytes lost.
    pub bytes_lost_in_total: u64,

    /// Total bytes lost in Startup.
    pub bytes_lost_in_startup: u64,

    /// Packet-timed round trips.
    pub round_count: u64,

    /// Number of times ProbeRTT was entered.
    pub probe_rtt_entries: u64,

    /// Number of restarts from idle.
    pub idle_restarts: u64,

    /// Number of mode and ProbeBW phase transitions.
    pub mode_transitions: u64,
}

/// Congestion control interfaces.
///
/// The controller is driven by the owning connection: it is called on each
/// acknowledgment and before each transmission, and writes its decisions back
/// into the connection.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback at connection start. Resets all state.
    fn on_init(&mut self, conn: &mut dyn ConnectionState, now: Instant);

    /// Callback for processing an acknowledgment with its delivery-rate sample.
    fn on_ack(&mut self, conn: &mut dyn ConnectionState, sample: &DeliverySample, now: Instant);

    /// Callback before data is sent out.
    fn on_transmit(&mut self, conn: &mut dyn ConnectionState, now: Instant) {}

    /// Check if in slow start.
    fn in_slow_start(&self) -> bool {
        false
    }

    /// Current congestion window.
    fn congestion_window(&self) -> u64;

    /// Current pacing rate in bytes per second.
    /// If the algorithm does not estimate pacing rate, return None.
    fn pacing_rate(&self) -> Option<u64> {
        None
    }

    /// Initial congestion window.
    fn initial_window(&self) -> u64;

    /// Minimal congestion window.
    fn minimal_window(&self) -> u64;

    /// The pacing and cwnd gains in use. Informational only.
    fn gains(&self) -> Gains;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller {}.", self.name())
    }
}

/// Build a congestion controller for the connection.
pub fn build_congestion_controller(
    conf: &Config,
    conn: &mut dyn ConnectionState,
    now: Instant,
) -> Box<dyn CongestionController> {
    Box::new(Bbr::new(conf, conn, now))
}


#[path = "bbr/bbr.rs"]
mod bbr;

pub(crate) mod delivery_rate;
pub(crate) mod minmax;
mod round;
