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

//! Conversion of the model outputs and the mode gains into the pacing rate
//! and the congestion window.

use std::time::Duration;

use crate::TIMER_GRANULARITY;

/// BBR.pacing_rate: The current pacing rate for a BBR flow, which controls
/// inter-packet spacing.
///
/// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-pacing-rate-bbrpacing_rate>.
#[derive(Debug)]
pub(super) struct PacingRate {
    /// Pacing rate in bytes per second.
    rate: u64,

    /// The static discount used to scale BBR.bw to produce BBR.pacing_rate,
    /// in percent.
    margin_percent: u64,
}

impl PacingRate {
    pub(super) fn new(margin_percent: u64) -> Self {
        Self {
            rate: 0,
            margin_percent,
        }
    }

    /// Set the initial pacing rate from the initial congestion window.
    ///
    /// A flow has no bandwidth estimate when it starts, so the nominal
    /// bandwidth is `initial_cwnd / srtt`. An unknown or zero srtt counts as
    /// the timer granularity.
    pub(super) fn init(&mut self, startup_gain: f64, initial_cwnd: u64, srtt: Option<Duration>) {
        let srtt = srtt.unwrap_or(TIMER_GRANULARITY).max(TIMER_GRANULARITY);
        let nominal_bandwidth = initial_cwnd as u128 * 1_000_000 / srtt.as_micros();
        self.rate = (startup_gain * nominal_bandwidth as f64) as u64;
    }

    /// The rate BBR paces at for the given gain and bandwidth.
    pub(super) fn with_gain(&self, pacing_gain: f64, bw: u64) -> u64 {
        let margin = 1.0_f64 - self.margin_percent as f64 / 100.0;
        (pacing_gain * bw as f64 * margin) as u64
    }

    /// Update the pacing rate to be proportional to bw, as long as the pipe is
    /// estimated full or doing so increases the pacing rate.
    pub(super) fn set_with_gain(&mut self, pacing_gain: f64, bw: u64, is_filled_pipe: bool) {
        let rate = self.with_gain(pacing_gain, bw);
        if is_filled_pipe || rate > self.rate {
            self.rate = rate;
        }
    }

    pub(super) fn rate(&self) -> u64 {
        self.rate
    }
}

/// Congestion window targets derived from the model.
///
/// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-congestion-window>.
#[derive(Debug, Clone, Copy)]
pub(super) struct CwndCalculator {
    /// BBRMinPipeCwnd in bytes.
    pub(super) min_cwnd: u64,

    /// Initial congestion window in bytes.
    pub(super) initial_cwnd: u64,

    /// Sender maximum segment size.
    pub(super) smss: u64,
}

impl CwndCalculator {
    /// BBR.max_inflight: the volume of in-flight data required to fully
    /// utilize the bottleneck bandwidth, floored at BBRMinPipeCwnd.
    ///
    /// `bdp` is the gained BDP, `None` without a valid RTT sample yet, in
    /// which case the initial window is used.
    pub(super) fn target(&self, bdp: Option<u64>, extra_acked: u64, probing_up: bool) -> u64 {
        let inflight = bdp
            .unwrap_or(self.initial_cwnd)
            .saturating_add(extra_acked)
            .max(self.min_cwnd);

        if probing_up {
            // Allow enough headroom to probe past the current estimate.
            return inflight.saturating_add(2 * self.smss);
        }

        inflight
    }

    // When cwnd is above the target, BBR cuts it to the target once the pipe
    // is full. When cwnd is below, it grows by no more than the data
    // acknowledged on each ACK.
    //
    // See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-core-cwnd-adjustment-mechan>.
    pub(super) fn grow(
        &self,
        cwnd: u64,
        target: u64,
        newly_acked: u64,
        delivered: u64,
        is_filled_pipe: bool,
    ) -> u64 {
        let cwnd = if is_filled_pipe {
            target.min(cwnd.saturating_add(newly_acked))
        } else if cwnd < target || delivered < self.initial_cwnd {
            cwnd.saturating_add(newly_acked)
        } else {
            cwnd
        };

        cwnd.max(self.min_cwnd)
    }
}
