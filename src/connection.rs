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

//! The view of the owning transport connection that the engine works on.
//!
//! The transport keeps its connection record however it likes. The engine
//! only reads the congestion-related fields through [`ConnectionState`] and
//! writes back the congestion window and the application-limited mark.

use std::time::Duration;

/// Connection fields read and written by the congestion controller.
pub trait ConnectionState {
    /// cwnd: The transport sender's congestion window in bytes.
    fn cwnd(&self) -> u64;

    /// Overwrite the congestion window.
    fn set_cwnd(&mut self, cwnd: u64);

    /// rwnd: The most recently advertised receive window in bytes.
    fn rwnd(&self) -> u64 {
        u64::MAX
    }

    /// SMSS: The sender maximum segment size in bytes.
    fn smss(&self) -> u64;

    /// ssthresh: The slow start threshold in bytes.
    fn ssthresh(&self) -> u64 {
        u64::MAX
    }

    /// SND.UNA: The oldest unacknowledged sequence number.
    fn snd_una(&self) -> u64 {
        0
    }

    /// SND.MAX: The highest sequence number ever transmitted.
    fn snd_max(&self) -> u64 {
        0
    }

    /// C.delivered: The total amount of data delivered so far over the
    /// lifetime of the connection.
    fn delivered(&self) -> u64;

    /// The smoothed round-trip time, if a sample has been taken.
    fn srtt(&self) -> Option<Duration>;

    /// The sender's estimate of the data outstanding in the network ("pipe"
    /// from RFC 6675).
    fn pipe(&self) -> u64;

    /// Whether the sender is application-limited.
    fn is_app_limited(&self) -> bool;

    /// Mark or clear the application-limited state.
    fn set_app_limited(&mut self, app_limited: bool);

    /// Whether the transport is in fast recovery or RTO recovery.
    fn in_loss_recovery(&self) -> bool;
}

/// Initial window per RFC 5681 Section 3.1.
pub fn initial_window(smss: u64) -> u64 {
    if smss > 2190 {
        2 * smss
    } else if smss > 1095 {
        3 * smss
    } else {
        4 * smss
    }
}

/// A plain transport control block.
///
/// The layout is C compatible so that the record can be shared by value
/// through the C API.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct TcpControlBlock {
    /// Congestion window in bytes.
    pub cwnd: u64,

    /// Receive window in bytes.
    pub rwnd: u64,

    /// Sender maximum segment size in bytes.
    pub smss: u64,

    /// Slow start threshold in bytes.
    pub ssthresh: u64,

    /// Oldest unacknowledged sequence number.
    pub snd_una: u64,

    /// Highest sequence number ever transmitted.
    pub snd_max: u64,

    /// Total bytes delivered over the lifetime of the connection.
    pub delivered: u64,

    /// Smoothed rtt in microseconds, `0` if unknown.
    pub srtt_us: u64,

    /// Bytes in flight.
    pub pipe: u64,

    /// Whether the connection is application-limited.
    pub app_limited: bool,

    /// Whether the connection is in loss recovery.
    pub in_recovery: bool,
}

impl TcpControlBlock {
    /// Create a control block with the RFC 5681 initial window.
    pub fn new(smss: u64) -> Self {
        Self {
            cwnd: initial_window(smss),
            rwnd: u64::MAX,
            smss,
            ssthresh: u64::MAX,
            ..Self::default()
        }
    }

    /// The usable send window per RFC 5681 Section 3.1.
    pub fn send_window(&self) -> u64 {
        self.cwnd.min(self.rwnd)
    }

    /// Unacknowledged sequence space in flight.
    pub fn flight_size(&self) -> u64 {
        self.snd_max.saturating_sub(self.snd_una)
    }
}

impl ConnectionState for TcpControlBlock {
    fn cwnd(&self) -> u64 {
        self.cwnd
    }

    fn set_cwnd(&mut self, cwnd: u64) {
        self.cwnd = cwnd;
    }

    fn rwnd(&self) -> u64 {
        self.rwnd
    }

    fn smss(&self) -> u64 {
        self.smss
    }

    fn ssthresh(&self) -> u64 {
        self.ssthresh
    }

    fn snd_una(&self) -> u64 {
        self.snd_una
    }

    fn snd_max(&self) -> u64 {
        self.snd_max
    }

    fn delivered(&self) -> u64 {
        self.delivered
    }

    fn srtt(&self) -> Option<Duration> {
        match self.srtt_us {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    fn pipe(&self) -> u64 {
        self.pipe
    }

    fn is_app_limited(&self) -> bool {
        self.app_limited
    }

    fn set_app_limited(&mut self, app_limited: bool) {
        self.app_limited = app_limited;
    }

    fn in_loss_recovery(&self) -> bool {
        self.in_recovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc5681_initial_window() {
        let cases = [
            (536, 4 * 536),
            (1095, 4 * 1095),
            (1096, 3 * 1096),
            (1460, 3 * 1460),
            (2190, 3 * 2190),
            (2191, 2 * 2191),
            (9000, 2 * 9000),
        ];

        for (smss, iw) in cases {
            assert_eq!(initial_window(smss), iw);
        }
    }

    #[test]
    fn control_block_windows() {
        let mut cb = TcpControlBlock::new(1460);
        assert_eq!(cb.cwnd(), 4380);
        assert_eq!(cb.send_window(), 4380);

        cb.rwnd = 2000;
        assert_eq!(cb.send_window(), 2000);

        cb.snd_una = 1000;
        cb.snd_max = 5000;
        assert_eq!(cb.flight_size(), 4000);

        // Sequence space bookkeeping lagging behind must not underflow.
        cb.snd_una = 6000;
        assert_eq!(cb.flight_size(), 0);
    }

    #[test]
    fn control_block_srtt() {
        let mut cb = TcpControlBlock::new(1460);
        assert_eq!(cb.srtt(), None);

        cb.srtt_us = 50_000;
        assert_eq!(cb.srtt(), Some(Duration::from_millis(50)));
    }
}
