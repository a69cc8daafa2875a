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

//! The per-ACK delivery rate sample handed to the controller by the
//! transport's delivery rate estimator.
//!
//! See
//! <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.1.3>.

use std::time::Duration;

/// Rate sample output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySample {
    /// rs.delivered: The amount of data marked as delivered over the sampling interval.
    pub delivered: u64,

    /// rs.interval: The length of the sampling interval.
    pub interval: Duration,

    /// rs.rtt: The round-trip time implied by the most recently acked packet.
    /// Zero if unknown.
    pub rtt: Duration,

    /// rs.prior_delivered: The P.delivered count from the most recent packet
    /// delivered, i.e. C.delivered when that packet was sent.
    pub prior_delivered: u64,

    /// Data newly acknowledged by this ACK.
    pub newly_acked: u64,

    /// Data newly marked lost while processing this ACK.
    pub newly_lost: u64,

    /// rs.lost: The volume of data declared lost between the transmission
    /// and acknowledgement of the packet that has just been ACKed.
    pub lost: u64,

    /// rs.tx_in_flight: The volume of data estimated to be in flight when
    /// the packet that has just been ACKed was transmitted.
    pub tx_in_flight: u64,

    /// rs.is_app_limited: Whether the sample is application-limited.
    pub is_app_limited: bool,
}

impl DeliverySample {
    pub fn new(delivered: u64, interval: Duration) -> Self {
        Self {
            delivered,
            interval,
            newly_acked: delivered,
            ..Self::default()
        }
    }

    /// Set the rtt implied by the sample.
    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt = rtt;
        self
    }

    /// Set P.delivered of the most recently acked packet.
    pub fn with_prior_delivered(mut self, prior_delivered: u64) -> Self {
        self.prior_delivered = prior_delivered;
        self
    }

    /// Set the loss signals of the sample.
    pub fn with_loss(mut self, lost: u64, tx_in_flight: u64) -> Self {
        self.lost = lost;
        self.tx_in_flight = tx_in_flight;
        self
    }

    /// Mark the sample application-limited.
    pub fn with_app_limited(mut self, is_app_limited: bool) -> Self {
        self.is_app_limited = is_app_limited;
        self
    }

    /// rs.delivery_rate in bytes per second, `0` for an empty interval.
    pub fn delivery_rate(&self) -> u64 {
        let interval = self.interval.as_micros();
        if interval == 0 {
            return 0;
        }

        let rate = self.delivered as u128 * 1_000_000 / interval;
        rate.min(u64::MAX as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_rate() {
        let sample = DeliverySample::new(5840, Duration::from_millis(50));
        assert_eq!(sample.delivery_rate(), 116_800);
        assert_eq!(sample.newly_acked, 5840);

        let sample = DeliverySample::new(1, Duration::from_secs(2));
        assert_eq!(sample.delivery_rate(), 0);

        let sample = DeliverySample::new(u64::MAX, Duration::from_micros(1));
        assert_eq!(sample.delivery_rate(), u64::MAX);
    }

    #[test]
    fn empty_interval() {
        let sample = DeliverySample::new(1460, Duration::ZERO);
        assert_eq!(sample.delivery_rate(), 0);

        // Sub-microsecond intervals carry no rate either.
        let sample = DeliverySample::new(1460, Duration::from_nanos(999));
        assert_eq!(sample.delivery_rate(), 0);
    }

    #[test]
    fn builder() {
        let sample = DeliverySample::new(3000, Duration::from_millis(10))
            .with_rtt(Duration::from_millis(40))
            .with_prior_delivered(12_000)
            .with_loss(300, 10_000)
            .with_app_limited(true);

        assert_eq!(sample.rtt, Duration::from_millis(40));
        assert_eq!(sample.prior_delivered, 12_000);
        assert_eq!(sample.lost, 300);
        assert_eq!(sample.tx_in_flight, 10_000);
        assert!(sample.is_app_limited);
        assert_eq!(sample.delivery_rate(), 300_000);
    }
}
