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

/// Round trip counter for tracking packet-timed round trips which starts
/// at the transmission of some segment, and then end at the ack of that segment.
///
/// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-bbrround_count-tracking-pac>.
#[derive(Debug, Default, Clone)]
pub struct RoundTripCounter {
    /// BBR.round_count: Count of packet-timed round trips.
    round_count: u64,

    /// BBR.round_start: A boolean that BBR sets to true once per packet-
    /// timed round trip, on ACKs that advance BBR.round_count.
    is_round_start: bool,

    /// BBR.next_round_delivered: packet.delivered value denoting the end of
    /// a packet-timed round trip.
    next_round_delivered: u64,
}

impl RoundTripCounter {
    /// Mark the end of the current round at the connection's delivered
    /// watermark. The watermark never moves backwards.
    pub fn start_round(&mut self, delivered: u64) {
        self.next_round_delivered = self.next_round_delivered.max(delivered);
    }

    /// Process an ACK whose newest acked packet was sent when `C.delivered`
    /// was `packet_delivered`. `delivered` is the current `C.delivered`.
    pub fn on_ack(&mut self, packet_delivered: u64, delivered: u64) -> bool {
        if packet_delivered >= self.next_round_delivered {
            self.start_round(delivered);
            self.round_count += 1;
            self.is_round_start = true;
        } else {
            self.is_round_start = false;
        }

        self.is_round_start
    }

    pub fn round_count(&self) -> u64 {
        self.round_count
    }

    pub fn is_round_start(&self) -> bool {
        self.is_round_start
    }

    pub fn next_round_delivered(&self) -> u64 {
        self.next_round_delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_counting() {
        let mut round = RoundTripCounter::default();
        assert_eq!(round.round_count(), 0);
        assert!(!round.is_round_start());

        // The very first ACK closes the initial (empty) round.
        assert!(round.on_ack(0, 1000));
        assert_eq!(round.round_count(), 1);
        assert_eq!(round.next_round_delivered(), 1000);

        // Packets sent before the watermark was reached do not end the round.
        let mut delivered = 1000;
        for packet_delivered in [0, 200, 500, 999] {
            delivered += 100;
            assert!(!round.on_ack(packet_delivered, delivered));
            assert_eq!(round.round_count(), 1);
        }

        // Reaching the watermark exactly ends the round.
        delivered += 100;
        assert!(round.on_ack(1000, delivered));
        assert_eq!(round.round_count(), 2);
        assert_eq!(round.next_round_delivered(), delivered);

        // Passing it ends the next one, once.
        assert!(round.on_ack(delivered + 50, delivered + 100));
        assert_eq!(round.round_count(), 3);
        assert!(!round.on_ack(delivered + 50, delivered + 200));
        assert_eq!(round.round_count(), 3);
    }

    #[test]
    fn start_round_extends_watermark_only() {
        let mut round = RoundTripCounter::default();
        round.on_ack(0, 5000);

        // Starting a round does not count one.
        round.start_round(8000);
        assert_eq!(round.next_round_delivered(), 8000);
        assert_eq!(round.round_count(), 1);

        round.start_round(6000);
        assert_eq!(round.next_round_delivered(), 8000);

        // The original watermark no longer ends the round.
        assert!(!round.on_ack(5000, 9000));
        assert!(round.on_ack(8000, 9000));
        assert_eq!(round.round_count(), 2);
    }

    #[test]
    fn round_count_is_monotone() {
        let mut round = RoundTripCounter::default();
        let mut last = 0;
        let mut delivered = 0;

        for i in 0..1000_u64 {
            delivered += 1 + i % 7;
            round.on_ack(delivered.saturating_sub(i % 13 * 10), delivered);
            assert!(round.round_count() >= last);
            assert!(round.round_count() - last <= 1);
            last = round.round_count();
        }
    }
}
