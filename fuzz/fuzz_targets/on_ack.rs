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


#![no_main]

use std::time::Duration;
use std::time::Instant;

use libfuzzer_sys::fuzz_target;

use bbr_engine::Bbr;
use bbr_engine::CongestionController;
use bbr_engine::Config;
use bbr_engine::DeliverySample;
use bbr_engine::TcpControlBlock;

const MSS: u64 = 1200;

// Each 8-byte record drives one ACK:
//   [0]    elapsed milliseconds
//   [1]    rtt in milliseconds, 0 for no sample
//   [2]    segments acked
//   [3]    segments lost
//   [4]    segments in flight after the ACK
//   [5]    flags: bit0 app-limited, bit1 recovery, bit2 transmit
//   [6..8] sampling interval in milliseconds
fuzz_target!(|data: &[u8]| {
    let mut conf = Config::new();
    conf.set_random_seed(1);
    conf.enable_aggregation_budget(data.first().map_or(false, |b| b & 1 == 1));

    let mut conn = TcpControlBlock::new(MSS);
    let mut now = Instant::now();
    let mut bbr = Bbr::new(&conf, &mut conn, now);

    for record in data.chunks_exact(8) {
        now += Duration::from_millis(u64::from(record[0]));

        let acked = u64::from(record[2]) * MSS;
        let lost = u64::from(record[3]) * MSS;
        let interval = u64::from(u16::from_le_bytes([record[6], record[7]]));

        let prior_delivered = conn.delivered;
        conn.delivered += acked;
        conn.pipe = u64::from(record[4]) * MSS;
        conn.app_limited = record[5] & 1 != 0;
        conn.in_recovery = record[5] & 2 != 0;
        conn.srtt_us = u64::from(record[1]) * 1000;

        let mut sample = DeliverySample::new(acked, Duration::from_millis(interval))
            .with_rtt(Duration::from_millis(u64::from(record[1])))
            .with_prior_delivered(prior_delivered)
            .with_loss(lost, conn.pipe + acked + lost)
            .with_app_limited(conn.app_limited);
        sample.newly_lost = lost;

        bbr.on_ack(&mut conn, &sample, now);
        if record[5] & 4 != 0 {
            bbr.on_transmit(&mut conn, now);
        }

        assert!(bbr.congestion_window() >= bbr.minimal_window());
        assert!(conn.cwnd >= bbr.minimal_window());
        assert!(bbr.max_bw() >= bbr.bw());
    }
});
