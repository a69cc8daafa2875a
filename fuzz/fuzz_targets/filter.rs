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

use libfuzzer_sys::fuzz_target;

use bbr_engine::MaxSample;
use bbr_engine::WindowedMaxFilter;

const WINDOW: u64 = 10;

// Each 3-byte record is a time step followed by a little-endian value.
fuzz_target!(|data: &[u8]| {
    let mut filter = WindowedMaxFilter::new(0, 0);
    let mut history: Vec<MaxSample> = Vec::new();
    let mut now = 0;

    for record in data.chunks_exact(3) {
        now += u64::from(record[0] % 4);
        let value = u64::from(u16::from_le_bytes([record[1], record[2]]));

        let got = filter.update(WINDOW, value, now);
        history.push(MaxSample { time: now, value });

        let window_max = history
            .iter()
            .filter(|s| now - s.time <= WINDOW)
            .map(|s| s.value)
            .max()
            .unwrap_or(value);

        assert!(got >= value);
        assert!(got <= window_max);
        assert_eq!(got, filter.get());
    }
});
