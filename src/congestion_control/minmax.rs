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

/*
 * Copyright 2017, Google Inc.
 *
 * Use of this source code is governed by the following BSD-style license:
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are
 * met:
 *
 *    * Redistributions of source code must retain the above copyright
 * notice, this list of conditions and the following disclaimer.
 *    * Redistributions in binary form must reproduce the above
 * copyright notice, this list of conditions and the following disclaimer
 * in the documentation and/or other materials provided with the
 * distribution.
 *
 *    * Neither the name of Google Inc. nor the names of its
 * contributors may be used to endorse or promote products derived from
 * this software without specific prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
 * "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
 * LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
 * A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
 * OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
 * SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
 * LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
 * DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
 * THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
 * (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */

//! A windowed max estimator, which is based on an algorithm by Kathleen Nichols.
//! Refer to <https://groups.google.com/g/bbr-dev/c/3RTgkzi5ZD8>.
//!
//! The filter keeps the best, 2nd best and 3rd best samples, with the
//! invariant that the measurement time of the n'th best is no earlier than
//! the (n-1)'th best. Upon a new max everything older is forgotten, since the
//! new sample dominates the rest of the window and is the most recent.
//!
//! Time is an abstract monotonic counter; the BBR model feeds it with the
//! packet-timed round count.

/// A single data point of the filter.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MaxSample {
    /// Time the measurement was taken.
    pub time: u64,

    /// Value measured.
    pub value: u64,
}

/// Three-slot sliding-window maximum.
#[derive(Debug, Copy, Clone, Default)]
pub struct WindowedMaxFilter {
    /// The best, second best, third best samples.
    samples: [MaxSample; 3],
}

impl WindowedMaxFilter {
    pub fn new(value: u64, time: u64) -> Self {
        let mut filter = Self::default();
        filter.init(value, time);
        filter
    }

    /// Collapse all candidate slots to the given sample.
    pub fn init(&mut self, value: u64, time: u64) {
        self.samples.fill(MaxSample { time, value });
    }

    /// As time advances, update the 1st, 2nd, and 3rd choices.
    fn subwin_update(&mut self, window: u64, sample: MaxSample) {
        let dt = sample.time - self.samples[0].time;
        if dt > window {
            // Passed entire window without a new sample so make 2nd choice
            // the new best and 3rd choice the new 2nd choice. The 2nd choice
            // may also be outside the window, the 3rd is known to be inside.
            self.samples[0] = self.samples[1];
            self.samples[1] = self.samples[2];
            self.samples[2] = sample;
            if sample.time - self.samples[0].time > window {
                self.samples[0] = self.samples[1];
                self.samples[1] = self.samples[2];
                self.samples[2] = sample;
            }
        } else if self.samples[1].time == self.samples[0].time && dt > window / 4 {
            // A quarter of the window passed without a new sample, so take a
            // 2nd choice from the 2nd quarter of the window.
            self.samples[2] = sample;
            self.samples[1] = sample;
        } else if self.samples[2].time == self.samples[1].time && dt > window / 2 {
            // Half of the window passed, take a 3rd choice from the last half.
            self.samples[2] = sample;
        }
    }

    /// Feed a new measurement and return the windowed max.
    pub fn update(&mut self, window: u64, value: u64, time: u64) -> u64 {
        if time < self.samples[2].time {
            // Clock went backwards: no new information.
            return self.get();
        }

        let sample = MaxSample { time, value };

        if sample.value >= self.samples[0].value // found new max?
            || sample.time - self.samples[2].time > window
        // nothing left in window?
        {
            self.init(value, time);
            return value;
        }

        if sample.value >= self.samples[1].value {
            self.samples[2] = sample;
            self.samples[1] = sample;
        } else if sample.value >= self.samples[2].value {
            self.samples[2] = sample;
        }

        self.subwin_update(window, sample);
        self.get()
    }

    /// Get the windowed max value.
    pub fn get(&self) -> u64 {
        self.samples[0].value
    }

    /// Candidate samples, best first.
    pub fn samples(&self) -> &[MaxSample; 3] {
        &self.samples
    }
}
