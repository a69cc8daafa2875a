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

use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

/// Max amount of randomness to inject in round counting: the round bound is
/// drawn from `0..=PROBE_BW_RAND_ROUNDS`.
const PROBE_BW_RAND_ROUNDS: u64 = 1;

/// Lower bound of ProbeBW time scale.
/// See <https://www.ietf.org/archive/id/draft-cardwell-iccrg-bbr-congestion-control-02.html#name-design-considerations-for-c>
const PROBE_BW_MIN_WAIT_TIME_IN_SEC: f64 = 2.0;

/// Width of the randomized part of the ProbeBW time scale (`2..3` sec).
const PROBE_BW_RAND_WAIT_TIME_IN_SEC: f64 = 1.0;

/// The bounds that must both elapse before the next bandwidth probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeWait {
    /// Packet-timed rounds to wait.
    pub rounds: u64,

    /// Wall clock time to wait.
    pub wait: Duration,
}

/// Randomized decision about how long to wait until probing for bandwidth.
///
/// Randomizing desynchronizes the probing of competing flows. The generator
/// is owned by the connection so that a seeded flow is reproducible.
#[derive(Debug)]
pub struct ProbeScheduler {
    rng: StdRng,
}

impl ProbeScheduler {
    /// Create a scheduler. Without a seed the generator is seeded from the
    /// operating system.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self { rng }
    }

    /// Decide the round-trip bound (`0` or `1`) and the wall clock bound
    /// (`[2, 3)` sec) of the next wait.
    pub fn pick_probe_wait(&mut self) -> ProbeWait {
        let rounds = self.rng.gen_range(0..=PROBE_BW_RAND_ROUNDS);
        let wait = Duration::from_secs_f64(
            PROBE_BW_MIN_WAIT_TIME_IN_SEC + PROBE_BW_RAND_WAIT_TIME_IN_SEC * self.rng.gen::<f64>(),
        );

        ProbeWait { rounds, wait }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_wait_bounds() {
        let mut scheduler = ProbeScheduler::new(None);
        let mut rounds_seen = [false; 2];

        for _ in 0..1000 {
            let wait = scheduler.pick_probe_wait();
            assert!(wait.rounds <= 1);
            assert!(wait.wait >= Duration::from_secs(2));
            assert!(wait.wait < Duration::from_secs(3));
            rounds_seen[wait.rounds as usize] = true;
        }

        assert_eq!(rounds_seen, [true, true]);
    }

    #[test]
    fn seeded_scheduler_is_reproducible() {
        let mut a = ProbeScheduler::new(Some(42));
        let mut b = ProbeScheduler::new(Some(42));

        let waits: Vec<ProbeWait> = (0..64).map(|_| a.pick_probe_wait()).collect();
        for wait in &waits {
            assert_eq!(*wait, b.pick_probe_wait());
        }

        // Different seeds desynchronize the flows.
        let mut c = ProbeScheduler::new(Some(43));
        let other: Vec<ProbeWait> = (0..64).map(|_| c.pick_probe_wait()).collect();
        assert_ne!(waits, other);
    }
}
