// Copyright 2025 The Gitsieve Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use rayon::prelude::*;

/// Distributes per-entry evaluation work inside one commit.
///
/// In parallel mode items run on the rayon worker pool; in serial mode they
/// run inline on the caller. Either way the call returns only after every
/// item finished, which is the synchronization barrier the tree filter
/// phases rely on.
#[derive(Clone, Copy, Debug)]
pub struct Scheduler {
    serial: bool,
}

impl Scheduler {
    pub fn new(serial: bool) -> Self {
        Scheduler { serial }
    }

    pub fn is_serial(&self) -> bool {
        self.serial
    }

    /// Runs `op` over all items, returning the first error observed.
    pub fn try_for_each<T, E, F>(&self, items: Vec<T>, op: F) -> Result<(), E>
    where
        T: Send,
        E: Send,
        F: Fn(T) -> Result<(), E> + Send + Sync,
    {
        if self.serial {
            items.into_iter().try_for_each(op)
        } else {
            items.into_par_iter().try_for_each(op)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_all_items_run() {
        for serial in [true, false] {
            let scheduler = Scheduler::new(serial);
            let sum = AtomicUsize::new(0);
            scheduler
                .try_for_each((1..=100).collect(), |i: usize| {
                    sum.fetch_add(i, Ordering::SeqCst);
                    Ok::<(), ()>(())
                })
                .unwrap();
            assert_eq!(sum.load(Ordering::SeqCst), 5050);
        }
    }

    #[test]
    fn test_error_propagates() {
        for serial in [true, false] {
            let scheduler = Scheduler::new(serial);
            let result = scheduler.try_for_each((0..100).collect(), |i: usize| {
                if i == 17 {
                    Err("boom")
                } else {
                    Ok(())
                }
            });
            assert_eq!(result, Err("boom"));
        }
    }
}
