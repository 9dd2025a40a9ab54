//! Reusable cycle barrier that can be abandoned.
//!
//! `std::sync::Barrier` blocks forever once a participant stops arriving,
//! which is exactly the hang a staggered abort produces. [`CycleBarrier`]
//! lets the departing participant call [`abandon`](CycleBarrier::abandon) so
//! every current and future waiter gets `BarrierAbandoned` instead.

use parking_lot::{Condvar, Mutex};
use spikefuse_error::{FuseError, Result};
use spikefuse_types::Cycle;

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    abandoned: bool,
}

/// Generation-counting barrier for a fixed number of parties.
#[derive(Debug)]
pub struct CycleBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl CycleBarrier {
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                abandoned: false,
            }),
            released: Condvar::new(),
        }
    }

    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Block until every party has arrived for this generation.
    ///
    /// A generation that completed before the barrier was abandoned still
    /// releases its waiters normally.
    pub fn wait(&self, cycle: Cycle) -> Result<()> {
        let mut state = self.state.lock();
        if state.abandoned {
            return Err(FuseError::BarrierAbandoned { cycle: cycle.get() });
        }

        state.arrived += 1;
        if state.arrived >= self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(());
        }

        let generation = state.generation;
        while state.generation == generation && !state.abandoned {
            self.released.wait(&mut state);
        }
        if state.generation == generation {
            tracing::debug!(
                target: "spikefuse.harness",
                cycle = cycle.get(),
                "released by abandoned barrier"
            );
            return Err(FuseError::BarrierAbandoned { cycle: cycle.get() });
        }
        Ok(())
    }

    /// Stop participating. Wakes every waiter with `BarrierAbandoned`.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        state.abandoned = true;
        self.released.notify_all();
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.state.lock().abandoned
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn releases_every_generation() {
        let barrier = Arc::new(CycleBarrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let b = Arc::clone(&barrier);
                thread::spawn(move || {
                    for raw in 0..50 {
                        b.wait(Cycle::new(raw)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(!barrier.is_abandoned());
    }

    #[test]
    fn abandon_wakes_waiters() {
        let barrier = Arc::new(CycleBarrier::new(2));
        let waiter = {
            let b = Arc::clone(&barrier);
            thread::spawn(move || b.wait(Cycle::new(7)))
        };
        thread::sleep(Duration::from_millis(20));
        barrier.abandon();
        assert_eq!(
            waiter.join().unwrap(),
            Err(FuseError::BarrierAbandoned { cycle: 7 })
        );
        assert_eq!(
            barrier.wait(Cycle::new(8)),
            Err(FuseError::BarrierAbandoned { cycle: 8 })
        );
    }

    #[test]
    fn single_party_never_blocks() {
        let barrier = CycleBarrier::new(1);
        for raw in 0..3 {
            assert!(barrier.wait(Cycle::new(raw)).is_ok());
        }
    }
}
