//! Cyclic N-party barrier with party retirement.
//!
//! [`Barrier::wait`] has no timeout. If a party stops calling `wait` without
//! [`retire`](Barrier::retire)-ing, every other party blocks forever at the
//! next cycle; this is unrecoverable and the caller must prevent it. Stage
//! workers hold a [`BarrierParty`] for the length of their loop so that they
//! retire on every exit path, including unwinding.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct BarrierState {
    parties: usize,
    waiting: usize,
    generation: u64,
}

impl BarrierState {
    /// Release the current cycle
    fn complete_cycle(&mut self) {
        self.waiting = 0;
        self.generation += 1;
    }
}

/// Outcome of one [`Barrier::wait`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    is_last_arriver: bool,
    generation: u64,
}

impl BarrierWaitResult {
    /// True for exactly one caller per cycle
    pub fn is_last_arriver(&self) -> bool {
        self.is_last_arriver
    }

    /// Index of the cycle this call took part in, starting at 0
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// N-party cyclic rendezvous point
#[derive(Debug)]
pub struct Barrier {
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl Barrier {
    /// Create a barrier for `parties` threads.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn new(parties: usize) -> Self {
        assert_ne!(parties, 0, "barrier needs at least one party");
        Self {
            state: Mutex::new(BarrierState {
                parties,
                waiting: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Block until every live party has arrived in this generation.
    pub fn wait(&self) -> BarrierWaitResult {
        let mut state = self.state.lock();
        debug_assert!(state.parties > 0, "wait on a fully retired barrier");

        let generation = state.generation;
        state.waiting += 1;

        if state.waiting >= state.parties {
            state.complete_cycle();
            self.released.notify_all();
            return BarrierWaitResult {
                is_last_arriver: true,
                generation,
            };
        }

        while state.generation == generation {
            self.released.wait(&mut state);
        }

        BarrierWaitResult {
            is_last_arriver: false,
            generation,
        }
    }

    /// Permanently remove one party.
    ///
    /// If everyone still live is already waiting, the current cycle completes
    /// and the waiters are released; returns `true` in that case, in which the
    /// retiring caller stands in for the cycle's last arriver.
    pub fn retire(&self) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.parties > 0, "retire on a fully retired barrier");
        state.parties = state.parties.saturating_sub(1);

        if state.waiting > 0 && state.waiting >= state.parties {
            state.complete_cycle();
            self.released.notify_all();
            true
        } else {
            false
        }
    }

    /// Get the number of parties still expected at each cycle
    pub fn parties(&self) -> usize {
        self.state.lock().parties
    }

    /// Get the number of completed cycles
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

/// Membership of one thread in a [`Barrier`].
///
/// Retires the party when dropped, so a thread that unwinds out of its loop
/// still releases the others.
#[derive(Debug)]
pub struct BarrierParty<'a> {
    barrier: &'a Barrier,
    retired: bool,
}

impl<'a> BarrierParty<'a> {
    pub fn new(barrier: &'a Barrier) -> Self {
        Self {
            barrier,
            retired: false,
        }
    }

    pub fn wait(&self) -> BarrierWaitResult {
        self.barrier.wait()
    }

    /// Retire now; see [`Barrier::retire`] for the return value
    pub fn leave(mut self) -> bool {
        self.retired = true;
        self.barrier.retire()
    }
}

impl Drop for BarrierParty<'_> {
    fn drop(&mut self) {
        if !self.retired {
            self.barrier.retire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_party_never_blocks() {
        let barrier = Barrier::new(1);
        for expected in 0..5 {
            let result = barrier.wait();
            assert!(result.is_last_arriver());
            assert_eq!(result.generation(), expected);
        }
        assert_eq!(barrier.generation(), 5);
    }

    #[test]
    fn test_exactly_one_last_arriver_per_cycle() {
        const CYCLES: usize = 10_000;
        const PARTIES: usize = 3;

        let barrier = Arc::new(Barrier::new(PARTIES));
        let handles: Vec<_> = (0..PARTIES)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    (0..CYCLES).map(|_| barrier.wait()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut leaders = vec![0usize; CYCLES];
        for handle in handles {
            let results = handle.join().unwrap();
            for (cycle, result) in results.iter().enumerate() {
                assert_eq!(result.generation(), cycle as u64);
                if result.is_last_arriver() {
                    leaders[cycle] += 1;
                }
            }
        }

        assert!(leaders.iter().all(|&count| count == 1));
        assert_eq!(barrier.generation(), CYCLES as u64);
    }

    #[test]
    fn test_nobody_passes_before_last_arrival() {
        let barrier = Arc::new(Barrier::new(3));
        let passed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let passed = Arc::clone(&passed);
                thread::spawn(move || {
                    barrier.wait();
                    passed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(passed.load(Ordering::SeqCst), 0);

        assert!(barrier.wait().is_last_arriver());
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(passed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retire_releases_waiters() {
        let barrier = Arc::new(Barrier::new(3));
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.wait())
            })
            .collect();

        while barrier.state.lock().waiting < 2 {
            thread::yield_now();
        }
        assert!(barrier.retire());

        for waiter in waiters {
            let result = waiter.join().unwrap();
            assert!(!result.is_last_arriver());
            assert_eq!(result.generation(), 0);
        }
        assert_eq!(barrier.parties(), 2);
        assert_eq!(barrier.generation(), 1);
    }

    #[test]
    fn test_retire_without_waiters() {
        let barrier = Barrier::new(2);
        assert!(!barrier.retire());
        assert_eq!(barrier.parties(), 1);
        assert!(barrier.wait().is_last_arriver());
    }

    #[test]
    fn test_party_retires_on_drop() {
        let barrier = Arc::new(Barrier::new(2));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let party = BarrierParty::new(&barrier);
                party.wait();
                party.wait();
            })
        };

        {
            let party = BarrierParty::new(&barrier);
            party.wait();
        }

        waiter.join().unwrap();
        assert_eq!(barrier.parties(), 0);
        assert_eq!(barrier.generation(), 2);
    }

    #[test]
    fn test_leave_completes_cycle() {
        let barrier = Arc::new(Barrier::new(2));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait())
        };

        while barrier.state.lock().waiting < 1 {
            thread::yield_now();
        }
        let party = BarrierParty::new(&barrier);
        assert!(party.leave());

        assert!(!waiter.join().unwrap().is_last_arriver());
        assert_eq!(barrier.parties(), 1);
        assert_eq!(barrier.generation(), 1);
    }
}
