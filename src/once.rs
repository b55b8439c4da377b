use parking_lot::{Condvar, Mutex};

/// Lifecycle of a [`OnceGuard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceState {
    NotStarted,
    Running,
    Done,
}

/// Runs an initializer exactly once under concurrent first-call races.
///
/// Every caller returns only after the single execution has finished,
/// whether it arrived before, during or after it. There is no reset.
#[derive(Debug)]
pub struct OnceGuard {
    state: Mutex<OnceState>,
    done: Condvar,
}

impl OnceGuard {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OnceState::NotStarted),
            done: Condvar::new(),
        }
    }

    /// Run `init` if no caller has yet; otherwise wait for that caller to
    /// finish. Returns `true` for the one call that executed `init`.
    ///
    /// A panicking initializer still moves the guard to `Done`, so waiters are
    /// released and never run the body themselves.
    pub fn run<F: FnOnce()>(&self, init: F) -> bool {
        let mut state = self.state.lock();
        match *state {
            OnceState::Done => return false,
            OnceState::Running => {
                while *state != OnceState::Done {
                    self.done.wait(&mut state);
                }
                return false;
            }
            OnceState::NotStarted => *state = OnceState::Running,
        }
        drop(state);

        let _completion = Completion { guard: self };
        init();
        true
    }

    pub fn state(&self) -> OnceState {
        *self.state.lock()
    }

    pub fn is_done(&self) -> bool {
        self.state() == OnceState::Done
    }
}

impl Default for OnceGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the guard done and wakes waiters, also when `init` unwinds
struct Completion<'a> {
    guard: &'a OnceGuard,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        *self.guard.state.lock() = OnceState::Done;
        self.guard.done.notify_all();
    }
}
