use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::process::GuestProcess;

/// Why a command was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CancelCause {
    /// [`CancelToken::cancel`] was called.
    #[error("operation cancelled")]
    Cancelled,
    /// The deadline of the token passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// A token used to cancel commands, optionally with a deadline.
///
/// Tokens are cheap to clone; clones share the same state, so cancelling one cancels
/// all of them. Once cancelled, a token stays cancelled.
///
/// A command associated with a token (see [`Cmd::cancel_on`]) is not launched if the
/// token is already cancelled when the command is started, and is killed if the token is
/// cancelled (or its deadline passes) while the command is running.
///
/// [`Cmd::cancel_on`]: crate::Cmd::cancel_on
#[derive(Clone)]
pub struct CancelToken(Arc<TokenInner>);

struct TokenInner {
    deadline: Option<Instant>,
    state: Mutex<TokenState>,
}

#[derive(Default)]
struct TokenState {
    cause: Option<CancelCause>,
    races: Vec<Weak<Race>>,
}

impl CancelToken {
    /// Create a token without a deadline.
    pub fn new() -> CancelToken {
        CancelToken::from_deadline(None)
    }

    /// Create a token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> CancelToken {
        CancelToken::from_deadline(Some(Instant::now() + timeout))
    }

    /// Create a token that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> CancelToken {
        CancelToken::from_deadline(Some(deadline))
    }

    fn from_deadline(deadline: Option<Instant>) -> CancelToken {
        CancelToken(Arc::new(TokenInner {
            deadline,
            state: Mutex::new(TokenState::default()),
        }))
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }

    /// Cancel the token.
    ///
    /// Commands watching the token are killed. Cancelling an already cancelled or
    /// expired token does nothing.
    pub fn cancel(&self) {
        let mut state = self.0.state.lock().unwrap();
        if state.cause.is_some() {
            return;
        }
        let cause = self.expired().unwrap_or(CancelCause::Cancelled);
        state.cause = Some(cause);
        for race in state.races.drain(..).filter_map(|weak| weak.upgrade()) {
            race.settle(Finish::Cancelled(cause));
        }
    }

    /// True if the token was cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Returns the reason the token is cancelled, or `None` if it is still live.
    pub fn cause(&self) -> Option<CancelCause> {
        let state = self.0.state.lock().unwrap();
        state.cause.or_else(|| self.expired())
    }

    fn expired(&self) -> Option<CancelCause> {
        match self.0.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// Create a race between this token and the natural end of a process.
    ///
    /// If the token is already cancelled, the race is settled in its favor right away.
    pub(crate) fn race(&self) -> Arc<Race> {
        let race = Arc::new(Race::new(self.0.deadline));
        let mut state = self.0.state.lock().unwrap();
        match state.cause.or_else(|| self.expired()) {
            Some(cause) => {
                race.settle(Finish::Cancelled(cause));
            }
            None => {
                state.races.retain(|weak| weak.strong_count() > 0);
                state.races.push(Arc::downgrade(&race));
            }
        }
        race
    }
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("deadline", &self.0.deadline)
            .field("cause", &self.cause())
            .finish()
    }
}

/// How a race between cancellation and process exit was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    Exited,
    Cancelled(CancelCause),
}

/// A single-shot slot decided by whichever of cancellation and exit comes first.
///
/// After the first [`settle`](Self::settle), later ones are no-ops and report the
/// original outcome.
#[derive(Debug)]
pub(crate) struct Race {
    deadline: Option<Instant>,
    slot: Mutex<Option<Finish>>,
    settled: Condvar,
}

impl Race {
    fn new(deadline: Option<Instant>) -> Race {
        Race {
            deadline,
            slot: Mutex::new(None),
            settled: Condvar::new(),
        }
    }

    /// Settle the race unless already settled, and return the winning outcome.
    pub(crate) fn settle(&self, finish: Finish) -> Finish {
        let mut slot = self.slot.lock().unwrap();
        match *slot {
            Some(winner) => winner,
            None => {
                *slot = Some(finish);
                self.settled.notify_all();
                finish
            }
        }
    }

    /// Block until the race is settled, settling it as expired if the deadline passes
    /// first.
    pub(crate) fn wait(&self) -> Finish {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(finish) = *slot {
                return finish;
            }
            match self.deadline {
                None => slot = self.settled.wait(slot).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let finish = Finish::Cancelled(CancelCause::DeadlineExceeded);
                        *slot = Some(finish);
                        self.settled.notify_all();
                        return finish;
                    }
                    slot = self.settled.wait_timeout(slot, deadline - now).unwrap().0;
                }
            }
        }
    }
}

/// Thread that kills a running process when its cancellation race is lost.
#[derive(Debug)]
pub(crate) struct Watcher {
    race: Arc<Race>,
    handle: JoinHandle<()>,
}

impl Watcher {
    pub(crate) fn spawn(token: &CancelToken, process: Arc<dyn GuestProcess>) -> Watcher {
        let race = token.race();
        let handle = {
            let race = Arc::clone(&race);
            thread::spawn(move || {
                if let Finish::Cancelled(cause) = race.wait() {
                    tracing::debug!(%cause, "cancellation requested, killing process");
                    if let Err(e) = process.kill() {
                        tracing::warn!(error = %e, "failed to kill cancelled process");
                    }
                }
            })
        };
        Watcher { race, handle }
    }

    /// Report natural completion, wait for the watcher to exit, and return the
    /// cancellation cause if cancellation won the race.
    pub(crate) fn finish(self) -> Option<CancelCause> {
        let finish = self.race.settle(Finish::Exited);
        if self.handle.join().is_err() {
            tracing::warn!("cancellation watcher panicked");
        }
        match finish {
            Finish::Cancelled(cause) => Some(cause),
            Finish::Exited => None,
        }
    }
}
