use std::fmt;
use std::io;

/// Exit status of a process launched in a guest.
///
/// Launchers that go through the guest platform only ever see an exit code. The local
/// Unix launcher can additionally observe death by signal.
#[derive(Eq, PartialEq, Hash, Copy, Clone)]
pub struct ExitStatus(RawExitStatus);

#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
enum RawExitStatus {
    Exited(u32),
    Signaled(i32),
    Undetermined,
}

impl ExitStatus {
    /// Create an `ExitStatus` for a process that exited with `code`.
    pub fn from_code(code: u32) -> ExitStatus {
        ExitStatus(RawExitStatus::Exited(code))
    }

    /// Create an `ExitStatus` for a process that was killed by signal `signum`.
    pub fn from_signal(signum: i32) -> ExitStatus {
        ExitStatus(RawExitStatus::Signaled(signum))
    }

    /// Create an `ExitStatus` for a process known to have finished, but whose exit
    /// status is unavailable.
    pub fn undetermined() -> ExitStatus {
        ExitStatus(RawExitStatus::Undetermined)
    }

    /// True if the exit code of the process is 0.
    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }

    /// Returns the exit code if the process exited on its own.
    pub fn code(&self) -> Option<u32> {
        match self.0 {
            RawExitStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Returns the signal number if the process was killed by a signal.
    pub fn signal(&self) -> Option<i32> {
        match self.0 {
            RawExitStatus::Signaled(signum) => Some(signum),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            RawExitStatus::Exited(code) => write!(f, "exit code {}", code),
            RawExitStatus::Signaled(signum) => write!(f, "signal {}", signum),
            RawExitStatus::Undetermined => write!(f, "undetermined exit status"),
        }
    }
}

impl fmt::Debug for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            RawExitStatus::Exited(code) => write!(f, "ExitStatus(Exited({}))", code),
            RawExitStatus::Signaled(signum) => write!(f, "ExitStatus(Signal({}))", signum),
            RawExitStatus::Undetermined => write!(f, "ExitStatus(Undetermined)"),
        }
    }
}

/// Handle to a process started by a [`Launcher`].
///
/// Both methods take `&self`: [`Cmd`] waits for the process on one thread while the
/// cancellation watcher may kill it from another, so implementations must allow `kill`
/// to run while `wait` is blocked.
///
/// [`Launcher`]: crate::Launcher
/// [`Cmd`]: crate::Cmd
pub trait GuestProcess: Send + Sync {
    /// Block until the process has finished and return its exit status.
    ///
    /// Calling `wait` on a finished process returns the cached status.
    fn wait(&self) -> io::Result<ExitStatus>;

    /// Forcibly terminate the process.
    ///
    /// Killing a process that has already finished does nothing.
    fn kill(&self) -> io::Result<()>;
}
