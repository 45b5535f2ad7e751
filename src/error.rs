use std::io;

use crate::cancel::CancelCause;
use crate::process::ExitStatus;
use crate::stream::StandardStream;

/// Errors returned by [`Cmd`](crate::Cmd) and [`Distro`](crate::Distro).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The target distro is not registered.
    #[error("distro {0:?} is not registered")]
    NotRegistered(String),

    /// Checking whether the target distro is registered failed.
    #[error("failed to check whether distro {distro:?} is registered")]
    Registration {
        /// Name of the distro.
        distro: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// `start` was called on a command that was already started.
    #[error("command already started")]
    AlreadyStarted,

    /// `wait` was called on a command that was never started.
    #[error("command not started")]
    NotStarted,

    /// `wait` was called twice.
    #[error("wait was already called")]
    AlreadyWaited,

    /// A stream was already set when a pipe or capture was requested for it.
    #[error("{0} already set")]
    StreamAlreadySet(StandardStream),

    /// A pipe was requested after the command was started.
    #[error("{0} pipe requested after the command was started")]
    PipeAfterStart(StandardStream),

    /// Setting up a standard stream (opening the null device, creating a pipe) failed.
    #[error("failed to set up {stream}")]
    Stream {
        /// The stream being set up.
        stream: StandardStream,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The launch primitive failed.
    #[error("failed to launch command in distro {distro:?}")]
    Launch {
        /// Name of the distro.
        distro: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Obtaining the exit status of the process failed.
    #[error("failed to wait for command")]
    Wait(#[source] io::Error),

    /// The process exited unsuccessfully.
    #[error(transparent)]
    Exit(#[from] ExitError),

    /// The command was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error(transparent)]
    Cancelled(#[from] CancelCause),

    /// Copying data between a caller stream and the process failed.
    #[error("failed to copy {stream}")]
    Copy {
        /// The stream being copied.
        stream: StandardStream,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True for errors caused by misuse of the API, such as starting a command twice.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::AlreadyStarted
                | Error::NotStarted
                | Error::AlreadyWaited
                | Error::StreamAlreadySet(_)
                | Error::PipeAfterStart(_)
        )
    }

    /// Returns the exit status for [`Error::Exit`].
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Error::Exit(e) => Some(e.status()),
            _ => None,
        }
    }
}

/// A process exited with a non-success status.
#[derive(Debug, thiserror::Error)]
#[error("process exited unsuccessfully: {status}")]
pub struct ExitError {
    status: ExitStatus,
    pub(crate) output: Vec<u8>,
}

impl ExitError {
    pub(crate) fn new(status: ExitStatus) -> ExitError {
        ExitError {
            status,
            output: Vec::new(),
        }
    }

    /// The exit status of the process.
    pub fn status(&self) -> ExitStatus {
        self.status
    }

    /// The exit code of the process, if it exited on its own.
    pub fn code(&self) -> Option<u32> {
        self.status.code()
    }

    /// Diagnostic output captured from the process.
    ///
    /// For [`Cmd::output`](crate::Cmd::output) this holds the head and tail of standard
    /// error (unless the caller redirected it), for
    /// [`Cmd::combined_output`](crate::Cmd::combined_output) the combined output.
    /// Otherwise it is empty.
    pub fn output(&self) -> &[u8] {
        &self.output
    }
}
