//! Execution of commands inside a guest Linux environment, supervised from the host.
//!
//! A guest environment (a registered distro) is reached through a [`Launcher`], a small
//! trait wrapping the platform primitive that starts a process inside the guest and
//! hands back a process handle. On top of that primitive, [`Cmd`] provides the familiar
//! subprocess workflow: wiring of standard streams, pipes, capture of output,
//! cancellation and interpretation of the exit status.
//!
//! The launch primitive only accepts native pipe handles for the standard streams.
//! Anything else given to [`Cmd`] (an in-memory buffer, a reader, a regular file) is
//! bridged through an OS pipe and a copy thread, which is joined by [`Cmd::wait`].
//!
//! # Examples
//!
//! Run a command and capture its output:
//!
//! ```no_run
//! # use guestexec::*;
//! # fn dummy(distro: Distro) -> Result<(), Error> {
//! let out = distro.command("uname -a").output().check()?;
//! # Ok(())
//! # }
//! ```
//!
//! Feed input and give up after a timeout:
//!
//! ```no_run
//! # use guestexec::*;
//! # use std::time::Duration;
//! # fn dummy(distro: Distro) -> Result<(), Error> {
//! let sorted = distro
//!     .command("sort")
//!     .stdin("b\nc\na\n")
//!     .timeout(Duration::from_secs(5))
//!     .output()
//!     .check()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

mod bounded;
mod cancel;
mod distro;
mod error;
mod exec;
mod process;
mod stream;
mod wiring;

#[cfg(unix)]
mod posix;
#[cfg(unix)]
mod spawn;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
mod wsl;

pub use bounded::BoundedOutput;
pub use cancel::{CancelCause, CancelToken};
pub use distro::{Distro, Launcher, Shell};
pub use error::{Error, ExitError};
pub use exec::{Capture, Cmd, Input, IntoInput, IntoOutput, Output, STDERR_CAPTURE_LIMIT};
pub use process::{ExitStatus, GuestProcess};
pub use stream::{PipeReader, PipeWriter, SharedBuffer, SharedWriter, StandardStream};

#[cfg(unix)]
pub use spawn::LocalLauncher;
#[cfg(windows)]
pub use wsl::WslLauncher;

#[cfg(test)]
mod tests;
