use std::fmt;
use std::fs::File;
use std::io;
use std::sync::Arc;

use crate::error::Error;
use crate::exec::{Cmd, Input, Output};
use crate::process::GuestProcess;

/// Platform primitive that starts processes inside registered guest distros.
///
/// The standard stream handles passed to [`launch`](Self::launch) are native handles
/// (files, pipes, or the null device). The launcher doesn't take ownership of them: the
/// process gets its own copies, and the caller closes its handles once `launch`
/// returns.
pub trait Launcher: Send + Sync {
    /// True if a distro called `distro` is registered.
    fn is_registered(&self, distro: &str) -> io::Result<bool>;

    /// Start `command` in `distro` with the given standard streams.
    ///
    /// The command is run by the distro's default shell, in the home directory of the
    /// default user, or in the caller's current directory if `use_cwd` is set. An empty
    /// command starts the shell itself.
    fn launch(
        &self,
        distro: &str,
        command: &str,
        stdin: &File,
        stdout: &File,
        stderr: &File,
        use_cwd: bool,
    ) -> io::Result<Arc<dyn GuestProcess>>;
}

/// A guest distro, identified by name and reached through a [`Launcher`].
///
/// Cloning a `Distro` is cheap.
#[derive(Clone)]
pub struct Distro {
    name: String,
    launcher: Arc<dyn Launcher>,
}

impl Distro {
    /// Refer to the distro called `name` on `launcher`. The distro doesn't need to be
    /// registered yet; registration is checked when a command is started.
    pub fn new(name: impl Into<String>, launcher: Arc<dyn Launcher>) -> Distro {
        Distro {
            name: name.into(),
            launcher,
        }
    }

    /// Refer to the WSL distro called `name`.
    #[cfg(windows)]
    pub fn wsl(name: impl Into<String>) -> Distro {
        Distro::new(name, Arc::new(crate::wsl::WslLauncher))
    }

    /// The name of the distro.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn launcher(&self) -> &dyn Launcher {
        &*self.launcher
    }

    /// Ask the launcher whether the distro is registered.
    pub fn is_registered(&self) -> io::Result<bool> {
        self.launcher.is_registered(&self.name)
    }

    /// Prepare `command` to run in this distro.
    pub fn command(&self, command: impl Into<String>) -> Cmd {
        Cmd::new(self.clone(), command)
    }

    /// Prepare an interactive session connected to the caller's terminal.
    pub fn shell(&self) -> Shell<'_> {
        Shell {
            distro: self,
            command: String::new(),
            use_cwd: false,
        }
    }
}

impl fmt::Debug for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distro").field("name", &self.name).finish()
    }
}

/// Builder for an interactive session in a distro.
///
/// The session inherits the caller's standard input, output and error. By default it
/// runs the distro's shell in the home directory of the default user.
#[derive(Debug)]
#[must_use]
pub struct Shell<'a> {
    distro: &'a Distro,
    command: String,
    use_cwd: bool,
}

impl Shell<'_> {
    /// Run `command` instead of the default shell.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Start in the caller's current directory.
    pub fn use_cwd(mut self) -> Self {
        self.use_cwd = true;
        self
    }

    /// Run the session to completion.
    ///
    /// A session that exits unsuccessfully yields [`Error::Exit`], whose
    /// [`code`](crate::ExitError::code) is the exit code of the session.
    pub fn run(self) -> Result<(), Error> {
        let mut cmd = self
            .distro
            .command(self.command)
            .stdin(Input::Inherit)
            .stdout(Output::Inherit)
            .stderr(Output::Inherit);
        cmd.use_cwd = self.use_cwd;
        cmd.run()
    }
}
