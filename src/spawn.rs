use std::collections::HashMap;
use std::ffi::{CStr, OsStr};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::distro::Launcher;
use crate::posix;
use crate::process::{ExitStatus, GuestProcess};

/// A [`Launcher`] that runs commands as local processes.
///
/// Each registered distro is a name mapped to a home directory. Commands are run by
/// `sh -c` in that directory (or in the caller's directory with `use_cwd`), with the
/// same environment as the calling process. This makes it possible to use the crate on
/// Unix hosts, and to test code written against [`Distro`](crate::Distro) without a
/// guest platform.
#[derive(Debug, Default)]
pub struct LocalLauncher {
    homes: Mutex<HashMap<String, PathBuf>>,
}

impl LocalLauncher {
    /// Create a launcher with no registered distros.
    pub fn new() -> LocalLauncher {
        LocalLauncher::default()
    }

    /// Register a distro called `name` with the given home directory, replacing an
    /// earlier registration of the same name.
    pub fn register(&self, name: impl Into<String>, home: impl Into<PathBuf>) {
        self.homes.lock().unwrap().insert(name.into(), home.into());
    }

    /// Remove the registration of `name`. Returns false if it wasn't registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.homes.lock().unwrap().remove(name).is_some()
    }

    fn home(&self, name: &str) -> Option<PathBuf> {
        self.homes.lock().unwrap().get(name).cloned()
    }
}

impl Launcher for LocalLauncher {
    fn is_registered(&self, distro: &str) -> io::Result<bool> {
        if distro.contains('\0') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "nul byte found in distro name",
            ));
        }
        Ok(self.homes.lock().unwrap().contains_key(distro))
    }

    fn launch(
        &self,
        distro: &str,
        command: &str,
        stdin: &File,
        stdout: &File,
        stderr: &File,
        use_cwd: bool,
    ) -> io::Result<Arc<dyn GuestProcess>> {
        let home = self.home(distro).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("distro {distro:?} is not registered"),
            )
        })?;
        let cwd = if use_cwd { None } else { Some(home.as_path()) };
        let pid = spawn_shell(command, [stdin, stdout, stderr], cwd)?;
        Ok(Arc::new(LocalProcess::new(pid)))
    }
}

/// Read exactly N bytes, or return None on immediate EOF. Similar to read_exact(), but
/// distinguishes between no read and partial read (which is treated as error).
fn read_exact_or_eof<const N: usize>(source: &mut File) -> io::Result<Option<[u8; N]>> {
    let mut buf = [0u8; N];
    let mut total_read = 0;
    while total_read < N {
        let n = source.read(&mut buf[total_read..])?;
        if n == 0 {
            break;
        }
        total_read += n;
    }
    match total_read {
        0 => Ok(None),
        n if n == N => Ok(Some(buf)),
        _ => Err(io::ErrorKind::UnexpectedEof.into()),
    }
}

fn spawn_shell(command: &str, ends: [&File; 3], cwd: Option<&Path>) -> io::Result<u32> {
    let argv: Vec<&OsStr> = if command.is_empty() {
        vec![OsStr::new("sh")]
    } else {
        vec![OsStr::new("sh"), OsStr::new("-c"), OsStr::new(command)]
    };
    let exec = posix::ExecArgs::new(OsStr::new("sh"), &argv)?;
    let cwd = cwd
        .map(|dir| posix::os_to_cstring(dir.as_os_str()))
        .transpose()?;
    let fds = ends.map(|f| f.as_raw_fd());
    let mut exec_fail_pipe = posix::pipe()?;

    let pid;
    unsafe {
        match posix::fork()? {
            Some(child_pid) => pid = child_pid,
            None => {
                drop(exec_fail_pipe.0);
                let error = do_exec(&exec, fds, cwd.as_deref());
                let error_code = error.raw_os_error().unwrap_or(-1) as u32;
                exec_fail_pipe.1.write_all(&error_code.to_le_bytes()).ok();
                posix::_exit(127);
            }
        }
    }

    drop(exec_fail_pipe.1);
    match read_exact_or_eof::<4>(&mut exec_fail_pipe.0)? {
        None => Ok(pid),
        Some(error_buf) => {
            // Reap the child, which has already exited.
            let _ = posix::waitpid(pid, 0);
            let error_code = u32::from_le_bytes(error_buf);
            Err(io::Error::from_raw_os_error(error_code as i32))
        }
    }
}

fn do_exec(exec: &posix::ExecArgs, fds: [RawFd; 3], cwd: Option<&CStr>) -> io::Error {
    match setup_child(fds, cwd) {
        Ok(()) => exec.exec(),
        Err(e) => e,
    }
}

fn setup_child(fds: [RawFd; 3], cwd: Option<&CStr>) -> io::Result<()> {
    if let Some(dir) = cwd {
        posix::chdir(dir)?;
    }
    for (target, fd) in (0..).zip(fds) {
        if fd == target {
            // dup2 is a no-op here and would leave close-on-exec set.
            posix::set_cloexec(fd, false)?;
        } else {
            posix::dup2(fd, target)?;
        }
    }
    posix::reset_sigpipe()
}

/// A local child process.
#[derive(Debug)]
pub(crate) struct LocalProcess {
    pid: u32,
    status: Mutex<Option<ExitStatus>>,
}

impl LocalProcess {
    fn new(pid: u32) -> LocalProcess {
        LocalProcess {
            pid,
            status: Mutex::new(None),
        }
    }
}

impl GuestProcess for LocalProcess {
    fn wait(&self) -> io::Result<ExitStatus> {
        if let Some(status) = *self.status.lock().unwrap() {
            return Ok(status);
        }
        // Wait without reaping and without holding the lock, so that kill() can proceed
        // meanwhile and can never signal a recycled pid.
        loop {
            match posix::wait_exited_nowait(self.pid) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(posix::ECHILD) => break,
                Err(e) => return Err(e),
            }
        }
        let mut status = self.status.lock().unwrap();
        if let Some(status) = *status {
            return Ok(status);
        }
        let exit_status = loop {
            match posix::waitpid(self.pid, 0) {
                Ok((_, exit_status)) => break exit_status,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(posix::ECHILD) => {
                    break ExitStatus::undetermined();
                }
                Err(e) => return Err(e),
            }
        };
        *status = Some(exit_status);
        Ok(exit_status)
    }

    fn kill(&self) -> io::Result<()> {
        let status = self.status.lock().unwrap();
        if status.is_some() {
            return Ok(());
        }
        posix::kill(self.pid, posix::SIGKILL)
    }
}
