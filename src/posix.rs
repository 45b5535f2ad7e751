use std::ffi::{CStr, CString, OsStr};
use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::ptr;

use crate::process::ExitStatus;

pub use libc::{ECHILD, SIGKILL};

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

/// Create a pipe whose both ends are close-on-exec.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Create a pipe whose both ends are close-on-exec.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    let ends = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    set_cloexec(ends.0.as_raw_fd(), true)?;
    set_cloexec(ends.1.as_raw_fd(), true)?;
    Ok(ends)
}

pub fn set_cloexec(fd: RawFd, cloexec: bool) -> Result<()> {
    let old = check_err(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    let new = if cloexec {
        old | libc::FD_CLOEXEC
    } else {
        old & !libc::FD_CLOEXEC
    };
    if new != old {
        check_err(unsafe { libc::fcntl(fd, libc::F_SETFD, new) })?;
    }
    Ok(())
}

pub fn is_fifo(f: &File) -> Result<bool> {
    Ok(f.metadata()?.file_type().is_fifo())
}

/// Fork the current process. Returns the child's PID in the parent and `None` in the
/// child.
///
/// # Safety
///
/// In the child of a multi-threaded process, only async-signal-safe functions may be
/// called before `exec` or `_exit`.
pub unsafe fn fork() -> Result<Option<u32>> {
    let pid = check_err(unsafe { libc::fork() })?;
    Ok(if pid == 0 { None } else { Some(pid as u32) })
}

pub fn os_to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes())
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "nul byte found in provided data"))
}

/// Program and arguments converted to C strings ahead of `fork`, so that the child
/// doesn't need to allocate before calling `exec`.
#[derive(Debug)]
pub struct ExecArgs {
    cmd: CString,
    // Pointed to by elements of `ptrs`.
    #[allow(dead_code)]
    strings: Vec<CString>,
    // nullptr-terminated vector of pointers into `strings`
    ptrs: Vec<*const libc::c_char>,
}

impl ExecArgs {
    pub fn new(cmd: &OsStr, argv: &[&OsStr]) -> Result<ExecArgs> {
        let strings = argv
            .iter()
            .map(|arg| os_to_cstring(arg))
            .collect::<Result<Vec<_>>>()?;
        let ptrs = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        Ok(ExecArgs {
            cmd: os_to_cstring(cmd)?,
            strings,
            ptrs,
        })
    }

    /// Replace the current process image, searching `PATH` for the program. Returns
    /// only on failure.
    pub fn exec(&self) -> Error {
        unsafe {
            libc::execvp(self.cmd.as_ptr(), self.ptrs.as_ptr());
        }
        Error::last_os_error()
    }
}

pub fn chdir(dir: &CStr) -> Result<()> {
    check_err(unsafe { libc::chdir(dir.as_ptr()) })?;
    Ok(())
}

pub fn dup2(oldfd: RawFd, newfd: RawFd) -> Result<()> {
    check_err(unsafe { libc::dup2(oldfd, newfd) })?;
    Ok(())
}

pub fn reset_sigpipe() -> Result<()> {
    // This is called after forking to reset SIGPIPE handling to the defaults that Unix
    // programs expect. libstd ignores SIGPIPE, and ignored signals are inherited across
    // exec.
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        check_err(libc::sigemptyset(set.as_mut_ptr()))?;
        let set = set.assume_init();
        let rc = libc::pthread_sigmask(libc::SIG_SETMASK, &set, ptr::null_mut());
        if rc != 0 {
            return Err(Error::from_raw_os_error(rc));
        }
        if libc::signal(libc::SIGPIPE, libc::SIG_DFL) == libc::SIG_ERR {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

pub fn _exit(status: u8) -> ! {
    unsafe { libc::_exit(status as libc::c_int) }
}

pub fn waitpid(pid: u32, flags: i32) -> Result<(u32, ExitStatus)> {
    let mut status = 0 as libc::c_int;
    let pid = check_err(unsafe { libc::waitpid(pid as libc::pid_t, &mut status, flags) })?;
    Ok((pid as u32, decode_exit_status(status)))
}

/// Block until the child has exited, leaving it waitable.
pub fn wait_exited_nowait(pid: u32) -> Result<()> {
    let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
    check_err(unsafe {
        libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            info.as_mut_ptr(),
            libc::WEXITED | libc::WNOWAIT,
        )
    })?;
    Ok(())
}

fn decode_exit_status(status: i32) -> ExitStatus {
    if libc::WIFEXITED(status) {
        ExitStatus::from_code(libc::WEXITSTATUS(status) as u32)
    } else if libc::WIFSIGNALED(status) {
        ExitStatus::from_signal(libc::WTERMSIG(status))
    } else {
        ExitStatus::undetermined()
    }
}

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}
