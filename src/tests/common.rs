use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::{Distro, ExitStatus, GuestProcess, Launcher};

/// Exit code reported by a `FakeProcess` that was killed.
pub const KILLED_CODE: u32 = 137;

/// In-process launcher whose behavior is set up by the test.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    pub registered: AtomicBool,
    pub registration_fails: bool,
    pub launch_fails: bool,
    /// Process runs until killed.
    pub blocks: bool,
    pub exit_code: u32,
    /// Written to the stdout handle at launch.
    pub stdout_data: Vec<u8>,
    /// Written to the stderr handle at launch.
    pub stderr_data: Vec<u8>,
    pub launches: AtomicUsize,
    pub aliased: AtomicBool,
    pub processes: Mutex<Vec<Arc<FakeProcess>>>,
}

impl FakeLauncher {
    pub fn registered() -> FakeLauncher {
        FakeLauncher {
            registered: AtomicBool::new(true),
            ..FakeLauncher::default()
        }
    }

    pub fn distro(self) -> (Distro, Arc<FakeLauncher>) {
        let launcher = Arc::new(self);
        (Distro::new("fake", launcher.clone()), launcher)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// True if the last launch got the same handle for stdout and stderr.
    pub fn aliased(&self) -> bool {
        self.aliased.load(Ordering::SeqCst)
    }

    pub fn killed(&self) -> bool {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.killed.load(Ordering::SeqCst))
    }
}

impl Launcher for FakeLauncher {
    fn is_registered(&self, _distro: &str) -> io::Result<bool> {
        if self.registration_fails {
            return Err(io::Error::other("registry unavailable"));
        }
        Ok(self.registered.load(Ordering::SeqCst))
    }

    fn launch(
        &self,
        _distro: &str,
        _command: &str,
        _stdin: &File,
        mut stdout: &File,
        mut stderr: &File,
        _use_cwd: bool,
    ) -> io::Result<Arc<dyn GuestProcess>> {
        if self.launch_fails {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such distro"));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.aliased.store(std::ptr::eq(stdout, stderr), Ordering::SeqCst);
        stdout.write_all(&self.stdout_data)?;
        stderr.write_all(&self.stderr_data)?;
        let process = Arc::new(FakeProcess::new(self.exit_code, self.blocks));
        self.processes.lock().unwrap().push(Arc::clone(&process));
        Ok(process)
    }
}

#[derive(Debug)]
pub struct FakeProcess {
    status: Mutex<Option<ExitStatus>>,
    exited: Condvar,
    killed: AtomicBool,
}

impl FakeProcess {
    fn new(exit_code: u32, blocks: bool) -> FakeProcess {
        FakeProcess {
            status: Mutex::new((!blocks).then(|| ExitStatus::from_code(exit_code))),
            exited: Condvar::new(),
            killed: AtomicBool::new(false),
        }
    }
}

impl GuestProcess for FakeProcess {
    fn wait(&self) -> io::Result<ExitStatus> {
        let mut status = self.status.lock().unwrap();
        loop {
            if let Some(status) = *status {
                return Ok(status);
            }
            status = self.exited.wait(status).unwrap();
        }
    }

    fn kill(&self) -> io::Result<()> {
        let mut status = self.status.lock().unwrap();
        if status.is_none() {
            self.killed.store(true, Ordering::SeqCst);
            *status = Some(ExitStatus::from_code(KILLED_CODE));
            self.exited.notify_all();
        }
        Ok(())
    }
}

/// Writer that rejects everything.
#[derive(Debug)]
pub struct BrokenWriter;

impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
pub use local::*;

#[cfg(unix)]
mod local {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::{Distro, LocalLauncher};

    /// A local distro whose home is a fresh temporary directory.
    pub fn local_distro() -> (Distro, TempDir) {
        let home = TempDir::new().unwrap();
        let launcher = LocalLauncher::new();
        launcher.register("local", home.path());
        (Distro::new("local", Arc::new(launcher)), home)
    }
}
