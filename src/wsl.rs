use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex};

use crate::distro::Launcher;
use crate::process::{ExitStatus, GuestProcess};
use crate::win32;

/// The [`Launcher`] for distros of the Windows Subsystem for Linux, backed by the
/// `WslIsDistributionRegistered` and `WslLaunch` functions of `wslapi.dll`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WslLauncher;

impl Launcher for WslLauncher {
    fn is_registered(&self, distro: &str) -> io::Result<bool> {
        win32::IsDistributionRegistered(OsStr::new(distro))
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
        let handle = win32::Launch(
            OsStr::new(distro),
            OsStr::new(command),
            use_cwd,
            stdin,
            stdout,
            stderr,
        )?;
        Ok(Arc::new(WslProcess {
            handle,
            status: Mutex::new(None),
        }))
    }
}

#[derive(Debug)]
struct WslProcess {
    handle: win32::Handle,
    status: Mutex<Option<ExitStatus>>,
}

impl GuestProcess for WslProcess {
    fn wait(&self) -> io::Result<ExitStatus> {
        if let Some(status) = *self.status.lock().unwrap() {
            return Ok(status);
        }
        win32::WaitForSingleObject(&self.handle)?;
        let exit_code = win32::GetExitCodeProcess(&self.handle)?;
        let status = ExitStatus::from_code(exit_code);
        *self.status.lock().unwrap() = Some(status);
        Ok(status)
    }

    fn kill(&self) -> io::Result<()> {
        let mut status = self.status.lock().unwrap();
        if status.is_some() {
            return Ok(());
        }
        if let Err(err) = win32::TerminateProcess(&self.handle, 1) {
            if err.raw_os_error() != Some(win32::ERROR_ACCESS_DENIED as i32) {
                return Err(err);
            }
            let rc = win32::GetExitCodeProcess(&self.handle)?;
            if rc == win32::STILL_ACTIVE {
                return Err(err);
            }
            *status = Some(ExitStatus::from_code(rc));
        }
        Ok(())
    }
}
