#![allow(non_snake_case)]

use std::ffi::OsStr;
use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, RawHandle};
use std::{iter, mem, ptr};

use winapi::shared::minwindef::{BOOL, DWORD, FALSE, TRUE};
use winapi::shared::ntdef::HRESULT;
use winapi::shared::winerror::SUCCEEDED;
use winapi::um::fileapi;
use winapi::um::handleapi;
use winapi::um::minwinbase::{LPSECURITY_ATTRIBUTES, SECURITY_ATTRIBUTES};
use winapi::um::namedpipeapi;
use winapi::um::processthreadsapi;
use winapi::um::synchapi;
use winapi::um::winbase::{FILE_TYPE_PIPE, INFINITE, WAIT_OBJECT_0};
use winapi::um::winnt::{HANDLE, PCWSTR, PHANDLE};

pub use winapi::shared::winerror::ERROR_ACCESS_DENIED;
pub const STILL_ACTIVE: u32 = 259;

#[link(name = "wslapi")]
unsafe extern "system" {
    fn WslIsDistributionRegistered(distributionName: PCWSTR) -> BOOL;
    fn WslLaunch(
        distributionName: PCWSTR,
        command: PCWSTR,
        useCurrentWorkingDirectory: BOOL,
        stdIn: HANDLE,
        stdOut: HANDLE,
        stdErr: HANDLE,
        process: PHANDLE,
    ) -> HRESULT;
}

#[derive(Debug)]
pub struct Handle(RawHandle);

// Process handles may be used from any thread.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe {
            handleapi::CloseHandle(self.as_raw_handle() as HANDLE);
        }
    }
}

impl AsRawHandle for Handle {
    fn as_raw_handle(&self) -> RawHandle {
        self.0
    }
}

impl FromRawHandle for Handle {
    unsafe fn from_raw_handle(handle: RawHandle) -> Handle {
        Handle(handle)
    }
}

fn check(status: BOOL) -> Result<()> {
    if status != 0 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

// OsStr to zero-terminated owned vector
fn to_nullterm(s: &OsStr) -> Result<Vec<u16>> {
    let wide: Vec<u16> = s.encode_wide().chain(iter::once(0u16)).collect();
    if wide[..wide.len() - 1].contains(&0) {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "nul byte found in provided data",
        ));
    }
    Ok(wide)
}

fn raw(file: &File) -> HANDLE {
    file.as_raw_handle() as HANDLE
}

/// Create an anonymous pipe whose handles can be inherited by processes.
pub fn make_pipe() -> Result<(File, File)> {
    let mut attributes = SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as DWORD,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: TRUE,
    };
    let (mut r, mut w): (HANDLE, HANDLE) = (ptr::null_mut(), ptr::null_mut());
    check(unsafe {
        namedpipeapi::CreatePipe(
            &mut r as PHANDLE,
            &mut w as PHANDLE,
            &mut attributes as LPSECURITY_ATTRIBUTES,
            0,
        )
    })?;
    Ok(unsafe {
        (
            File::from_raw_handle(r as RawHandle),
            File::from_raw_handle(w as RawHandle),
        )
    })
}

pub fn is_pipe(file: &File) -> bool {
    unsafe { fileapi::GetFileType(raw(file)) == FILE_TYPE_PIPE }
}

pub fn IsDistributionRegistered(name: &OsStr) -> Result<bool> {
    let name = to_nullterm(name)?;
    Ok(unsafe { WslIsDistributionRegistered(name.as_ptr()) } != FALSE)
}

pub fn Launch(
    name: &OsStr,
    command: &OsStr,
    use_cwd: bool,
    stdin: &File,
    stdout: &File,
    stderr: &File,
) -> Result<Handle> {
    let name = to_nullterm(name)?;
    let command = to_nullterm(command)?;
    let mut process: HANDLE = ptr::null_mut();
    let hr = unsafe {
        WslLaunch(
            name.as_ptr(),
            command.as_ptr(),
            use_cwd as BOOL,
            raw(stdin),
            raw(stdout),
            raw(stderr),
            &mut process,
        )
    };
    if !SUCCEEDED(hr) {
        return Err(Error::from_raw_os_error(hr));
    }
    Ok(unsafe { Handle::from_raw_handle(process as RawHandle) })
}

pub fn WaitForSingleObject(handle: &Handle) -> Result<()> {
    let result =
        unsafe { synchapi::WaitForSingleObject(handle.as_raw_handle() as HANDLE, INFINITE) };
    if result != WAIT_OBJECT_0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

pub fn GetExitCodeProcess(handle: &Handle) -> Result<u32> {
    let mut exit_code: DWORD = 0;
    check(unsafe {
        processthreadsapi::GetExitCodeProcess(handle.as_raw_handle() as HANDLE, &mut exit_code)
    })?;
    Ok(exit_code)
}

pub fn TerminateProcess(handle: &Handle, exit_code: u32) -> Result<()> {
    check(unsafe {
        processthreadsapi::TerminateProcess(handle.as_raw_handle() as HANDLE, exit_code)
    })
}
