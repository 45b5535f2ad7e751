use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use crate::error::Error;
use crate::exec::{Input, Output};
use crate::stream::{SharedPipe, StandardStream};

pub(crate) use os::make_pipe;

/// A descriptor the command must release, either after the launch or after `wait`.
#[derive(Debug)]
pub(crate) enum Closer {
    File(Arc<File>),
    Pipe(SharedPipe),
}

impl Closer {
    fn close(self) {
        match self {
            // The child end is closed once the last Arc goes away.
            Closer::File(file) => drop(file),
            Closer::Pipe(pipe) => pipe.close(),
        }
    }
}

/// Data pump between a caller stream and a pipe connected to the process.
pub(crate) struct CopyTask {
    stream: StandardStream,
    job: Box<dyn FnOnce() -> io::Result<()> + Send>,
}

impl CopyTask {
    fn new(stream: StandardStream, job: impl FnOnce() -> io::Result<()> + Send + 'static) -> Self {
        CopyTask {
            stream,
            job: Box::new(job),
        }
    }
}

impl std::fmt::Debug for CopyTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyTask")
            .field("stream", &self.stream)
            .finish()
    }
}

/// Descriptors handed to the launcher for the three standard streams.
#[derive(Debug)]
pub(crate) struct ChildEnds {
    pub(crate) stdin: Arc<File>,
    pub(crate) stdout: Arc<File>,
    pub(crate) stderr: Arc<File>,
}

/// Bookkeeping of descriptors and copy tasks created while wiring the standard streams
/// of a command.
#[derive(Debug, Default)]
pub(crate) struct Wiring {
    close_after_start: Vec<Closer>,
    close_after_wait: Vec<Closer>,
    copy_tasks: Vec<CopyTask>,
}

impl Wiring {
    /// Resolve the three streams into descriptors for the process.
    ///
    /// If stdout and stderr are the same [`SharedWriter`](crate::SharedWriter), stderr
    /// reuses the descriptor of stdout and only one copy task is created. On failure
    /// everything created so far is released.
    pub(crate) fn wire(
        &mut self,
        stdin: Option<Input>,
        stdout: Option<Output>,
        stderr: Option<Output>,
    ) -> Result<ChildEnds, Error> {
        let ends = self.wire_streams(stdin, stdout, stderr);
        if ends.is_err() {
            self.release_all();
        }
        ends
    }

    fn wire_streams(
        &mut self,
        stdin: Option<Input>,
        stdout: Option<Output>,
        stderr: Option<Output>,
    ) -> Result<ChildEnds, Error> {
        let alias = matches!(
            (&stdout, &stderr),
            (Some(Output::Writer(out)), Some(Output::Writer(err))) if out.same_as(err)
        );
        let stdin = self
            .input_descriptor(stdin)
            .map_err(stream_error(StandardStream::Input))?;
        let stdout = self
            .output_descriptor(StandardStream::Output, stdout)
            .map_err(stream_error(StandardStream::Output))?;
        let stderr = if alias {
            Arc::clone(&stdout)
        } else {
            self.output_descriptor(StandardStream::Error, stderr)
                .map_err(stream_error(StandardStream::Error))?
        };
        Ok(ChildEnds {
            stdin,
            stdout,
            stderr,
        })
    }

    fn input_descriptor(&mut self, input: Option<Input>) -> io::Result<Arc<File>> {
        let reader: Box<dyn Read + Send> = match input {
            None => {
                let null = OpenOptions::new().read(true).open(os::NULL_DEVICE)?;
                return Ok(self.after_start(null));
            }
            Some(Input::Inherit) => {
                return Ok(self.after_start(os::standard_stream(StandardStream::Input)?));
            }
            Some(Input::File(file)) if os::is_pipe(&file) => return Ok(self.after_start(file)),
            Some(Input::File(file)) => Box::new(file),
            Some(Input::Reader(reader)) => reader,
        };
        let (read, write) = make_pipe()?;
        let child_end = self.after_start(read);
        self.copy_tasks.push(CopyTask::new(StandardStream::Input, move || {
            copy_to_process(reader, write)
        }));
        Ok(child_end)
    }

    fn output_descriptor(
        &mut self,
        stream: StandardStream,
        output: Option<Output>,
    ) -> io::Result<Arc<File>> {
        let writer: Box<dyn Write + Send> = match output {
            None => {
                let null = OpenOptions::new().write(true).open(os::NULL_DEVICE)?;
                return Ok(self.after_start(null));
            }
            Some(Output::Inherit) => return Ok(self.after_start(os::standard_stream(stream)?)),
            Some(Output::File(file)) if os::is_pipe(&file) => return Ok(self.after_start(file)),
            Some(Output::File(file)) => Box::new(file),
            Some(Output::Writer(writer)) => Box::new(writer),
        };
        let (read, write) = make_pipe()?;
        let child_end = self.after_start(write);
        self.copy_tasks
            .push(CopyTask::new(stream, move || copy_from_process(read, writer)));
        Ok(child_end)
    }

    fn after_start(&mut self, file: File) -> Arc<File> {
        let file = Arc::new(file);
        self.close_after_start.push(Closer::File(Arc::clone(&file)));
        file
    }

    /// Register a caller-facing pipe end to be closed after `wait`.
    pub(crate) fn close_after_wait(&mut self, pipe: SharedPipe) {
        self.close_after_wait.push(Closer::Pipe(pipe));
    }

    pub(crate) fn take_copy_tasks(&mut self) -> Vec<CopyTask> {
        std::mem::take(&mut self.copy_tasks)
    }

    pub(crate) fn release_after_start(&mut self) {
        close_all(&mut self.close_after_start);
    }

    pub(crate) fn release_after_wait(&mut self) {
        close_all(&mut self.close_after_wait);
    }

    /// Release everything, used when the command fails to start. Dropping the pending
    /// copy tasks closes the pipe ends they own.
    pub(crate) fn release_all(&mut self) {
        self.release_after_start();
        self.release_after_wait();
        self.copy_tasks.clear();
    }
}

fn close_all(closers: &mut Vec<Closer>) {
    for closer in closers.drain(..) {
        closer.close();
    }
}

fn stream_error(stream: StandardStream) -> impl FnOnce(io::Error) -> Error {
    move |source| Error::Stream { stream, source }
}

fn copy_to_process(mut reader: Box<dyn Read + Send>, mut pipe: File) -> io::Result<()> {
    let result = io::copy(&mut reader, &mut pipe);
    // Closing the pipe delivers EOF to the process.
    drop(pipe);
    match result {
        Ok(_) => Ok(()),
        // The process is free to exit without reading all of its input.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
    }
}

fn copy_from_process(mut pipe: File, mut writer: Box<dyn Write + Send>) -> io::Result<()> {
    io::copy(&mut pipe, &mut writer)?;
    writer.flush()
}

/// Results of the running copy tasks, each deposited exactly once.
#[derive(Debug)]
pub(crate) struct CopyResults {
    results: Receiver<(StandardStream, io::Result<()>)>,
    pending: usize,
}

impl CopyResults {
    pub(crate) fn spawn(tasks: Vec<CopyTask>) -> CopyResults {
        let (tx, rx) = mpsc::sync_channel(tasks.len());
        let pending = tasks.len();
        for task in tasks {
            let tx = tx.clone();
            thread::spawn(move || {
                let CopyTask { stream, job } = task;
                tracing::trace!(%stream, "copy task started");
                let result = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                    tracing::warn!(%stream, "copy task panicked");
                    Err(io::Error::other("copy task panicked"))
                });
                tracing::trace!(%stream, ok = result.is_ok(), "copy task finished");
                // The receiver is gone if the command was dropped without waiting.
                let _ = tx.send((stream, result));
            });
        }
        CopyResults {
            results: rx,
            pending,
        }
    }

    /// Block until every task has finished and return the first failure.
    pub(crate) fn first_error(self) -> Option<Error> {
        let mut first = None;
        for _ in 0..self.pending {
            let (stream, result) = match self.results.recv() {
                Ok(received) => received,
                Err(_) => break,
            };
            match result {
                Err(source) if first.is_none() => first = Some(Error::Copy { stream, source }),
                _ => {}
            }
        }
        first
    }
}

#[cfg(unix)]
mod os {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsFd;

    use crate::posix;
    use crate::stream::StandardStream;

    pub const NULL_DEVICE: &str = "/dev/null";

    pub fn make_pipe() -> io::Result<(File, File)> {
        posix::pipe()
    }

    pub fn is_pipe(file: &File) -> bool {
        posix::is_fifo(file).unwrap_or(false)
    }

    /// Duplicate one of the caller's own standard streams.
    pub fn standard_stream(stream: StandardStream) -> io::Result<File> {
        let fd = match stream {
            StandardStream::Input => io::stdin().as_fd().try_clone_to_owned()?,
            StandardStream::Output => io::stdout().as_fd().try_clone_to_owned()?,
            StandardStream::Error => io::stderr().as_fd().try_clone_to_owned()?,
        };
        Ok(File::from(fd))
    }
}

#[cfg(windows)]
mod os {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsHandle;

    use crate::stream::StandardStream;
    use crate::win32;

    pub const NULL_DEVICE: &str = "nul";

    pub fn make_pipe() -> io::Result<(File, File)> {
        win32::make_pipe()
    }

    pub fn is_pipe(file: &File) -> bool {
        win32::is_pipe(file)
    }

    /// Duplicate one of the caller's own standard streams.
    pub fn standard_stream(stream: StandardStream) -> io::Result<File> {
        let handle = match stream {
            StandardStream::Input => io::stdin().as_handle().try_clone_to_owned()?,
            StandardStream::Output => io::stdout().as_handle().try_clone_to_owned()?,
            StandardStream::Error => io::stderr().as_handle().try_clone_to_owned()?,
        };
        Ok(File::from(handle))
    }
}
