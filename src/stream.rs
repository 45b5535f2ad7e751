use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// One of the three standard streams of a process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StandardStream {
    /// Standard input.
    Input,
    /// Standard output.
    Output,
    /// Standard error.
    Error,
}

impl fmt::Display for StandardStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StandardStream::Input => "stdin",
            StandardStream::Output => "stdout",
            StandardStream::Error => "stderr",
        })
    }
}

/// A writer shared between the caller and a command.
///
/// Clones refer to the same writer. Giving clones of one `SharedWriter` to both stdout
/// and stderr of a [`Cmd`](crate::Cmd) makes both streams go through a single pipe, so
/// the writer sees the output in the order the process produced it.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<dyn Write + Send>>);

impl SharedWriter {
    /// Wrap `writer` for sharing.
    pub fn new(writer: impl Write + Send + 'static) -> SharedWriter {
        SharedWriter(Arc::new(Mutex::new(writer)))
    }

    /// Share a writer the caller keeps a typed handle to.
    pub fn from_arc<W: Write + Send + 'static>(writer: Arc<Mutex<W>>) -> SharedWriter {
        SharedWriter(writer)
    }

    /// True if `self` and `other` refer to the same writer.
    pub fn same_as(&self, other: &SharedWriter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedWriter({:p})", Arc::as_ptr(&self.0))
    }
}

/// An in-memory buffer that can be written by a command and read by the caller.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> SharedBuffer {
        SharedBuffer::default()
    }

    /// Returns a copy of the data written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// Removes and returns the data written so far.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    /// Returns a [`SharedWriter`] appending to this buffer.
    pub fn writer(&self) -> SharedWriter {
        SharedWriter::from_arc(Arc::clone(&self.0))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.0.lock().unwrap().len())
            .finish()
    }
}

/// Pipe end shared between the caller and the command that closes it after `wait`.
///
/// The lock only guards taking a handle. Reads and writes go through their own clone of
/// the handle, so closing never waits for I/O in progress on another thread; the
/// descriptor itself goes away when the last in-flight operation returns.
#[derive(Debug, Clone)]
pub(crate) struct SharedPipe(Arc<Mutex<Option<Arc<File>>>>);

impl SharedPipe {
    pub(crate) fn new(file: File) -> SharedPipe {
        SharedPipe(Arc::new(Mutex::new(Some(Arc::new(file)))))
    }

    /// Close the pipe end. Closing more than once does nothing.
    pub(crate) fn close(&self) {
        self.0.lock().unwrap().take();
    }

    fn is_closed(&self) -> bool {
        self.0.lock().unwrap().is_none()
    }

    /// The open handle, or `None` once closed.
    fn handle(&self) -> Option<Arc<File>> {
        self.0.lock().unwrap().clone()
    }
}

/// Write end of a pipe connected to the standard input of a command.
///
/// Returned by [`Cmd::stdin_pipe`](crate::Cmd::stdin_pipe). The pipe is closed
/// automatically once [`Cmd::wait`](crate::Cmd::wait) has seen the command exit. A
/// command that reads its input to the end will not exit before the pipe is closed, so
/// callers feeding such a command must call [`close`](Self::close) (or drop the
/// `PipeWriter`) when done writing.
#[derive(Debug)]
pub struct PipeWriter(pub(crate) SharedPipe);

impl PipeWriter {
    /// Close the pipe, signalling end of input to the command.
    pub fn close(&self) {
        self.0.close();
    }

    /// True if the pipe was closed, by the caller or by `wait`.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.handle() {
            Some(file) => (&*file).write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe is closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.handle() {
            Some(file) => (&*file).flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Read end of a pipe connected to the standard output or error of a command.
///
/// Returned by [`Cmd::stdout_pipe`](crate::Cmd::stdout_pipe) and
/// [`Cmd::stderr_pipe`](crate::Cmd::stderr_pipe). [`Cmd::wait`](crate::Cmd::wait)
/// closes the pipe after seeing the command exit, so all reading must be done before
/// calling `wait`. Reading a closed pipe reports end of file. A read already blocked on
/// another thread when the pipe is closed runs to completion.
#[derive(Debug)]
pub struct PipeReader(pub(crate) SharedPipe);

impl PipeReader {
    /// Close the pipe before the command is waited for.
    pub fn close(&self) {
        self.0.close();
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.handle() {
            Some(file) => (&*file).read(buf),
            None => Ok(0),
        }
    }
}
