use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bounded::BoundedOutput;
use crate::cancel::{CancelToken, Watcher};
use crate::distro::Distro;
use crate::error::{Error, ExitError};
use crate::process::{ExitStatus, GuestProcess};
use crate::stream::{PipeReader, PipeWriter, SharedBuffer, SharedPipe, SharedWriter, StandardStream};
use crate::wiring::{self, CopyResults, Wiring};

/// Number of leading and trailing bytes of standard error retained by [`Cmd::output`]
/// for the error of a failed command.
pub const STDERR_CAPTURE_LIMIT: usize = 32 << 10;

/// Source of the standard input of a command.
///
/// Leaving [`Cmd::stdin`] unset connects the process to the null device.
pub enum Input {
    /// Read from the file. Native pipes are handed to the process directly, other files
    /// are copied into it by a background thread.
    File(File),
    /// Copy the data produced by the reader into the process.
    Reader(Box<dyn Read + Send>),
    /// Share the standard input of the current process.
    Inherit,
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::File(file) => f.debug_tuple("File").field(file).finish(),
            Input::Reader(_) => f.write_str("Reader(..)"),
            Input::Inherit => f.write_str("Inherit"),
        }
    }
}

/// Destination of the standard output or standard error of a command.
///
/// Leaving the stream unset connects it to the null device.
#[derive(Debug)]
pub enum Output {
    /// Write to the file. Native pipes are handed to the process directly, for other
    /// files the output is copied by a background thread.
    File(File),
    /// Copy the output into the writer.
    Writer(SharedWriter),
    /// Share the corresponding stream of the current process.
    Inherit,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Unstarted,
    // start was attempted and failed after the precondition checks
    Aborted,
    Running,
    Finished,
}

/// A command to be run inside a guest distro.
///
/// A `Cmd` is created with [`Distro::command`], configured through its builder methods
/// or public fields, and then executed with [`run`](Self::run), [`output`](Self::output)
/// or [`combined_output`](Self::combined_output), or with an explicit
/// [`start`](Self::start) followed by [`wait`](Self::wait).
///
/// A `Cmd` runs at most once. A started command should always be waited for: `wait`
/// joins the copy threads and releases the descriptors the command holds.
#[must_use]
pub struct Cmd {
    /// Source of standard input. Unset means the null device.
    ///
    /// The stream fields are read once, by [`start`](Self::start). Assigning them
    /// directly is not checked: a value set after `start` is ignored, and replacing the
    /// end installed by a pipe accessor disconnects that pipe. The builder methods refuse
    /// both.
    pub stdin: Option<Input>,
    /// Destination of standard output. Unset means the null device. Same caveats as the
    /// `stdin` field.
    pub stdout: Option<Output>,
    /// Destination of standard error. Unset means the null device. Same caveats as the
    /// `stdin` field.
    pub stderr: Option<Output>,
    /// Run in the caller's current directory rather than in the home directory of the
    /// distro's default user.
    pub use_cwd: bool,

    distro: Distro,
    command: String,
    cancel: Option<CancelToken>,
    piped: Vec<StandardStream>,
    state: State,
    wiring: Wiring,
    copy_results: Option<CopyResults>,
    process: Option<Arc<dyn GuestProcess>>,
    watcher: Option<Watcher>,
    exit_status: Option<ExitStatus>,
}

impl Cmd {
    /// Constructs a new `Cmd` running `command` in `distro`.
    ///
    /// The command line is interpreted by the guest's shell. An empty command line starts
    /// the default shell.
    pub fn new(distro: Distro, command: impl Into<String>) -> Cmd {
        Cmd {
            stdin: None,
            stdout: None,
            stderr: None,
            use_cwd: false,
            distro,
            command: command.into(),
            cancel: None,
            piped: Vec::new(),
            state: State::Unstarted,
            wiring: Wiring::default(),
            copy_results: None,
            process: None,
            watcher: None,
            exit_status: None,
        }
    }

    /// Specifies the standard input of the process.
    ///
    /// Argument can be:
    ///
    /// * an [`Input`];
    /// * a `File`, shorthand for `Input::File(file)`;
    /// * a `Vec<u8>`, `String`, `&str`, or `&[u8]`, whose contents are fed to the process.
    ///
    /// Ignored, with a warning, once the command has started or after
    /// [`stdin_pipe`](Self::stdin_pipe).
    pub fn stdin(mut self, stdin: impl IntoInput) -> Cmd {
        if self.can_set(StandardStream::Input) {
            self.stdin = Some(stdin.into_input());
        }
        self
    }

    /// Specifies the standard output of the process.
    ///
    /// Argument can be:
    ///
    /// * an [`Output`];
    /// * a `File`, shorthand for `Output::File(file)`;
    /// * a [`SharedWriter`] or [`SharedBuffer`], which receive a copy of the output.
    pub fn stdout(mut self, stdout: impl IntoOutput) -> Cmd {
        if self.can_set(StandardStream::Output) {
            self.stdout = Some(stdout.into_output());
        }
        self
    }

    /// Specifies the standard error of the process.
    ///
    /// Accepts the same arguments as [`stdout`](Self::stdout). Passing the same
    /// [`SharedWriter`] (or [`SharedBuffer`]) to both makes the two streams share one
    /// pipe.
    pub fn stderr(mut self, stderr: impl IntoOutput) -> Cmd {
        if self.can_set(StandardStream::Error) {
            self.stderr = Some(stderr.into_output());
        }
        self
    }

    /// False if `stream` can no longer be reassigned.
    fn can_set(&self, stream: StandardStream) -> bool {
        if self.state != State::Unstarted {
            tracing::warn!(%stream, "stream set after start, ignoring");
            return false;
        }
        if self.piped.contains(&stream) {
            tracing::warn!(%stream, "stream is connected to a pipe accessor, ignoring");
            return false;
        }
        true
    }

    /// Run in the caller's current directory instead of the guest user's home.
    pub fn use_cwd(mut self) -> Cmd {
        self.use_cwd = true;
        self
    }

    /// Kill the process when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancelToken) -> Cmd {
        self.cancel = Some(token);
        self
    }

    /// Kill the process if it is still running after `timeout`.
    ///
    /// The deadline is counted from this call. Replaces a token set by
    /// [`cancel_on`](Self::cancel_on).
    pub fn timeout(self, timeout: Duration) -> Cmd {
        self.cancel_on(CancelToken::with_timeout(timeout))
    }

    /// The distro the command runs in.
    pub fn distro(&self) -> &Distro {
        &self.distro
    }

    /// The command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit status of the process, available once [`wait`](Self::wait) has obtained it.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Starts the command without waiting for it to finish.
    ///
    /// Checks that the distro is registered and that the command was not started before,
    /// then resolves the standard streams and launches the process. Copy threads are
    /// started for streams that couldn't be handed to the process directly.
    ///
    /// If the cancellation token is already cancelled, nothing is launched. On any
    /// failure after the precondition checks, every descriptor the command created is
    /// released and the command can no longer be started.
    pub fn start(&mut self) -> Result<(), Error> {
        let name = self.distro.name();
        let registered = self
            .distro
            .is_registered()
            .map_err(|source| Error::Registration {
                distro: name.to_owned(),
                source,
            })?;
        if !registered {
            return Err(Error::NotRegistered(name.to_owned()));
        }
        if self.state != State::Unstarted {
            return Err(Error::AlreadyStarted);
        }

        if let Some(cause) = self.cancel.as_ref().and_then(CancelToken::cause) {
            self.abort();
            return Err(cause.into());
        }

        let ends = match self
            .wiring
            .wire(self.stdin.take(), self.stdout.take(), self.stderr.take())
        {
            Ok(ends) => ends,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        tracing::debug!(
            distro = self.distro.name(),
            command = %self.command,
            use_cwd = self.use_cwd,
            "launching command"
        );
        let launched = self.distro.launcher().launch(
            self.distro.name(),
            &self.command,
            &ends.stdin,
            &ends.stdout,
            &ends.stderr,
            self.use_cwd,
        );
        drop(ends);
        let process = match launched {
            Ok(process) => process,
            Err(source) => {
                self.abort();
                return Err(Error::Launch {
                    distro: self.distro.name().to_owned(),
                    source,
                });
            }
        };

        self.wiring.release_after_start();
        let tasks = self.wiring.take_copy_tasks();
        if !tasks.is_empty() {
            self.copy_results = Some(CopyResults::spawn(tasks));
        }
        if let Some(token) = &self.cancel {
            self.watcher = Some(Watcher::spawn(token, Arc::clone(&process)));
        }
        self.process = Some(process);
        self.state = State::Running;
        Ok(())
    }

    fn abort(&mut self) {
        self.wiring.release_all();
        self.state = State::Aborted;
    }

    /// Waits for the started command to exit and for all copy threads to finish.
    ///
    /// Errors are reported in order of precedence: cancellation, failure to obtain the
    /// exit status, unsuccessful exit, then the first failed copy. Pipes returned by the
    /// pipe accessors are closed before returning.
    pub fn wait(&mut self) -> Result<(), Error> {
        match self.state {
            State::Unstarted | State::Aborted => return Err(Error::NotStarted),
            State::Finished => return Err(Error::AlreadyWaited),
            State::Running => {}
        }
        let Some(process) = self.process.clone() else {
            return Err(Error::NotStarted);
        };
        self.state = State::Finished;

        let waited = process.wait();
        let cancelled = self.watcher.take().and_then(Watcher::finish);
        if let Ok(status) = &waited {
            self.exit_status = Some(*status);
        }
        let copy_error = self.copy_results.take().and_then(CopyResults::first_error);
        self.wiring.release_after_wait();
        tracing::debug!(
            distro = self.distro.name(),
            command = %self.command,
            status = ?self.exit_status,
            "command finished"
        );

        if let Some(cause) = cancelled {
            return Err(cause.into());
        }
        let status = waited.map_err(Error::Wait)?;
        if !status.success() {
            return Err(ExitError::new(status).into());
        }
        match copy_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Starts the command and waits for it to finish.
    pub fn run(&mut self) -> Result<(), Error> {
        self.start()?;
        self.wait()
    }

    /// Runs the command and returns its standard output.
    ///
    /// Standard output must not be set. Unless standard error is set, its head and tail
    /// (up to [`STDERR_CAPTURE_LIMIT`] bytes each) are attached to the error of an
    /// unsuccessful exit, available through [`ExitError::output`].
    pub fn output(&mut self) -> Capture {
        if self.stdout.is_some() {
            return Capture::failed(Error::StreamAlreadySet(StandardStream::Output));
        }
        let stdout = SharedBuffer::new();
        self.stdout = Some(Output::Writer(stdout.writer()));
        let diagnostics = match self.stderr {
            Some(_) => None,
            None => {
                let saver = Arc::new(Mutex::new(BoundedOutput::new(STDERR_CAPTURE_LIMIT)));
                self.stderr = Some(Output::Writer(SharedWriter::from_arc(Arc::clone(&saver))));
                Some(saver)
            }
        };

        let mut result = self.run();
        if let (Err(Error::Exit(e)), Some(saver)) = (&mut result, &diagnostics) {
            e.output = saver.lock().unwrap().bytes();
        }
        Capture {
            output: stdout.take(),
            result,
        }
    }

    /// Runs the command and returns its standard output and standard error interleaved
    /// in the order the process wrote them.
    ///
    /// Neither stream may be set. The combined output is also attached to the error of an
    /// unsuccessful exit.
    pub fn combined_output(&mut self) -> Capture {
        if self.stdout.is_some() {
            return Capture::failed(Error::StreamAlreadySet(StandardStream::Output));
        }
        if self.stderr.is_some() {
            return Capture::failed(Error::StreamAlreadySet(StandardStream::Error));
        }
        let combined = SharedBuffer::new();
        self.stdout = Some(Output::Writer(combined.writer()));
        self.stderr = Some(Output::Writer(combined.writer()));

        let mut result = self.run();
        if let Err(Error::Exit(e)) = &mut result {
            e.output = combined.contents();
        }
        Capture {
            output: combined.take(),
            result,
        }
    }

    /// Returns a pipe connected to the standard input of the process.
    ///
    /// Must be called before [`start`](Self::start), with standard input unset. The pipe
    /// is closed by [`wait`](Self::wait); a command reading its input to the end needs the
    /// caller to close it earlier.
    pub fn stdin_pipe(&mut self) -> Result<PipeWriter, Error> {
        if self.stdin.is_some() {
            return Err(Error::StreamAlreadySet(StandardStream::Input));
        }
        if self.state != State::Unstarted {
            return Err(Error::PipeAfterStart(StandardStream::Input));
        }
        let (read, write) = make_pipe(StandardStream::Input)?;
        self.stdin = Some(Input::File(read));
        self.piped.push(StandardStream::Input);
        Ok(PipeWriter(self.close_after_wait(write)))
    }

    /// Returns a pipe connected to the standard output of the process.
    ///
    /// Must be called before [`start`](Self::start), with standard output unset.
    /// [`wait`](Self::wait) closes the pipe, so reading must be finished before waiting.
    pub fn stdout_pipe(&mut self) -> Result<PipeReader, Error> {
        if self.stdout.is_some() {
            return Err(Error::StreamAlreadySet(StandardStream::Output));
        }
        if self.state != State::Unstarted {
            return Err(Error::PipeAfterStart(StandardStream::Output));
        }
        let (read, write) = make_pipe(StandardStream::Output)?;
        self.stdout = Some(Output::File(write));
        self.piped.push(StandardStream::Output);
        Ok(PipeReader(self.close_after_wait(read)))
    }

    /// Returns a pipe connected to the standard error of the process.
    ///
    /// Same rules as [`stdout_pipe`](Self::stdout_pipe).
    pub fn stderr_pipe(&mut self) -> Result<PipeReader, Error> {
        if self.stderr.is_some() {
            return Err(Error::StreamAlreadySet(StandardStream::Error));
        }
        if self.state != State::Unstarted {
            return Err(Error::PipeAfterStart(StandardStream::Error));
        }
        let (read, write) = make_pipe(StandardStream::Error)?;
        self.stderr = Some(Output::File(write));
        self.piped.push(StandardStream::Error);
        Ok(PipeReader(self.close_after_wait(read)))
    }

    fn close_after_wait(&mut self, file: File) -> SharedPipe {
        let pipe = SharedPipe::new(file);
        self.wiring.close_after_wait(pipe.clone());
        pipe
    }
}

fn make_pipe(stream: StandardStream) -> Result<(File, File), Error> {
    wiring::make_pipe().map_err(|source| Error::Stream { stream, source })
}

impl Drop for Cmd {
    fn drop(&mut self) {
        // Let the watcher thread go if the command was never waited for.
        if let Some(watcher) = self.watcher.take() {
            watcher.finish();
        }
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("distro", &self.distro.name())
            .field("command", &self.command)
            .field("use_cwd", &self.use_cwd)
            .field("state", &self.state)
            .finish()
    }
}

/// Output collected by [`Cmd::output`] and [`Cmd::combined_output`], together with the
/// outcome of the command.
///
/// The output is returned even when the command fails, so that callers can inspect
/// whatever the process managed to write.
#[derive(Debug)]
#[must_use]
pub struct Capture {
    /// The captured bytes.
    pub output: Vec<u8>,
    /// Outcome of running the command.
    pub result: Result<(), Error>,
}

impl Capture {
    fn failed(error: Error) -> Capture {
        Capture {
            output: Vec::new(),
            result: Err(error),
        }
    }

    /// Returns the output as string, converted from bytes using
    /// `String::from_utf8_lossy`.
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// True if the command ran and exited successfully.
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the output if the command succeeded, or its error otherwise.
    pub fn check(self) -> Result<Vec<u8>, Error> {
        self.result.map(|()| self.output)
    }
}

mod sealed {
    pub trait IntoInputSealed {}
    pub trait IntoOutputSealed {}
}

/// Trait for types that can be used as the standard input of a [`Cmd`].
///
/// This is a sealed trait that cannot be implemented outside this crate.
pub trait IntoInput: sealed::IntoInputSealed {
    /// Convert to an [`Input`].
    fn into_input(self) -> Input;
}

/// Trait for types that can receive the standard output or standard error of a [`Cmd`].
///
/// This is a sealed trait that cannot be implemented outside this crate.
pub trait IntoOutput: sealed::IntoOutputSealed {
    /// Convert to an [`Output`].
    fn into_output(self) -> Output;
}

fn feed(data: Vec<u8>) -> Input {
    Input::Reader(Box::new(Cursor::new(data)))
}

impl sealed::IntoInputSealed for Input {}
impl IntoInput for Input {
    fn into_input(self) -> Input {
        self
    }
}

impl sealed::IntoInputSealed for File {}
impl IntoInput for File {
    fn into_input(self) -> Input {
        Input::File(self)
    }
}

impl sealed::IntoInputSealed for Vec<u8> {}
impl IntoInput for Vec<u8> {
    fn into_input(self) -> Input {
        feed(self)
    }
}

impl sealed::IntoInputSealed for String {}
impl IntoInput for String {
    fn into_input(self) -> Input {
        feed(self.into_bytes())
    }
}

impl sealed::IntoInputSealed for &str {}
impl IntoInput for &str {
    fn into_input(self) -> Input {
        feed(self.as_bytes().to_vec())
    }
}

impl sealed::IntoInputSealed for &[u8] {}
impl IntoInput for &[u8] {
    fn into_input(self) -> Input {
        feed(self.to_vec())
    }
}

impl<const N: usize> sealed::IntoInputSealed for &[u8; N] {}
impl<const N: usize> IntoInput for &[u8; N] {
    fn into_input(self) -> Input {
        feed(self.to_vec())
    }
}

impl sealed::IntoOutputSealed for Output {}
impl IntoOutput for Output {
    fn into_output(self) -> Output {
        self
    }
}

impl sealed::IntoOutputSealed for File {}
impl IntoOutput for File {
    fn into_output(self) -> Output {
        Output::File(self)
    }
}

impl sealed::IntoOutputSealed for SharedWriter {}
impl IntoOutput for SharedWriter {
    fn into_output(self) -> Output {
        Output::Writer(self)
    }
}

impl sealed::IntoOutputSealed for SharedBuffer {}
impl IntoOutput for SharedBuffer {
    fn into_output(self) -> Output {
        Output::Writer(self.writer())
    }
}

impl sealed::IntoOutputSealed for &SharedBuffer {}
impl IntoOutput for &SharedBuffer {
    fn into_output(self) -> Output {
        Output::Writer(self.writer())
    }
}
