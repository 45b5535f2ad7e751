use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use super::common::local_distro;
use crate::{CancelCause, Distro, Error, Input, LocalLauncher, Output, SharedBuffer};

fn stdout_of(mut cmd: crate::Cmd) -> String {
    let out = cmd.output();
    let text = out.output_str();
    out.result.unwrap();
    text
}

#[test]
fn true_succeeds() {
    let (distro, _home) = local_distro();
    distro.command("true").run().unwrap();
}

#[test]
fn exit_code() {
    let (distro, _home) = local_distro();
    let mut cmd = distro.command("exit 42");
    let err = cmd.run().unwrap_err();
    assert_eq!(err.exit_status().and_then(|s| s.code()), Some(42));
    assert_eq!(cmd.exit_status().and_then(|s| s.code()), Some(42));
    assert_eq!(err.to_string(), "process exited unsuccessfully: exit code 42");
}

#[test]
fn killed_by_signal() {
    let (distro, _home) = local_distro();
    let err = distro.command("kill -9 $$").run().unwrap_err();
    let status = err.exit_status().unwrap();
    assert_eq!(status.signal(), Some(9));
    assert_eq!(status.code(), None);
}

#[test]
fn output_hello() {
    let (distro, _home) = local_distro();
    assert_eq!(stdout_of(distro.command("echo hello")), "hello\n");
}

#[test]
fn feed_stdin() {
    let (distro, _home) = local_distro();
    let cmd = distro.command("sort").stdin("b\nc\na\n");
    assert_eq!(stdout_of(cmd), "a\nb\nc\n");
}

#[test]
fn empty_command_runs_shell() {
    let (distro, _home) = local_distro();
    let err = distro
        .command("")
        .stdin("exit 7\n")
        .run()
        .unwrap_err();
    assert_eq!(err.exit_status().and_then(|s| s.code()), Some(7));
}

#[test]
fn combined_output_keeps_order() {
    let (distro, _home) = local_distro();
    let out = distro
        .command("echo out; echo err >&2; echo out2")
        .combined_output();
    assert_eq!(out.check().unwrap(), b"out\nerr\nout2\n");
}

#[test]
fn stderr_in_exit_error() {
    let (distro, _home) = local_distro();
    let out = distro.command("echo oops >&2; exit 1").output();
    match out.result {
        Err(Error::Exit(e)) => assert_eq!(e.output(), b"oops\n"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn stderr_head_and_tail_kept() {
    let (distro, _home) = local_distro();
    // 100 KiB of stderr, more than twice the capture limit.
    let out = distro
        .command("head -c 102400 /dev/zero | tr '\\0' x >&2; exit 1")
        .output();
    let e = match out.result {
        Err(Error::Exit(e)) => e,
        other => panic!("unexpected result {:?}", other),
    };
    let expected_marker = format!(
        "\n... omitting {} bytes ...\n",
        102400 - 2 * crate::STDERR_CAPTURE_LIMIT
    );
    assert_eq!(
        e.output().len(),
        2 * crate::STDERR_CAPTURE_LIMIT + expected_marker.len()
    );
    let text = String::from_utf8_lossy(e.output());
    assert!(text.contains(&expected_marker));
}

#[test]
fn runs_in_home_by_default() {
    let (distro, home) = local_distro();
    let pwd = stdout_of(distro.command("pwd -P"));
    assert_eq!(
        pwd.trim_end(),
        fs::canonicalize(home.path()).unwrap().to_str().unwrap()
    );
}

#[test]
fn use_cwd_runs_in_current_dir() {
    let (distro, _home) = local_distro();
    let pwd = stdout_of(distro.command("pwd -P").use_cwd());
    assert_eq!(
        pwd.trim_end(),
        fs::canonicalize(env::current_dir().unwrap())
            .unwrap()
            .to_str()
            .unwrap()
    );
}

#[test]
fn stdout_pipe_read() {
    let (distro, _home) = local_distro();
    let mut cmd = distro.command("echo piped");
    let mut stdout = cmd.stdout_pipe().unwrap();
    cmd.start().unwrap();
    let mut text = String::new();
    stdout.read_to_string(&mut text).unwrap();
    cmd.wait().unwrap();
    assert_eq!(text, "piped\n");
}

#[test]
fn wait_not_held_up_by_pipe_reader() {
    let (distro, _home) = local_distro();
    // The background sleep keeps stdout open after the shell exits.
    let mut cmd = distro.command("sleep 3 & echo hi");
    let mut stdout = cmd.stdout_pipe().unwrap();
    cmd.start().unwrap();
    let reader = thread::spawn(move || {
        let mut text = String::new();
        stdout.read_to_string(&mut text).unwrap();
        text
    });
    thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    cmd.wait().unwrap();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(reader.join().unwrap(), "hi\n");
}

#[test]
fn builder_keeps_pipe_accessor_stream() {
    let (distro, _home) = local_distro();
    let ignored = SharedBuffer::new();
    let mut cmd = distro.command("echo kept");
    let mut stdout = cmd.stdout_pipe().unwrap();
    let mut cmd = cmd.stdout(ignored.clone());
    cmd.start().unwrap();
    let mut text = String::new();
    stdout.read_to_string(&mut text).unwrap();
    cmd.wait().unwrap();
    assert_eq!(text, "kept\n");
    assert!(ignored.contents().is_empty());
}

#[test]
fn stdin_pipe_write() {
    let (distro, _home) = local_distro();
    let captured = SharedBuffer::new();
    let mut cmd = distro.command("tr a-z A-Z").stdout(captured.clone());
    let mut stdin = cmd.stdin_pipe().unwrap();
    cmd.start().unwrap();
    stdin.write_all(b"shout\n").unwrap();
    stdin.close();
    cmd.wait().unwrap();
    assert_eq!(captured.contents(), b"SHOUT\n");
}

#[test]
fn stderr_pipe_read() {
    let (distro, _home) = local_distro();
    let mut cmd = distro.command("echo warning >&2");
    let mut stderr = cmd.stderr_pipe().unwrap();
    cmd.start().unwrap();
    let mut text = String::new();
    stderr.read_to_string(&mut text).unwrap();
    cmd.wait().unwrap();
    assert_eq!(text, "warning\n");
}

#[test]
fn regular_files_are_bridged() {
    let (distro, _home) = local_distro();
    let tmpdir = TempDir::new().unwrap();
    let input = tmpdir.path().join("input");
    let output = tmpdir.path().join("output");
    fs::write(&input, "from a file\n").unwrap();

    distro
        .command("cat")
        .stdin(File::open(&input).unwrap())
        .stdout(File::create(&output).unwrap())
        .run()
        .unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "from a file\n");
}

#[test]
fn native_pipe_passed_through() {
    let (distro, _home) = local_distro();
    let (mut read, write) = crate::posix::pipe().unwrap();
    distro
        .command("echo direct")
        .stdout(Output::File(write))
        .run()
        .unwrap();
    // The process held the only write end besides ours, which was released after start.
    let mut text = String::new();
    read.read_to_string(&mut text).unwrap();
    assert_eq!(text, "direct\n");
}

#[test]
fn explicit_reader_input() {
    let (distro, _home) = local_distro();
    let reader: Box<dyn Read + Send> = Box::new(&b"one\ntwo\n"[..]);
    let cmd = distro.command("wc -l").stdin(Input::Reader(reader));
    assert_eq!(stdout_of(cmd).trim(), "2");
}

#[test]
fn timeout_kills_process() {
    let (distro, _home) = local_distro();
    let started = Instant::now();
    let err = distro
        .command("sleep 10")
        .timeout(Duration::from_millis(200))
        .run()
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(CancelCause::DeadlineExceeded)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn unregistered_distro() {
    let launcher = Arc::new(LocalLauncher::new());
    launcher.register("gone", env::temp_dir());
    assert!(launcher.unregister("gone"));
    assert!(!launcher.unregister("gone"));
    let distro = Distro::new("gone", launcher);
    assert!(!distro.is_registered().unwrap());
    assert!(matches!(
        distro.command("true").run(),
        Err(Error::NotRegistered(_))
    ));
}

#[test]
fn nul_in_distro_name() {
    let launcher = Arc::new(LocalLauncher::new());
    let distro = Distro::new("bad\0name", launcher);
    assert!(matches!(
        distro.command("true").run(),
        Err(Error::Registration { .. })
    ));
}

#[test]
fn nul_in_command() {
    let (distro, _home) = local_distro();
    match distro.command("echo\0foo").run() {
        Err(Error::Launch { source, .. }) => {
            assert_eq!(source.kind(), std::io::ErrorKind::InvalidInput)
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn shell_exit_code() {
    let (distro, _home) = local_distro();
    distro.shell().command("true").run().unwrap();
    let err = distro.shell().command("exit 5").run().unwrap_err();
    match err {
        Error::Exit(e) => assert_eq!(e.code(), Some(5)),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn shell_use_cwd() {
    let (distro, _home) = local_distro();
    let here = fs::canonicalize(env::current_dir().unwrap()).unwrap();
    let check = format!("test \"$(pwd -P)\" = {:?}", here.to_str().unwrap());
    distro.shell().command(check).use_cwd().run().unwrap();
}
