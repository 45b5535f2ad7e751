mod cancel;
mod common;
#[cfg(unix)]
mod local;
mod wiring;

use crate::{
    BoundedOutput, CancelToken, Capture, Cmd, Distro, Error, ExitStatus, PipeReader, PipeWriter,
    SharedBuffer, SharedWriter,
};

fn assert_send<T: Send>() {}
fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn public_types_are_send_and_sync() {
    assert_send_sync::<Distro>();
    assert_send_sync::<CancelToken>();
    assert_send_sync::<Error>();
    assert_send_sync::<ExitStatus>();
    assert_send_sync::<BoundedOutput>();
    assert_send_sync::<SharedBuffer>();
    assert_send_sync::<SharedWriter>();
    assert_send_sync::<PipeReader>();
    assert_send_sync::<PipeWriter>();
    assert_send::<Cmd>();
    assert_send::<Capture>();
}

#[test]
fn exit_status_display() {
    assert_eq!(ExitStatus::from_code(3).to_string(), "exit code 3");
    assert_eq!(ExitStatus::from_signal(9).to_string(), "signal 9");
    assert!(ExitStatus::from_code(0).success());
    assert!(!ExitStatus::from_signal(15).success());
    assert!(!ExitStatus::undetermined().success());
    assert_eq!(ExitStatus::undetermined().code(), None);
}
