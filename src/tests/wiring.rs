use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::exec::{Input, Output};
use crate::wiring::{CopyResults, Wiring};
use crate::{Error, SharedBuffer, SharedWriter, StandardStream};

#[test]
fn unset_streams_need_no_copying() {
    let mut wiring = Wiring::default();
    let ends = wiring.wire(None, None, None).unwrap();
    assert!(!Arc::ptr_eq(&ends.stdout, &ends.stderr));
    assert!(wiring.take_copy_tasks().is_empty());
    wiring.release_after_start();
}

#[test]
fn in_memory_streams_are_bridged() {
    let mut wiring = Wiring::default();
    let input = Input::Reader(Box::new(&b"data"[..]));
    wiring
        .wire(
            Some(input),
            Some(Output::Writer(SharedBuffer::new().writer())),
            Some(Output::Writer(SharedBuffer::new().writer())),
        )
        .unwrap();
    assert_eq!(wiring.take_copy_tasks().len(), 3);
    wiring.release_all();
}

#[test]
fn same_writer_gets_one_task() {
    let mut wiring = Wiring::default();
    let sink = SharedWriter::new(Vec::new());
    let ends = wiring
        .wire(
            None,
            Some(Output::Writer(sink.clone())),
            Some(Output::Writer(sink)),
        )
        .unwrap();
    assert!(Arc::ptr_eq(&ends.stdout, &ends.stderr));
    assert_eq!(wiring.take_copy_tasks().len(), 1);
    wiring.release_all();
}

#[test]
fn native_pipe_is_not_bridged() {
    let mut wiring = Wiring::default();
    let (read, _write) = crate::wiring::make_pipe().unwrap();
    wiring.wire(Some(Input::File(read)), None, None).unwrap();
    assert!(wiring.take_copy_tasks().is_empty());
    wiring.release_after_start();
}

#[test]
fn copy_results_report_first_failure() {
    let mut wiring = Wiring::default();
    let sink = SharedWriter::new(super::common::BrokenWriter);
    let ends = wiring
        .wire(None, Some(Output::Writer(sink)), None)
        .unwrap();
    (&*ends.stdout).write_all(b"lost").unwrap();
    drop(ends);
    wiring.release_after_start();
    let results = CopyResults::spawn(wiring.take_copy_tasks());
    match results.first_error() {
        Some(Error::Copy { stream, .. }) => assert_eq!(stream, StandardStream::Output),
        other => panic!("unexpected result {:?}", other),
    }
}

/// Writer that fails every write and counts the attempts.
struct CountingFailure(Arc<AtomicUsize>);

impl Write for CountingFailure {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::other("rejected"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn copy_results_keep_one_of_several_failures() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut wiring = Wiring::default();
    let ends = wiring
        .wire(
            None,
            Some(Output::Writer(SharedWriter::new(CountingFailure(attempts.clone())))),
            Some(Output::Writer(SharedWriter::new(CountingFailure(attempts.clone())))),
        )
        .unwrap();
    (&*ends.stdout).write_all(b"out").unwrap();
    (&*ends.stderr).write_all(b"err").unwrap();
    drop(ends);
    wiring.release_after_start();

    let results = CopyResults::spawn(wiring.take_copy_tasks());
    match results.first_error() {
        Some(Error::Copy { stream, .. }) => {
            assert!(matches!(stream, StandardStream::Output | StandardStream::Error))
        }
        other => panic!("unexpected result {:?}", other),
    }
    // Both tasks ran to completion before the first error was returned.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn copy_results_all_ok() {
    let mut wiring = Wiring::default();
    let buf = SharedBuffer::new();
    let ends = wiring
        .wire(
            Some(Input::Reader(Box::new(&b""[..]))),
            Some(Output::Writer(buf.writer())),
            None,
        )
        .unwrap();
    drop(ends);
    wiring.release_after_start();
    let results = CopyResults::spawn(wiring.take_copy_tasks());
    assert!(results.first_error().is_none());
}
