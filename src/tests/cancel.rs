use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::{Finish, Watcher};
use crate::{CancelCause, CancelToken, ExitStatus, GuestProcess};

#[test]
fn fresh_token_is_live() {
    let token = CancelToken::new();
    assert!(!token.is_cancelled());
    assert_eq!(token.cause(), None);
    assert_eq!(token.deadline(), None);
}

#[test]
fn cancel_is_sticky_and_shared() {
    let token = CancelToken::new();
    let clone = token.clone();
    clone.cancel();
    clone.cancel();
    assert_eq!(token.cause(), Some(CancelCause::Cancelled));
}

#[test]
fn deadline_expires() {
    let token = CancelToken::with_timeout(Duration::from_millis(20));
    assert!(!token.is_cancelled());
    thread::sleep(Duration::from_millis(40));
    assert_eq!(token.cause(), Some(CancelCause::DeadlineExceeded));
    // Cancelling after expiry keeps the original cause.
    token.cancel();
    assert_eq!(token.cause(), Some(CancelCause::DeadlineExceeded));
}

#[test]
fn past_deadline() {
    let token = CancelToken::with_deadline(Instant::now());
    assert_eq!(token.cause(), Some(CancelCause::DeadlineExceeded));
}

#[test]
fn race_first_settle_wins() {
    let token = CancelToken::new();
    let race = token.race();
    assert_eq!(race.settle(Finish::Exited), Finish::Exited);
    token.cancel();
    assert_eq!(race.wait(), Finish::Exited);
}

#[test]
fn race_on_cancelled_token_is_decided() {
    let token = CancelToken::new();
    token.cancel();
    let race = token.race();
    assert_eq!(
        race.settle(Finish::Exited),
        Finish::Cancelled(CancelCause::Cancelled)
    );
}

#[test]
fn race_wait_hits_deadline() {
    let token = CancelToken::with_timeout(Duration::from_millis(30));
    let race = token.race();
    assert_eq!(
        race.wait(),
        Finish::Cancelled(CancelCause::DeadlineExceeded)
    );
}

#[derive(Debug, Default)]
struct CountingProcess {
    kills: AtomicUsize,
}

impl GuestProcess for CountingProcess {
    fn wait(&self) -> io::Result<ExitStatus> {
        Ok(ExitStatus::from_code(0))
    }

    fn kill(&self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn watcher_kills_on_cancel() {
    let token = CancelToken::new();
    let process = Arc::new(CountingProcess::default());
    let watcher = Watcher::spawn(&token, process.clone());
    token.cancel();
    assert_eq!(watcher.finish(), Some(CancelCause::Cancelled));
    assert_eq!(process.kills.load(Ordering::SeqCst), 1);
}

#[test]
fn watcher_idle_on_exit() {
    let token = CancelToken::new();
    let process = Arc::new(CountingProcess::default());
    let watcher = Watcher::spawn(&token, process.clone());
    assert_eq!(watcher.finish(), None);
    token.cancel();
    assert_eq!(process.kills.load(Ordering::SeqCst), 0);
}
