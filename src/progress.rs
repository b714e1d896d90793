//! Heartbeat reporter for long-running engine calls.
//!
//! The heartbeat thread only knows the start timestamp; success or failure is
//! always reported by the caller after the join.
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Run `work` on the calling thread while a companion thread emits periodic
/// "still working" lines. Both sides are joined before the result is
/// returned.
pub fn with_heartbeat<T>(label: &str, interval: Duration, work: impl FnOnce() -> T) -> T {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    thread::scope(|scope| {
        scope.spawn(move || heartbeat_loop(label, interval, done_rx));
        let result = work();
        let _ = done_tx.send(());
        result
    })
}

fn heartbeat_loop(label: &str, interval: Duration, done: mpsc::Receiver<()>) {
    let start = Instant::now();
    loop {
        match done.recv_timeout(interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let elapsed = start.elapsed().as_secs();
                let (minutes, seconds) = (elapsed / 60, elapsed % 60);
                if minutes == 0 {
                    println!("Still working on {label} for {seconds} seconds");
                } else {
                    println!(
                        "Still working on {label} for {minutes} minutes and {seconds} seconds"
                    );
                }
            }
        }
    }
}
