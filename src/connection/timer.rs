//! One-shot timers for the connection loop.
//!
//! A timer is a detached thread that sleeps and then sends a message back
//! into the loop's command channel. Cancellation is bookkeeping at receipt:
//! the loop stamps each scheduled message with a generation counter and
//! ignores messages whose generation is stale. Firing into a dropped
//! channel is fine, the send just fails.

use std::thread;
use std::time::Duration;

use crossbeam::channel::Sender;

/// Deliver `msg` on `tx` after `delay`.
pub fn schedule<T: Send + 'static>(delay: Duration, tx: Sender<T>, msg: T) {
    thread::Builder::new()
        .name("chatlink-timer".into())
        .spawn(move || {
            thread::sleep(delay);
            let _ = tx.send(msg);
        })
        .map(|_| ())
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to spawn timer thread");
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn delivers_after_delay() {
        let (tx, rx) = channel::unbounded();
        schedule(Duration::from_millis(5), tx, 42u32);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(42));
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (tx, rx) = channel::unbounded::<u32>();
        drop(rx);
        schedule(Duration::from_millis(1), tx, 7);
        thread::sleep(Duration::from_millis(20));
    }
}
