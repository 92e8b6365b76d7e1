use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::time::Duration;

/// Fixed reference instant of a session's clock track, in audio-clock
/// seconds. Set once when the clock source starts and immutable until the
/// session is reset; all later timeline arithmetic is relative to it.
#[derive(Debug, Clone, Copy)]
pub struct ClockAnchor {
    pub start: f64,
    pub loop_end: f64,
}

impl ClockAnchor {
    pub fn new(start: f64, loop_end: f64) -> Self {
        Self { start, loop_end }
    }

    /// The instant the loop iteration playing at `now` ends. Always a whole
    /// number of loop windows past the anchor and never before `now`, so an
    /// in-flight iteration is never cut short.
    pub fn loop_release_instant(&self, now: f64) -> f64 {
        let elapsed = (now - self.start).max(0.0);
        let iterations = (elapsed / self.loop_end).ceil();
        self.start + iterations * self.loop_end
    }

    /// The absolute instant full-mix playback must begin: the release
    /// boundary plus the configured stem start delay.
    pub fn mix_start_instant(&self, now: f64, vocal_start_delay: f64) -> f64 {
        self.loop_release_instant(now) + vocal_start_delay
    }
}

/// Handle to a pending deferred event. Cancelling, or dropping the handle,
/// stops the timer from firing; keep it alive until the event is due.
pub struct TimerHandle {
    cancel_tx: Sender<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(());
    }
}

/// Fire `payload` into `tx` after `delay` of wall time, unless cancelled
/// first. The receiver is expected to check its generation token before
/// acting, so a fire that races a cancel is harmless.
pub fn schedule<T: Send + 'static>(delay: Duration, payload: T, tx: Sender<T>) -> TimerHandle {
    let (cancel_tx, cancel_rx) = bounded::<()>(1);
    std::thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(delay) {
            let _ = tx.send(payload);
        }
    });
    TimerHandle { cancel_tx }
}
