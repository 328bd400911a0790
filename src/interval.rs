//! A cancelable, restartable recurring timer.
//!
//! [`Interval`] gives the branch controller's staleness loop a "wake every D"
//! primitive whose deadline can be pushed back from outside the waiting task.
//! The waiting half owns the [`Interval`]; any number of [`IntervalHandle`]
//! clones can restart or cancel it through an internal channel.
//!
//! A wait observes exactly one wake per logical interval: a restart that
//! arrives mid-wait abandons the current deadline and starts a fresh one, it
//! never produces a spurious wake. Cancellation is permanent - every current
//! and future wait resolves [`Tick::Canceled`], which the owning task uses as
//! its loop-exit signal.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// The outcome of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The interval elapsed.
    Elapsed,
    /// The interval was canceled; no further ticks will be observed.
    Canceled,
}

#[derive(Debug)]
enum Command {
    /// Abandon the current wait and start over with this duration.
    Restart(Duration),
    /// Stop the interval permanently.
    Cancel,
}

/// The waiting half of a recurring timer.
#[derive(Debug)]
pub struct Interval {
    duration: Duration,
    canceled: bool,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// The controlling half of a recurring timer.
///
/// Cheap to clone; restarts and cancellations are delivered to the waiting
/// half even if no wait is currently in progress (they apply to the next one).
#[derive(Debug, Clone)]
pub struct IntervalHandle {
    duration: Duration,
    commands: mpsc::UnboundedSender<Command>,
}

impl IntervalHandle {
    /// Restarts the interval with its configured duration.
    pub fn restart(&self) {
        self.restart_with(self.duration);
    }

    /// Restarts the interval with the given duration.
    pub fn restart_with(&self, duration: Duration) {
        // A send error means the waiting half is gone; nothing left to restart.
        let _ = self.commands.send(Command::Restart(duration));
    }

    /// Cancels the interval permanently.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

impl Interval {
    /// Creates an interval with the given duration and a handle controlling it.
    pub fn new(duration: Duration) -> (Self, IntervalHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Interval {
                duration,
                canceled: false,
                commands: rx,
            },
            IntervalHandle {
                duration,
                commands: tx,
            },
        )
    }

    /// Blocks until the configured duration elapses or the interval is
    /// canceled. A restart received mid-wait abandons the current deadline.
    pub async fn next(&mut self) -> Tick {
        let duration = self.duration;
        self.next_with(duration).await
    }

    /// Like [`Interval::next`] but with an explicit duration for this wait.
    ///
    /// A restart received mid-wait also updates the duration used by
    /// subsequent [`Interval::next`] calls.
    pub async fn next_with(&mut self, duration: Duration) -> Tick {
        if self.canceled {
            return Tick::Canceled;
        }

        let mut deadline = Instant::now() + duration;

        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return Tick::Elapsed,

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Restart(d)) => {
                        self.duration = d;
                        deadline = Instant::now() + d;
                    }
                    // All handles dropping is equivalent to cancellation:
                    // nobody can ever restart the interval again.
                    Some(Command::Cancel) | None => {
                        self.canceled = true;
                        return Tick::Canceled;
                    }
                },
            }
        }
    }
}
