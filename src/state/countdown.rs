use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use utoipa::ToSchema;
use uuid::Uuid;

/// What a countdown does when it elapses.
///
/// `ForceStart` is the auto-start variant; hosts cannot cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum CountdownKind {
    MatchStart,
    ForceStart,
}

impl CountdownKind {
    pub fn is_host_cancellable(self) -> bool {
        matches!(self, CountdownKind::MatchStart)
    }
}

/// How the countdown's delay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Elapsed,
    Skipped,
    Stopped,
}

/// The room-held half of a running countdown.
///
/// At most one exists per room. Time remaining is recomputed from the clock
/// on demand, never stored as a decrementing value, so late joiners read an
/// accurate figure.
pub struct ActiveCountdown {
    pub id: Uuid,
    pub kind: CountdownKind,
    pub duration: Duration,
    pub started_at: Instant,
    stop: Option<oneshot::Sender<()>>,
    skip: Option<oneshot::Sender<()>>,
    done: watch::Receiver<bool>,
}

impl ActiveCountdown {
    pub fn time_remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started_at.elapsed())
    }

    /// Signal the background task to cancel without running its completion.
    ///
    /// The caller owns the room lock and clears the countdown slot itself, so
    /// the replacement is visible as soon as this returns.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Race the countdown to its end; the completion still runs.
    ///
    /// Returns a receiver resolving once the completion has finished. Await it
    /// only after releasing the room lock: the background task needs that lock
    /// to run the completion.
    pub fn skip_to_end(&mut self) -> watch::Receiver<bool> {
        if let Some(skip) = self.skip.take() {
            let _ = skip.send(());
        }
        self.done.clone()
    }

    /// Receiver resolving when the background task has fully finished.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }
}

/// The task-held half of a running countdown.
pub struct CountdownWakeup {
    duration: Duration,
    stop: oneshot::Receiver<()>,
    skip: oneshot::Receiver<()>,
    done: watch::Sender<bool>,
}

impl CountdownWakeup {
    /// Sleep until the countdown is due, skipped, or stopped.
    ///
    /// A dropped room (which drops the [`ActiveCountdown`] and with it both
    /// signal senders) reads as a stop.
    pub async fn wait(&mut self) -> CountdownOutcome {
        tokio::select! {
            biased;
            _ = &mut self.stop => CountdownOutcome::Stopped,
            _ = &mut self.skip => CountdownOutcome::Skipped,
            _ = tokio::time::sleep(self.duration) => CountdownOutcome::Elapsed,
        }
    }

    /// Mark the countdown fully finished, waking `skip_to_end` awaiters.
    pub fn finish(self) {
        let _ = self.done.send(true);
    }
}

/// Create the paired halves of a new countdown.
pub fn begin(kind: CountdownKind, duration: Duration) -> (ActiveCountdown, CountdownWakeup) {
    let (stop_tx, stop_rx) = oneshot::channel();
    let (skip_tx, skip_rx) = oneshot::channel();
    let (done_tx, done_rx) = watch::channel(false);

    let active = ActiveCountdown {
        id: Uuid::new_v4(),
        kind,
        duration,
        started_at: Instant::now(),
        stop: Some(stop_tx),
        skip: Some(skip_tx),
        done: done_rx,
    };
    let wakeup = CountdownWakeup {
        duration,
        stop: stop_rx,
        skip: skip_rx,
        done: done_tx,
    };
    (active, wakeup)
}

/// Await a completion receiver handed out by [`ActiveCountdown::skip_to_end`].
pub async fn wait_done(mut done: watch::Receiver<bool>) {
    let _ = done.wait_for(|finished| *finished).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn countdown_elapses_after_its_duration() {
        let (_active, mut wakeup) = begin(CountdownKind::MatchStart, Duration::from_secs(60));
        assert_eq!(wakeup.wait().await, CountdownOutcome::Elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_wins_over_the_timer() {
        let (mut active, mut wakeup) = begin(CountdownKind::MatchStart, Duration::from_secs(60));
        active.stop();
        assert_eq!(wakeup.wait().await, CountdownOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_races_ahead_of_the_timer() {
        let (mut active, mut wakeup) = begin(CountdownKind::MatchStart, Duration::from_secs(60));
        let done = active.skip_to_end();
        assert_eq!(wakeup.wait().await, CountdownOutcome::Skipped);
        wakeup.finish();
        wait_done(done).await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_room_half_reads_as_stop() {
        let (active, mut wakeup) = begin(CountdownKind::ForceStart, Duration::from_secs(60));
        drop(active);
        assert_eq!(wakeup.wait().await, CountdownOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn time_remaining_tracks_the_clock() {
        let (active, _wakeup) = begin(CountdownKind::MatchStart, Duration::from_secs(60));
        assert_eq!(active.time_remaining(), Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(active.time_remaining(), Duration::from_secs(45));
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(active.time_remaining(), Duration::ZERO);
    }
}
