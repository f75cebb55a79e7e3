//! Periodic progress heartbeat
//!
//! A heartbeat belongs to exactly one playback session. It only signals the
//! owner; building and sending the progress report stays with the owner so
//! the player is never touched from the heartbeat task.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Shortest period a heartbeat will tick at
pub const MIN_PERIOD: Duration = Duration::from_millis(100);

pub struct Heartbeat {
    cancel: CancellationToken,
    playing: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Start ticking every `period`; the first tick fires one period from now
    ///
    /// `on_tick` runs only while the playing flag is set. Returning `false`
    /// from it ends the heartbeat (the receiver is gone). A zero `period` is
    /// raised to [`MIN_PERIOD`].
    pub fn start<F>(period: Duration, on_tick: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let cancel = CancellationToken::new();
        let (playing, playing_rx) = watch::channel(false);

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !*playing_rx.borrow() {
                            trace!("Heartbeat skipped while not playing");
                            continue;
                        }
                        if !on_tick() {
                            debug!("Heartbeat receiver gone");
                            break;
                        }
                    }
                }
            }
        });

        debug!(period_ms = period.as_millis() as u64, "Heartbeat started");
        Self {
            cancel,
            playing,
            task,
        }
    }

    /// Ticks are only delivered while playing
    pub fn set_playing(&self, playing: bool) {
        self.playing.send_replace(playing);
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    /// Cancel and wait for the task; no tick is delivered after this returns
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Heartbeat task panicked");
        }
        debug!("Heartbeat stopped");
    }
}
