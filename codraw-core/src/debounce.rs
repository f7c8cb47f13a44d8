//! Activity debouncer.
//!
//! Watches the canvas mutation stream and fires a callback once mutations
//! have stopped arriving for a quiet period. A single timer is kept and reset
//! on every relevant event, so a burst of edits yields exactly one trigger.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::MutationEvent;

/// Default quiet period before the debouncer fires.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(2000);

/// Which events count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// How long mutations must stop before the trigger fires.
    pub quiet_period: Duration,
    /// Skip events written by the engine.
    pub ignore_engine: bool,
    /// Skip page metadata changes (layer bookkeeping).
    pub ignore_page_meta: bool,
}

impl DebounceConfig {
    /// Settings for auto-mode: user shape edits only.
    #[must_use]
    pub fn user_activity(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            ignore_engine: true,
            ignore_page_meta: true,
        }
    }

    /// Settings for persistence: every change counts.
    #[must_use]
    pub fn all_changes(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            ignore_engine: false,
            ignore_page_meta: false,
        }
    }

    fn counts(&self, event: &MutationEvent) -> bool {
        if self.ignore_engine && !event.is_user() {
            return false;
        }
        !(self.ignore_page_meta && !event.is_shape_change())
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::user_activity(DEFAULT_QUIET_PERIOD)
    }
}

/// Running debouncer. Dropping the handle stops it.
#[derive(Debug)]
pub struct ActivityDebouncer {
    task: JoinHandle<()>,
}

impl ActivityDebouncer {
    /// Spawn a debouncer over `events` that calls `on_settle` after each quiet
    /// period following activity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(
        mut events: broadcast::Receiver<MutationEvent>,
        config: DebounceConfig,
        on_settle: F,
    ) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let timer = tokio::time::sleep(config.quiet_period);
            tokio::pin!(timer);
            let mut armed = false;

            loop {
                tokio::select! {
                    () = &mut timer, if armed => {
                        armed = false;
                        tracing::debug!("Canvas activity settled");
                        on_settle();
                    }
                    received = events.recv() => {
                        let active = match received {
                            Ok(event) => config.counts(&event),
                            Err(RecvError::Lagged(skipped)) => {
                                tracing::debug!(skipped, "Debouncer lagged; treating as activity");
                                true
                            }
                            Err(RecvError::Closed) => break,
                        };
                        if active {
                            timer.as_mut().reset(Instant::now() + config.quiet_period);
                            armed = true;
                        }
                    }
                }
            }
        });
        Self { task }
    }

    /// Whether the debouncer task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ActivityDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::{MutationKind, Origin, ShapeId};

    fn event(origin: Origin, kind: MutationKind) -> MutationEvent {
        MutationEvent {
            kind,
            shape_id: Some(ShapeId::new()),
            origin,
            revision: 1,
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once() {
        let (tx, rx) = broadcast::channel(16);
        let (count, on_settle) = counter();
        let _debouncer = ActivityDebouncer::spawn(
            rx,
            DebounceConfig::user_activity(Duration::from_millis(2000)),
            on_settle,
        );

        for _ in 0..5 {
            tx.send(event(Origin::User, MutationKind::Updated)).expect("send");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_and_page_meta_events_are_ignored() {
        let (tx, rx) = broadcast::channel(16);
        let (count, on_settle) = counter();
        let _debouncer = ActivityDebouncer::spawn(
            rx,
            DebounceConfig::user_activity(Duration::from_millis(100)),
            on_settle,
        );

        tx.send(event(Origin::Engine, MutationKind::Created)).expect("send");
        tx.send(event(Origin::User, MutationKind::PageMeta)).expect("send");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_changes_counts_engine_writes() {
        let (tx, rx) = broadcast::channel(16);
        let (count, on_settle) = counter();
        let _debouncer = ActivityDebouncer::spawn(
            rx,
            DebounceConfig::all_changes(Duration::from_millis(100)),
            on_settle,
        );

        tx.send(event(Origin::Engine, MutationKind::Created)).expect("send");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_source_closes() {
        let (tx, rx) = broadcast::channel::<MutationEvent>(16);
        let (_count, on_settle) = counter();
        let debouncer = ActivityDebouncer::spawn(rx, DebounceConfig::default(), on_settle);
        drop(tx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(debouncer.is_finished());
    }
}
