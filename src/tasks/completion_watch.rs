//! Zero-crossing watch background task

use std::{sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::state::TimerStore;

/// Background task that completes timers once their window closes.
///
/// The store removes a timer in the same critical section that broadcasts its
/// `completed` event, so overlapping ticks can never report an instance twice.
pub async fn completion_watch_task(store: Arc<TimerStore>, period: Duration) {
    info!("Starting completion watch task (every {}ms)", period.as_millis());

    let mut ticker = interval(period);
    // After a stall, check once rather than bursting through missed ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match store.reap_expired() {
            Ok(completed) => {
                for timer in completed {
                    info!(
                        "Completion delivered for {} (task={}, subtask={}, instance={})",
                        timer.user_id, timer.task_id, timer.subtask_id, timer.instance
                    );
                }
            }
            Err(e) => {
                error!("Completion watch failed: {}", e);
                continue;
            }
        }

        if let Ok(Some(deadline)) = store.next_deadline() {
            debug!("Next timer deadline in {}ms", deadline - store.now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::{Event, StartCommand},
        state::ManualClock,
    };

    #[tokio::test(start_paused = true)]
    async fn watch_completes_expired_timers() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(TimerStore::new(clock.clone(), 8));
        let mut rx = store.subscribe("u").unwrap();
        store
            .start(
                "u",
                StartCommand {
                    task_id: "t".into(),
                    subtask_id: "s".into(),
                    duration_minutes: 1.0,
                },
            )
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), Event::State { .. }));

        let handle = tokio::spawn(completion_watch_task(
            store.clone(),
            Duration::from_millis(250),
        ));
        clock.advance(60_000);
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(matches!(rx.recv().await.unwrap(), Event::Completed { .. }));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(rx.try_recv().is_err());
        handle.abort();
    }
}
