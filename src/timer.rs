use std::{
    ops::ControlFlow,
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{
        self,
        Instant,
        MissedTickBehavior,
    },
};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a periodic task. Cancelling is idempotent and also happens on
/// drop, so a handle can never outlive its owner.
#[derive(Debug, Default)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// A handle with nothing scheduled.
    pub fn idle() -> Self {
        Self { task: None }
    }

    /// Calls `on_tick` every `period`, first after one full period, until it
    /// returns `ControlFlow::Break` or the handle is cancelled. Ticks missed
    /// while the runtime was stalled are dropped, not replayed.
    pub fn every<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let start = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if on_tick().is_break() {
                    break;
                }
            }
        });
        Self { task: Some(task) }
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
