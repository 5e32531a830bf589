use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Owns a spawned task; dropping the handle cancels it.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    pub fn cancel(self) {
        // Drop does the work.
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Calls `on_tick` every `period`, first after one full period. Stops when
/// `on_tick` returns false or after `max_ticks` calls.
pub fn spawn_periodic<F>(period: Duration, max_ticks: Option<u32>, mut on_tick: F) -> TaskHandle
where
    F: FnMut() -> bool + Send + 'static,
{
    TaskHandle::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fired = 0u32;
        loop {
            if max_ticks.is_some_and(|max| fired >= max) {
                break;
            }
            interval.tick().await;
            fired += 1;
            if !on_tick() {
                break;
            }
        }
    })
}
