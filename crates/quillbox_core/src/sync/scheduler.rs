//! Trailing-edge coalescing timer.
//!
//! Every `arm` restarts the countdown; the action runs once the countdown
//! elapses without another `arm`. The action is spawned detached, so a later
//! `arm` or `cancel` never interrupts an action that already started.
//!
//! The scheduler keeps a handle on the runtime it was built in, so `arm` can
//! be called from threads outside that runtime.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub struct CoalescingScheduler {
    delay: Duration,
    runtime: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CoalescingScheduler {
    /// Binds to the current runtime. Panics outside a tokio runtime; use
    /// [`CoalescingScheduler::with_handle`] there.
    pub fn new(delay: Duration) -> Self {
        Self::with_handle(delay, Handle::current())
    }

    pub fn with_handle(delay: Duration, runtime: Handle) -> Self {
        Self {
            delay,
            runtime,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)starts the countdown for `fire` on the bound runtime.
    pub fn arm<F, Fut>(&self, fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let runtime = self.runtime.clone();
        let countdown = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            runtime.spawn(fire());
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.replace(countdown) {
            previous.abort();
        }
    }

    /// Drops a pending countdown. Returns whether one was still waiting.
    pub fn cancel(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.take() {
            Some(countdown) => {
                let waiting = !countdown.is_finished();
                countdown.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|countdown| !countdown.is_finished())
    }
}

impl Drop for CoalescingScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::CoalescingScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counter_action(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_inside_window_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = CoalescingScheduler::new(Duration::from_secs(30));

        for _ in 0..5 {
            scheduler.arm(counter_action(&fired));
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_action() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = CoalescingScheduler::new(Duration::from_secs(1));
        scheduler.arm(counter_action(&fired));
        assert!(scheduler.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn arming_from_a_plain_thread_runs_on_the_bound_runtime() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = Arc::new(CoalescingScheduler::new(Duration::from_secs(2)));

        let remote = Arc::clone(&scheduler);
        let action = counter_action(&fired);
        std::thread::spawn(move || remote.arm(action))
            .join()
            .unwrap();
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
