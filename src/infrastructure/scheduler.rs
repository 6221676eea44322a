use crate::domain::models::{RigEvent, TimerHandle, TimerKind};
use crate::domain::ports::Scheduler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Timers as sleeping tokio tasks that post `RigEvent::Timer` back onto the
/// controller queue.
pub struct TokioScheduler {
    runtime: Handle,
    tx: mpsc::UnboundedSender<RigEvent>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

impl TokioScheduler {
    /// Must be called from inside a tokio runtime
    pub fn new(tx: mpsc::UnboundedSender<RigEvent>) -> Self {
        Self {
            runtime: Handle::current(),
            tx,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, timer: TimerKind) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut pending) = pending.lock() {
                pending.remove(&id);
            }
            if tx.send(RigEvent::Timer(timer)).is_err() {
                debug!("Timer {:?} fired after the controller stopped", timer);
            }
        });

        match self.pending.lock() {
            Ok(mut pending) => {
                // A zero delay may already have finished and removed itself
                if !task.is_finished() {
                    pending.insert(id, task);
                }
            }
            Err(e) => error!("Timer table poisoned: {}", e),
        }
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let task = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&handle.0));
        if let Some(task) = task {
            debug!("Cancelled timer {}", handle.0);
            task.abort();
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tx);

        scheduler.schedule_once(Duration::from_millis(5), TimerKind::FirstShot { run: 3 });

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert!(matches!(event, RigEvent::Timer(TimerKind::FirstShot { run: 3 })));
    }

    #[tokio::test]
    async fn test_cancelled_timer_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tx);

        let handle =
            scheduler.schedule_once(Duration::from_millis(20), TimerKind::FirstShot { run: 1 });
        scheduler.cancel(handle);
        assert_eq!(scheduler.pending_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(80), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer delivered {:?}", result);
    }
}
