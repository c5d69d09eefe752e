//! TTL expiry scheduler: a min-heap of `(deadline, iface, ip)` with a
//! single worker that sleeps until the earliest deadline, then removes all
//! entries at or before `now`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Invoked by the scheduler when a mark's deadline has passed. Failures are
/// logged and retried once, then dropped.
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    async fn expire(&self, iface: &str, ip: IpAddr) -> Result<(), String>;
}

#[derive(PartialEq, Eq)]
struct Entry {
    deadline: Instant,
    iface: String,
    ip: IpAddr,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Scheduler {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    notify: Notify,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        })
    }

    /// Insert/update is O(log n). A later call to mark the same
    /// `(iface, ip)` simply adds another heap entry; the worker ignores
    /// stale entries by checking the backend's live deadline at fire time,
    /// so no explicit decrease/increase-key is needed.
    pub fn schedule(&self, iface: String, ip: IpAddr, deadline: Instant) {
        let mut heap = self.heap.lock();
        let wake_earlier = heap.peek().map(|Reverse(e)| deadline < e.deadline).unwrap_or(true);
        heap.push(Reverse(Entry { deadline, iface, ip }));
        drop(heap);
        if wake_earlier {
            self.notify.notify_one();
        }
    }

    /// Runs until `cancel` fires; completes within bounded time on
    /// cancellation.
    pub async fn run<H, L>(self: Arc<Self>, handler: Arc<H>, live_deadline: L, cancel: CancellationToken)
    where
        H: ExpiryHandler + 'static,
        L: Fn(&str, IpAddr) -> Option<Instant> + Send + Sync + 'static,
    {
        loop {
            let next_wait = {
                let heap = self.heap.lock();
                heap.peek().map(|Reverse(e)| e.deadline.saturating_duration_since(Instant::now()))
            };

            let sleep = match next_wait {
                Some(d) => tokio::time::sleep(d),
                None => tokio::time::sleep(Duration::from_secs(3600)),
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep => {}
                _ = self.notify.notified() => continue,
            }

            let now = Instant::now();
            let due: Vec<Entry> = {
                let mut heap = self.heap.lock();
                let mut due = Vec::new();
                while let Some(Reverse(entry)) = heap.peek() {
                    if entry.deadline > now {
                        break;
                    }
                    let Reverse(entry) = heap.pop().unwrap();
                    due.push(entry);
                }
                due
            };

            for entry in due {
                if live_deadline(&entry.iface, entry.ip).map(|d| d > now).unwrap_or(false) {
                    continue;
                }
                let mut attempt = handler.expire(&entry.iface, entry.ip).await;
                if attempt.is_err() {
                    attempt = handler.expire(&entry.iface, entry.ip).await;
                }
                if let Err(e) = attempt {
                    tracing::warn!(iface = %entry.iface, ip = %entry.ip, error = %e, "mark expiry failed after retry, dropping");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl ExpiryHandler for CountingHandler {
        async fn expire(&self, _iface: &str, _ip: IpAddr) -> Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn expires_after_deadline() {
        let scheduler = Scheduler::new();
        let handler = Arc::new(CountingHandler { count: AtomicUsize::new(0) });
        let cancel = CancellationToken::new();

        scheduler.schedule("wan1".into(), "10.0.0.1".parse().unwrap(), Instant::now() + Duration::from_millis(30));

        let run_scheduler = scheduler.clone();
        let run_handler = handler.clone();
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_scheduler.run(run_handler, |_, _| None, run_cancel).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_worker_promptly() {
        let scheduler = Scheduler::new();
        let handler = Arc::new(CountingHandler { count: AtomicUsize::new(0) });
        let cancel = CancellationToken::new();

        let run_scheduler = scheduler.clone();
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_scheduler.run(handler, |_, _| None, run_cancel).await;
        });

        let start = Instant::now();
        cancel.cancel();
        task.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
