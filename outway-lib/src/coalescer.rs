//! Singleflight request coalescing on `(fqdn, qtype)`.
//!
//! One in-flight `Shared` future per key, guarded by a `parking_lot::Mutex`
//! over the registry: a leader executes the call, followers clone the
//! `Shared` and await it, and the entry is removed from the registry once
//! the leader's future resolves so a later miss starts a fresh execution
//! rather than replaying a stale result forever.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::Question;

type SharedResult = Shared<std::pin::Pin<Box<dyn Future<Output = Arc<Result<hickory_proto::op::Message>>> + Send>>>;

#[derive(Default)]
pub struct Coalescer {
    inflight: Mutex<HashMap<Question, SharedResult>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` for `key` unless another caller's execution is already
    /// in-flight, in which case this call awaits that shared result
    /// instead.
    pub async fn run<F, Fut>(&self, key: &Question, f: F) -> Result<hickory_proto::op::Message>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<hickory_proto::op::Message>> + Send + 'static,
    {
        let existing = {
            let guard = self.inflight.lock();
            guard.get(key).cloned()
        };

        if let Some(shared) = existing {
            return (*shared.await).clone_result();
        }

        let fut: std::pin::Pin<Box<dyn Future<Output = Arc<Result<hickory_proto::op::Message>>> + Send>> =
            Box::pin(async move { Arc::new(f().await) });
        let shared = fut.shared();

        {
            let mut guard = self.inflight.lock();
            guard.insert(key.clone(), shared.clone());
        }

        let result = shared.await;

        {
            let mut guard = self.inflight.lock();
            guard.remove(key);
        }

        (*result).clone_result()
    }

    #[cfg(test)]
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}

trait CloneResult {
    fn clone_result(&self) -> Result<hickory_proto::op::Message>;
}

impl CloneResult for Result<hickory_proto::op::Message> {
    fn clone_result(&self) -> Result<hickory_proto::op::Message> {
        match self {
            Ok(m) => Ok(m.clone()),
            Err(e) => Err(Error::Internal(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Message;
    use hickory_proto::rr::RecordType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn single_key_single_execution_under_concurrency() {
        let coalescer = Arc::new(Coalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = Question::new("bar.example.com", RecordType::A);

        let mut handles = Vec::new();
        for _ in 0..100 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .run(&key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Message::new())
                    })
                    .await
            }));
        }

        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.inflight_count(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let coalescer = Coalescer::new();
        let a = Question::new("a.example.com", RecordType::A);
        let b = Question::new("b.example.com", RecordType::A);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_a = calls.clone();
        coalescer
            .run(&a, move || async move {
                calls_a.fetch_add(1, Ordering::SeqCst);
                Ok(Message::new())
            })
            .await
            .unwrap();

        let calls_b = calls.clone();
        coalescer
            .run(&b, move || async move {
                calls_b.fetch_add(1, Ordering::SeqCst);
                Ok(Message::new())
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeat_call_after_completion_runs_again() {
        let coalescer = Coalescer::new();
        let key = Question::new("repeat.example.com", RecordType::A);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            coalescer
                .run(&key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Message::new())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
