//! Resolver chain: hosts → LAN/local-zone → cache → coalesced upstream.

pub mod cache_resolver;
pub mod hosts;
pub mod lan;
pub mod upstream_resolver;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hickory_proto::op::Message;

use crate::error::Result;
use crate::types::{Question, SourceTag};

/// Per-query deadline and cancellation token, threaded through every
/// resolver step and every outbound I/O call.
#[derive(Clone)]
pub struct QueryContext {
    pub deadline: Instant,
    pub cancel: tokio_util::sync::CancellationToken,
}

impl QueryContext {
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

pub struct ResolverOutcome {
    pub message: Message,
    pub source: SourceTag,
}

/// One step of the chain. `Ok(None)` means "not applicable"; the chain
/// continues to the next resolver.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, ctx: &QueryContext, q: &Question) -> Result<Option<ResolverOutcome>>;
}

/// Lets a chain step be built from a shared handle the caller also keeps
/// around for reload (e.g. `Arc<HostsResolver>`).
#[async_trait]
impl<T: Resolver + ?Sized> Resolver for Arc<T> {
    async fn resolve(&self, ctx: &QueryContext, q: &Question) -> Result<Option<ResolverOutcome>> {
        (**self).resolve(ctx, q).await
    }
}

/// Runs the ordered chain, stopping at the first resolver returning a
/// successful outcome. If every resolver errors or is not applicable, the
/// first encountered error is surfaced.
pub async fn resolve_chain(
    chain: &[Box<dyn Resolver>],
    ctx: &QueryContext,
    q: &Question,
) -> Result<Option<ResolverOutcome>> {
    let mut first_err = None;
    for resolver in chain {
        match resolver.resolve(ctx, q).await {
            Ok(Some(outcome)) => return Ok(Some(outcome)),
            Ok(None) => continue,
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::RecordType;

    struct NotApplicable;
    #[async_trait]
    impl Resolver for NotApplicable {
        async fn resolve(&self, _ctx: &QueryContext, _q: &Question) -> Result<Option<ResolverOutcome>> {
            Ok(None)
        }
    }

    struct Hit;
    #[async_trait]
    impl Resolver for Hit {
        async fn resolve(&self, _ctx: &QueryContext, _q: &Question) -> Result<Option<ResolverOutcome>> {
            Ok(Some(ResolverOutcome {
                message: Message::new(),
                source: SourceTag::Cache,
            }))
        }
    }

    #[tokio::test]
    async fn first_applicable_resolver_wins() {
        let chain: Vec<Box<dyn Resolver>> = vec![Box::new(NotApplicable), Box::new(Hit), Box::new(NotApplicable)];
        let ctx = QueryContext::new(Instant::now() + std::time::Duration::from_secs(1));
        let q = Question::new("example.com", RecordType::A);
        let outcome = resolve_chain(&chain, &ctx, &q).await.unwrap().unwrap();
        assert_eq!(outcome.source.as_str(), "cache");
    }

    #[tokio::test]
    async fn all_not_applicable_yields_none() {
        let chain: Vec<Box<dyn Resolver>> = vec![Box::new(NotApplicable), Box::new(NotApplicable)];
        let ctx = QueryContext::new(Instant::now() + std::time::Duration::from_secs(1));
        let q = Question::new("example.com", RecordType::A);
        assert!(resolve_chain(&chain, &ctx, &q).await.unwrap().is_none());
    }
}
