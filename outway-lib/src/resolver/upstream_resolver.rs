//! Coalesced upstream resolver: wraps the pool with the singleflight
//! coalescer and writes successful responses back into the cache.

use std::sync::Arc;

use async_trait::async_trait;

use super::{QueryContext, Resolver, ResolverOutcome};
use crate::cache::Cache;
use crate::coalescer::Coalescer;
use crate::error::Result;
use crate::types::{Question, SourceTag};
use crate::upstream::Pool;

pub struct UpstreamResolver {
    pool: Arc<Pool>,
    coalescer: Arc<Coalescer>,
    cache: Arc<Cache>,
}

impl UpstreamResolver {
    pub fn new(pool: Arc<Pool>, coalescer: Arc<Coalescer>, cache: Arc<Cache>) -> Self {
        Self { pool, coalescer, cache }
    }
}

#[async_trait]
impl Resolver for UpstreamResolver {
    async fn resolve(&self, ctx: &QueryContext, q: &Question) -> Result<Option<ResolverOutcome>> {
        let pool = self.pool.clone();
        let deadline = ctx.deadline;
        let key = q.clone();

        let message = self
            .coalescer
            .run(&key, move || {
                let pool = pool.clone();
                let q = key.clone();
                async move { pool.resolve(&q, deadline).await }
            })
            .await?;

        let min_rr_ttl = message.answers().iter().map(|r| r.ttl()).min().unwrap_or(0);
        self.cache.put(q.clone(), message.clone(), min_rr_ttl);

        Ok(Some(ResolverOutcome {
            message,
            source: SourceTag::Upstream,
        }))
    }
}
