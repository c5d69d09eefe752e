//! Cache-backed resolver step.

use std::time::Instant;

use async_trait::async_trait;

use super::{QueryContext, Resolver, ResolverOutcome};
use crate::cache::Cache;
use crate::error::Result;
use crate::types::{Question, SourceTag};

pub struct CacheResolver {
    cache: std::sync::Arc<Cache>,
}

impl CacheResolver {
    pub fn new(cache: std::sync::Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Resolver for CacheResolver {
    async fn resolve(&self, _ctx: &QueryContext, q: &Question) -> Result<Option<ResolverOutcome>> {
        let Some(entry) = self.cache.get(q) else {
            return Ok(None);
        };

        let now = Instant::now();
        let remaining = entry.remaining_ttl(now).as_secs() as u32;
        let mut message = entry.message.clone();
        for answer in message.answers_mut() {
            answer.set_ttl(remaining);
        }

        Ok(Some(ResolverOutcome {
            message,
            source: SourceTag::Cache,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Message;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> QueryContext {
        QueryContext::new(Instant::now() + Duration::from_secs(1))
    }

    #[tokio::test]
    async fn hit_rewrites_ttl_downward() {
        let cache = Arc::new(Cache::new(10, Duration::from_secs(0), Duration::from_secs(3600)));
        let q = Question::new("foo.example.com", RecordType::A);

        let mut msg = Message::new();
        msg.add_answer(Record::from_rdata(
            Name::from_ascii("foo.example.com").unwrap(),
            60,
            RData::A(A("1.2.3.4".parse().unwrap())),
        ));
        cache.put(q.clone(), msg, 60);

        let resolver = CacheResolver::new(cache);
        let outcome = resolver.resolve(&ctx(), &q).await.unwrap().unwrap();
        let ttl = outcome.message.answers()[0].ttl();
        assert!(ttl <= 60);
    }

    #[tokio::test]
    async fn miss_is_not_applicable() {
        let cache = Arc::new(Cache::new(10, Duration::from_secs(0), Duration::from_secs(3600)));
        let resolver = CacheResolver::new(cache);
        let q = Question::new("missing.example.com", RecordType::A);
        assert!(resolver.resolve(&ctx(), &q).await.unwrap().is_none());
    }
}
