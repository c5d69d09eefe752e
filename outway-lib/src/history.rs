//! Bounded in-memory ring of recent query outcomes, read by an external
//! admin UI. Disabled by default; `history.enabled` turns it on.

use std::collections::VecDeque;
use std::time::Duration;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use parking_lot::Mutex;

use crate::types::{QueryOutcome, SourceTag};

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub fqdn: String,
    pub qtype: RecordType,
    pub source: Option<SourceTag>,
    pub rcode: ResponseCode,
    pub answer_count: usize,
    pub elapsed: Duration,
}

impl From<QueryOutcome> for HistoryEntry {
    fn from(outcome: QueryOutcome) -> Self {
        Self {
            fqdn: outcome.fqdn,
            qtype: outcome.qtype,
            source: outcome.source,
            rcode: outcome.rcode,
            answer_count: outcome.answer_count,
            elapsed: outcome.elapsed,
        }
    }
}

pub struct History {
    enabled: bool,
    max_entries: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl History {
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        Self {
            enabled,
            max_entries: max_entries.max(1),
            entries: Mutex::new(VecDeque::with_capacity(max_entries.max(1))),
        }
    }

    pub fn record(&self, outcome: QueryOutcome) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(outcome.into());
    }

    /// Snapshots the ring, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(fqdn: &str) -> QueryOutcome {
        QueryOutcome {
            fqdn: fqdn.to_string(),
            qtype: RecordType::A,
            source: Some(SourceTag::Cache),
            rcode: ResponseCode::NoError,
            answer_count: 1,
            elapsed: Duration::from_millis(1),
        }
    }

    #[test]
    fn disabled_history_records_nothing() {
        let history = History::new(false, 10);
        history.record(outcome("example.com"));
        assert!(history.is_empty());
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let history = History::new(true, 2);
        history.record(outcome("a.com"));
        history.record(outcome("b.com"));
        history.record(outcome("c.com"));
        let recent = history.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].fqdn, "c.com");
        assert_eq!(recent[1].fqdn, "b.com");
    }

    #[test]
    fn recent_respects_limit() {
        let history = History::new(true, 10);
        for name in ["a.com", "b.com", "c.com"] {
            history.record(outcome(name));
        }
        assert_eq!(history.recent(1).len(), 1);
    }
}
