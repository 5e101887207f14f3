use std::time::SystemTime;

use dashmap::DashMap;

/// One URL-test measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlTestHistory {
    pub time: SystemTime,
    pub delay: u16,
}

/// Concurrent per-tag latency history. Shared between the health checker,
/// which writes probe results, and the url-test groups, which read them to
/// pick a member.
#[derive(Default)]
pub struct UrlTestHistoryStorage {
    entries: DashMap<String, UrlTestHistory>,
}

impl UrlTestHistoryStorage {
    pub fn load(&self, tag: &str) -> Option<UrlTestHistory> {
        self.entries.get(tag).map(|entry| entry.value().clone())
    }

    pub fn store(&self, tag: String, history: UrlTestHistory) {
        self.entries.insert(tag, history);
    }

    pub fn delete(&self, tag: &str) {
        self.entries.remove(tag);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
