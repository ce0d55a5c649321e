use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(15);

// 超过该条目数时清理过期记录。
const EVICT_THRESHOLD: usize = 256;

pub struct Deduplicator {
    window: Duration,
    last_accepted: HashMap<String, Instant>,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }

    pub fn accept(&mut self, tag_id: &str, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get_mut(tag_id) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
            *last = now;
            return true;
        }

        if self.last_accepted.len() >= EVICT_THRESHOLD {
            self.purge_expired(now);
        }
        self.last_accepted.insert(tag_id.to_string(), now);
        true
    }

    fn purge_expired(&mut self, now: Instant) {
        let window = self.window;
        self.last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}
