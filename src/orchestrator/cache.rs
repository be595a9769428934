//! Response cache keyed by the normalized request
//!
//! LRU with an optional TTL. Concurrent requests for the same key may both
//! compute; the later insert simply overwrites the earlier one.

use super::response::{OrchestrationRequest, OrchestrationResponse};
use lru::LruCache;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// SHA-256 hex digest of the canonical JSON of the request
pub fn cache_key(request: &OrchestrationRequest) -> String {
    // serde_json maps are ordered, so the encoding is canonical
    let canonical = json!({
        "query": request.normalized_query(),
        "constraints": request.constraints,
        "preferred_providers": request.preferred_providers,
        "clarification_answers": request.clarification_answers,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

struct CachedResponse {
    response: OrchestrationResponse,
    inserted_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedResponse>>,
    ttl: Option<Duration>,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<OrchestrationResponse> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(key) {
            Some(entry) => self
                .ttl
                .is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl),
            None => return None,
        };

        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.response.clone())
    }

    pub fn insert(&self, key: String, response: OrchestrationResponse) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.put(
            key,
            CachedResponse {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::response::ClarificationResponse;
    use crate::router::RoutingConstraints;

    fn response() -> OrchestrationResponse {
        OrchestrationResponse::Clarification(ClarificationResponse {
            questions: vec![],
            suggestions: vec![],
        })
    }

    #[test]
    fn test_key_ignores_case_and_spacing() {
        let a = OrchestrationRequest::new("Summarize  the Report");
        let b = OrchestrationRequest::new("summarize the report ");
        assert_eq!(cache_key(&a), cache_key(&b));
        assert_eq!(cache_key(&a).len(), 64);
    }

    #[test]
    fn test_key_covers_constraints_and_answers() {
        let base = OrchestrationRequest::new("summarize the report");
        let constrained = base.clone().with_constraints(RoutingConstraints {
            max_cost: Some(0.01),
            ..Default::default()
        });
        let answered = base.clone().with_answer("data_source", "s3");
        assert_ne!(cache_key(&base), cache_key(&constrained));
        assert_ne!(cache_key(&base), cache_key(&answered));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::new(2, None);
        cache.insert("a".to_string(), response());
        cache.insert("b".to_string(), response());
        assert!(cache.get("a").is_some());
        cache.insert("c".to_string(), response());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entries_dropped() {
        let cache = ResponseCache::new(4, Some(Duration::ZERO));
        cache.insert("a".to_string(), response());
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }
}
