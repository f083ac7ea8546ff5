use dashmap::DashMap;

use crate::schema::ExtractionResult;

/// Content-addressed store of validated extraction results.
pub struct ResponseCache {
    entries: DashMap<String, ExtractionResult>,
    max_entries: Option<usize>,
}

impl ResponseCache {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<ExtractionResult> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    pub fn insert(&self, key: String, result: ExtractionResult) {
        if let Some(max_entries) = self.max_entries {
            if max_entries > 0 && self.entries.len() >= max_entries && !self.entries.contains_key(&key) {
                // Simple eviction: clear 25% when full
                let to_remove: Vec<_> = self
                    .entries
                    .iter()
                    .take((max_entries / 4).max(1))
                    .map(|r| r.key().clone())
                    .collect();
                for key in to_remove {
                    self.entries.remove(&key);
                }
            }
        }
        self.entries.insert(key, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ExtractionDebug;

    #[test]
    fn test_eviction_when_full() {
        let cache = ResponseCache::new(Some(4));
        for i in 0..4 {
            cache.insert(format!("k{i}"), ExtractionResult::failed(ExtractionDebug::default()));
        }
        assert_eq!(cache.len(), 4);

        cache.insert("k4".into(), ExtractionResult::failed(ExtractionDebug::default()));
        assert_eq!(cache.len(), 4);
        assert!(cache.get("k4").is_some());
    }

    #[test]
    fn test_unbounded_by_default() {
        let cache = ResponseCache::new(None);
        for i in 0..100 {
            cache.insert(format!("k{i}"), ExtractionResult::failed(ExtractionDebug::default()));
        }
        assert_eq!(cache.len(), 100);

        cache.clear();
        assert!(cache.is_empty());
    }
}
