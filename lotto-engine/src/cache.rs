use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use lotto_db::models::DrawRecord;

use crate::diagnostics::{run_full_diagnostics, FullDiagnostics};

/// Clé de contenu exacte d'une séquence : concaténation des empreintes de tirages.
pub fn sequence_key(draws: &[DrawRecord]) -> String {
    let mut key = String::with_capacity(draws.len() * 24);
    for d in draws {
        key.push_str(&d.signature());
        key.push('|');
    }
    key
}

/// Cache borné des diagnostics, éviction dans l'ordre d'insertion.
pub struct DiagnosticsCache {
    capacity: usize,
    entries: HashMap<String, Arc<FullDiagnostics>>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl DiagnosticsCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, draws: &[DrawRecord]) -> Arc<FullDiagnostics> {
        let key = sequence_key(draws);
        if let Some(hit) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(hit);
        }
        self.misses += 1;
        let diagnostics = Arc::new(run_full_diagnostics(draws));
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, Arc::clone(&diagnostics));
        diagnostics
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotto_db::models::make_test_draws;

    #[test]
    fn test_hit_returns_same_instance() {
        let draws = make_test_draws(40, 49, 1);
        let mut cache = DiagnosticsCache::new(4);
        let a = cache.get(&draws);
        let b = cache.get(&draws);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_distinct_sequences_distinct_entries() {
        let draws = make_test_draws(40, 49, 1);
        let other = make_test_draws(40, 49, 2);
        let mut cache = DiagnosticsCache::new(4);
        let a = cache.get(&draws);
        let b = cache.get(&other);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.chi_square.statistic, b.chi_square.statistic);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_fifo_eviction() {
        let draws = make_test_draws(30, 49, 3);
        let mut cache = DiagnosticsCache::new(2);
        let first = cache.get(&draws[..10]);
        cache.get(&draws[..20]);
        cache.get(&draws[..30]);
        assert_eq!(cache.len(), 2);
        let again = cache.get(&draws[..10]);
        assert!(!Arc::ptr_eq(&first, &again));
        cache.clear();
        assert!(cache.is_empty());
    }
}
