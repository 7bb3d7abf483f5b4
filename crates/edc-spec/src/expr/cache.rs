use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use crate::expr::{Expression, ExpressionError};

const DEFAULT_CAPACITY: usize = 1_024;

/// Compiled expressions keyed by their source text.
///
/// Entries are immutable once inserted, so lookups never change evaluation
/// results. When the cache fills up it is cleared wholesale.
pub struct ExpressionCache {
    entries: RwLock<HashMap<String, Arc<Result<Expression, ExpressionError>>>>,
    capacity: usize,
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ExpressionCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Returns the compiled expression for `source`, compiling on first use.
    pub fn get(&self, source: &str) -> Arc<Result<Expression, ExpressionError>> {
        if let Ok(guard) = self.entries.read()
            && let Some(found) = guard.get(source)
        {
            return Arc::clone(found);
        }

        let compiled = Arc::new(Expression::compile(source));
        if let Ok(mut guard) = self.entries.write() {
            if guard.len() >= self.capacity {
                guard.clear();
            }
            guard.insert(source.to_string(), Arc::clone(&compiled));
        }
        compiled
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) static SHARED: LazyLock<ExpressionCache> = LazyLock::new(ExpressionCache::default);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_compiled_entries() {
        let cache = ExpressionCache::default();
        let first = cache.get("{a} + 1");
        let second = cache.get("{a} + 1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn caches_failures_too() {
        let cache = ExpressionCache::default();
        assert!(cache.get("{a} +").is_err());
        assert!(cache.get("{a} +").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clears_when_full() {
        let cache = ExpressionCache::with_capacity(2);
        cache.get("1");
        cache.get("2");
        cache.get("3");
        assert_eq!(cache.len(), 1);
    }
}
