//! Cache of command templates.
//!
//! Templates are keyed by the identity of the compiled statement and the
//! shape of the parameter values. Concurrent first use of a key compiles once,
//! late callers wait on a per-key lock token and then read the published
//! template.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use relshape_error::Result;
use tracing::{debug, trace};

use crate::engine::QueryStatement;
use crate::rewrite::parameters::ParameterValues;
use crate::scalar::ScalarValue;
use crate::sqlgen::CommandTemplate;

/// Shape of a parameter value as far as compilation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterShape {
    Null,
    Value,
    /// Array value with some number of elements. Arrays holding nulls
    /// compile to different text than arrays without.
    Array { len: usize, has_nulls: bool },
}

impl ParameterShape {
    pub fn of(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::Null => Self::Null,
            ScalarValue::List(vals) => Self::Array {
                len: vals.len(),
                has_nulls: vals.iter().any(|v| v.is_null()),
            },
            _ => Self::Value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheKey {
    /// Compared by pointer, statements are never mutated once compiled.
    statement: Arc<QueryStatement>,
    /// Sorted by parameter name.
    fingerprint: Vec<(String, ParameterShape)>,
}

impl CacheKey {
    pub fn new(statement: &Arc<QueryStatement>, values: &ParameterValues) -> Self {
        let fingerprint = values
            .iter()
            .map(|(name, value)| (name.clone(), ParameterShape::of(value)))
            .collect();

        CacheKey {
            statement: statement.clone(),
            fingerprint,
        }
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.statement, &other.statement) && self.fingerprint == other.fingerprint
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.statement), state);
        self.fingerprint.hash(state);
    }
}

/// Point in time copy of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of times a template was compiled.
    pub compilations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
}

#[derive(Debug)]
pub struct CommandCache {
    templates: scc::HashCache<CacheKey, Arc<CommandTemplate>>,
    /// Lock tokens for keys currently being compiled.
    locks: scc::HashMap<CacheKey, Arc<Mutex<()>>>,
    counters: Counters,
}

impl CommandCache {
    pub fn new(capacity: usize) -> Self {
        CommandCache {
            templates: scc::HashCache::with_capacity(0, capacity),
            locks: scc::HashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Get the template for a key, compiling it if needed.
    ///
    /// `compile` returns the template and if it may be cached. Templates that
    /// can't be cached are compiled on every call.
    pub fn get_or_compile<F>(&self, key: &CacheKey, compile: F) -> Result<Arc<CommandTemplate>>
    where
        F: FnOnce() -> Result<(CommandTemplate, bool)>,
    {
        if let Some(template) = self.lookup(key) {
            return Ok(template);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let token = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .get()
            .clone();
        let _remove = TokenRemoval {
            locks: &self.locks,
            key,
        };
        let _guard = token.lock();

        // Someone else may have compiled while we waited.
        if let Some(template) = self.lookup(key) {
            return Ok(template);
        }

        self.counters.compilations.fetch_add(1, Ordering::Relaxed);
        let (template, cacheable) = compile()?;
        let template = Arc::new(template);

        if cacheable {
            // Only fails if the key is already present, which can't happen
            // while holding the token unless two tokens raced.
            let _ = self.templates.put(key.clone(), template.clone());
            debug!(sql = %template.sql, "cached command template");
        } else {
            debug!(sql = %template.sql, "command template not cacheable");
        }

        Ok(template)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            compilations: self.counters.compilations.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<CommandTemplate>> {
        let template = self.templates.read(key, |_, template| template.clone())?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        trace!("command cache hit");
        Some(template)
    }
}

/// Removes the lock token for a key when dropped.
struct TokenRemoval<'a> {
    locks: &'a scc::HashMap<CacheKey, Arc<Mutex<()>>>,
    key: &'a CacheKey,
}

impl Drop for TokenRemoval<'_> {
    fn drop(&mut self) {
        let _ = self.locks.remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::column_expr::ScopeId;
    use crate::expr::select_expr::SelectExpr;

    fn statement() -> Arc<QueryStatement> {
        Arc::new(QueryStatement {
            select: SelectExpr::new(ScopeId(0)),
        })
    }

    fn template(sql: &str) -> CommandTemplate {
        CommandTemplate {
            sql: sql.to_string(),
            parameters: Vec::new(),
        }
    }

    fn values(vals: &[(&str, ScalarValue)]) -> ParameterValues {
        vals.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn same_fingerprint_hits() {
        let cache = CommandCache::new(16);
        let stmt = statement();

        let a = cache
            .get_or_compile(&CacheKey::new(&stmt, &values(&[("p", 1.into())])), || {
                Ok((template("a"), true))
            })
            .unwrap();
        let b = cache
            .get_or_compile(&CacheKey::new(&stmt, &values(&[("p", 2.into())])), || {
                panic!("should not compile")
            })
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            CacheStats {
                hits: 1,
                misses: 1,
                compilations: 1
            },
            cache.stats()
        );
    }

    #[test]
    fn null_and_value_are_distinct() {
        let stmt = statement();
        let a = CacheKey::new(&stmt, &values(&[("p", 1.into())]));
        let b = CacheKey::new(&stmt, &values(&[("p", ScalarValue::Null)]));
        assert_ne!(a, b);
    }

    #[test]
    fn array_nulls_part_of_shape() {
        let with_nulls = ScalarValue::List(vec![1.into(), ScalarValue::Null]);
        let without = ScalarValue::List(vec![1.into(), 2.into()]);
        assert_eq!(
            ParameterShape::Array {
                len: 2,
                has_nulls: true
            },
            ParameterShape::of(&with_nulls)
        );
        assert_ne!(ParameterShape::of(&with_nulls), ParameterShape::of(&without));
    }

    #[test]
    fn statement_identity_not_structure() {
        let a = CacheKey::new(&statement(), &ParameterValues::new());
        let b = CacheKey::new(&statement(), &ParameterValues::new());
        assert_ne!(a, b);
    }

    #[test]
    fn uncacheable_compiles_every_time() {
        let cache = CommandCache::new(16);
        let key = CacheKey::new(&statement(), &ParameterValues::new());

        for _ in 0..3 {
            cache
                .get_or_compile(&key, || Ok((template("a"), false)))
                .unwrap();
        }
        assert_eq!(3, cache.stats().compilations);
        assert!(cache.is_empty());
    }

    #[test]
    fn compile_error_releases_token() {
        let cache = CommandCache::new(16);
        let key = CacheKey::new(&statement(), &ParameterValues::new());

        cache
            .get_or_compile(&key, || Err(relshape_error::DbError::new("boom")))
            .unwrap_err();
        assert!(cache.locks.is_empty());

        let t = cache
            .get_or_compile(&key, || Ok((template("a"), true)))
            .unwrap();
        assert_eq!("a", t.sql);
    }
}
