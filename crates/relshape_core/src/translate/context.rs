use std::fmt::Debug;
use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::config::session::QuerySplittingBehavior;
use crate::expr::column_expr::{ScopeId, TableRef};

/// Diagnostics emitted during compilation that aren't errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// More than one collection is loaded with single query execution and no
    /// splitting behavior was configured.
    MultipleCollectionsWithoutSplitting,
}

pub trait DiagnosticsSink: Debug + Sync + Send {
    fn report(&self, diagnostic: Diagnostic);
}

#[derive(Debug, Default)]
pub struct NopDiagnostics;

impl DiagnosticsSink for NopDiagnostics {
    fn report(&self, _diagnostic: Diagnostic) {}
}

/// Sink collecting diagnostics in memory.
#[derive(Debug, Default)]
pub struct CollectedDiagnostics {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectedDiagnostics {
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock())
    }
}

impl DiagnosticsSink for CollectedDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }
}

/// Assigns table aliases unique within a statement.
///
/// Comparison is case insensitive. On collision an incrementing counter is
/// appended to the requested alias until a free one is found.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    used: HashSet<String>,
    visited: HashSet<TableRef>,
}

impl AliasGenerator {
    /// Get a unique alias for a table, or None if this table was already
    /// given one.
    pub fn uniquify(&mut self, table: TableRef, requested: &str) -> Option<String> {
        if !self.visited.insert(table) {
            return None;
        }
        Some(self.generate(requested))
    }

    /// Generate a new unique alias.
    pub fn generate(&mut self, requested: &str) -> String {
        let mut candidate = requested.to_string();
        let mut counter = 0;
        while self.used.contains(&candidate.to_lowercase()) {
            candidate = format!("{requested}{counter}");
            counter += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }
}

/// State shared by everything involved in compiling a single query.
#[derive(Debug)]
pub struct CompilationContext {
    next_scope: u32,
    next_collection_id: usize,
    pub aliases: AliasGenerator,
    pub splitting: QuerySplittingBehavior,
    pub warn_multiple_collections: bool,
    diagnostics: Arc<dyn DiagnosticsSink>,
    advisory_reported: bool,
}

impl CompilationContext {
    pub fn new(splitting: QuerySplittingBehavior, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        CompilationContext {
            next_scope: 0,
            next_collection_id: 0,
            aliases: AliasGenerator::default(),
            splitting,
            warn_multiple_collections: true,
            diagnostics,
            advisory_reported: false,
        }
    }

    pub fn next_scope(&mut self) -> ScopeId {
        let scope = ScopeId(self.next_scope);
        self.next_scope += 1;
        scope
    }

    pub fn next_collection_id(&mut self) -> usize {
        let id = self.next_collection_id;
        self.next_collection_id += 1;
        id
    }

    /// Report a diagnostic at most once per compilation.
    ///
    /// Returns true if the diagnostic was reported.
    pub fn report_once(&mut self, diagnostic: Diagnostic) -> bool {
        if self.advisory_reported {
            return false;
        }
        self.advisory_reported = true;
        self.diagnostics.report(diagnostic);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(idx: usize) -> TableRef {
        TableRef::new(ScopeId(0), idx)
    }

    #[test]
    fn uniquify_with_counter() {
        let mut aliases = AliasGenerator::default();
        let got: Vec<_> = ["t", "t", "t0"]
            .iter()
            .enumerate()
            .map(|(idx, a)| aliases.uniquify(t(idx), a).unwrap())
            .collect();
        assert_eq!(vec!["t", "t0", "t00"], got);
    }

    #[test]
    fn uniquify_case_insensitive() {
        let mut aliases = AliasGenerator::default();
        assert_eq!(Some("T".to_string()), aliases.uniquify(t(0), "T"));
        assert_eq!(Some("t0".to_string()), aliases.uniquify(t(1), "t"));
    }

    #[test]
    fn visited_table_not_realiased() {
        let mut aliases = AliasGenerator::default();
        assert_eq!(Some("t".to_string()), aliases.uniquify(t(0), "t"));
        assert_eq!(None, aliases.uniquify(t(0), "t"));
    }

    #[test]
    fn report_once() {
        let sink = Arc::new(CollectedDiagnostics::default());
        let mut ctx = CompilationContext::new(QuerySplittingBehavior::Unspecified, sink.clone());

        assert!(ctx.report_once(Diagnostic::MultipleCollectionsWithoutSplitting));
        assert!(!ctx.report_once(Diagnostic::MultipleCollectionsWithoutSplitting));
        assert_eq!(1, sink.take().len());
    }
}
