//! Translation of query operations into SQL trees.

pub mod builtin;
pub mod context;
pub mod descriptor;
pub mod queryable;

use std::fmt::Debug;

use descriptor::{MemberDescriptor, OperationDescriptor};
use tracing::warn;

use crate::expr::SqlExpr;

/// Translates a method call into a SQL expression.
///
/// Translators are pure. Returning `None` means the translator doesn't handle
/// the call, and the next translator will be tried.
pub trait MethodCallTranslator: Debug + Sync + Send {
    fn translate(
        &self,
        receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr>;
}

/// Translates a member access into a SQL expression.
pub trait MemberTranslator: Debug + Sync + Send {
    fn translate(&self, instance: &SqlExpr, member: &MemberDescriptor) -> Option<SqlExpr>;
}

/// Ordered set of translators.
///
/// The first translator producing an expression wins. Having more than one
/// translator match the same operation is a configuration error, debug
/// builds check for this and log a warning.
#[derive(Debug, Default)]
pub struct TranslatorRegistry {
    methods: Vec<Box<dyn MethodCallTranslator>>,
    members: Vec<Box<dyn MemberTranslator>>,
}

impl TranslatorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry with all built in translators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn add_method_translator(&mut self, translator: impl MethodCallTranslator + 'static) {
        self.methods.push(Box::new(translator));
    }

    pub fn add_member_translator(&mut self, translator: impl MemberTranslator + 'static) {
        self.members.push(Box::new(translator));
    }

    pub fn translate_method_call(
        &self,
        receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        let mut iter = self.methods.iter();
        let found = iter
            .by_ref()
            .find_map(|t| t.translate(receiver, method, args))?;

        if cfg!(debug_assertions) {
            if let Some(other) = iter.find(|t| t.translate(receiver, method, args).is_some()) {
                warn!(%method, ?other, "multiple translators matched method call");
            }
        }

        Some(found)
    }

    pub fn translate_member(&self, instance: &SqlExpr, member: &MemberDescriptor) -> Option<SqlExpr> {
        let mut iter = self.members.iter();
        let found = iter.by_ref().find_map(|t| t.translate(instance, member))?;

        if cfg!(debug_assertions) {
            if let Some(other) = iter.find(|t| t.translate(instance, member).is_some()) {
                warn!(%member, ?other, "multiple translators matched member access");
            }
        }

        Some(found)
    }
}
