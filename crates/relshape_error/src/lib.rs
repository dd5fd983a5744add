use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// Most errors are `General`. The other kinds exist so that collaborators
/// (retry strategies, hosts surfacing diagnostics) can make decisions without
/// string matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    General,
    /// No translator accounted for an operation in the query.
    UnsupportedOperation,
    /// A rewrite produced a tree with dangling column or table references.
    TreeIntegrity,
    /// Split query execution was requested for a shape that cannot be split.
    SplitQueryInfeasible,
    /// Failure that may succeed if the whole execution is retried.
    Transient,
    /// Failure while reading rows from an open cursor.
    Execution,
    /// Enumeration was stopped by the caller.
    Cancelled,
    /// Invalid configuration value.
    Config,
    /// A bug.
    Internal,
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::General => "general",
            Self::UnsupportedOperation => "unsupported operation",
            Self::TreeIntegrity => "tree integrity",
            Self::SplitQueryInfeasible => "split query infeasible",
            Self::Transient => "transient",
            Self::Execution => "execution",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

struct DbErrorInner {
    msg: String,
    kind: DbErrorKind,
    source: Option<Box<dyn Error + Send + Sync>>,
    fields: Vec<ErrorField>,
    backtrace: Backtrace,
}

struct ErrorField {
    key: Cow<'static, str>,
    value: Box<dyn fmt::Display + Send + Sync>,
}

impl fmt::Debug for DbErrorInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbErrorInner")
            .field("msg", &self.msg)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(DbErrorKind::General, msg)
    }

    pub fn with_kind(kind: DbErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                msg: msg.into(),
                kind,
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_kind(DbErrorKind::Internal, msg)
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::with_kind(DbErrorKind::Transient, msg)
    }

    /// Attach a structured field to the error.
    pub fn with_field<V>(mut self, key: impl Into<Cow<'static, str>>, value: V) -> Self
    where
        V: fmt::Display + Send + Sync + 'static,
    {
        self.inner.fields.push(ErrorField {
            key: key.into(),
            value: Box::new(value),
        });
        self
    }

    /// Reclassify this error, keeping message, fields and source.
    pub fn into_kind(mut self, kind: DbErrorKind) -> Self {
        self.inner.kind = kind;
        self
    }

    pub fn kind(&self) -> DbErrorKind {
        self.inner.kind
    }

    pub fn is_transient(&self) -> bool {
        self.inner.kind == DbErrorKind::Transient
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    /// Get a field value by key, rendered to a string.
    pub fn get_field(&self, key: &str) -> Option<String> {
        self.inner
            .fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.to_string())
    }

    pub fn get_backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        for field in &self.inner.fields {
            write!(f, "\n  {}: {}", field.key, field.value)?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if let Some(backtrace) = self.get_backtrace() {
            write!(f, "\nBacktrace: {backtrace}")?;
        }

        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<fmt::Error> for DbError {
    fn from(value: fmt::Error) -> Self {
        DbError::with_source("Format error", Box::new(value))
    }
}

/// Return an error indicating a feature isn't implemented.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {{
        let msg = std::format!($($arg)*);
        return Err($crate::DbError::with_kind(
            $crate::DbErrorKind::UnsupportedOperation,
            std::format!("Not yet implemented: {msg}"),
        ));
    }};
}

pub trait ResultExt<T, E> {
    /// Wrap an error with a message.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with a lazily built message.
    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| DbError::with_source(msg, Box::new(e)))
    }

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DbError::with_source(f(), Box::new(e)))
    }
}

pub trait OptionExt<T> {
    /// Return an error if the option is None, naming what was missing.
    fn required(self, what: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, what: &'static str) -> Result<T> {
        self.ok_or_else(|| DbError::new(format!("Missing required value: {what}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_fields() {
        let err = DbError::new("bad things")
            .with_field("left", 4)
            .with_field("right", "five");
        let s = err.to_string();
        assert!(s.starts_with("bad things\n  left: 4\n  right: five"));
        assert_eq!(Some("five".to_string()), err.get_field("right"));
    }

    #[test]
    fn kind_is_kept_through_fields() {
        let err = DbError::transient("connection reset").with_field("attempt", 1);
        assert!(err.is_transient());

        let err = err.into_kind(DbErrorKind::Execution);
        assert_eq!(DbErrorKind::Execution, err.kind());
    }

    #[test]
    fn not_implemented_is_unsupported() {
        fn inner() -> Result<()> {
            not_implemented!("thing {}", 3)
        }

        let err = inner().unwrap_err();
        assert_eq!(DbErrorKind::UnsupportedOperation, err.kind());
        assert_eq!("Not yet implemented: thing 3", err.get_msg());
    }

    #[test]
    fn required_none() {
        let v: Option<u8> = None;
        let err = v.required("default schema").unwrap_err();
        assert!(err.get_msg().contains("default schema"));
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), fmt::Error> = Err(fmt::Error);
        let err = res.context("writing sql").unwrap_err();
        assert_eq!("writing sql", err.get_msg());
        assert!(err.source().is_some());
    }
}
