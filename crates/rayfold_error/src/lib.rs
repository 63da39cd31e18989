use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// Callers match on the kind to decide how to react (e.g. a canceled
/// aggregation is not a fault in the data source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The shared cancellation token was observed triggered.
    Canceled,
    /// A partition source or partition task failed.
    Fault,
    /// Checked arithmetic overflowed while folding.
    Overflow,
    /// Aggregate has no identity and received no input.
    NoElements,
    /// Releasing a resource failed.
    Release,
    /// Everything else, including violated invariants.
    Internal,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Canceled => "canceled",
            Self::Fault => "fault",
            Self::Overflow => "overflow",
            Self::NoElements => "no elements",
            Self::Release => "release",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    kind: ErrorKind,
    /// Message for the error.
    msg: String,
    /// Source of the error.
    source: Option<Box<dyn Error + Send + Sync>>,
    /// Additional key/value pairs providing context.
    fields: Vec<(String, String)>,
    /// Errors observed after this one that should not be lost, but that must
    /// not replace this error.
    secondary: Vec<DbError>,
    /// Captured backtrace, only populated when RUST_BACKTRACE is set.
    backtrace: Backtrace,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                kind,
                msg: msg.into(),
                source: None,
                fields: Vec::new(),
                secondary: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    /// Create a new error wrapping `source`.
    ///
    /// If the source is itself a `DbError`, its kind is kept.
    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let kind = source
            .downcast_ref::<DbError>()
            .map(|err| err.kind())
            .unwrap_or(ErrorKind::Internal);

        let mut err = Self::with_kind(kind, msg);
        err.inner.source = Some(source);
        err
    }

    pub fn canceled() -> Self {
        Self::with_kind(ErrorKind::Canceled, "Aggregation canceled")
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Fault, msg)
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Overflow, msg)
    }

    pub fn no_elements(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::NoElements, msg)
    }

    pub fn release(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Release, msg)
    }

    /// Add a key/value pair to the error.
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    /// Overwrite the kind of this error.
    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.inner.kind = kind;
        self
    }

    /// Attach an error that happened after this one.
    pub fn push_secondary(&mut self, err: DbError) {
        self.inner.secondary.push(err);
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.kind == ErrorKind::Canceled
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn secondary(&self) -> &[DbError] {
        &self.inner.secondary
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.inner.backtrace
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        if !self.inner.fields.is_empty() {
            write!(f, " (")?;
            for (idx, (key, value)) in self.inner.fields.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}: {value}")?;
            }
            write!(f, ")")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        for secondary in &self.inner.secondary {
            write!(f, "\nAlso encountered: {secondary}")?;
        }

        if self.inner.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\nBacktrace: {}", self.inner.backtrace)?;
        }

        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T, DbError>;

    /// Wrap an error with a context string generated from a function.
    fn context_fn<F>(self, f: F) -> Result<T, DbError>
    where
        F: Fn() -> String;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T, DbError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F>(self, f: F) -> Result<T, DbError>
    where
        F: Fn() -> String,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error if the option is None.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(DbError::new(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_fields() {
        let err = DbError::fault("Partition source failed")
            .with_field("partition_idx", 3)
            .with_field("reason", "io");

        let s = err.to_string();
        assert!(s.starts_with("Partition source failed (partition_idx: 3, reason: io)"));
        assert_eq!(Some("3"), err.get_field("partition_idx"));
        assert_eq!(None, err.get_field("missing"));
    }

    #[test]
    fn with_source_keeps_kind_of_db_error() {
        let inner = DbError::canceled();
        let err = DbError::with_source("Merge failed", Box::new(inner));
        assert_eq!(ErrorKind::Canceled, err.kind());
        assert!(err.source().is_some());
    }

    #[test]
    fn with_source_foreign_error_is_internal() {
        let inner = std::io::Error::other("disk gone");
        let err = DbError::with_source("Read failed", Box::new(inner));
        assert_eq!(ErrorKind::Internal, err.kind());
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn secondary_errors_are_kept() {
        let mut err = DbError::fault("first");
        err.push_secondary(DbError::release("release failed"));

        assert_eq!(ErrorKind::Fault, err.kind());
        assert_eq!(1, err.secondary().len());
        assert_eq!(ErrorKind::Release, err.secondary()[0].kind());
        assert!(err.to_string().contains("Also encountered: release failed"));
    }

    #[test]
    fn context_wraps() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("Failed to format").unwrap_err();
        assert_eq!("Failed to format", err.get_msg());

        let none: Option<usize> = None;
        let err = none.required("value").unwrap_err();
        assert_eq!("value", err.get_msg());
    }
}
