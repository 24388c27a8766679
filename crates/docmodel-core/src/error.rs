//! Error types for DocModel operations.

use std::fmt;

/// The primary error type for all DocModel operations.
#[derive(Debug)]
pub enum Error {
    /// Structural read/write mismatches, unresolved paths, unrecognized discriminators
    Mapping(MappingError),
    /// API misuse (double execution, missing iterator, unmapped classes)
    Usage(UsageError),
    /// Driver-reported failures
    Store(StoreError),
    /// Optimistic-lock version precondition failed
    Conflict(ConflictError),
    /// Configuration errors
    Config(ConfigError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

/// A single mapping failure recorded during a read, write or resolve pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingIssue {
    /// Human-readable error message
    pub message: String,
    /// Dotted path to the offending value ("" for the root)
    pub path: String,
    /// Rendering of the offending value, if there was one
    pub value: Option<String>,
}

/// Aggregated mapping failures.
///
/// Mapping passes never stop at the first problem: every issue found in one
/// pass is collected and surfaced together.
#[derive(Debug, Clone, Default)]
pub struct MappingError {
    pub issues: Vec<MappingIssue>,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// A query chain was executed a second time
    AlreadyExecuted,
    /// `each`/`each_series` was requested without an iterator
    MissingIterator,
    /// A query chain was executed without selecting an operation
    MissingKind,
    /// Two operations were selected on the same query chain
    KindAlreadySet,
    /// An identifier could not be assigned to a sealed object
    NotExtensible,
    /// The object's class has no mapping
    UnmappedClass,
    /// The class is mapped but is not an entity
    NotEntity,
    /// The entity is not managed by this session
    NotManaged,
    /// Another instance with the same identifier is already managed
    DuplicateIdentity,
    /// The identifier was rejected by the identity generator
    InvalidIdentifier,
}

#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The expected document does not exist
    NotFound,
    /// A bulk write reported per-operation write errors
    WriteErrors,
    /// A criteria or update document was rejected
    InvalidOperation,
    /// The cursor was already closed
    CursorClosed,
    /// Other driver error
    Driver,
}

/// An update whose version precondition did not match the stored document.
#[derive(Debug, Clone)]
pub struct ConflictError {
    /// Collection the conflicting documents live in
    pub collection: String,
    /// Identifiers (rendered) of the documents that failed the precondition
    pub ids: Vec<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MappingError {
    /// Create a new empty issue list.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if there are any issues.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Record an issue.
    pub fn add(&mut self, message: impl Into<String>, path: impl Into<String>) {
        self.issues.push(MappingIssue {
            message: message.into(),
            path: path.into(),
            value: None,
        });
    }

    /// Convert to Result, returning Ok(()) if no issues were recorded.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<Vec<MappingIssue>> for MappingError {
    fn from(issues: Vec<MappingIssue>) -> Self {
        Self { issues }
    }
}

impl UsageError {
    pub fn new(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn already_executed() -> Self {
        Self::new(UsageErrorKind::AlreadyExecuted, "Query already executed.")
    }
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Shorthand for a usage error.
    pub fn usage(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Error::Usage(UsageError::new(kind, message))
    }

    /// Shorthand for a store error.
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store(StoreError::new(kind, message))
    }

    /// The usage error kind, if this is a usage error.
    pub fn usage_kind(&self) -> Option<UsageErrorKind> {
        match self {
            Error::Usage(u) => Some(u.kind),
            _ => None,
        }
    }

    /// Is this an optimistic-lock conflict?
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Mapping issues carried by this error, if any.
    pub fn mapping_issues(&self) -> &[MappingIssue] {
        match self {
            Error::Mapping(m) => &m.issues,
            _ => &[],
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::Usage(e) => write!(f, "{}", e.message),
            Error::Store(e) => write!(f, "Store error: {}", e.message),
            Error::Conflict(e) => write!(f, "Conflict: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Mapping(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for MappingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (at '{}')", self.message, self.path)
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

impl std::error::Error for MappingError {}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version precondition failed in '{}' for [{}]",
            self.collection,
            self.ids.join(", ")
        )
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<ConflictError> for Error {
    fn from(err: ConflictError) -> Self {
        Error::Conflict(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for DocModel operations.
pub type Result<T> = std::result::Result<T, Error>;
