use std::fmt;

use crate::Key;

/// Errors reported by a store, either for a whole call or for one element of a batch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("no such entity")]
    NoSuchEntity,
    #[error("cannot load field(s) into kind {kind}: {reason}")]
    FieldMismatch { kind: String, reason: String },
    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("concurrent transaction")]
    ConcurrentTransaction,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Backend(String),
}

impl ServiceError {
    /// Kinds a store always reports per element, even when every element failed the same way.
    pub fn is_always_itemized(&self) -> bool {
        matches!(
            self,
            ServiceError::FieldMismatch { .. }
                | ServiceError::InvalidEntityType(_)
                | ServiceError::NoSuchEntity
        )
    }

    pub fn is_field_mismatch(&self) -> bool {
        matches!(self, ServiceError::FieldMismatch { .. })
    }
}

/// Per-element outcomes of a batch call, aligned with the input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiError(pub Vec<Option<ServiceError>>);

impl MultiError {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ServiceError> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&ServiceError>> {
        self.0.iter().map(Option::as_ref)
    }

    pub fn into_inner(self) -> Vec<Option<ServiceError>> {
        self.0
    }
}

impl std::ops::Index<usize> for MultiError {
    type Output = Option<ServiceError>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failed = self.0.iter().flatten();
        match (failed.next(), failed.count()) {
            (None, _) => write!(f, "(0 errors)"),
            (Some(first), 0) => write!(f, "{first}"),
            (Some(first), 1) => write!(f, "{first} (and 1 other error)"),
            (Some(first), n) => write!(f, "{first} (and {n} other errors)"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid entity shape: {0}")]
    InvalidShape(String),
    #[error("cannot find a key for element {index} of kind {kind}")]
    MissingIdentity { index: usize, kind: String },
    #[error("empty string id on put for element {index} of kind {kind}")]
    EmptyStringIdentity { index: usize, kind: String },
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("{0}")]
    Multi(MultiError),
    #[error("no more items in iterator")]
    Done,
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("connect error: {0}")]
    Connect(String),
}

impl Error {
    pub fn is_done(&self) -> bool {
        matches!(self, Error::Done)
    }

    /// The outcome for element `index`, if this error is itemized.
    pub fn item(&self, index: usize) -> Option<&ServiceError> {
        match self {
            Error::Multi(multi) => multi.get(index),
            _ => None,
        }
    }
}

/// Failure of a batch that still yields keys.
///
/// For puts, `keys` holds the key of every element in input order, including the
/// ids the store generated for elements it accepted. For query materialization it
/// holds the keys collected before the failure. It is empty when the batch was
/// rejected before reaching the store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{source}")]
pub struct BatchError {
    pub keys: Vec<Key>,
    pub source: Error,
}

impl From<Error> for BatchError {
    fn from(source: Error) -> Self {
        Self {
            keys: Vec::new(),
            source,
        }
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        err.source
    }
}

/// Reports whether element `index` of an itemized error is a not-found outcome.
pub fn is_not_found(err: &Error, index: usize) -> bool {
    matches!(err.item(index), Some(ServiceError::NoSuchEntity))
}
