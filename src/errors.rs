use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::models::ElementId;

/// An error triggered by a graph operation.
#[derive(Debug)]
pub enum Error {
    /// The element was removed from the graph; its identifier will not be
    /// reissued.
    ElementRemoved(ElementId),
    /// No element with the given identifier exists.
    ElementNotFound(ElementId),
    /// A user-supplied identifier is already taken in its domain.
    DuplicateIdentifier(ElementId),
    /// A `set`-cardinality duplicate, or a null value on a graph that
    /// disallows nulls.
    CardinalityViolation(String),
    /// An argument failed validation, e.g. an empty property key, a bad
    /// cardinality name, or a malformed regex pattern.
    InvalidArgument(String),
    /// A snapshot import under the `Strict` policy hit an identifier that
    /// the target graph already holds.
    IdentifierConflict(ElementId),
    /// A snapshot scalar carried an unrecognized type marker.
    UnsupportedScalarType(String),
    /// A snapshot record is missing a required field, or a field has the
    /// wrong shape.
    MalformedSnapshot(String),
    /// An I/O error from the image or snapshot sink paths.
    Io(io::Error),
    /// An image failed to encode or decode.
    Image(String),
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ElementRemoved(id) => write!(f, "element {} has been removed", id),
            Error::ElementNotFound(id) => write!(f, "element {} does not exist", id),
            Error::DuplicateIdentifier(id) => write!(f, "identifier {} is already taken", id),
            Error::CardinalityViolation(msg) => write!(f, "cardinality violation: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::IdentifierConflict(id) => write!(f, "imported identifier {} conflicts with the target graph", id),
            Error::UnsupportedScalarType(marker) => write!(f, "unsupported scalar type marker: {}", marker),
            Error::MalformedSnapshot(msg) => write!(f, "malformed snapshot: {}", msg),
            Error::Io(err) => write!(f, "i/o error: {}", err),
            Error::Image(msg) => write!(f, "image codec error: {}", msg),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::InvalidArgument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A validation error on an identifier, label, or property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The value is empty.
    EmptyValue,
    /// The value is longer than 255 characters.
    ValueTooLong,
    /// The value contains characters outside of the accepted set, or cannot
    /// be coerced to the expected shape.
    InvalidValue,
}

impl StdError for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyValue => write!(f, "value is empty"),
            ValidationError::ValueTooLong => write!(f, "value is longer than 255 characters"),
            ValidationError::InvalidValue => write!(f, "value contains invalid characters"),
        }
    }
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
