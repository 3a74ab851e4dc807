//! Error types for the column search engine.

use thiserror::Error;

use crate::issue::SearchMode;

/// Errors raised by paginated collections.
///
/// Both variants indicate a caller bug or a node that violates the identity
/// contract; they are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// Position outside of the collection's current bounds.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A node handed to a mergeable collection has no usable identity.
    #[error("node at position {position} has no identity")]
    MissingIdentity { position: usize },
}

/// Errors surfaced by `Issue` and `ColumnNameFinder` searches.
///
/// Remote failures are never reported through this type; they are collected
/// as access errors on the finder instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The issue was already searched in a different mode.
    #[error("issue search mode is locked to {established}, cannot search in {requested} mode")]
    SearchModeMismatch {
        established: SearchMode,
        requested: SearchMode,
    },

    /// A collection operation failed.
    #[error(transparent)]
    Collection(#[from] CollectionError),

    /// The enclosing caller abandoned the search.
    #[error("search cancelled")]
    Cancelled,
}

/// Errors constructing domain records from a remote payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// A required field is absent or null.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but unusable.
    #[error("invalid field `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Errors returned by a remote adapter.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// GraphQL response carried errors.
    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    /// Response had no data for the requested node.
    #[error("no data in response: {0}")]
    MissingData(String),

    /// Response body could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response decoded but violates the page/node contract.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// Client could not be configured.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<CollectionError> for RemoteError {
    fn from(err: CollectionError) -> Self {
        Self::Payload(err.to_string())
    }
}
