//! Error types for remote delegation

use crate::types::RemoteError;
use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for remote delegation
///
/// Covers introspection, schema construction, document extraction, transport and
/// the errors a backend reports for a delegated field.
#[derive(Error, Debug)]
pub enum Error {
    /// Introspection request failed or returned a malformed payload
    #[error("Introspection failed: {0}")]
    IntrospectionFailed(String),

    /// Backend declares no root type for the requested operation kind
    #[error("Backend schema has no {0} root type")]
    MissingRootType(String),

    /// Backend declares a root type that is not defined in its type list
    #[error("Root type {0} is declared but not defined")]
    NoSuchRootType(String),

    /// Delegated field does not exist on the backend type
    #[error("Type {type_name} has no field {field_name}")]
    UnknownField {
        type_name: String,
        field_name: String,
    },

    /// Discriminator of an abstract value matched none of its possible types
    #[error("Abstract type {abstract_type} could not resolve discriminator {discriminator:?}")]
    AmbiguousType {
        abstract_type: String,
        discriminator: Option<String>,
    },

    /// Document holds several operations and none matches the operation name
    #[error("Unable to select an operation from the document: {0}")]
    AmbiguousOperationSelection(String),

    /// Network, protocol or status failure while talking to the backend
    #[error("Transport error: {0}")]
    TransportFailed(String),

    /// A remote was requested for an endpoint that was never introspected
    #[error("Missing typeDefs for endpoint {0}")]
    MissingTypeDefs(String),

    /// Type referenced from partial type definitions is absent from the base SDL
    #[error("Couldn't find type {0} in the base type definitions")]
    UnresolvedType(String),

    /// Registered fragment text could not be parsed
    #[error("Invalid fragment: {0}")]
    InvalidFragment(String),

    /// Errors reported by the backend for a delegated field
    #[error("{}", join_messages(.0))]
    Remote(Vec<RemoteError>),

    /// GraphQL schema errors
    #[error("GraphQL schema error: {0}")]
    Schema(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

fn join_messages(errors: &[RemoteError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Convert error to GraphQL error format
    pub fn to_graphql_error(&self) -> GraphQLError {
        GraphQLError {
            message: self.to_string(),
            extensions: self.extensions(),
        }
    }

    /// Convert into an `async_graphql::Error` for returning from a resolver.
    ///
    /// The error code travels in `extensions.code` just like [`Error::to_graphql_error`].
    pub fn to_resolver_error(&self) -> async_graphql::Error {
        let code = self.code();
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", code))
    }

    /// Collapse into one backend-style error for reporting at a caller path.
    ///
    /// A single remote error keeps its extensions; anything else carries `code`.
    pub fn into_remote_error(self) -> RemoteError {
        match self {
            Error::Remote(mut errors) if errors.len() == 1 => errors.remove(0).with_path(Vec::new()),
            other => RemoteError {
                message: other.to_string(),
                path: Vec::new(),
                extensions: Some(serde_json::json!({ "code": other.code() })),
            },
        }
    }

    /// Stable machine readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::IntrospectionFailed(_) => "INTROSPECTION_FAILED",
            Error::MissingRootType(_) => "MISSING_ROOT_TYPE",
            Error::NoSuchRootType(_) => "NO_SUCH_ROOT_TYPE",
            Error::UnknownField { .. } => "UNKNOWN_FIELD",
            Error::AmbiguousType { .. } => "AMBIGUOUS_TYPE",
            Error::AmbiguousOperationSelection(_) => "AMBIGUOUS_OPERATION_SELECTION",
            Error::TransportFailed(_) => "TRANSPORT_FAILED",
            Error::MissingTypeDefs(_) => "MISSING_TYPE_DEFS",
            Error::UnresolvedType(_) => "UNRESOLVED_TYPE",
            Error::InvalidFragment(_) => "INVALID_FRAGMENT",
            Error::Remote(_) => "REMOTE_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }

    /// Get error code for extensions
    fn extensions(&self) -> std::collections::HashMap<String, serde_json::Value> {
        let mut map = std::collections::HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::TransportFailed(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::TransportFailed(format!("websocket: {err}"))
    }
}

/// GraphQL error response format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub extensions: std::collections::HashMap<String, serde_json::Value>,
}

impl From<Error> for GraphQLError {
    fn from(err: Error) -> Self {
        err.to_graphql_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_join_messages_with_newlines() {
        let err = Error::Remote(vec![
            RemoteError::new("first"),
            RemoteError::new("second"),
        ]);
        assert_eq!(err.to_string(), "first\nsecond");
        assert_eq!(err.code(), "REMOTE_ERROR");
    }

    #[test]
    fn single_remote_error_keeps_its_extensions() {
        let mut backend = RemoteError::new("not found")
            .with_path(vec![async_graphql::PathSegment::Field("post".into())]);
        backend.extensions = Some(serde_json::json!({ "code": "NOT_FOUND" }));

        let reported = Error::Remote(vec![backend]).into_remote_error();
        assert!(reported.path.is_empty());
        assert_eq!(reported.extensions, Some(serde_json::json!({ "code": "NOT_FOUND" })));

        let reported = Error::TransportFailed("connection refused".into()).into_remote_error();
        assert_eq!(reported.message, "Transport error: connection refused");
        assert_eq!(reported.extensions, Some(serde_json::json!({ "code": "TRANSPORT_FAILED" })));
    }

    #[test]
    fn graphql_error_carries_code() {
        let err = Error::MissingTypeDefs("http://backend/graphql".into());
        let gql = err.to_graphql_error();
        assert_eq!(gql.extensions["code"], serde_json::json!("MISSING_TYPE_DEFS"));
        assert!(gql.message.contains("http://backend/graphql"));
    }

    #[test]
    fn resolver_error_carries_code() {
        let err = Error::AmbiguousType {
            abstract_type: "Animal".into(),
            discriminator: Some("Fish".into()),
        };
        let resolver_err = err.to_resolver_error();
        assert!(resolver_err.message.contains("Animal"));
        let extensions = resolver_err.extensions.expect("extensions set");
        assert_eq!(
            extensions.get("code"),
            Some(&async_graphql::Value::from("AMBIGUOUS_TYPE"))
        );
    }
}
