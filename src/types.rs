//! Wire types exchanged with remote GraphQL backends

use async_graphql::{PathSegment, ServerError, Variables};
use async_graphql_value::ConstValue;
use serde::{Deserialize, Deserializer, Serialize};

pub use async_graphql::parser::types::OperationType;

/// GraphQL request sent to a backend
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// GraphQL query string
    #[serde(default)]
    pub query: String,

    /// Operation name (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// Variables for the query
    #[serde(default)]
    pub variables: Variables,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: Variables::default(),
        }
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// Response returned by a backend, either for a unary call or for one
/// payload of a subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteResponse {
    /// Response data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ConstValue>,

    /// Errors if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RemoteError>,
}

impl RemoteResponse {
    /// Create a successful response
    pub fn success(data: ConstValue) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Build from the response of a locally executed schema
    pub fn from_response(response: async_graphql::Response) -> Self {
        let data = match response.data {
            ConstValue::Null => None,
            data => Some(data),
        };
        Self {
            data,
            errors: response.errors.into_iter().map(RemoteError::from).collect(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// One error reported by a backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteError {
    pub message: String,

    /// Response path the error is addressed to; empty when the backend sent none
    #[serde(
        default,
        deserialize_with = "nullable_path",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub path: Vec<PathSegment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Build a located error for the caller's schema.
    ///
    /// `base` is the caller's path to the field the error was raised at; the
    /// backend path is not carried over because response keys differ between
    /// the two schemas.
    pub fn into_server_error(self, pos: async_graphql::Pos, base: &[PathSegment]) -> ServerError {
        let mut err = ServerError::new(self.message, Some(pos));
        err.path = base.to_vec();
        if let Some(serde_json::Value::Object(map)) = self.extensions {
            let mut extensions = async_graphql::ErrorExtensionValues::default();
            for (key, value) in map {
                if let Ok(value) = ConstValue::from_json(value) {
                    extensions.set(key, value);
                }
            }
            err.extensions = Some(extensions);
        }
        err
    }
}

impl From<ServerError> for RemoteError {
    fn from(err: ServerError) -> Self {
        let extensions = err
            .extensions
            .as_ref()
            .and_then(|ext| serde_json::to_value(ext).ok());
        Self {
            message: err.message,
            path: err.path,
            extensions,
        }
    }
}

fn nullable_path<'de, D>(deserializer: D) -> std::result::Result<Vec<PathSegment>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<PathSegment>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case() {
        let request = GraphQLRequest::new("query Q { a }").operation_name("Q");
        let json = serde_json::to_value(&request).expect("serializes");
        assert_eq!(json["operationName"], "Q");
        assert_eq!(json["variables"], serde_json::json!({}));
    }

    #[test]
    fn response_tolerates_null_paths() {
        let response: RemoteResponse = serde_json::from_value(serde_json::json!({
            "data": null,
            "errors": [
                { "message": "boom", "path": null },
                { "message": "nested", "path": ["users", 1, "name"] }
            ]
        }))
        .expect("parses");

        assert!(response.data.is_none() || response.data == Some(ConstValue::Null));
        assert!(response.errors[0].path.is_empty());
        assert_eq!(
            response.errors[1].path,
            vec![
                PathSegment::Field("users".into()),
                PathSegment::Index(1),
                PathSegment::Field("name".into()),
            ]
        );
    }
}
