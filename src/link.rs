//! Transport links to remote backends.
//!
//! A [`TransportLink`] sends one [`Operation`] to a backend and returns either a
//! single response (unary) or a stream of responses (subscriptions). [`HybridLink`]
//! routes each operation to a batched HTTP link or a WebSocket link depending on the
//! type of the selected operation.

use crate::error::{Error, Result};
use crate::http_link::BatchedHttpLink;
use crate::types::{GraphQLRequest, OperationType, RemoteResponse};
use crate::ws_link::{WebSocketLink, WebSocketProtocol};
use async_graphql::parser::parse_query;
use async_graphql::parser::types::{DocumentOperations, ExecutableDocument, OperationDefinition};
use async_graphql::Variables;
use async_trait::async_trait;
use futures::stream::BoxStream;
use http::HeaderMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Stream of backend payloads for one subscription
pub type ResponseStream = BoxStream<'static, Result<RemoteResponse>>;

/// Stable identity of a backend, used as cache key for its introspected schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-call context forwarded with an operation.
///
/// Insert it as request data when executing a delegating schema so forwarding
/// resolvers can pick it up.
#[derive(Debug, Clone, Default)]
pub struct LinkContext {
    /// Headers merged into the transport's headers for this call
    pub headers: HeaderMap,
    /// Endpoint override for this call
    pub uri: Option<String>,
}

impl LinkContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// One operation to send to a backend
#[derive(Debug, Clone)]
pub struct Operation {
    pub query: String,
    pub variables: Variables,
    pub operation_name: Option<String>,
    pub context: LinkContext,
}

impl Operation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Variables::default(),
            operation_name: None,
            context: LinkContext::default(),
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, name: Option<String>) -> Self {
        self.operation_name = name;
        self
    }

    pub fn with_context(mut self, context: LinkContext) -> Self {
        self.context = context;
        self
    }

    /// Type of the operation this document would execute
    pub fn kind(&self) -> Result<OperationType> {
        let doc = parse_query(&self.query)
            .map_err(|e| Error::InvalidRequest(format!("failed to parse operation: {e}")))?;
        let selected = select_operation(&doc, self.operation_name.as_deref()).ok_or_else(|| {
            Error::AmbiguousOperationSelection(
                self.operation_name
                    .clone()
                    .unwrap_or_else(|| "<anonymous>".to_string()),
            )
        })?;
        Ok(selected.ty)
    }

    pub fn to_request(&self) -> GraphQLRequest {
        GraphQLRequest {
            query: self.query.clone(),
            operation_name: self.operation_name.clone(),
            variables: self.variables.clone(),
        }
    }
}

/// Pick the operation a request executes.
///
/// A document with several operations is resolved by name; an unnamed request
/// against such a document only succeeds if exactly one operation exists.
pub fn select_operation<'a>(
    doc: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Option<&'a OperationDefinition> {
    match &doc.operations {
        DocumentOperations::Single(op) => Some(&op.node),
        DocumentOperations::Multiple(ops) => match operation_name {
            Some(name) => ops.get(name).map(|op| &op.node),
            None if ops.len() == 1 => ops.values().next().map(|op| &op.node),
            None => None,
        },
    }
}

/// Result of routing an operation
pub enum LinkResult {
    Single(RemoteResponse),
    Stream(ResponseStream),
}

impl std::fmt::Debug for LinkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkResult::Single(response) => f.debug_tuple("Single").field(response).finish(),
            LinkResult::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Transport to one backend
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Identity of the backend this link talks to
    fn endpoint(&self) -> &EndpointId;

    /// Send a query or mutation
    async fn execute(&self, operation: Operation) -> Result<RemoteResponse>;

    /// Open a subscription
    async fn subscribe(&self, operation: Operation) -> Result<ResponseStream>;

    /// Route an operation by the type of its selected operation definition
    async fn call(&self, operation: Operation) -> Result<LinkResult> {
        match operation.kind()? {
            OperationType::Subscription => Ok(LinkResult::Stream(self.subscribe(operation).await?)),
            OperationType::Query | OperationType::Mutation => {
                Ok(LinkResult::Single(self.execute(operation).await?))
            }
        }
    }
}

/// Routes unary operations over batched HTTP and subscriptions over WebSocket
#[derive(Clone)]
pub struct HybridLink {
    endpoint: EndpointId,
    http: BatchedHttpLink,
    ws: Option<WebSocketLink>,
}

impl HybridLink {
    /// HTTP only link; subscriptions fail with `TransportFailed`
    pub fn new(uri: impl Into<String>) -> Result<Self> {
        let http = BatchedHttpLink::builder(uri).build()?;
        Ok(Self::from_parts(http, None))
    }

    pub fn from_parts(http: BatchedHttpLink, ws: Option<WebSocketLink>) -> Self {
        Self {
            endpoint: EndpointId::new(http.uri()),
            http,
            ws,
        }
    }

    /// Route subscriptions to the given WebSocket link
    pub fn with_subscriptions(mut self, ws: WebSocketLink) -> Self {
        self.ws = Some(ws);
        self
    }

    /// Override the endpoint identity used for schema caching
    pub fn with_endpoint(mut self, endpoint: impl Into<EndpointId>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn from_options(options: &HybridLinkOptions) -> Result<Self> {
        let http = options.http.to_builder().build()?;
        let ws = options.ws.as_ref().map(|ws| ws.to_builder().build());
        Ok(Self::from_parts(http, ws))
    }

    pub fn http(&self) -> &BatchedHttpLink {
        &self.http
    }
}

impl std::fmt::Debug for HybridLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLink")
            .field("endpoint", &self.endpoint)
            .field("subscriptions", &self.ws.is_some())
            .finish()
    }
}

#[async_trait]
impl TransportLink for HybridLink {
    fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    async fn execute(&self, operation: Operation) -> Result<RemoteResponse> {
        self.http.execute(operation).await
    }

    async fn subscribe(&self, operation: Operation) -> Result<ResponseStream> {
        match &self.ws {
            Some(ws) => ws.subscribe(operation).await,
            None => Err(Error::TransportFailed(format!(
                "no subscription transport configured for {}",
                self.endpoint
            ))),
        }
    }
}

/// HTTP side of [`HybridLinkOptions`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    pub uri: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Milliseconds to wait for more operations before dispatching a batch
    #[serde(default)]
    pub batch_interval_ms: Option<u64>,
    #[serde(default)]
    pub batch_max: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl HttpOptions {
    fn to_builder(&self) -> crate::http_link::BatchedHttpLinkBuilder {
        let mut builder = BatchedHttpLink::builder(self.uri.clone());
        for (name, value) in &self.headers {
            builder = builder.header(name.clone(), value.clone());
        }
        if let Some(ms) = self.batch_interval_ms {
            builder = builder.batch_interval(Duration::from_millis(ms));
        }
        if let Some(max) = self.batch_max {
            builder = builder.batch_max(max);
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        builder
    }
}

/// WebSocket side of [`HybridLinkOptions`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsOptions {
    pub uri: String,
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    #[serde(default)]
    pub connection_params: Option<serde_json::Value>,
    #[serde(default)]
    pub protocol: WebSocketProtocol,
}

fn default_reconnect() -> bool {
    true
}

impl WsOptions {
    fn to_builder(&self) -> crate::ws_link::WebSocketLinkBuilder {
        let mut builder = WebSocketLink::builder(self.uri.clone())
            .protocol(self.protocol)
            .reconnect(self.reconnect);
        if let Some(params) = &self.connection_params {
            builder = builder.connection_params(params.clone());
        }
        builder
    }
}

/// Serializable configuration for a [`HybridLink`]
#[derive(Debug, Clone, Deserialize)]
pub struct HybridLinkOptions {
    pub http: HttpOptions,
    #[serde(default)]
    pub ws: Option<WsOptions>,
}

impl HybridLinkOptions {
    /// Load options from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path).map_err(Error::Io)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Link that records every operation and replies with canned responses
    #[derive(Clone)]
    pub(crate) struct MockLink {
        endpoint: EndpointId,
        pub(crate) operations: Arc<Mutex<Vec<Operation>>>,
        responses: Arc<Mutex<VecDeque<RemoteResponse>>>,
        payloads: Arc<Mutex<Vec<RemoteResponse>>>,
    }

    impl MockLink {
        pub(crate) fn new(endpoint: &str) -> Self {
            Self {
                endpoint: EndpointId::new(endpoint),
                operations: Arc::new(Mutex::new(Vec::new())),
                responses: Arc::new(Mutex::new(VecDeque::new())),
                payloads: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn respond(self, response: serde_json::Value) -> Self {
            let response = serde_json::from_value(response).expect("valid response");
            self.responses.lock().push_back(response);
            self
        }

        pub(crate) fn stream(self, payloads: Vec<serde_json::Value>) -> Self {
            *self.payloads.lock() = payloads
                .into_iter()
                .map(|p| serde_json::from_value(p).expect("valid payload"))
                .collect();
            self
        }

        pub(crate) fn queries(&self) -> Vec<String> {
            self.operations.lock().iter().map(|op| op.query.clone()).collect()
        }

        pub(crate) fn last(&self) -> Operation {
            self.operations.lock().last().cloned().expect("an operation was sent")
        }
    }

    #[async_trait]
    impl TransportLink for MockLink {
        fn endpoint(&self) -> &EndpointId {
            &self.endpoint
        }

        async fn execute(&self, operation: Operation) -> Result<RemoteResponse> {
            self.operations.lock().push(operation);
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| Error::TransportFailed("no canned response".into()))
        }

        async fn subscribe(&self, operation: Operation) -> Result<ResponseStream> {
            self.operations.lock().push(operation);
            let payloads = self.payloads.lock().clone();
            Ok(futures::stream::iter(payloads.into_iter().map(Ok)).boxed())
        }
    }
}
