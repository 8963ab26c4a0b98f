//! Batched HTTP transport for queries and mutations.
//!
//! Operations issued within one batch window are coalesced into a single POST. A
//! window holding one operation is sent as a plain request object; otherwise the
//! body is a JSON array and the backend must answer with an array of the same
//! length. Identical operations in one window share a single entry.

use crate::error::{Error, Result};
use crate::link::{EndpointId, LinkContext, Operation};
use crate::types::{GraphQLRequest, RemoteResponse};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_BATCH_MAX: usize = 10;

type Reply = std::result::Result<RemoteResponse, String>;

/// HTTP link that batches concurrent unary operations
///
/// # Example
///
/// ```rust,no_run
/// use graphql_remote::BatchedHttpLink;
/// use std::time::Duration;
///
/// # fn example() -> graphql_remote::Result<()> {
/// let link = BatchedHttpLink::builder("http://localhost:4000/graphql")
///     .header("authorization", "Bearer token")
///     .batch_interval(Duration::from_millis(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BatchedHttpLink {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: EndpointId,
    client: reqwest::Client,
    /// Effective uri and headers; per-call overrides are written here
    shared: RwLock<SharedOptions>,
    batch_interval: Duration,
    batch_max: usize,
    pending: Mutex<Option<Batch>>,
    next_batch: Mutex<u64>,
}

#[derive(Clone)]
struct SharedOptions {
    uri: String,
    headers: HeaderMap,
}

struct Batch {
    id: u64,
    entries: Vec<BatchEntry>,
}

struct BatchEntry {
    key: BatchKey,
    request: GraphQLRequest,
    waiters: Vec<oneshot::Sender<Reply>>,
}

#[derive(PartialEq, Eq)]
struct BatchKey {
    query: String,
    variables: String,
    operation_name: Option<String>,
}

impl BatchedHttpLink {
    /// Start building a link for the given endpoint
    pub fn builder(uri: impl Into<String>) -> BatchedHttpLinkBuilder {
        BatchedHttpLinkBuilder::new(uri)
    }

    /// Configured endpoint URI
    pub fn uri(&self) -> &str {
        self.inner.endpoint.as_str()
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.inner.endpoint
    }

    /// Send one operation, waiting for the batch it lands in.
    ///
    /// Headers and uri from the operation's [`LinkContext`] are merged into the
    /// link's shared options before the operation is queued, so they apply to every
    /// operation dispatched afterwards from this link. The last writer wins.
    pub async fn execute(&self, operation: Operation) -> Result<RemoteResponse> {
        self.merge_context(&operation.context);

        let request = operation.to_request();
        let key = BatchKey {
            query: request.query.clone(),
            variables: serde_json::to_string(&request.variables)?,
            operation_name: request.operation_name.clone(),
        };

        let (tx, rx) = oneshot::channel();
        self.enqueue(key, request, tx);

        match rx.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(Error::TransportFailed(message)),
            Err(_) => Err(Error::TransportFailed("batch was dropped".into())),
        }
    }

    fn merge_context(&self, context: &LinkContext) {
        if context.headers.is_empty() && context.uri.is_none() {
            return;
        }
        let mut shared = self.inner.shared.write();
        for (name, value) in context.headers.iter() {
            shared.headers.insert(name.clone(), value.clone());
        }
        if let Some(uri) = &context.uri {
            shared.uri = uri.clone();
        }
    }

    fn enqueue(&self, key: BatchKey, request: GraphQLRequest, tx: oneshot::Sender<Reply>) {
        let mut pending = self.inner.pending.lock();

        if pending.is_none() {
            let id = {
                let mut next = self.inner.next_batch.lock();
                *next += 1;
                *next
            };
            self.schedule(id);
            *pending = Some(Batch {
                id,
                entries: Vec::new(),
            });
        }
        let Some(batch) = pending.as_mut() else {
            return;
        };

        if let Some(entry) = batch.entries.iter_mut().find(|e| e.key == key) {
            entry.waiters.push(tx);
            return;
        }

        batch.entries.push(BatchEntry {
            key,
            request,
            waiters: vec![tx],
        });

        if batch.entries.len() >= self.inner.batch_max {
            if let Some(full) = pending.take() {
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.dispatch(full.entries).await });
            }
        }
    }

    fn schedule(&self, id: u64) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.batch_interval).await;
            let batch = {
                let mut pending = inner.pending.lock();
                match pending.as_ref() {
                    Some(batch) if batch.id == id => pending.take(),
                    _ => None,
                }
            };
            if let Some(batch) = batch {
                inner.dispatch(batch.entries).await;
            }
        });
    }
}

impl Inner {
    async fn dispatch(&self, entries: Vec<BatchEntry>) {
        let shared = self.shared.read().clone();
        tracing::debug!(
            "Dispatching batch of {} operation(s) to {}",
            entries.len(),
            shared.uri
        );

        let requests: Vec<&GraphQLRequest> = entries.iter().map(|e| &e.request).collect();
        match self.send(&shared, &requests).await {
            Ok(responses) => {
                for (entry, response) in entries.into_iter().zip(responses) {
                    for waiter in entry.waiters {
                        // Receiver gone means the caller gave up; the exchange is shared.
                        let _ = waiter.send(Ok(response.clone()));
                    }
                }
            }
            Err(err) => {
                tracing::warn!("Batch to {} failed: {}", shared.uri, err);
                let message = err.to_string();
                for entry in entries {
                    for waiter in entry.waiters {
                        let _ = waiter.send(Err(message.clone()));
                    }
                }
            }
        }
    }

    async fn send(
        &self,
        shared: &SharedOptions,
        requests: &[&GraphQLRequest],
    ) -> Result<Vec<RemoteResponse>> {
        let builder = self
            .client
            .post(&shared.uri)
            .headers(shared.headers.clone());
        let builder = match requests {
            [single] => builder.json(single),
            many => builder.json(many),
        };

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::TransportFailed(format!(
                "backend responded with status {status}"
            )));
        }

        if requests.len() == 1 {
            let single: RemoteResponse = response.json().await?;
            return Ok(vec![single]);
        }

        let many: Vec<RemoteResponse> = response.json().await?;
        if many.len() != requests.len() {
            return Err(Error::TransportFailed(format!(
                "batch of {} operations answered with {} responses",
                requests.len(),
                many.len()
            )));
        }
        Ok(many)
    }
}

impl std::fmt::Debug for BatchedHttpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedHttpLink")
            .field("endpoint", &self.inner.endpoint)
            .field("batch_interval", &self.inner.batch_interval)
            .field("batch_max", &self.inner.batch_max)
            .finish()
    }
}

/// Builder for configuring a [`BatchedHttpLink`].
pub struct BatchedHttpLinkBuilder {
    uri: String,
    headers: Vec<(String, String)>,
    batch_interval: Duration,
    batch_max: usize,
    timeout: Option<Duration>,
}

impl BatchedHttpLinkBuilder {
    fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: Vec::new(),
            batch_interval: DEFAULT_BATCH_INTERVAL,
            batch_max: DEFAULT_BATCH_MAX,
            timeout: None,
        }
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// How long to collect operations before sending a batch.
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    /// Send the batch as soon as it holds this many distinct operations.
    pub fn batch_max(mut self, max: usize) -> Self {
        self.batch_max = max.max(1);
        self
    }

    /// Per-request timeout; expiry surfaces as `TransportFailed`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<BatchedHttpLink> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidRequest(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| Error::InvalidRequest(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let mut client = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }
        let client = client
            .build()
            .map_err(|e| Error::TransportFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(BatchedHttpLink {
            inner: Arc::new(Inner {
                endpoint: EndpointId::new(self.uri.clone()),
                client,
                shared: RwLock::new(SharedOptions {
                    uri: self.uri,
                    headers,
                }),
                batch_interval: self.batch_interval,
                batch_max: self.batch_max,
                pending: Mutex::new(None),
                next_batch: Mutex::new(0),
            }),
        })
    }
}
