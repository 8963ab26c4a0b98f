//! WebSocket transport for subscriptions.
//!
//! One connection per link multiplexes every subscription opened through it. The
//! connection is owned by a background task that receives commands over a channel;
//! each subscription has its own id and only receives the payloads addressed to it.
//! Dropping a [`WsSubscription`] stops the operation on the backend.

use crate::error::{Error, Result};
use crate::link::{EndpointId, Operation, ResponseStream};
use crate::types::{GraphQLRequest, RemoteError, RemoteResponse};
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const CONNECTION_ACK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Outbound = mpsc::UnboundedSender<Result<RemoteResponse>>;

/// WebSocket sub-protocol spoken with the backend
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSocketProtocol {
    /// graphql-ws, negotiated as "graphql-transport-ws"
    #[default]
    GraphqlWs,
    /// Legacy subscriptions-transport-ws, negotiated as "graphql-ws"
    SubscriptionsTransportWs,
}

impl WebSocketProtocol {
    pub fn subprotocol(&self) -> &'static str {
        match self {
            WebSocketProtocol::GraphqlWs => "graphql-transport-ws",
            WebSocketProtocol::SubscriptionsTransportWs => "graphql-ws",
        }
    }

    fn subscribe(&self, id: String, payload: GraphQLRequest) -> ClientMessage {
        match self {
            WebSocketProtocol::GraphqlWs => ClientMessage::Subscribe { id, payload },
            WebSocketProtocol::SubscriptionsTransportWs => ClientMessage::OldStart { id, payload },
        }
    }

    fn complete(&self, id: String) -> ClientMessage {
        match self {
            WebSocketProtocol::GraphqlWs => ClientMessage::Complete { id },
            WebSocketProtocol::SubscriptionsTransportWs => ClientMessage::OldStop { id },
        }
    }
}

/// Messages sent to the backend. "Old" variants belong to subscriptions-transport-ws.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: String,
        payload: GraphQLRequest,
    },
    #[serde(rename = "start")]
    OldStart {
        id: String,
        payload: GraphQLRequest,
    },
    Complete {
        id: String,
    },
    #[serde(rename = "stop")]
    OldStop {
        id: String,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Messages received from the backend under either protocol
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck {
        #[serde(default)]
        #[allow(dead_code)]
        payload: Option<Value>,
    },
    #[serde(alias = "data")]
    Next { id: String, payload: RemoteResponse },
    #[serde(alias = "connection_error")]
    Error {
        #[serde(default)]
        id: Option<String>,
        payload: ErrorPayload,
    },
    Complete { id: String },
    #[serde(alias = "ka")]
    KeepAlive,
    Ping {
        #[serde(default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default)]
        #[allow(dead_code)]
        payload: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Errors(Vec<RemoteError>),
    Error(RemoteError),
    Other(Value),
}

impl From<ErrorPayload> for Vec<RemoteError> {
    fn from(value: ErrorPayload) -> Self {
        match value {
            ErrorPayload::Errors(errors) => errors,
            ErrorPayload::Error(error) => vec![error],
            ErrorPayload::Other(value) => vec![RemoteError::new(value.to_string())],
        }
    }
}

enum Command {
    Subscribe {
        id: String,
        request: GraphQLRequest,
        tx: Outbound,
    },
    Unsubscribe {
        id: String,
    },
}

/// Subscription link speaking graphql-ws or subscriptions-transport-ws
#[derive(Clone)]
pub struct WebSocketLink {
    inner: Arc<WsInner>,
    commands: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
}

struct WsInner {
    endpoint: EndpointId,
    uri: String,
    protocol: WebSocketProtocol,
    reconnect: bool,
    retry_delay: Duration,
    ack_timeout: Duration,
    connection_params: Option<Value>,
}

impl WebSocketLink {
    pub fn builder(uri: impl Into<String>) -> WebSocketLinkBuilder {
        WebSocketLinkBuilder::new(uri)
    }

    pub fn new(uri: impl Into<String>) -> Self {
        Self::builder(uri).build()
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.inner.endpoint
    }

    pub fn protocol(&self) -> WebSocketProtocol {
        self.inner.protocol
    }

    /// Start a subscription; the connection is opened on first use.
    pub async fn subscribe(&self, operation: Operation) -> Result<ResponseStream> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let commands = self.commands();

        commands
            .send(Command::Subscribe {
                id: id.clone(),
                request: operation.to_request(),
                tx,
            })
            .map_err(|_| Error::TransportFailed("websocket connection task stopped".into()))?;

        tracing::debug!("Opened subscription {} on {}", id, self.inner.uri);
        Ok(WsSubscription {
            id: Some(id),
            rx,
            commands,
        }
        .boxed())
    }

    fn commands(&self) -> mpsc::UnboundedSender<Command> {
        let mut slot = self.commands.lock();
        match slot.as_ref() {
            Some(tx) if !tx.is_closed() => tx.clone(),
            _ => {
                let (tx, rx) = mpsc::unbounded_channel();
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.run(rx).await });
                *slot = Some(tx.clone());
                tx
            }
        }
    }
}

impl std::fmt::Debug for WebSocketLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketLink")
            .field("uri", &self.inner.uri)
            .field("protocol", &self.inner.protocol)
            .field("reconnect", &self.inner.reconnect)
            .finish()
    }
}

struct ActiveSubscription {
    request: GraphQLRequest,
    tx: Outbound,
}

enum Disconnect {
    /// Every handle to the connection is gone
    Shutdown,
    Lost(String),
}

impl WsInner {
    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut active: HashMap<String, ActiveSubscription> = HashMap::new();

        loop {
            let mut socket = match self.connect().await {
                Ok(socket) => socket,
                Err(err) => {
                    if self.give_up(&mut active, &mut commands, &err.to_string()) {
                        return;
                    }
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                }
            };

            let mut resumed = true;
            for (id, subscription) in active.iter() {
                let message = self
                    .protocol
                    .subscribe(id.clone(), subscription.request.clone());
                if send(&mut socket, &message).await.is_err() {
                    resumed = false;
                    break;
                }
            }
            if !resumed {
                if self.give_up(&mut active, &mut commands, "failed to resume subscriptions") {
                    return;
                }
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }

            match self.serve(&mut socket, &mut commands, &mut active).await {
                Disconnect::Shutdown => {
                    let _ = socket.close(None).await;
                    tracing::debug!("Closed websocket connection to {}", self.uri);
                    return;
                }
                Disconnect::Lost(reason) => {
                    if self.give_up(&mut active, &mut commands, &reason) {
                        return;
                    }
                    tracing::info!("Reconnecting to {} after: {}", self.uri, reason);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Returns true when the connection task should stop.
    fn give_up(
        &self,
        active: &mut HashMap<String, ActiveSubscription>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        reason: &str,
    ) -> bool {
        tracing::warn!("Websocket connection to {} lost: {}", self.uri, reason);
        if self.reconnect {
            return false;
        }

        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Subscribe { id, request, tx } = command {
                active.insert(id, ActiveSubscription { request, tx });
            }
        }
        for (_, subscription) in active.drain() {
            let _ = subscription
                .tx
                .send(Err(Error::TransportFailed(reason.to_string())));
        }
        true
    }

    async fn connect(&self) -> Result<Socket> {
        let mut request = self.uri.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(self.protocol.subprotocol()),
        );

        let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;
        send(
            &mut socket,
            &ClientMessage::ConnectionInit {
                payload: self.connection_params.clone(),
            },
        )
        .await?;

        tokio::time::timeout(self.ack_timeout, wait_for_ack(&mut socket))
            .await
            .map_err(|_| Error::TransportFailed("timed out waiting for connection_ack".into()))??;

        tracing::info!("Websocket connected to {} ({})", self.uri, self.protocol.subprotocol());
        Ok(socket)
    }

    async fn serve(
        &self,
        socket: &mut Socket,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        active: &mut HashMap<String, ActiveSubscription>,
    ) -> Disconnect {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None => return Disconnect::Shutdown,
                    Some(Command::Subscribe { id, request, tx }) => {
                        let message = self.protocol.subscribe(id.clone(), request.clone());
                        active.insert(id, ActiveSubscription { request, tx });
                        if let Err(err) = send(socket, &message).await {
                            return Disconnect::Lost(err.to_string());
                        }
                    }
                    Some(Command::Unsubscribe { id }) => {
                        if active.remove(&id).is_some() {
                            tracing::debug!("Stopping subscription {}", id);
                            if let Err(err) = send(socket, &self.protocol.complete(id)).await {
                                return Disconnect::Lost(err.to_string());
                            }
                        }
                    }
                },
                message = socket.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reason) = self.handle(socket, &text, active).await {
                            return Disconnect::Lost(reason);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Disconnect::Lost(format!("closed by server: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Disconnect::Lost(err.to_string()),
                    None => return Disconnect::Lost("connection ended".into()),
                },
            }
        }
    }

    async fn handle(
        &self,
        socket: &mut Socket,
        text: &str,
        active: &mut HashMap<String, ActiveSubscription>,
    ) -> Option<String> {
        let message = match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("Ignoring malformed websocket message: {}", err);
                return None;
            }
        };

        match message {
            ServerMessage::Next { id, payload } => {
                if let Some(subscription) = active.get(&id) {
                    let _ = subscription.tx.send(Ok(payload));
                }
            }
            ServerMessage::Error {
                id: Some(id),
                payload,
            } => {
                if let Some(subscription) = active.remove(&id) {
                    let _ = subscription.tx.send(Ok(RemoteResponse {
                        data: None,
                        errors: payload.into(),
                    }));
                }
            }
            ServerMessage::Error { id: None, payload } => {
                let errors: Vec<RemoteError> = payload.into();
                return Some(format!("connection error: {:?}", errors));
            }
            ServerMessage::Complete { id } => {
                active.remove(&id);
            }
            ServerMessage::Ping { payload } => {
                if let Err(err) = send(socket, &ClientMessage::Pong { payload }).await {
                    return Some(err.to_string());
                }
            }
            ServerMessage::ConnectionAck { .. }
            | ServerMessage::KeepAlive
            | ServerMessage::Pong { .. } => {}
        }
        None
    }
}

async fn send(socket: &mut Socket, message: &ClientMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}

async fn wait_for_ack(socket: &mut Socket) -> Result<()> {
    while let Some(message) = socket.next().await {
        let Message::Text(text) = message? else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(&text)? {
            ServerMessage::ConnectionAck { .. } => return Ok(()),
            ServerMessage::Error { payload, .. } => {
                let errors: Vec<RemoteError> = payload.into();
                return Err(Error::TransportFailed(format!(
                    "connection rejected: {:?}",
                    errors
                )));
            }
            ServerMessage::Ping { payload } => {
                send(socket, &ClientMessage::Pong { payload }).await?;
            }
            _ => {}
        }
    }
    Err(Error::TransportFailed(
        "connection closed before connection_ack".into(),
    ))
}

/// Stream of payloads for one subscription; dropping it stops the subscription.
pub struct WsSubscription {
    id: Option<String>,
    rx: mpsc::UnboundedReceiver<Result<RemoteResponse>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Stream for WsSubscription {
    type Item = Result<RemoteResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for WsSubscription {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.commands.send(Command::Unsubscribe { id });
        }
    }
}

/// Builder for configuring a [`WebSocketLink`].
pub struct WebSocketLinkBuilder {
    uri: String,
    protocol: WebSocketProtocol,
    reconnect: bool,
    retry_delay: Duration,
    ack_timeout: Duration,
    connection_params: Option<Value>,
}

impl WebSocketLinkBuilder {
    fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            protocol: WebSocketProtocol::default(),
            reconnect: true,
            retry_delay: DEFAULT_RETRY_DELAY,
            ack_timeout: CONNECTION_ACK_TIMEOUT,
            connection_params: None,
        }
    }

    pub fn protocol(mut self, protocol: WebSocketProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Reconnect and resume subscriptions when the connection drops (default: true).
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Payload of the connection_init message.
    pub fn connection_params(mut self, params: Value) -> Self {
        self.connection_params = Some(params);
        self
    }

    pub fn build(self) -> WebSocketLink {
        WebSocketLink {
            inner: Arc::new(WsInner {
                endpoint: EndpointId::new(self.uri.clone()),
                uri: self.uri,
                protocol: self.protocol,
                reconnect: self.reconnect,
                retry_delay: self.retry_delay,
                ack_timeout: self.ack_timeout,
                connection_params: self.connection_params,
            }),
            commands: Arc::new(Mutex::new(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::{EmptyMutation, Object, Schema, Subscription};
    use async_graphql_axum::GraphQLSubscription;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct Query;

    #[Object]
    impl Query {
        async fn ping(&self) -> bool {
            true
        }
    }

    struct Ticks {
        dropped: Arc<AtomicBool>,
    }

    #[Subscription]
    impl Ticks {
        async fn ticks(&self, count: i32) -> impl futures::Stream<Item = i32> {
            futures::stream::iter(0..count)
        }

        async fn forever(&self) -> impl futures::Stream<Item = i32> {
            let guard = DropFlag(self.dropped.clone());
            futures::stream::unfold((0, guard), |(i, guard)| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((i, (i + 1, guard)))
            })
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn backend(dropped: Arc<AtomicBool>) -> String {
        init_tracing();
        let schema = Schema::build(Query, EmptyMutation, Ticks { dropped }).finish();
        let app = axum::Router::new().route_service("/ws", GraphQLSubscription::new(schema));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("ws://{addr}/ws")
    }

    fn tick(response: &RemoteResponse, field: &str) -> i64 {
        response.data.clone().expect("data").into_json().expect("json")[field]
            .as_i64()
            .expect("number")
    }

    #[tokio::test]
    async fn payloads_arrive_in_order_until_complete() {
        let uri = backend(Arc::new(AtomicBool::new(false))).await;
        let link = WebSocketLink::new(uri);

        let stream = link
            .subscribe(Operation::new("subscription { ticks(count: 3) }"))
            .await
            .expect("subscribes");
        let payloads: Vec<_> = stream.collect().await;

        let ticks: Vec<i64> = payloads
            .iter()
            .map(|p| tick(p.as_ref().expect("payload"), "ticks"))
            .collect();
        assert_eq!(ticks, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn legacy_protocol_is_supported() {
        let uri = backend(Arc::new(AtomicBool::new(false))).await;
        let link = WebSocketLink::builder(uri)
            .protocol(WebSocketProtocol::SubscriptionsTransportWs)
            .build();

        let stream = link
            .subscribe(Operation::new("subscription { ticks(count: 2) }"))
            .await
            .expect("subscribes");
        let payloads: Vec<_> = stream.collect().await;
        assert_eq!(payloads.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_subscriptions_share_a_connection() {
        let uri = backend(Arc::new(AtomicBool::new(false))).await;
        let link = WebSocketLink::new(uri);

        let a = link
            .subscribe(Operation::new("subscription { ticks(count: 2) }"))
            .await
            .expect("subscribes");
        let b = link
            .subscribe(Operation::new("subscription { ticks(count: 4) }"))
            .await
            .expect("subscribes");

        let (a, b): (Vec<_>, Vec<_>) = tokio::join!(a.collect(), b.collect());
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 4);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_backend_subscription() {
        let dropped = Arc::new(AtomicBool::new(false));
        let uri = backend(dropped.clone()).await;
        let link = WebSocketLink::new(uri);

        let mut stream = link
            .subscribe(Operation::new("subscription { forever }"))
            .await
            .expect("subscribes");
        assert_eq!(tick(&stream.next().await.expect("first").expect("ok"), "forever"), 0);
        assert_eq!(tick(&stream.next().await.expect("second").expect("ok"), "forever"), 1);
        drop(stream);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst), "backend stream was not dropped");
    }

    #[tokio::test]
    async fn unreachable_backend_without_reconnect_fails_subscription() {
        let link = WebSocketLink::builder("ws://127.0.0.1:1/ws")
            .reconnect(false)
            .build();

        let mut stream = link
            .subscribe(Operation::new("subscription { forever }"))
            .await
            .expect("command accepted");
        let first = stream.next().await.expect("an item");
        assert!(matches!(first, Err(Error::TransportFailed(_))));
        assert!(stream.next().await.is_none());
    }
}
