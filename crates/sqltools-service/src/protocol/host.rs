//! JSON-RPC host: one reader loop, one writer task, typed handler dispatch
//! and correlation of outgoing requests with their responses.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::channel::{BoxedReader, BoxedWriter};
use crate::transport::{Channel, MessageReader, MessageWriter};
use crate::types::{
    EventType, Message, MessageType, RequestId, RequestType, ServiceError, ServiceResult,
};

use super::context::{EventContext, MessageSender, ReplySlot, RequestContext};
use super::pending::PendingRequests;
use super::validator::validate_method;

type RequestHandlerFn = Arc<
    dyn Fn(Value, Arc<ReplySlot>) -> BoxFuture<'static, ServiceResult<()>>
        + Send
        + Sync,
>;

type EventHandlerFn =
    Arc<dyn Fn(Value, MessageSender) -> BoxFuture<'static, ServiceResult<()>> + Send + Sync>;

/// How a handler is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerOptions {
    /// Replace a handler already registered for the method.
    pub override_existing: bool,
    /// Let the reader loop move on without waiting for this handler.
    pub parallel: bool,
}

impl HandlerOptions {
    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    pub fn overriding(mut self) -> Self {
        self.override_existing = true;
        self
    }
}

struct Registered<H> {
    handler: H,
    parallel: bool,
}

struct HostInner {
    request_handlers: RwLock<HashMap<String, Registered<RequestHandlerFn>>>,
    event_handlers: RwLock<HashMap<String, Registered<EventHandlerFn>>>,
    pending: PendingRequests,
    sender: MessageSender,
    outgoing: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    channel: Mutex<Option<Channel>>,
    parallel_processing: AtomicBool,
    started: AtomicBool,
    shutdown: CancellationToken,
    exited: CancellationToken,
}

/// A JSON-RPC 2.0 endpoint over a [`Channel`].
#[derive(Clone)]
pub struct JsonRpcHost {
    inner: Arc<HostInner>,
}

/// A non-owning reference to a [`JsonRpcHost`], for handlers that need to
/// reach back into the host that dispatches them.
#[derive(Clone)]
pub struct WeakJsonRpcHost {
    inner: Weak<HostInner>,
}

impl WeakJsonRpcHost {
    pub fn upgrade(&self) -> Option<JsonRpcHost> {
        self.inner.upgrade().map(|inner| JsonRpcHost { inner })
    }
}

fn decode_params<P: DeserializeOwned>(params: Value) -> ServiceResult<P> {
    serde_json::from_value(params).map_err(|e| ServiceError::InvalidParams(e.to_string()))
}

impl JsonRpcHost {
    pub fn new(channel: Channel) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HostInner {
                request_handlers: RwLock::new(HashMap::new()),
                event_handlers: RwLock::new(HashMap::new()),
                pending: PendingRequests::new(),
                sender: MessageSender::new(tx),
                outgoing: Mutex::new(Some(rx)),
                channel: Mutex::new(Some(channel)),
                parallel_processing: AtomicBool::new(false),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                exited: CancellationToken::new(),
            }),
        }
    }

    /// Spawn handlers registered as parallel instead of awaiting them on the
    /// reader loop. Off by default.
    pub fn with_parallel_processing(self, enabled: bool) -> Self {
        self.inner
            .parallel_processing
            .store(enabled, Ordering::SeqCst);
        self
    }

    pub fn downgrade(&self) -> WeakJsonRpcHost {
        WeakJsonRpcHost {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn sender(&self) -> MessageSender {
        self.inner.sender.clone()
    }

    pub fn events(&self) -> EventContext {
        EventContext::new(self.sender())
    }

    /// Register a handler for `request`.
    pub fn set_request_handler<P, R, F, Fut>(
        &self,
        request: &RequestType<P, R>,
        options: HandlerOptions,
        handler: F,
    ) -> ServiceResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let erased: RequestHandlerFn = Arc::new(
            move |params: Value, slot: Arc<ReplySlot>| -> BoxFuture<'static, ServiceResult<()>> {
                match decode_params::<P>(params) {
                    Ok(params) => handler(params, RequestContext::new(slot)).boxed(),
                    Err(e) => future::ready(Err(e)).boxed(),
                }
            },
        );

        let mut handlers = self
            .inner
            .request_handlers
            .write()
            .unwrap_or_else(|p| p.into_inner());
        insert_handler(&mut handlers, request.method(), erased, options)
    }

    /// Register a handler for `event`.
    pub fn set_event_handler<P, F, Fut>(
        &self,
        event: &EventType<P>,
        options: HandlerOptions,
        handler: F,
    ) -> ServiceResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let erased: EventHandlerFn = Arc::new(
            move |params: Value, sender: MessageSender| -> BoxFuture<'static, ServiceResult<()>> {
                match decode_params::<P>(params) {
                    Ok(params) => handler(params, EventContext::new(sender)).boxed(),
                    Err(e) => future::ready(Err(e)).boxed(),
                }
            },
        );

        let mut handlers = self
            .inner
            .event_handlers
            .write()
            .unwrap_or_else(|p| p.into_inner());
        insert_handler(&mut handlers, event.method(), erased, options)
    }

    /// Send a request to the peer and wait for its reply.
    pub async fn send_request<P, R>(&self, request: &RequestType<P, R>, params: P) -> ServiceResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = RequestId::new_unique();
        let params = serde_json::to_value(params)?;
        let reply = self.inner.pending.register(id.clone())?;

        if let Err(e) = self
            .inner
            .sender
            .send(Message::request(id.clone(), request.method(), params))
        {
            self.inner.pending.remove(&id);
            return Err(e);
        }
        tracing::debug!("Sent request {} ({id})", request.method());

        let value = reply.await.map_err(|_| ServiceError::RequestCancelled)??;
        serde_json::from_value(value).map_err(ServiceError::Json)
    }

    /// Send an event to the peer.
    pub fn send_event<P: Serialize>(&self, event: &EventType<P>, params: P) -> ServiceResult<()> {
        self.inner.sender.send_event(event, params)
    }

    /// Spawn the reader and writer tasks.
    pub fn start(&self) -> ServiceResult<()> {
        let channel = self
            .inner
            .channel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| ServiceError::InternalError("host already started".to_string()))?;
        let outgoing = self
            .inner
            .outgoing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| ServiceError::InternalError("host already started".to_string()))?;

        tracing::info!("JSON-RPC host starting on {}", channel.description());
        self.inner.started.store(true, Ordering::SeqCst);

        let (reader, writer) = channel.into_parts();
        tokio::spawn(self.clone().write_loop(MessageWriter::new(writer), outgoing));
        tokio::spawn(self.clone().read_loop(MessageReader::new(reader)));
        Ok(())
    }

    /// End the reader loop, flush queued output and cancel pending requests.
    pub fn stop(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::info!("JSON-RPC host stopping");
        }
        self.inner.shutdown.cancel();

        let cancelled = self.inner.pending.cancel_all();
        if cancelled > 0 {
            tracing::debug!("Cancelled {cancelled} pending request(s)");
        }

        if !self.inner.started.load(Ordering::SeqCst) {
            self.inner.exited.cancel();
        }
    }

    /// Resolves once the host has stopped and its output is flushed.
    pub async fn wait_for_exit(&self) {
        self.inner.exited.cancelled().await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.shutdown.is_cancelled()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    async fn read_loop(self, mut reader: MessageReader<BoxedReader>) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = reader.read_message() => next,
            };

            match next {
                Ok(Some(message)) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.dispatch(message) => {}
                    }
                }
                Ok(None) => {
                    tracing::info!("Channel closed by peer");
                    break;
                }
                Err(ServiceError::ParseError(e)) => {
                    tracing::warn!("Dropping malformed message: {e}");
                }
                Err(e) => {
                    tracing::error!("Fatal read error: {e}");
                    break;
                }
            }
        }
        self.stop();
    }

    async fn write_loop(
        self,
        mut writer: MessageWriter<BoxedWriter>,
        mut outgoing: mpsc::UnboundedReceiver<Message>,
    ) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                message = outgoing.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = writer.write_message(&message).await {
                        tracing::error!("Failed to write message: {e}");
                        self.stop();
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    while let Ok(message) = outgoing.try_recv() {
                        if let Err(e) = writer.write_message(&message).await {
                            tracing::error!("Failed to flush message: {e}");
                            break;
                        }
                    }
                    break;
                }
            }
        }

        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Writer shutdown: {e}");
        }
        tracing::info!("JSON-RPC host exited");
        self.inner.exited.cancel();
    }

    async fn dispatch(&self, message: Message) {
        match message.message_type() {
            MessageType::Response | MessageType::ResponseError => self.complete_pending(message),
            MessageType::Request => self.dispatch_request(message).await,
            MessageType::Event => self.dispatch_event(message).await,
        }
    }

    fn complete_pending(&self, message: Message) {
        let Some(id) = message.id().cloned() else {
            return;
        };
        let reply = match message.message_type() {
            MessageType::ResponseError => Err(match message.error_object() {
                Some(error) => ServiceError::from(error),
                None => ServiceError::InternalError(format!(
                    "malformed error object: {}",
                    message.contents()
                )),
            }),
            _ => Ok(message.into_contents()),
        };
        if let Err(e) = self.inner.pending.complete(&id, reply) {
            tracing::warn!("{e}");
        }
    }

    async fn dispatch_request(&self, message: Message) {
        let (Some(id), Some(method)) = (message.id().cloned(), message.method().map(String::from))
        else {
            return;
        };
        tracing::debug!("Received request {method} ({id})");

        let sender = self.inner.sender.clone();
        if let Err(e) = validate_method(&method) {
            let _ = sender.send(Message::response_error(id, e.to_error_object()));
            return;
        }

        let registered = {
            let handlers = self
                .inner
                .request_handlers
                .read()
                .unwrap_or_else(|p| p.into_inner());
            handlers
                .get(&method)
                .map(|r| (r.handler.clone(), r.parallel))
        };
        let Some((handler, parallel)) = registered else {
            tracing::warn!("No handler for request {method}");
            let error = ServiceError::MethodNotFound(method);
            let _ = sender.send(Message::response_error(id, error.to_error_object()));
            return;
        };

        let slot = ReplySlot::new(id.clone(), sender);
        let task = tokio::spawn(handler(message.into_contents(), slot.clone()));
        let finish = async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(ServiceError::InternalError(format!(
                    "handler for {method} panicked"
                ))),
                Err(_) => Err(ServiceError::RequestCancelled),
            };
            match outcome {
                Ok(()) => slot.handler_succeeded(),
                Err(e) => {
                    tracing::debug!("Handler for {method} failed: {e}");
                    if !slot.handler_failed(&e) {
                        tracing::warn!("Handler for {method} failed after replying to {id}: {e}");
                    }
                }
            }
        };

        if parallel && self.inner.parallel_processing.load(Ordering::SeqCst) {
            tokio::spawn(finish);
        } else {
            finish.await;
        }
    }

    async fn dispatch_event(&self, message: Message) {
        let Some(method) = message.method().map(String::from) else {
            return;
        };

        let registered = {
            let handlers = self
                .inner
                .event_handlers
                .read()
                .unwrap_or_else(|p| p.into_inner());
            handlers
                .get(&method)
                .map(|r| (r.handler.clone(), r.parallel))
        };
        let Some((handler, parallel)) = registered else {
            tracing::debug!("No handler for event {method}, dropping");
            return;
        };

        let task = tokio::spawn(handler(message.into_contents(), self.inner.sender.clone()));
        let finish = async move {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Event handler for {method} failed: {e}"),
                Err(e) if e.is_panic() => tracing::error!("Event handler for {method} panicked"),
                Err(_) => {}
            }
        };

        if parallel && self.inner.parallel_processing.load(Ordering::SeqCst) {
            tokio::spawn(finish);
        } else {
            finish.await;
        }
    }
}

fn insert_handler<H>(
    handlers: &mut HashMap<String, Registered<H>>,
    method: &str,
    handler: H,
    options: HandlerOptions,
) -> ServiceResult<()> {
    if handlers.contains_key(method) && !options.override_existing {
        return Err(ServiceError::HandlerAlreadyRegistered(method.to_string()));
    }
    handlers.insert(
        method.to_string(),
        Registered {
            handler,
            parallel: options.parallel,
        },
    );
    Ok(())
}
