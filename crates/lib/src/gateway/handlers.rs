//! Dispatch handler registry and the worker that runs handlers in arrival order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::model::{AuthorizedUser, ReadyEvent};
use super::protocol::event;

pub type HandlerFuture = BoxFuture<'static, ()>;
pub type EventHandler = Arc<dyn Fn(AuthorizedUser, Value) -> HandlerFuture + Send + Sync>;
pub type ReadyHandler = Arc<dyn Fn(AuthorizedUser, ReadyEvent) -> HandlerFuture + Send + Sync>;
/// Reshapes an event payload before it reaches the handler.
pub type Transformer = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Outcome of routing one dispatch event.
pub enum Routed {
    Job(HandlerFuture),
    Unhandled,
    TransformFailed(String),
}

/// Event name -> (handler, optional transformer), plus the dedicated Ready slot.
/// At most one handler per event; registering again replaces the previous one.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, (EventHandler, Option<Transformer>)>,
    ready: Option<ReadyHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ready<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(AuthorizedUser, ReadyEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ready = Some(Arc::new(move |client: AuthorizedUser, ready: ReadyEvent| {
            handler(client, ready).boxed()
        }));
        self
    }

    /// Register a handler that receives the raw `d` payload. Registering `READY`
    /// here fills the Ready slot, with the parsed event re-encoded as JSON.
    pub fn on<F, Fut>(self, event_name: &str, handler: F) -> Self
    where
        F: Fn(AuthorizedUser, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if event_name == event::READY {
            return self.on_ready(move |client: AuthorizedUser, ready: ReadyEvent| {
                let value = serde_json::to_value(&ready).unwrap_or_else(|e| {
                    log::warn!("gateway: could not re-encode ready event: {}", e);
                    Value::Null
                });
                handler(client, value)
            });
        }
        self.insert(
            event_name,
            Arc::new(move |client: AuthorizedUser, data: Value| handler(client, data).boxed()),
            None,
        )
    }

    /// Register a handler whose payload first passes through `transformer`.
    pub fn on_transformed<T, F, Fut>(self, event_name: &str, transformer: T, handler: F) -> Self
    where
        T: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
        F: Fn(AuthorizedUser, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(
            event_name,
            Arc::new(move |client: AuthorizedUser, data: Value| handler(client, data).boxed()),
            Some(Arc::new(transformer)),
        )
    }

    /// Register a handler for a typed payload; events that do not deserialize
    /// into `M` are logged and dropped.
    pub fn on_typed<M, F, Fut>(self, event_name: &str, handler: F) -> Self
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(AuthorizedUser, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = event_name.to_string();
        self.insert(
            event_name,
            Arc::new(move |client: AuthorizedUser, data: Value| match serde_json::from_value::<M>(data) {
                Ok(payload) => handler(client, payload).boxed(),
                Err(e) => {
                    log::warn!("gateway: {} payload did not match its model: {}", name, e);
                    async {}.boxed()
                }
            }),
            None,
        )
    }

    fn insert(mut self, event_name: &str, handler: EventHandler, transformer: Option<Transformer>) -> Self {
        if self
            .handlers
            .insert(event_name.to_string(), (handler, transformer))
            .is_some()
        {
            log::debug!("gateway: replaced handler for {}", event_name);
        }
        self
    }

    pub fn contains(&self, event_name: &str) -> bool {
        if event_name == event::READY {
            return self.ready.is_some();
        }
        self.handlers.contains_key(event_name)
    }

    /// Number of registered handlers, Ready slot included.
    pub fn len(&self) -> usize {
        self.handlers.len() + usize::from(self.ready.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ready_job(&self, client: AuthorizedUser, ready: ReadyEvent) -> Option<HandlerFuture> {
        self.ready.as_ref().map(|handler| handler(client, ready))
    }

    pub fn route(&self, event_name: &str, client: AuthorizedUser, data: Value) -> Routed {
        let Some((handler, transformer)) = self.handlers.get(event_name) else {
            return Routed::Unhandled;
        };
        let data = match transformer {
            Some(transform) => match transform(data) {
                Ok(data) => data,
                Err(e) => return Routed::TransformFailed(e),
            },
            None => data,
        };
        Routed::Job(handler(client, data))
    }
}

/// Bounded queue feeding a single worker: handlers run one at a time in the
/// order events arrived, without blocking the read loop. A panicking handler is
/// logged and does not stop the worker.
pub struct HandlerQueue {
    tx: mpsc::Sender<HandlerFuture>,
    worker: JoinHandle<()>,
}

impl HandlerQueue {
    pub fn spawn(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<HandlerFuture>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = tokio::spawn(job).await {
                    log::error!("gateway: event handler failed: {}", e);
                }
            }
        });
        Self { tx, worker }
    }

    /// Enqueue a job, waiting for room when the queue is full.
    pub async fn push(&self, job: HandlerFuture) {
        if self.tx.send(job).await.is_err() {
            log::warn!("gateway: handler worker is gone, dropping event");
        }
    }

    /// Close the queue and wait for every queued job to finish.
    pub async fn drain(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            log::error!("gateway: handler worker failed: {}", e);
        }
    }
}
