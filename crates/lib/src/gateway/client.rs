//! Gateway session driver: Hello, Identify, heartbeat, dispatch.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use super::handlers::{HandlerQueue, HandlerRegistry, Routed};
use super::heartbeat::{send_heartbeat, spawn_scheduler, Timer, TokioTimer, LATENCY_WARNING};
use super::model::ReadyEvent;
use super::protocol::{event, opcode, Envelope, Hello, IdentifyPayload, IdentifyProperties, Intents};
use super::GatewayError;
use crate::session::{ConnectionState, SessionHandle};
use crate::websocket::{WebSocket, WebSocketFactory, WebSocketSender};

pub const DEFAULT_HANDLER_QUEUE: usize = 64;

/// Drives one gateway connection from handshake to close. Resume and reconnect
/// are not attempted: when the socket goes away the run ends.
pub struct GatewayClient {
    factory: WebSocketFactory,
    token: String,
    intents: Intents,
    properties: IdentifyProperties,
    handlers: HandlerRegistry,
    session: SessionHandle,
    timer: Arc<dyn Timer>,
    queue_capacity: usize,
}

impl GatewayClient {
    pub fn new(factory: WebSocketFactory, token: impl Into<String>, handlers: HandlerRegistry) -> Self {
        Self {
            factory,
            token: token.into(),
            intents: Intents::default(),
            properties: IdentifyProperties::default(),
            handlers,
            session: SessionHandle::new(),
            timer: Arc::new(TokioTimer),
            queue_capacity: DEFAULT_HANDLER_QUEUE,
        }
    }

    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Handle to this client's session state.
    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Connect through the factory and run the session until the connection closes.
    /// Each call starts from a fresh session; nothing carries over from an earlier run.
    pub async fn run(&self) -> Result<(), GatewayError> {
        self.session.reset().await;
        let (ws, response) = match self.factory.handshake().await {
            Ok(connected) => connected,
            Err(e) => {
                self.session.set_state(ConnectionState::Closed).await;
                return Err(e.into());
            }
        };
        log::debug!("gateway: handshake response:\n{}", response.trim_end());
        log::info!("gateway: connected to {}:{}", self.factory.host, self.factory.port);
        self.run_on(ws).await
    }

    /// Run the session over an already-upgraded connection. The session is reset
    /// first and always ends in Closed, whether the run succeeds or fails.
    pub async fn run_on<S>(&self, mut ws: WebSocket<S>) -> Result<(), GatewayError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.session.reset().await;
        let result = self.drive(&mut ws).await;
        self.session.set_state(ConnectionState::Closed).await;
        if let Some(status) = ws.close_status() {
            log::info!("gateway: session ended: {}", status);
        }
        result
    }

    async fn drive<S>(&self, ws: &mut WebSocket<S>) -> Result<(), GatewayError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.session.set_state(ConnectionState::AwaitingHello).await;
        let Some(hello) = next_envelope(ws).await? else {
            log::info!("gateway: connection closed before hello");
            return Ok(());
        };
        if hello.op != opcode::HELLO {
            return Err(GatewayError::UnexpectedPayload(format!(
                "expected hello (op {}), got op {}",
                opcode::HELLO,
                hello.op
            )));
        }
        let hello: Hello = serde_json::from_value(hello.d)?;
        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.session.set_heartbeat_interval(interval).await;
        log::debug!("gateway: hello, heartbeat every {:?}", interval);

        let sender = ws.sender();
        send_heartbeat(&sender, &self.session, self.timer.as_ref(), None).await?;

        self.session.set_state(ConnectionState::Identifying).await;
        self.identify(&sender).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = spawn_scheduler(
            sender.clone(),
            self.session.clone(),
            self.timer.clone(),
            interval,
            shutdown_rx,
        );
        let queue = HandlerQueue::spawn(self.queue_capacity);
        self.session.set_state(ConnectionState::Running).await;

        let result = self.dispatch_loop(ws, &sender, &queue).await;

        let _ = shutdown_tx.send(true);
        if let Err(e) = heartbeat.await {
            log::error!("gateway: heartbeat task failed: {}", e);
        }
        queue.drain().await;
        result
    }

    async fn identify<S: AsyncWrite>(&self, sender: &WebSocketSender<S>) -> Result<(), GatewayError> {
        let payload = IdentifyPayload {
            token: self.token.clone(),
            intents: self.intents.bits(),
            properties: self.properties.clone(),
        };
        sender.send_message(&Envelope::identify(&payload)?.to_json()?).await?;
        log::debug!("gateway: identify sent (intents {:#x})", payload.intents);
        Ok(())
    }

    async fn dispatch_loop<S>(
        &self,
        ws: &mut WebSocket<S>,
        sender: &WebSocketSender<S>,
        queue: &HandlerQueue,
    ) -> Result<(), GatewayError>
    where
        S: AsyncRead + AsyncWrite,
    {
        while let Some(envelope) = next_envelope(ws).await? {
            if let Some(seq) = envelope.s {
                self.session.observe_sequence(seq).await;
            }
            match envelope.op {
                opcode::HEARTBEAT_ACK => self.acknowledge_heartbeat().await,
                opcode::HEARTBEAT => {
                    let seq = self.session.last_sequence().await;
                    send_heartbeat(sender, &self.session, self.timer.as_ref(), seq).await?;
                }
                opcode::DISPATCH => self.dispatch(envelope.t, envelope.d, queue).await?,
                opcode::RESUME | opcode::RECONNECT | opcode::INVALID_SESSION => {
                    log::warn!("gateway: op {} received; resume/reconnect is not supported", envelope.op);
                }
                other => log::debug!("gateway: ignoring op {}", other),
            }
        }
        log::info!("gateway: connection closed");
        Ok(())
    }

    async fn acknowledge_heartbeat(&self) {
        match self.session.acknowledge_heartbeat(self.timer.now()).await {
            Some(rtt) if rtt >= LATENCY_WARNING => {
                log::warn!("gateway: heartbeat acknowledged after {:.1}s", rtt.as_secs_f64());
            }
            Some(rtt) => log::debug!("gateway: heartbeat ack in {:?}", rtt),
            None => log::debug!("gateway: heartbeat ack with nothing in flight"),
        }
    }

    async fn dispatch(&self, name: Option<String>, data: Value, queue: &HandlerQueue) -> Result<(), GatewayError> {
        let Some(name) = name else {
            log::warn!("gateway: dispatch without an event name");
            return Ok(());
        };

        if name == event::READY {
            let ready: ReadyEvent = serde_json::from_value(data)?;
            let client = self.session.establish(&self.token, &ready).await;
            log::info!(
                "gateway: ready as {} ({}), session {}",
                client.user.username,
                client.user.id,
                ready.session_id
            );
            if let Some(job) = self.handlers.ready_job(client, ready) {
                queue.push(job).await;
            }
            return Ok(());
        }

        let client = self
            .session
            .client()
            .await
            .ok_or(GatewayError::IdentityNotEstablished)?;
        match self.handlers.route(&name, client, data) {
            Routed::Job(job) => queue.push(job).await,
            Routed::Unhandled => log::info!("gateway: event {} has no handler", name),
            Routed::TransformFailed(e) => {
                log::warn!("gateway: could not transform {} payload: {}", name, e);
            }
        }
        Ok(())
    }
}

/// Next parsable envelope. `None` when the peer closes or the socket drops;
/// malformed or empty messages are skipped.
async fn next_envelope<S>(ws: &mut WebSocket<S>) -> Result<Option<Envelope>, GatewayError>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let message = match ws.receive_message().await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) if e.is_disconnect() => {
                log::info!("gateway: socket dropped: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if message.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Envelope>(&message) {
            Ok(envelope) => return Ok(Some(envelope)),
            Err(e) => log::warn!(
                "gateway: skipping malformed message ({}): {}",
                e,
                String::from_utf8_lossy(&message)
            ),
        }
    }
}
