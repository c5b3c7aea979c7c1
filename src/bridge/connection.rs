//! Connection Manager
//!
//! Owns the broker connection. On every CONNACK the route table is rebuilt
//! from the registry and every mapping is subscribed again, so a reconnect
//! restores all subscriptions without accumulating handlers. Inbound
//! publishes are routed to each matching mapping's handler, each on its own
//! task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, Publish, QoS,
    TlsConfiguration, Transport,
};
use smallvec::SmallVec;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, trace, warn};

use crate::config::{BrokerConfig, ShutdownPolicy};
use crate::registry::MappingRegistry;

use super::dispatcher::{Dispatcher, MappingHandler};
use super::{tls, BridgeError, ConnectionStatus};

/// Subscriptions are always at most once
pub const SUBSCRIPTION_QOS: QoS = QoS::AtMostOnce;

/// Default bound on concurrently running handlers
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// How long a draining shutdown waits for the DISCONNECT to be flushed
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Exponential reconnect delay, doubling from the initial interval up to a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following one is doubled, up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    /// Start over from the initial interval after a successful connect
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Issues subscribe requests to the broker
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BridgeError>;
}

#[async_trait]
impl Subscriber for AsyncClient {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BridgeError> {
        AsyncClient::subscribe(self, topic, qos)
            .await
            .map_err(|e| BridgeError::Client(e.to_string()))
    }
}

/// Broker connection lifecycle and message routing
pub struct ConnectionManager {
    config: BrokerConfig,
    registry: Arc<MappingRegistry>,
    dispatcher: Dispatcher,
    /// One handler per mapping, rebuilt on every connect
    routes: RwLock<Vec<MappingHandler>>,
    status: Arc<RwLock<ConnectionStatus>>,
    handler_permits: Arc<Semaphore>,
    max_handlers: usize,
    shutdown_policy: ShutdownPolicy,
    shutdown_signal: Option<watch::Receiver<bool>>,
    fatal_tx: mpsc::UnboundedSender<BridgeError>,
    fatal_rx: Option<mpsc::UnboundedReceiver<BridgeError>>,
}

impl ConnectionManager {
    pub fn new(
        config: BrokerConfig,
        registry: Arc<MappingRegistry>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        Self {
            config,
            registry,
            dispatcher,
            routes: RwLock::new(Vec::new()),
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            handler_permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_HANDLERS)),
            max_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            shutdown_policy: ShutdownPolicy::default(),
            shutdown_signal: None,
            fatal_tx,
            fatal_rx: Some(fatal_rx),
        }
    }

    /// Bound the number of handlers running at once
    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        let max = max.clamp(1, u32::MAX as usize);
        self.handler_permits = Arc::new(Semaphore::new(max));
        self.max_handlers = max;
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    /// Drain and return from `run` when `signal` changes or its sender is
    /// dropped, instead of listening for SIGINT/SIGTERM.
    pub fn with_shutdown_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.shutdown_signal = Some(signal);
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Shared view of the connection status, usable after `run` takes `self`
    pub fn status_handle(&self) -> Arc<RwLock<ConnectionStatus>> {
        self.status.clone()
    }

    /// Number of installed routes
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Client options for the configured broker
    pub fn mqtt_options(&self) -> Result<MqttOptions, BridgeError> {
        let config = &self.config;
        let mut options =
            MqttOptions::new(config.client_id.as_str(), config.host.as_str(), config.port());
        options.set_keep_alive(config.keep_alive_duration());
        options.set_clean_session(config.clean_session);

        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }

        if config.protocol().uses_tls() {
            let client_config = tls::load_client_config(config)?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        Ok(options)
    }

    /// Connect and process broker events until a fatal error, or until a
    /// draining shutdown completes.
    ///
    /// Failing to connect the first time is fatal. Losing an established
    /// connection is not: it is logged and the client reconnects with
    /// exponential backoff.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let options = self.mqtt_options()?;
        // Every mapping's SUBSCRIBE is queued while the event loop is busy
        // handling the CONNACK, so the request queue must hold all of them.
        let capacity = self.config.request_channel_capacity + self.registry.len();
        let (client, mut eventloop) = AsyncClient::new(options, capacity);

        let mut fatal_rx = self
            .fatal_rx
            .take()
            .ok_or_else(|| BridgeError::Fatal("connection manager already ran".to_string()))?;
        let mut shutdown = match self.shutdown_signal.take() {
            Some(signal) => signal,
            None => spawn_signal_listener(self.shutdown_policy),
        };

        let mut backoff = Backoff::new(
            self.config.reconnect_interval_duration(),
            self.config.max_reconnect_interval_duration(),
        );
        let mut connected_once = false;

        info!(
            "Connecting to {} as '{}'",
            self.config.broker_uri(),
            self.config.client_id
        );
        *self.status.write() = ConnectionStatus::Connecting;

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(event) => {
                        if matches!(event, Event::Incoming(Packet::ConnAck(_))) {
                            connected_once = true;
                            backoff.reset();
                        }
                        self.handle_event(&client, event).await?;
                    }
                    Err(e) if !connected_once => {
                        *self.status.write() = ConnectionStatus::Disconnected;
                        return Err(BridgeError::Connect(format!(
                            "{}: {}",
                            self.config.broker_uri(),
                            e
                        )));
                    }
                    Err(e) => {
                        self.on_connection_lost(&e);
                        *self.status.write() = ConnectionStatus::Backoff;
                        let delay = backoff.next_delay();
                        debug!("Reconnecting in {:?}", delay);

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => {
                                return self.drain(&client, &mut eventloop).await;
                            }
                        }
                        *self.status.write() = ConnectionStatus::Connecting;
                    }
                },

                Some(fatal) = fatal_rx.recv() => {
                    error!("{}", fatal);
                    *self.status.write() = ConnectionStatus::Disconnected;
                    return Err(fatal);
                }

                _ = shutdown.changed() => {
                    return self.drain(&client, &mut eventloop).await;
                }
            }
        }
    }

    /// React to one event from the client event loop
    pub async fn handle_event<S>(&self, subscriber: &S, event: Event) -> Result<(), BridgeError>
    where
        S: Subscriber + ?Sized,
    {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => {
                info!(
                    "Connected to {} (session_present={})",
                    self.config.broker_uri(),
                    connack.session_present
                );
                *self.status.write() = ConnectionStatus::Connected;
                self.on_connect(subscriber).await;
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.route(publish).await?;
            }
            Event::Incoming(Packet::SubAck(suback)) => {
                debug!("SUBACK received (pkid={})", suback.pkid);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker sent DISCONNECT");
            }
            Event::Incoming(packet) => {
                trace!("Incoming {:?}", packet);
            }
            Event::Outgoing(outgoing) => {
                trace!("Outgoing {:?}", outgoing);
            }
        }
        Ok(())
    }

    /// Install one handler per mapping and subscribe every mapping's topic.
    async fn on_connect<S>(&self, subscriber: &S)
    where
        S: Subscriber + ?Sized,
    {
        let handlers: Vec<MappingHandler> = self
            .registry
            .iter()
            .map(|mapping| MappingHandler::new(mapping.clone(), self.dispatcher.clone()))
            .collect();
        *self.routes.write() = handlers;

        for mapping in self.registry.iter() {
            match subscriber.subscribe(mapping.topic(), SUBSCRIPTION_QOS).await {
                Ok(()) => info!(
                    "Subscribed to '{}' (mapping #{}, {} filter)",
                    mapping.topic(),
                    mapping.index(),
                    mapping.filter().kind()
                ),
                Err(e) => error!(
                    "Failed to subscribe to '{}' (mapping #{}): {}",
                    mapping.topic(),
                    mapping.index(),
                    e
                ),
            }
        }
    }

    fn on_connection_lost(&self, e: &ConnectionError) {
        error!("Connection to {} lost: {}", self.config.broker_uri(), e);
    }

    /// Hand the publish to every matching handler, one task each.
    ///
    /// Waiting for a handler permit holds up the event loop, which is how a
    /// slow consumer slows down delivery instead of losing messages.
    ///
    /// Handlers run concurrently, so messages on the same topic may reach the
    /// outbound channel in a different order than they were published.
    async fn route(&self, publish: Publish) -> Result<(), BridgeError> {
        let handlers: SmallVec<[MappingHandler; 4]> = self
            .routes
            .read()
            .iter()
            .filter(|handler| handler.mapping().matches(&publish.topic))
            .cloned()
            .collect();

        if handlers.is_empty() {
            debug!("No mapping for topic '{}'", publish.topic);
            return Ok(());
        }

        for handler in handlers {
            let permit = self
                .handler_permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| BridgeError::Fatal("handler pool closed".to_string()))?;
            let fatal_tx = self.fatal_tx.clone();
            let topic = publish.topic.clone();
            let payload = publish.payload.clone();

            tokio::spawn(async move {
                if let Err(e) = handler.handle(topic, payload).await {
                    let _ = fatal_tx.send(e);
                }
                drop(permit);
            });
        }

        Ok(())
    }

    /// Stop receiving, wait for in-flight handlers and release the outbound
    /// channel so the consumer can finish.
    async fn drain(
        &self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
    ) -> Result<(), BridgeError> {
        info!("Shutting down: disconnecting from {}", self.config.broker_uri());
        self.routes.write().clear();

        if let Err(e) = client.try_disconnect() {
            debug!("Disconnect request failed: {}", e);
        }
        let _ = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;

        self.wait_for_handlers().await;
        *self.status.write() = ConnectionStatus::Disconnected;
        info!("Shutdown complete");
        Ok(())
    }

    /// Wait until no handler task is running
    pub async fn wait_for_handlers(&self) {
        let permits = self.max_handlers as u32;
        if let Ok(all) = self.handler_permits.acquire_many(permits).await {
            drop(all);
        }
    }

    /// Next fatal error reported by a handler, if any
    pub fn try_fatal(&mut self) -> Option<BridgeError> {
        self.fatal_rx.as_mut()?.try_recv().ok()
    }
}

/// Watch SIGINT/SIGTERM. Under the immediate policy the process exits on the
/// first signal; under the drain policy the returned receiver fires instead.
fn spawn_signal_listener(policy: ShutdownPolicy) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        match policy {
            ShutdownPolicy::Immediate => {
                error!("signal received, exiting");
                std::process::exit(0);
            }
            ShutdownPolicy::Drain => {
                warn!("signal received, draining");
                let _ = tx.send(true);
                // Keep the sender alive so the receiver never sees a closed channel
                std::future::pending::<()>().await;
            }
        }
    });

    rx
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("Cannot listen for SIGINT: {}", e);
                            term.recv().await;
                        }
                    }
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                ctrl_c_or_never().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c_or_never().await;
}

async fn ctrl_c_or_never() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
}
