//! Broker engine
//!
//! `Broker` is the dispatcher: the single task that owns the topic registry,
//! the client table and every connection handle. Transports never touch that
//! state; they push `Event`s through a `BrokerHandle` and the dispatcher
//! applies them one at a time, which is what makes the registry lock-free.
//!
//! Each loop iteration:
//! - awaits one inbound event (there is no polling),
//! - applies it, queueing replies and fan-out on the outbound queue,
//! - drains the outbound queue into the per-connection writer queues. A failed
//!   send means the writer is gone and runs the disconnect cascade.
//!
//! Shutdown drains what is already queued, flushes, and closes every
//! connection.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::ops::ControlFlow;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::broker::envelope::{self, Envelope, Mode, Outbound, Request};
use crate::broker::reconciler;
use crate::broker::registry::{Registry, Snapshot};
use crate::broker::topic::ClientIdentity;
use crate::client::{Client, ConnectionId};
use crate::utils::error::{BrokerError, Unauthorized};

/// Everything the dispatcher reacts to, in arrival order.
#[derive(Debug)]
pub enum Event {
    Connected(Client),
    Frame { conn: ConnectionId, raw: Vec<u8> },
    Disconnected(ConnectionId),
    Query(Query),
    Shutdown,
}

/// Read-only requests, answered without touching the registry's state.
#[derive(Debug)]
pub enum Query {
    Topics(oneshot::Sender<Snapshot>),
    Clients(oneshot::Sender<Vec<ClientInfo>>),
}

/// One row of the client table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub conn: ConnectionId,
    pub addr: Option<SocketAddr>,
    pub identity: Option<ClientIdentity>,
}

/// Cloneable sending side of the inbound channel.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    events: UnboundedSender<Event>,
}

impl BrokerHandle {
    fn submit(&self, event: Event) -> Result<(), BrokerError> {
        self.events
            .send(event)
            .map_err(|_| BrokerError::DispatcherGone)
    }

    pub fn connected(&self, client: Client) -> Result<(), BrokerError> {
        self.submit(Event::Connected(client))
    }

    pub fn frame(&self, conn: ConnectionId, raw: Vec<u8>) -> Result<(), BrokerError> {
        self.submit(Event::Frame { conn, raw })
    }

    /// Report end-of-stream. Ignored if the dispatcher is already gone.
    pub fn disconnected(&self, conn: ConnectionId) {
        let _ = self.submit(Event::Disconnected(conn));
    }

    pub async fn topics(&self) -> Result<Snapshot, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Event::Query(Query::Topics(tx)))?;
        rx.await.map_err(|_| BrokerError::DispatcherGone)
    }

    pub async fn clients(&self) -> Result<Vec<ClientInfo>, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Event::Query(Query::Clients(tx)))?;
        rx.await.map_err(|_| BrokerError::DispatcherGone)
    }

    pub fn shutdown(&self) {
        let _ = self.submit(Event::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

#[derive(Debug)]
pub struct Broker {
    server_id: String,
    registry: Registry,
    clients: HashMap<ConnectionId, Client>,
    outbound: VecDeque<Outbound>,
    events: UnboundedReceiver<Event>,
}

impl Broker {
    /// Create the dispatcher and the handle transports use to reach it.
    pub fn new(server_id: impl Into<String>) -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Self {
            server_id: server_id.into(),
            registry: Registry::new(),
            clients: HashMap::new(),
            outbound: VecDeque::new(),
            events: rx,
        };
        (broker, BrokerHandle { events: tx })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client_table(&self) -> Vec<ClientInfo> {
        let mut rows: Vec<ClientInfo> = self
            .clients
            .values()
            .map(|client| ClientInfo {
                conn: client.id,
                addr: client.addr,
                identity: client.identity.clone(),
            })
            .collect();
        rows.sort_by_key(|row| row.conn);
        rows
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Run until a shutdown event arrives or every handle is dropped.
    pub async fn run(mut self) {
        info!(server_id = %self.server_id, "dispatcher started");
        while let Some(event) = self.events.recv().await {
            let flow = self.handle_event(event);
            self.flush();
            if flow.is_break() {
                break;
            }
        }
        self.shutdown();
        info!(server_id = %self.server_id, "dispatcher stopped");
    }

    pub fn handle_event(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Connected(client) => {
                info!(conn = %client.id, addr = ?client.addr, "client connected");
                self.clients.insert(client.id, client);
            }
            Event::Frame { conn, raw } => self.on_frame(conn, &raw),
            Event::Disconnected(conn) => {
                info!(%conn, "client disconnected");
                self.disconnect(conn);
            }
            Event::Query(Query::Topics(reply)) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Event::Query(Query::Clients(reply)) => {
                let _ = reply.send(self.client_table());
            }
            Event::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Deliver everything on the outbound queue.
    pub fn flush(&mut self) {
        while let Some(Outbound { conn, envelope }) = self.outbound.pop_front() {
            let Some(client) = self.clients.get(&conn) else {
                debug!(%conn, kind = %envelope.kind, "dropping envelope for closed connection");
                continue;
            };
            let frame = match envelope.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(%conn, error = %e, "failed to encode envelope");
                    continue;
                }
            };
            if let Err(e) = client.send(frame) {
                warn!(error = %e, "send failed, treating as disconnect");
                self.disconnect(conn);
            }
        }
    }

    fn on_frame(&mut self, conn: ConnectionId, raw: &[u8]) {
        let Some(client) = self.clients.get_mut(&conn) else {
            debug!(%conn, "frame from unknown connection dropped");
            return;
        };
        let (request, envelope) = match envelope::parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                let preview: String = String::from_utf8_lossy(raw).chars().take(100).collect();
                warn!(%conn, error = %e, frame = %preview, "dropping invalid frame");
                return;
            }
        };
        client.identity = Some(envelope.id.clone());
        debug!(%conn, kind = %envelope.kind, id = %envelope.id, topic = %envelope.topic, "frame received");

        match request {
            Request::Register(mode) => self.on_register(conn, mode, envelope),
            Request::Withdraw(mode) => self.on_withdraw(conn, mode, envelope),
            Request::Publish => self.on_publish(conn, envelope),
            Request::Status => self.on_status(conn, envelope),
        }
    }

    fn on_register(&mut self, conn: ConnectionId, mode: Mode, envelope: Envelope) {
        let Envelope { id, topic, .. } = envelope;
        let result = match mode {
            Mode::Producer => self.registry.register_producer(&topic, &id, conn),
            Mode::Subscriber => self.registry.register_subscriber(&topic, &id, conn),
        };
        match result {
            Ok(registration) => {
                info!(%conn, %id, %topic, %mode, ?registration, "registered");
            }
            Err(conflict) => {
                warn!(%conn, %id, %topic, reason = %conflict, "registration rejected");
                let reject = Envelope::reject(&self.server_id, &id, &topic, &conflict);
                self.outbound.push_back(Outbound {
                    conn,
                    envelope: reject,
                });
            }
        }
    }

    fn on_withdraw(&mut self, conn: ConnectionId, mode: Mode, envelope: Envelope) {
        match mode {
            Mode::Producer => {
                let Some(subscribers) =
                    self.registry
                        .withdraw_producer(&envelope.topic, &envelope.id, conn)
                else {
                    return;
                };
                info!(%conn, id = %envelope.id, topic = %envelope.topic, dropped = subscribers.len(), "topic withdrawn");
                for orphan in reconciler::orphans(&self.registry, subscribers) {
                    if orphan != conn {
                        self.close(orphan);
                    }
                }
            }
            Mode::Subscriber => {
                if self
                    .registry
                    .withdraw_subscriber(&envelope.topic, &envelope.id)
                {
                    info!(%conn, id = %envelope.id, topic = %envelope.topic, "subscription withdrawn");
                }
            }
        }
    }

    fn on_publish(&mut self, conn: ConnectionId, envelope: Envelope) {
        let authorized = self
            .registry
            .producer_of(&envelope.topic)
            .is_some_and(|producer| producer.conn == conn);
        if !authorized {
            let err = Unauthorized {
                identity: envelope.id,
                topic: envelope.topic,
            };
            warn!(%conn, error = %err, "publish dropped");
            return;
        }
        let deliveries = self.registry.publish(&envelope);
        debug!(%conn, topic = %envelope.topic, subscribers = deliveries.len(), "published");
        self.outbound.extend(deliveries);
    }

    fn on_status(&mut self, conn: ConnectionId, envelope: Envelope) {
        let reply = Envelope::status_reply(&envelope.id, &envelope.topic, &self.registry.snapshot());
        self.outbound.push_back(Outbound {
            conn,
            envelope: reply,
        });
    }

    /// Run the disconnect cascade for `conn` and close what it orphaned.
    fn disconnect(&mut self, conn: ConnectionId) {
        let cascade = reconciler::reconcile(&mut self.registry, conn);
        if !cascade.withdrawn.is_empty() || !cascade.unsubscribed.is_empty() {
            info!(
                %conn,
                withdrawn = ?cascade.withdrawn,
                unsubscribed = ?cascade.unsubscribed,
                orphans = cascade.orphans.len(),
                "cleaned up client"
            );
        }
        for orphan in cascade.orphans {
            self.close(orphan);
        }
        self.close(conn);
    }

    /// Drop the connection from the client table and tell its writer to stop.
    /// Closing twice is a no-op.
    fn close(&mut self, conn: ConnectionId) {
        if let Some(client) = self.clients.remove(&conn) {
            debug!(%conn, "closing connection");
            client.close();
        }
    }

    fn shutdown(&mut self) {
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            if !matches!(event, Event::Shutdown) {
                let _ = self.handle_event(event);
            }
        }
        self.flush();

        let open: Vec<ConnectionId> = self.clients.keys().copied().collect();
        info!(
            connections = open.len(),
            topics = self.registry.len(),
            "closing all connections"
        );
        for conn in open {
            self.close(conn);
        }
    }
}
