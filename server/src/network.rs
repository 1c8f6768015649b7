//! WebSocket transport and server wiring
//!
//! The transport is deliberately thin. Per connection it assigns a client
//! id, registers an output queue with the hub, forwards inbound binary
//! frames to the world engine's input stream and drains the output queue
//! back onto the socket. Everything game related happens in the engine.

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::engine::{WorldCommand, WorldEngine};
use crate::error::ServerError;
use crate::game::GameWorld;
use crate::hub::{Hub, HubHandle};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Commands waiting for the input loop.
const INPUT_CHANNEL_CAPACITY: usize = 1024;

/// State every connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    clients: Arc<RwLock<ClientManager>>,
    hub: HubHandle,
    commands: mpsc::Sender<WorldCommand>,
    shutdown: watch::Receiver<bool>,
}

/// Accepts WebSocket clients and connects them to the world.
pub struct Server {
    listener: TcpListener,
    context: ConnectionContext,
}

impl Server {
    /// Binds the listener. Connections join the world through `commands` and
    /// receive snapshots through `hub`; at most `max_clients` are served at
    /// once.
    pub async fn bind(
        addr: &str,
        max_clients: usize,
        hub: HubHandle,
        commands: mpsc::Sender<WorldCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            context: ConnectionContext {
                clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
                hub,
                commands,
                shutdown,
            },
        })
    }

    /// Address the listener is bound to, with the real port when bound to 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Returns once shutdown is signalled.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut shutdown = self.context.shutdown.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => self.accept(stream, addr).await,
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Reserves an id in accept order, then hands the socket to its own task.
    async fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let client_id = {
            let mut clients = self.context.clients.write().await;
            let client_id = clients.add_client(addr);
            if client_id.is_none() {
                warn!("Server full with {} clients", clients.len());
            }
            client_id
        };
        let context = self.context.clone();

        tokio::spawn(async move {
            let result = match client_id {
                Some(client_id) => handle_connection(stream, addr, client_id, &context).await,
                None => reject_connection(stream, addr).await,
            };

            if let Err(e) = result {
                debug!("Connection {} ended with error: {}", addr, e);
            }
            if let Some(client_id) = client_id {
                let mut clients = context.clients.write().await;
                clients.remove_client(client_id);
                if clients.is_empty() {
                    info!("No clients connected");
                }
            }
        });
    }
}

async fn reject_connection(stream: TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
    warn!("Rejecting {}: server full", addr);
    let mut ws = accept_async(stream).await?;
    ws.close(Some(CloseFrame {
        code: CloseCode::Again,
        reason: "Server full".into(),
    }))
    .await?;
    Err(ServerError::ServerFull)
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    client_id: u8,
    context: &ConnectionContext,
) -> Result<(), ServerError> {
    let ws = accept_async(stream).await?;
    info!("Client {} connected from {}", client_id, addr);

    send_command(context, WorldCommand::AddPlayer { client_id }).await;

    let result = match context.hub.register(client_id) {
        Some(queue) => run_session(ws, client_id, queue, context).await,
        None => {
            warn!("Hub is not running, dropping client {}", client_id);
            Ok(())
        }
    };

    context.hub.unregister(client_id);
    send_command(context, WorldCommand::RemovePlayer { client_id }).await;
    info!("Client {} disconnected", client_id);
    result
}

async fn run_session(
    ws: WebSocketStream<TcpStream>,
    client_id: u8,
    mut queue: mpsc::Receiver<Vec<u8>>,
    context: &ConnectionContext,
) -> Result<(), ServerError> {
    let (mut sink, mut stream) = ws.split();
    let mut shutdown = context.shutdown.clone();

    // Ends when the hub closes the queue, either on unregister or eviction
    let mut writer: JoinHandle<()> = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if let Err(e) = sink.send(Message::Binary(message)).await {
                debug!("Send to client {} failed: {}", client_id, e);
                return;
            }
        }
        let _ = sink.close().await;
    });

    let result = loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = &mut writer => {
                debug!("Output queue for client {} closed", client_id);
                break Ok(());
            }
            _ = shutdown.changed() => break Ok(()),
        };

        match frame {
            Some(Ok(Message::Binary(mut data))) => {
                // The transport owns client identity
                if let Some(first) = data.first_mut() {
                    *first = client_id;
                }
                send_command(context, WorldCommand::Input(data)).await;
            }
            Some(Ok(Message::Text(_))) => {
                debug!("Ignoring text frame from client {}", client_id);
            }
            Some(Ok(Message::Close(_))) | None => break Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) => break Err(ServerError::from(e)),
        }
    };

    writer.abort();
    result
}

async fn send_command(context: &ConnectionContext, command: WorldCommand) {
    if let Err(e) = context.commands.send(command).await {
        debug!("World engine stopped, dropping {:?}", e.0);
    }
}

/// A server with its hub, world engine and accept loop running.
pub struct RunningServer {
    addr: SocketAddr,
    world: Arc<Mutex<GameWorld>>,
    engine: WorldEngine,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared handle to the simulated world.
    pub fn world(&self) -> Arc<Mutex<GameWorld>> {
        Arc::clone(&self.world)
    }

    /// Stops the engine, the accept loop, every connection and the hub.
    pub async fn shutdown(mut self) {
        info!("Server shutting down");
        self.engine.stop().await;
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Server task panicked: {}", e);
            }
        }
    }
}

/// Wires up the hub, the world engine and the transport for `config`.
pub async fn launch(config: &ServerConfig) -> Result<RunningServer, ServerError> {
    config.validate()?;

    let world = Arc::new(Mutex::new(GameWorld::new(config.physics())));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (hub, hub_handle) = Hub::new(config.queue_capacity);
    let hub_task = tokio::spawn(hub.run(shutdown_rx.clone()));

    let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let mut engine = WorldEngine::new(Arc::clone(&world), config.tick_duration());
    engine.start(input_rx, hub_handle.broadcast_sender())?;

    let server = Server::bind(
        &config.address(),
        config.max_clients,
        hub_handle,
        input_tx,
        shutdown_rx,
    )
    .await?;
    let addr = server.local_addr()?;

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    Ok(RunningServer {
        addr,
        world,
        engine,
        shutdown_tx,
        tasks: vec![server_task, hub_task],
    })
}
