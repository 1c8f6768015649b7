//! Runtime around [`GameWorld`]: the fixed-rate tick loop and the input loop
//!
//! Both loops share the world behind a single mutex. The tick loop holds it
//! for one full update; the input loop takes it once per command, after any
//! packet has been decoded. Guards are scoped, so every exit path releases
//! the lock.

use crate::error::{InputError, ServerError};
use crate::game::{GameWorld, TickReport};
use log::{debug, error, info, warn};
use shared::{decode_client_packet, encode_snapshot, ClientPacket, InputPacket};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Longest measured tick, in nominal tick periods, fed to the simulation.
const MAX_DELTA_PERIODS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Started,
}

/// Work for the input loop.
///
/// Joins and leaves share the channel with raw packets, so every packet a
/// connection sent is applied before its player is removed, and none of them
/// can land on the next connection that gets the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldCommand {
    AddPlayer { client_id: u8 },
    RemovePlayer { client_id: u8 },
    /// One raw inbound packet, client id already stamped by the transport.
    Input(Vec<u8>),
}

/// Owns the running loops of one world.
pub struct WorldEngine {
    world: Arc<Mutex<GameWorld>>,
    tick_duration: Duration,
    state: EngineState,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorldEngine {
    /// Creates a stopped engine that will tick `world` once per `tick_duration`.
    pub fn new(world: Arc<Mutex<GameWorld>>, tick_duration: Duration) -> Self {
        Self {
            world,
            tick_duration,
            state: EngineState::Stopped,
            shutdown_tx: None,
            tasks: Vec::new(),
        }
    }

    /// Reports `Stopped` as soon as either loop has exited, including when
    /// it exited on its own because a stream closed.
    pub fn state(&self) -> EngineState {
        if self.state == EngineState::Started && self.tasks.iter().any(JoinHandle::is_finished) {
            EngineState::Stopped
        } else {
            self.state
        }
    }

    /// Spawns the tick loop and the input loop.
    ///
    /// `input` carries player joins, leaves and raw client packets in;
    /// `output` receives one encoded snapshot per tick in which some player
    /// moved. Fails with [`ServerError::AlreadyStarted`] while both loops
    /// are still running.
    pub fn start(
        &mut self,
        input: mpsc::Receiver<WorldCommand>,
        output: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), ServerError> {
        self.reap_finished();
        if self.state == EngineState::Started {
            return Err(ServerError::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.tasks.push(tokio::spawn(run_tick_loop(
            Arc::clone(&self.world),
            self.tick_duration,
            output,
            shutdown_rx.clone(),
        )));
        self.tasks.push(tokio::spawn(run_input_loop(
            Arc::clone(&self.world),
            input,
            shutdown_rx,
        )));

        self.shutdown_tx = Some(shutdown_tx);
        self.state = EngineState::Started;
        info!(
            "World engine started ({:.1} Hz)",
            1.0 / self.tick_duration.as_secs_f64()
        );
        Ok(())
    }

    /// Stops both loops and waits for them to finish.
    ///
    /// Their ends of the input and output channels are dropped, which closes
    /// both streams.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("World engine task panicked: {}", e);
            }
        }

        if self.state == EngineState::Started {
            info!("World engine stopped");
        }
        self.state = EngineState::Stopped;
    }

    /// Tears down the surviving loop once the other one has exited.
    fn reap_finished(&mut self) {
        if self.state == EngineState::Stopped || self.state() == EngineState::Started {
            return;
        }

        warn!("World engine loop exited on its own, stopping the engine");
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.state = EngineState::Stopped;
    }
}

impl Drop for WorldEngine {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

async fn run_tick_loop(
    world: Arc<Mutex<GameWorld>>,
    tick_duration: Duration,
    output: mpsc::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let max_delta = tick_duration * MAX_DELTA_PERIODS;
    let stats_interval = (1.0 / tick_duration.as_secs_f64()).round().max(1.0) as u16 * 10;

    // The first tick completes immediately
    ticker.tick().await;
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if output.is_closed() {
            info!("Broadcast sink closed, stopping tick loop");
            break;
        }

        let now = Instant::now();
        let mut delta = now.duration_since(last_tick);
        last_tick = now;

        if delta > max_delta {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                delta.as_secs_f64(),
                max_delta.as_secs_f64()
            );
            delta = max_delta;
        }

        let report = world.lock().await.update(delta.as_secs_f64());

        if report.tick % stats_interval == 0 {
            debug!(
                "Tick {}: {} players, {:.1}Hz",
                report.tick,
                report.players,
                1.0 / delta.as_secs_f64()
            );
        }

        let Some(message) = build_message(&report) else {
            continue;
        };

        match output.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Broadcast queue full, dropping tick {}", report.tick);
            }
            Err(TrySendError::Closed(_)) => {
                info!("Broadcast sink closed, stopping tick loop");
                break;
            }
        }
    }

    debug!("Tick loop finished");
}

/// Encodes the tick's changed players, or None if nobody moved.
///
/// An encoding failure is logged and the tick's broadcast is skipped.
pub fn build_message(report: &TickReport) -> Option<Vec<u8>> {
    if report.changed.is_empty() {
        return None;
    }

    match encode_snapshot(&report.changed) {
        Ok(message) => Some(message),
        Err(e) => {
            error!("Skipping broadcast for tick {}: {}", report.tick, e);
            None
        }
    }
}

async fn run_input_loop(
    world: Arc<Mutex<GameWorld>>,
    mut input: mpsc::Receiver<WorldCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            command = input.recv() => match command {
                Some(command) => command,
                None => {
                    debug!("Input stream closed");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        };

        if let Err(e) = handle_command(&world, command).await {
            warn!("Dropping input: {}", e);
        }
    }

    debug!("Input loop finished");
}

/// Applies one command to the world.
pub async fn handle_command(
    world: &Mutex<GameWorld>,
    command: WorldCommand,
) -> Result<(), InputError> {
    match command {
        WorldCommand::AddPlayer { client_id } => {
            world.lock().await.add_player(client_id);
            Ok(())
        }
        WorldCommand::RemovePlayer { client_id } => {
            world.lock().await.remove_player(client_id);
            Ok(())
        }
        WorldCommand::Input(data) => handle_input(world, &data).await,
    }
}

/// Decodes one raw packet and applies it to the world.
///
/// Decoding happens before the lock is taken. Packet types other than
/// input are ignored.
pub async fn handle_input(world: &Mutex<GameWorld>, data: &[u8]) -> Result<(), InputError> {
    let Some(packet) = decode_input(data)? else {
        return Ok(());
    };

    world.lock().await.apply_input(packet)
}

fn decode_input(data: &[u8]) -> Result<Option<InputPacket>, InputError> {
    match decode_client_packet(data)? {
        ClientPacket::Input(packet) => Ok(Some(packet)),
        ClientPacket::Unsupported {
            client_id,
            packet_type,
        } => {
            debug!(
                "Ignoring packet type {} from client {}",
                packet_type, client_id
            );
            Ok(None)
        }
    }
}
