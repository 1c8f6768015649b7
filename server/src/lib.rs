//! # Tick Server Library
//!
//! This library provides an authoritative, fixed-rate tick server for a
//! simple 2D platformer. Clients stream their inputs over WebSocket; the
//! server owns the simulation and broadcasts the resulting state.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the definitive version of the game physics. Every tick it
//! applies the inputs clients have sent for it, synthesizes inputs for any
//! sequence numbers that never arrived, and advances each player.
//!
//! ### Input Buffering
//! Inputs are buffered per tick and per player in a ring of tick slots. Each
//! slot also records the start-of-tick state of every player, so recorded
//! history is never mutated once the world has moved past it.
//!
//! ### State Broadcasting
//! After each tick the server compares every player against its state at the
//! start of the tick. If anything moved, one binary message with a record per
//! changed player is sent to every connected client. Ticks where nobody moved
//! send nothing.
//!
//! ## Architecture Design
//!
//! ### Shared World, Two Loops
//! The world sits behind a single async mutex. The tick loop takes it once
//! per tick; the input loop takes it once per decoded packet. No other task
//! touches the world during a tick.
//!
//! ### Hub Fan-Out
//! A hub task owns the set of per-client output queues. Queues are bounded;
//! a client that falls too far behind is evicted instead of slowing down the
//! broadcast for everybody else.
//!
//! ### Thin Transport
//! The WebSocket layer only assigns client ids, forwards binary frames into
//! the input stream and drains output queues back onto sockets.
//!
//! ## Module Organization
//!
//! ### Tick Buffer Module (`tick_buffer`)
//! Ring storage of tick slots indexed by tick number.
//!
//! ### Game Module (`game`)
//! The world: tick counter, input acceptance and the per-tick update.
//!
//! ### Engine Module (`engine`)
//! Start/stop lifecycle around the world's tick and input loops.
//!
//! ### Hub Module (`hub`)
//! Client registry and snapshot fan-out.
//!
//! ### Network Module (`network`)
//! WebSocket listener and per-connection tasks, plus [`network::launch`]
//! which wires everything together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::launch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 9000,
//!         tick_rate: 20,
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = launch(&config).await?;
//!     println!("Listening on {}", server.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod hub;
pub mod network;
pub mod tick_buffer;
