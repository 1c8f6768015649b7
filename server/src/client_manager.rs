//! Client id allocation for connected clients
//!
//! Client ids are a single byte on the wire, so at most 256 clients can be
//! connected at once. Ids are handed out lowest-first and become available
//! again as soon as their connection is torn down.

use log::info;
use shared::MAX_CLIENTS;
use std::net::SocketAddr;

/// Tracks which client ids are in use and who holds them.
pub struct ClientManager {
    /// Peer address per id, None when the id is free
    clients: Vec<Option<SocketAddr>>,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    connected: usize,
}

impl ClientManager {
    /// Creates a manager accepting up to `max_clients` connections, capped at
    /// the size of the id space.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: vec![None; MAX_CLIENTS],
            max_clients: max_clients.min(MAX_CLIENTS),
            connected: 0,
        }
    }

    /// Reserves the lowest free id for a new connection.
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u8> {
        if self.connected >= self.max_clients {
            return None;
        }

        let index = self.clients.iter().position(Option::is_none)?;
        self.clients[index] = Some(addr);
        self.connected += 1;

        let client_id = index as u8;
        info!(
            "Client {} assigned to {} ({} connected)",
            client_id, addr, self.connected
        );
        Some(client_id)
    }

    /// Releases an id so the next connection can take it.
    ///
    /// Returns false if it was not in use.
    pub fn remove_client(&mut self, client_id: u8) -> bool {
        match self.clients[usize::from(client_id)].take() {
            Some(addr) => {
                self.connected -= 1;
                info!("Client {} released by {}", client_id, addr);
                true
            }
            None => false,
        }
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.connected
    }

    /// Returns true if no client holds an id
    pub fn is_empty(&self) -> bool {
        self.connected == 0
    }
}
