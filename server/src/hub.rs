//! Fan-out of world snapshots to every connected client
//!
//! The hub owns the registry of client output queues. Nothing else touches
//! it: connections and the world engine talk to the hub through channels,
//! and the hub's own loop is the only writer.
//!
//! Each client gets a bounded queue. Broadcasting never waits on a client;
//! a client whose queue is full when a message arrives is evicted by closing
//! its queue, so a slow reader can't hold up everyone else.

use log::{debug, info, warn};
use shared::MAX_CLIENTS;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

/// Messages a client may have queued before it gets evicted.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Outbound messages the world engine may have queued for the hub.
const BROADCAST_CHANNEL_CAPACITY: usize = 64;

/// Registry changes requested by connections.
///
/// Both kinds share one channel so a connection's register is always seen
/// before its unregister.
#[derive(Debug)]
pub enum HubEvent {
    Register {
        client_id: u8,
        queue: mpsc::Sender<Vec<u8>>,
    },
    Unregister {
        client_id: u8,
    },
}

/// Cloneable access to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
    outbound: mpsc::Sender<Vec<u8>>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Creates the client's output queue and hands the sending half to the hub.
    ///
    /// Returns None if the hub is no longer running.
    pub fn register(&self, client_id: u8) -> Option<mpsc::Receiver<Vec<u8>>> {
        let (queue, receiver) = mpsc::channel(self.queue_capacity);
        self.events
            .send(HubEvent::Register { client_id, queue })
            .ok()
            .map(|_| receiver)
    }

    /// Asks the hub to drop the client's queue, which closes it.
    pub fn unregister(&self, client_id: u8) {
        if self
            .events
            .send(HubEvent::Unregister { client_id })
            .is_err()
        {
            debug!("Hub stopped before client {} unregistered", client_id);
        }
    }

    /// Sink for complete outbound messages.
    pub fn broadcast_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.outbound.clone()
    }
}

/// The hub's own state, driven by [`Hub::run`].
pub struct Hub {
    clients: Vec<Option<mpsc::Sender<Vec<u8>>>>,
    events: mpsc::UnboundedReceiver<HubEvent>,
    outbound: mpsc::Receiver<Vec<u8>>,
}

impl Hub {
    /// Creates a hub and the handle used to reach it. Every client queue
    /// registered through the handle holds `queue_capacity` messages.
    pub fn new(queue_capacity: usize) -> (Self, HubHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(BROADCAST_CHANNEL_CAPACITY);

        let hub = Hub {
            clients: (0..MAX_CLIENTS).map(|_| None).collect(),
            events: events_rx,
            outbound: outbound_rx,
        };
        let handle = HubHandle {
            events: events_tx,
            outbound: outbound_tx,
            queue_capacity: queue_capacity.max(1),
        };
        (hub, handle)
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.iter().filter(|client| client.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `client_id` has a live output queue.
    pub fn is_registered(&self, client_id: u8) -> bool {
        self.clients[usize::from(client_id)].is_some()
    }

    /// Runs until shutdown is signalled or every handle and sink is gone.
    ///
    /// Registry changes queued before a broadcast are applied before it.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Hub started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,
                Some(event) = self.events.recv() => self.handle_event(event),
                message = self.outbound.recv() => match message {
                    Some(message) => {
                        self.broadcast(&message);
                    }
                    None => {
                        debug!("Broadcast source closed");
                        break;
                    }
                },
            }
        }

        let remaining = self.len();
        self.clients.iter_mut().for_each(|client| *client = None);
        info!("Hub stopped, closed {} client queues", remaining);
    }

    /// Applies a register or unregister request.
    ///
    /// Registering an id that is already live replaces and closes the old
    /// queue. Unregistering an absent id does nothing.
    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register { client_id, queue } => {
                if self.is_registered(client_id) {
                    warn!("Client {} registered twice, old queue closed", client_id);
                }
                self.clients[usize::from(client_id)] = Some(queue);
                info!("Client {} connected", client_id);
            }
            HubEvent::Unregister { client_id } => {
                if self.clients[usize::from(client_id)].take().is_some() {
                    info!("Client {} disconnected", client_id);
                }
            }
        }
    }

    /// Queues `message` for every live client and returns how many got it.
    pub fn broadcast(&mut self, message: &[u8]) -> usize {
        if self.is_empty() {
            return 0;
        }
        let mut delivered = 0;

        for (client_id, slot) in self.clients.iter_mut().enumerate() {
            let Some(queue) = slot.as_ref() else {
                continue;
            };

            match queue.try_send(message.to_vec()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Client {} cannot keep up, evicting", client_id);
                    *slot = None;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Client {} queue already closed", client_id);
                    *slot = None;
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn register(hub: &mut Hub, client_id: u8, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (queue, receiver) = mpsc::channel(capacity);
        hub.handle_event(HubEvent::Register { client_id, queue });
        receiver
    }

    #[test]
    fn test_register_and_unregister() {
        let (mut hub, _handle) = Hub::new(DEFAULT_QUEUE_CAPACITY);
        assert!(hub.is_empty());

        let mut receiver = register(&mut hub, 3, 4);
        assert!(hub.is_registered(3));
        assert_eq!(hub.len(), 1);

        hub.handle_event(HubEvent::Unregister { client_id: 3 });
        assert!(!hub.is_registered(3));
        // Queue is closed once the hub drops its sender
        assert!(matches!(
            receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_double_unregister_is_noop() {
        let (mut hub, _handle) = Hub::new(DEFAULT_QUEUE_CAPACITY);
        let _receiver = register(&mut hub, 1, 4);

        hub.handle_event(HubEvent::Unregister { client_id: 1 });
        hub.handle_event(HubEvent::Unregister { client_id: 1 });
        hub.handle_event(HubEvent::Unregister { client_id: 200 });
        assert!(hub.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_client() {
        let (mut hub, _handle) = Hub::new(DEFAULT_QUEUE_CAPACITY);
        let mut first = register(&mut hub, 0, 4);
        let mut second = register(&mut hub, 255, 4);

        assert_eq!(hub.broadcast(&[1, 2, 3]), 2);
        assert_eq!(first.try_recv().unwrap(), vec![1, 2, 3]);
        assert_eq!(second.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_full_queue_evicts_only_slow_client() {
        let (mut hub, _handle) = Hub::new(DEFAULT_QUEUE_CAPACITY);
        let mut slow = register(&mut hub, 2, DEFAULT_QUEUE_CAPACITY);
        let mut fast = register(&mut hub, 3, DEFAULT_QUEUE_CAPACITY);

        for i in 0..DEFAULT_QUEUE_CAPACITY {
            assert_eq!(hub.broadcast(&[i as u8]), 2);
            assert_eq!(fast.try_recv().unwrap(), vec![i as u8]);
        }

        assert_eq!(hub.broadcast(&[42]), 1);
        assert!(!hub.is_registered(2));
        assert!(hub.is_registered(3));
        assert_eq!(fast.try_recv().unwrap(), vec![42]);

        let mut backlog = 0;
        while slow.try_recv().is_ok() {
            backlog += 1;
        }
        assert_eq!(backlog, DEFAULT_QUEUE_CAPACITY);
        assert!(matches!(
            slow.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_closed_queue_is_removed_on_broadcast() {
        let (mut hub, _handle) = Hub::new(DEFAULT_QUEUE_CAPACITY);
        let receiver = register(&mut hub, 8, 4);
        drop(receiver);

        assert_eq!(hub.broadcast(&[0]), 0);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_hub_loop_delivers_and_evicts() {
        let (hub, handle) = Hub::new(2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(hub.run(shutdown_rx));

        let mut slow = handle.register(0).unwrap();
        let mut fast = handle.register(1).unwrap();
        let sink = handle.broadcast_sender();

        for i in 0..3u8 {
            sink.send(vec![i]).await.unwrap();
            let message = timeout(Duration::from_secs(1), fast.recv()).await.unwrap();
            assert_eq!(message, Some(vec![i]));
        }

        assert_eq!(slow.recv().await, Some(vec![0]));
        assert_eq!(slow.recv().await, Some(vec![1]));
        assert_eq!(slow.recv().await, None);

        handle.unregister(1);
        let closed = timeout(Duration::from_secs(1), fast.recv()).await.unwrap();
        assert_eq!(closed, None);

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_queues() {
        let (hub, handle) = Hub::new(DEFAULT_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(hub.run(shutdown_rx));

        let mut receiver = handle.register(7).unwrap();
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(receiver.recv().await, None);
        assert!(handle.register(8).is_none());
    }
}
