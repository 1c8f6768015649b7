//! Circular per-tick storage of player state and pending inputs
//!
//! Slots are addressed by `tick % BUFFER_SIZE` and players inside a slot by
//! their one-byte client id. Both are fixed-size arenas; a player slot that
//! holds nothing is marked unoccupied instead of being removed.

use shared::{InputSnapshot, PlayerState, BUFFER_SIZE, MAX_CLIENTS};
use std::collections::HashMap;

/// One player's entry in a tick slot.
#[derive(Debug, Clone, Default)]
pub struct PlayerSlot {
    pub occupied: bool,
    /// State as of the start of the tick.
    pub state: PlayerState,
    /// Inputs received for this tick, keyed by client sequence number.
    pub pending: HashMap<u32, InputSnapshot>,
}

/// Everything recorded for one tick.
#[derive(Debug, Clone)]
pub struct TickSlot {
    players: Vec<PlayerSlot>,
}

impl TickSlot {
    fn new() -> Self {
        Self {
            players: vec![PlayerSlot::default(); MAX_CLIENTS],
        }
    }

    /// Empties the slot so it can be reused for a new tick.
    pub fn reset(&mut self) {
        for player in &mut self.players {
            player.occupied = false;
            player.state = PlayerState::default();
            player.pending.clear();
        }
    }

    /// The player's entry, or None if the id is not occupied in this tick.
    pub fn player(&self, client_id: u8) -> Option<&PlayerSlot> {
        let player = &self.players[usize::from(client_id)];
        player.occupied.then_some(player)
    }

    /// Mutable access to an occupied player entry.
    ///
    /// Used to buffer inputs and update the received sequence number.
    pub fn player_mut(&mut self, client_id: u8) -> Option<&mut PlayerSlot> {
        let player = &mut self.players[usize::from(client_id)];
        if player.occupied {
            Some(player)
        } else {
            None
        }
    }

    /// Places a player with the given state and no pending inputs.
    ///
    /// Anything already stored for the id is overwritten.
    pub fn insert(&mut self, client_id: u8, state: PlayerState) {
        let player = &mut self.players[usize::from(client_id)];
        player.occupied = true;
        player.state = state;
        player.pending.clear();
    }

    /// Marks the player's entry as free and drops its pending inputs.
    ///
    /// Returns true if the player was present.
    pub fn remove(&mut self, client_id: u8) -> bool {
        let player = &mut self.players[usize::from(client_id)];
        let was_present = player.occupied;
        player.occupied = false;
        player.pending.clear();
        was_present
    }

    /// Occupied entries with their client ids, in ascending id order.
    pub fn iter_occupied_mut(&mut self) -> impl Iterator<Item = (u8, &mut PlayerSlot)> {
        self.players
            .iter_mut()
            .enumerate()
            .filter(|(_, player)| player.occupied)
            .map(|(id, player)| (id as u8, player))
    }

    /// Number of occupied player entries.
    pub fn len(&self) -> usize {
        self.players.iter().filter(|player| player.occupied).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed ring of `BUFFER_SIZE` lazily allocated tick slots.
#[derive(Debug)]
pub struct TickBuffer {
    slots: Vec<Option<Box<TickSlot>>>,
}

impl Default for TickBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TickBuffer {
    /// Creates a buffer with no slots allocated yet.
    pub fn new() -> Self {
        Self {
            slots: (0..BUFFER_SIZE).map(|_| None).collect(),
        }
    }

    /// Ring position of `tick`.
    pub fn index(tick: u16) -> usize {
        usize::from(tick) % BUFFER_SIZE
    }

    /// The slot for `tick`, if it was ever allocated.
    ///
    /// After the ring wraps this holds whatever tick last used the index.
    pub fn slot(&self, tick: u16) -> Option<&TickSlot> {
        self.slots[Self::index(tick)].as_deref()
    }

    /// The slot for `tick`, allocated on first use.
    pub fn slot_mut(&mut self, tick: u16) -> &mut TickSlot {
        ensure(&mut self.slots[Self::index(tick)])
    }

    /// Borrows the slots for two different ticks at once.
    ///
    /// Both slots are created if missing. The ticks must not share an index.
    pub fn slot_pair_mut(&mut self, first: u16, second: u16) -> (&mut TickSlot, &mut TickSlot) {
        let a = Self::index(first);
        let b = Self::index(second);
        assert_ne!(a, b, "tick {} and {} share a slot", first, second);

        if a < b {
            let (low, high) = self.slots.split_at_mut(b);
            (ensure(&mut low[a]), ensure(&mut high[0]))
        } else {
            let (low, high) = self.slots.split_at_mut(a);
            (ensure(&mut high[0]), ensure(&mut low[b]))
        }
    }
}

fn ensure(slot: &mut Option<Box<TickSlot>>) -> &mut TickSlot {
    slot.get_or_insert_with(|| Box::new(TickSlot::new()))
}
