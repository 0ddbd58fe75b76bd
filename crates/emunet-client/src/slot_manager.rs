//! Player-slot assignment and pass-controller negotiation.

use std::collections::HashMap;

use crate::config::NetplayConfig;

/// A pending "pass my controller to you" negotiation, created by [`SlotManager::request_pass`]
/// and resolved by [`SlotManager::accept_pass`] or [`SlotManager::reject_pass`].
#[derive(Debug, Clone, Copy)]
pub struct SlotPassRequest {
    pub from: u32,
    pub to: u32,
    pub slot: u8,
}

/// Tracks which player(s) occupy which controller slot, and brokers pass-controller handoffs.
///
/// In exclusive mode a slot holds at most one player, matching a cartridge-style single
/// controller port. In non-exclusive (co-op) mode a slot may be shared by several players, who
/// all feed the same logical input stream. Every assigned `slot_index < max_players` either way.
pub struct SlotManager {
    max_players: u8,
    exclusive_slots: bool,
    slot_of_player: HashMap<u32, u8>,
    slot_occupants: HashMap<u8, Vec<u32>>,
    next_request_id: u64,
    pending_requests: HashMap<u64, SlotPassRequest>,
}

impl SlotManager {
    pub fn new(max_players: u8) -> Self {
        Self::with_mode(max_players, true)
    }

    pub fn with_mode(max_players: u8, exclusive_slots: bool) -> Self {
        Self {
            max_players,
            exclusive_slots,
            slot_of_player: HashMap::new(),
            slot_occupants: HashMap::new(),
            next_request_id: 1,
            pending_requests: HashMap::new(),
        }
    }

    /// Build a manager honoring `config`'s `max_slots`/`exclusive_slots` knobs.
    pub fn from_config(config: &NetplayConfig) -> Self {
        Self::with_mode(config.max_slots, config.exclusive_slots)
    }

    pub fn max_players(&self) -> u8 {
        self.max_players
    }

    pub fn exclusive_slots(&self) -> bool {
        self.exclusive_slots
    }

    pub fn slot_of(&self, player_id: u32) -> Option<u8> {
        self.slot_of_player.get(&player_id).copied()
    }

    /// First occupant of `slot`, if any. In non-exclusive mode a slot may hold more than one
    /// player; see [`SlotManager::occupants_of`] for the full set.
    pub fn occupant_of(&self, slot: u8) -> Option<u32> {
        self.slot_occupants.get(&slot).and_then(|v| v.first().copied())
    }

    pub fn occupants_of(&self, slot: u8) -> &[u32] {
        self.slot_occupants
            .get(&slot)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn slot_has_room(&self, slot: u8) -> bool {
        if self.exclusive_slots {
            self.slot_occupants.get(&slot).is_none_or(Vec::is_empty)
        } else {
            true
        }
    }

    /// Assign `player_id` a slot. If the player already holds one, `preferred` is either absent
    /// (returns the held slot) or must match it (any other explicit preference is rejected).
    /// Otherwise prefers `preferred` if given and has room, falling back to the lowest slot with
    /// room. Returns `None` if no eligible slot exists (`NoSlot`, at the caller).
    pub fn assign(&mut self, player_id: u32, preferred: Option<u8>) -> Option<u8> {
        if let Some(&held) = self.slot_of_player.get(&player_id) {
            return match preferred {
                None => Some(held),
                Some(slot) if slot == held => Some(held),
                Some(_) => None,
            };
        }

        let slot = preferred
            .filter(|&s| s < self.max_players && self.slot_has_room(s))
            .or_else(|| (0..self.max_players).find(|&s| self.slot_has_room(s)))?;

        self.slot_of_player.insert(player_id, slot);
        self.slot_occupants.entry(slot).or_default().push(player_id);
        Some(slot)
    }

    /// Release `player_id`'s slot, if it holds one.
    pub fn release(&mut self, player_id: u32) {
        if let Some(slot) = self.slot_of_player.remove(&player_id) {
            if let Some(occupants) = self.slot_occupants.get_mut(&slot) {
                occupants.retain(|&id| id != player_id);
                if occupants.is_empty() {
                    self.slot_occupants.remove(&slot);
                }
            }
        }
        self.pending_requests
            .retain(|_, req| req.from != player_id && req.to != player_id);
    }

    /// `from` requests to take over `slot` from its current holder, `to`. `from` need not
    /// already hold a slot — this is how a spectator requests a seat. Returns the new request's
    /// id.
    pub fn request_pass(&mut self, from: u32, to: u32, slot: u8) -> Option<u64> {
        if slot >= self.max_players {
            return None;
        }
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_requests
            .insert(request_id, SlotPassRequest { from, to, slot });
        Some(request_id)
    }

    /// `to` (the current holder) accepts the pass: `to` loses `slot`, `from` gains it. Atomic:
    /// either both updates happen or neither does.
    pub fn accept_pass(&mut self, request_id: u64) -> Option<SlotPassRequest> {
        let req = self.pending_requests.remove(&request_id)?;
        // `to` may have already left the slot (e.g. disconnected) between request and accept.
        if self.slot_of_player.get(&req.to) != Some(&req.slot) {
            return None;
        }
        self.release(req.from);
        self.release(req.to);
        self.slot_of_player.insert(req.from, req.slot);
        self.slot_occupants.entry(req.slot).or_default().push(req.from);
        Some(req)
    }

    pub fn reject_pass(&mut self, request_id: u64) -> Option<SlotPassRequest> {
        self.pending_requests.remove(&request_id)
    }

    pub fn clear(&mut self) {
        self.slot_of_player.clear();
        self.slot_occupants.clear();
        self.pending_requests.clear();
    }
}
