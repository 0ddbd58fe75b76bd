//! Spectator tracking and the bounded room chat log.

use std::collections::{HashSet, VecDeque};

/// A chat message, either produced locally or received from the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender_id: u32,
    pub name: Option<String>,
    pub text: String,
    /// Server-assigned timestamp (ms since epoch) for remote messages; `None` for a message not
    /// yet acknowledged by the server.
    pub timestamp_ms: Option<u64>,
}

/// Tracks which participants are spectating and the room's chat history.
pub struct SpectatorManager {
    spectators: HashSet<u32>,
    chat_log: VecDeque<ChatMessage>,
    chat_capacity: usize,
}

impl SpectatorManager {
    pub fn new() -> Self {
        Self::with_chat_capacity(100)
    }

    pub fn with_chat_capacity(chat_capacity: usize) -> Self {
        Self {
            spectators: HashSet::new(),
            chat_log: VecDeque::new(),
            chat_capacity,
        }
    }

    pub fn mark_spectating(&mut self, participant_id: u32) {
        self.spectators.insert(participant_id);
    }

    pub fn unmark_spectating(&mut self, participant_id: u32) {
        self.spectators.remove(&participant_id);
    }

    pub fn is_spectating(&self, participant_id: u32) -> bool {
        self.spectators.contains(&participant_id)
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    fn push_chat(&mut self, message: ChatMessage) {
        if self.chat_log.len() >= self.chat_capacity {
            self.chat_log.pop_front();
        }
        self.chat_log.push_back(message);
    }

    /// Append locally and return the message to hand to the signaling channel's emit call.
    pub fn send_chat_message(
        &mut self,
        sender_id: u32,
        text: String,
        name: Option<String>,
    ) -> ChatMessage {
        let message = ChatMessage {
            sender_id,
            name,
            text,
            timestamp_ms: None,
        };
        self.push_chat(message.clone());
        message
    }

    /// Append an incoming `chat-message` event, already carrying the server's timestamp.
    pub fn receive_chat_message(&mut self, message: ChatMessage) {
        self.push_chat(message);
    }

    pub fn chat_log(&self) -> impl Iterator<Item = &ChatMessage> {
        self.chat_log.iter()
    }
}

impl Default for SpectatorManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectator_membership_round_trips() {
        let mut mgr = SpectatorManager::new();
        mgr.mark_spectating(1);
        assert!(mgr.is_spectating(1));
        mgr.unmark_spectating(1);
        assert!(!mgr.is_spectating(1));
    }

    #[test]
    fn chat_log_is_bounded() {
        let mut mgr = SpectatorManager::with_chat_capacity(2);
        mgr.send_chat_message(1, "a".to_string(), None);
        mgr.send_chat_message(1, "b".to_string(), None);
        mgr.send_chat_message(1, "c".to_string(), None);
        let texts: Vec<_> = mgr.chat_log().map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn local_send_has_no_timestamp_until_acked() {
        let mut mgr = SpectatorManager::new();
        let sent = mgr.send_chat_message(1, "hi".to_string(), Some("alice".to_string()));
        assert!(sent.timestamp_ms.is_none());
    }
}
