//! Client-side room lifecycle: the signaling-protocol counterpart to the server's room table.
//!
//! This is the §4.6/§4.7 state machine (role + `Disconnected → ... → Joined`), distinct from the
//! lower-level wire session tracked by [`crate::session::NetplaySession`] for the raw TCP/QUIC
//! protocol — this one models the signaling server's room/participant bookkeeping the way a
//! browser client would see it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::credential::CredentialRefresh;
use crate::error::NetplayError;
use crate::error::NetplayError::TransportUnavailable;
use crate::signaling::{BoxFuture, SignalingTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
    Spectator,
}

/// Mirrors §4.6's state machine. Transitions are driven by [`RoomManager`] and
/// `SignalingTransport` connection events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomSessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Joining,
    Joined,
}

impl RoomSessionState {
    /// Whether `to` is a legal transition from `self`.
    pub fn can_transition_to(self, to: RoomSessionState) -> bool {
        use RoomSessionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Joining)
                | (Joining, Joined)
                | (Joined, Disconnected)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: u32,
    pub name: String,
    pub slot: Option<u8>,
    pub ready: bool,
    pub validated: bool,
    pub is_host: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub session_id: String,
    pub room_name: String,
    pub current: u32,
    pub max: u32,
    pub has_password: bool,
    pub netplay_mode: String,
    pub sync_config: Option<String>,
    pub spectator_mode: bool,
    pub rom_hash: Option<String>,
    pub core_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomJoinResult {
    pub session_id: String,
    pub participants: Vec<Participant>,
    pub is_host: bool,
}

/// Callback invoked whenever a participant's slot assignment changes. Registered by the host
/// application to wire room-driven slot changes into e.g.
/// [`crate::input_sync::InputSync::invalidate_cache`] (§4.5: "the cache is fully invalidated
/// whenever a slot assignment changes").
pub type SlotChangeHandler = Box<dyn Fn(u32, Option<u8>) + Send + Sync>;

/// The §6 room-discovery HTTP call: `GET /list?domain=<host>&game_id=<id>[&token=<t>]`.
/// Out-of-scope collaborator so `list_rooms` never hardcodes a concrete HTTP client.
pub trait RoomDiscoveryClient: Send + Sync {
    fn list_rooms<'a>(
        &'a self,
        domain: &'a str,
        game_id: &'a str,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<HashMap<String, DiscoveredRoom>, NetplayError>>;
}

/// Wire shape of one entry in the `/list` reply map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveredRoom {
    pub room_name: String,
    pub current: u32,
    pub max: u32,
    #[serde(rename = "hasPassword")]
    pub has_password: bool,
    pub netplay_mode: String,
    #[serde(default)]
    pub sync_config: Option<String>,
    pub spectator_mode: bool,
    #[serde(default)]
    pub rom_hash: Option<String>,
    #[serde(default)]
    pub core_type: Option<String>,
}

/// `reqwest`-backed [`RoomDiscoveryClient`].
pub struct ReqwestRoomDiscoveryClient {
    client: reqwest::Client,
    list_url: String,
}

impl ReqwestRoomDiscoveryClient {
    /// `list_url` is the discovery server's base URL, e.g. `https://rooms.example.com/list`.
    pub fn new(list_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            list_url: list_url.into(),
        }
    }
}

impl RoomDiscoveryClient for ReqwestRoomDiscoveryClient {
    fn list_rooms<'a>(
        &'a self,
        domain: &'a str,
        game_id: &'a str,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<HashMap<String, DiscoveredRoom>, NetplayError>> {
        Box::pin(async move {
            let mut query = vec![("domain", domain), ("game_id", game_id)];
            if let Some(token) = token {
                query.push(("token", token));
            }
            let response = self
                .client
                .get(&self.list_url)
                .query(&query)
                .send()
                .await
                .map_err(|e| NetplayError::ConnectionFailed(e.to_string()))?;
            if !response.status().is_success() {
                return Err(NetplayError::ConnectionFailed(format!(
                    "room discovery returned {}",
                    response.status()
                )));
            }
            response
                .json()
                .await
                .map_err(|e| NetplayError::InvalidServerReply(e.to_string()))
        })
    }
}

/// Holds the state machine plus the participant map; all mutation goes through its methods so
/// transitions and participant bookkeeping stay deterministic.
pub struct RoomManager {
    signaling: Arc<SignalingTransport>,
    state: RoomSessionState,
    role: Role,
    local_participant_id: u32,
    room_name: Option<String>,
    participants: BTreeMap<u32, Participant>,
    slot_observers: Vec<SlotChangeHandler>,
    discovery: Option<Arc<dyn RoomDiscoveryClient>>,
    discovery_domain: String,
    game_id: String,
    auth_token: Option<String>,
    credential_refresh: Option<Arc<dyn CredentialRefresh>>,
}

const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

impl RoomManager {
    pub fn new(signaling: Arc<SignalingTransport>, local_participant_id: u32) -> Self {
        Self {
            signaling,
            state: RoomSessionState::Disconnected,
            role: Role::Client,
            local_participant_id,
            room_name: None,
            participants: BTreeMap::new(),
            slot_observers: Vec::new(),
            discovery: None,
            discovery_domain: String::new(),
            game_id: String::new(),
            auth_token: None,
            credential_refresh: None,
        }
    }

    /// Configure the §6 room-discovery HTTP collaborator used by [`RoomManager::list_rooms`].
    pub fn set_discovery(
        &mut self,
        client: Arc<dyn RoomDiscoveryClient>,
        domain: String,
        game_id: String,
        token: Option<String>,
    ) {
        self.discovery = Some(client);
        self.discovery_domain = domain;
        self.game_id = game_id;
        self.auth_token = token;
    }

    /// Configure the collaborator invoked before retrying any unauthorized/token/auth error.
    pub fn set_credential_refresh(&mut self, credential_refresh: Arc<dyn CredentialRefresh>) {
        self.credential_refresh = Some(credential_refresh);
    }

    /// Register a callback fired on every slot-assignment change (initial assignment, server
    /// push, or local `update_slot`).
    pub fn on_slot_change(&mut self, handler: SlotChangeHandler) {
        self.slot_observers.push(handler);
    }

    fn notify_slot_change(&self, participant_id: u32, slot: Option<u8>) {
        for observer in &self.slot_observers {
            observer(participant_id, slot);
        }
    }

    pub fn state(&self) -> RoomSessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Host-side start predicate: every participant is both `ready` and `validated`. Spectators
    /// are not counted against this — they carry no `slot` and are never blocking.
    pub fn all_players_ready_and_validated(&self) -> bool {
        self.participants
            .values()
            .filter(|p| p.slot.is_some())
            .all(|p| p.ready && p.validated)
    }

    fn transition(&mut self, to: RoomSessionState) {
        if self.state.can_transition_to(to) {
            self.state = to;
        }
    }

    /// `addParticipant`/`removeParticipant` are idempotent in their target state.
    fn upsert_participant(&mut self, participant: Participant) {
        self.participants.insert(participant.id, participant);
    }

    fn remove_participant(&mut self, id: u32) {
        self.participants.remove(&id);
    }

    /// Emit a signaling request expecting a reply. Errors tagged unauthorized/token/auth are
    /// surfaced to the credential-refresh collaborator and the request retried once before
    /// propagating to the caller (§4.7/§7).
    async fn emit_checked(&self, event: &str, payload: Vec<u8>) -> Result<Vec<u8>, NetplayError> {
        match self.signaling.emit(event, payload.clone(), true).await {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(e)) if e.is_auth_related() => {
                let Some(credential_refresh) = self.credential_refresh.clone() else {
                    return Err(e);
                };
                credential_refresh.refresh().await?;
                self.signaling
                    .emit(event, payload, true)
                    .await
                    .ok_or(NetplayError::NotConnected)?
            }
            Some(Err(e)) => Err(e),
            None => Err(NetplayError::NotConnected),
        }
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, NetplayError> {
        let discovery = self
            .discovery
            .as_ref()
            .ok_or_else(|| TransportUnavailable("room discovery client not configured".to_string()))?;
        let rooms = discovery
            .list_rooms(&self.discovery_domain, &self.game_id, self.auth_token.as_deref())
            .await?;
        Ok(rooms
            .into_iter()
            .map(|(session_id, room)| RoomSummary {
                session_id,
                room_name: room.room_name,
                current: room.current,
                max: room.max,
                has_password: room.has_password,
                netplay_mode: room.netplay_mode,
                sync_config: room.sync_config,
                spectator_mode: room.spectator_mode,
                rom_hash: room.rom_hash,
                core_type: room.core_type,
            })
            .collect())
    }

    pub async fn create(
        &mut self,
        name: String,
        max_players: u32,
        password: Option<String>,
    ) -> Result<String, NetplayError> {
        self.transition(RoomSessionState::Joining);
        let payload = serde_json::to_vec(&CreateRoomRequest {
            extra: serde_json::json!({ "name": name }),
            max_players,
            password: password.as_deref(),
        })
        .expect("CreateRoomRequest always serializes");

        match self.emit_checked("open-room", payload).await {
            Ok(bytes) => {
                let reply: CreateRoomReply = serde_json::from_slice(&bytes)
                    .map_err(|e| NetplayError::InvalidServerReply(e.to_string()))?;
                self.role = Role::Host;
                self.room_name = Some(name);
                self.transition(RoomSessionState::Joined);
                self.upsert_participant(Participant {
                    id: self.local_participant_id,
                    name: self.room_name.clone().unwrap_or_default(),
                    slot: Some(0),
                    ready: false,
                    validated: true,
                    is_host: true,
                });
                self.notify_slot_change(self.local_participant_id, Some(0));
                Ok(reply.session_id)
            }
            Err(e) => {
                self.transition(RoomSessionState::Connected);
                Err(e)
            }
        }
    }

    pub async fn join(
        &mut self,
        session_id: String,
        name: String,
        password: Option<String>,
    ) -> Result<RoomJoinResult, NetplayError> {
        self.transition(RoomSessionState::Joining);
        let payload = serde_json::to_vec(&JoinRoomRequest {
            extra: serde_json::json!({ "sessionId": session_id, "name": name }),
            password: password.as_deref(),
        })
        .expect("JoinRoomRequest always serializes");

        match self.emit_checked("join-room", payload).await {
            Ok(bytes) => {
                let reply: JoinRoomReply = serde_json::from_slice(&bytes)
                    .map_err(|e| NetplayError::InvalidServerReply(e.to_string()))?;
                self.role = Role::Client;
                self.room_name = Some(session_id.clone());
                self.participants = reply
                    .users
                    .into_iter()
                    .map(|u| {
                        (
                            u.id,
                            Participant {
                                id: u.id,
                                name: u.name,
                                slot: u.slot,
                                ready: u.ready,
                                validated: u.validated,
                                is_host: u.is_host,
                            },
                        )
                    })
                    .collect();
                for p in self.participants.values() {
                    self.notify_slot_change(p.id, p.slot);
                }
                self.transition(RoomSessionState::Joined);
                let is_host = self
                    .participants
                    .get(&self.local_participant_id)
                    .is_some_and(|p| p.is_host);
                Ok(RoomJoinResult {
                    session_id,
                    participants: self.participants.values().cloned().collect(),
                    is_host,
                })
            }
            Err(e) => {
                self.transition(RoomSessionState::Connected);
                Err(e)
            }
        }
    }

    /// Always proceeds locally; falls back to a 2s safety timeout if the server doesn't
    /// acknowledge.
    pub async fn leave(&mut self, reason: Option<String>) {
        let room_name = self.room_name.take();
        self.participants.clear();
        self.transition(RoomSessionState::Connected);

        if let Some(room_name) = room_name {
            let payload = encode_leave_request(&room_name, reason.as_deref());
            let _ = timeout(
                LEAVE_TIMEOUT,
                self.signaling.emit("leave-room", payload, true),
            )
            .await;
        }
    }

    pub async fn toggle_ready(&mut self) -> Result<(), NetplayError> {
        let Some(room_name) = self.room_name.clone() else {
            return Err(NetplayError::NotConnected);
        };
        if let Some(p) = self.participants.get_mut(&self.local_participant_id) {
            p.ready = !p.ready;
        }
        self.emit_checked("toggle-ready", room_name.into_bytes())
            .await
            .map(|_| ())
    }

    /// Host only.
    pub async fn start_game(&mut self) -> Result<(), NetplayError> {
        if self.role != Role::Host {
            return Err(NetplayError::AuthRequired);
        }
        let Some(room_name) = self.room_name.clone() else {
            return Err(NetplayError::NotConnected);
        };
        self.emit_checked("start-game", room_name.into_bytes())
            .await
            .map(|_| ())
    }

    pub async fn update_slot(&mut self, slot: Option<u8>) -> Result<(), NetplayError> {
        if let Some(p) = self.participants.get_mut(&self.local_participant_id) {
            p.slot = slot;
        }
        let payload = slot.map(|s| vec![s]).unwrap_or_default();
        self.emit_checked("update-player-slot", payload).await?;
        self.notify_slot_change(self.local_participant_id, slot);
        Ok(())
    }

    pub async fn update_room_metadata(&mut self, metadata: Vec<u8>) -> Result<(), NetplayError> {
        self.emit_checked("update-room-metadata", metadata)
            .await
            .map(|_| ())
    }

    pub async fn update_player_metadata(&mut self, metadata: Vec<u8>) -> Result<(), NetplayError> {
        self.emit_checked("update-player-metadata", metadata)
            .await
            .map(|_| ())
    }

    /// Apply a `users-updated` event: replace the full participant map.
    pub fn on_users_updated(&mut self, participants: Vec<Participant>) {
        let old_slots: HashMap<u32, Option<u8>> =
            self.participants.iter().map(|(&id, p)| (id, p.slot)).collect();
        self.participants = participants.into_iter().map(|p| (p.id, p)).collect();
        for p in self.participants.values() {
            if old_slots.get(&p.id) != Some(&p.slot) {
                self.notify_slot_change(p.id, p.slot);
            }
        }
    }

    /// Apply a `player-slot-updated` event.
    pub fn on_player_slot_updated(&mut self, participant_id: u32, slot: Option<u8>) {
        if let Some(p) = self.participants.get_mut(&participant_id) {
            p.slot = slot;
        }
        self.notify_slot_change(participant_id, slot);
    }

    /// Apply a `player-ready-updated` event.
    pub fn on_player_ready_updated(&mut self, participant_id: u32, ready: bool) {
        if let Some(p) = self.participants.get_mut(&participant_id) {
            p.ready = ready;
        }
    }

    /// Apply a `player-validation-updated` event.
    pub fn on_player_validation_updated(&mut self, participant_id: u32, validated: bool) {
        if let Some(p) = self.participants.get_mut(&participant_id) {
            p.validated = validated;
        }
    }

    /// Apply a `room-closed` event.
    pub fn on_room_closed(&mut self) {
        self.participants.clear();
        self.room_name = None;
        self.transition(RoomSessionState::Connected);
    }

    /// Drop a participant that left (idempotent).
    pub fn on_participant_left(&mut self, participant_id: u32) {
        self.remove_participant(participant_id);
    }
}

#[derive(Serialize)]
struct CreateRoomRequest<'a> {
    extra: serde_json::Value,
    #[serde(rename = "maxPlayers")]
    max_players: u32,
    password: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateRoomReply {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Serialize)]
struct JoinRoomRequest<'a> {
    extra: serde_json::Value,
    password: Option<&'a str>,
}

#[derive(Deserialize)]
struct WireParticipant {
    id: u32,
    name: String,
    slot: Option<u8>,
    ready: bool,
    validated: bool,
    #[serde(rename = "isHost")]
    is_host: bool,
}

#[derive(Deserialize)]
struct JoinRoomReply {
    users: Vec<WireParticipant>,
}

fn encode_leave_request(room_name: &str, reason: Option<&str>) -> Vec<u8> {
    format!("{{\"roomName\":\"{room_name}\",\"reason\":{:?}}}", reason).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_only_documented_transitions() {
        assert!(RoomSessionState::Disconnected.can_transition_to(RoomSessionState::Connecting));
        assert!(!RoomSessionState::Disconnected.can_transition_to(RoomSessionState::Joined));
        assert!(RoomSessionState::Joined.can_transition_to(RoomSessionState::Disconnected));
    }

    #[test]
    fn participant_upsert_and_remove_are_idempotent() {
        let signaling = Arc::new(SignalingTransport::new(Arc::new(NoopBackend)));
        let mut mgr = RoomManager::new(signaling, 1);
        mgr.on_users_updated(vec![Participant {
            id: 1,
            name: "a".to_string(),
            slot: None,
            ready: false,
            validated: true,
            is_host: false,
        }]);
        mgr.on_participant_left(1);
        mgr.on_participant_left(1);
        assert_eq!(mgr.participants().count(), 0);
    }

    #[tokio::test]
    async fn create_parses_session_id_from_reply() {
        let signaling = Arc::new(SignalingTransport::new(Arc::new(OpenRoomBackend)));
        signaling.connect("ws://test", None).await.unwrap();
        let mut mgr = RoomManager::new(signaling, 1);
        let session_id = mgr.create("room".to_string(), 4, None).await.unwrap();
        assert_eq!(session_id, "srv-42");
        assert_eq!(mgr.role(), Role::Host);
    }

    #[tokio::test]
    async fn join_populates_participants_and_host_flag_from_reply() {
        let signaling = Arc::new(SignalingTransport::new(Arc::new(JoinRoomBackend)));
        signaling.connect("ws://test", None).await.unwrap();
        let mut mgr = RoomManager::new(signaling, 7);
        let result = mgr
            .join("srv-42".to_string(), "carol".to_string(), None)
            .await
            .unwrap();
        assert!(result.is_host);
        assert_eq!(result.participants.len(), 2);
        assert_eq!(mgr.participants().count(), 2);
    }

    #[tokio::test]
    async fn auth_required_reply_is_retried_after_credential_refresh() {
        let signaling = Arc::new(SignalingTransport::new(Arc::new(AuthThenOkBackend::default())));
        signaling.connect("ws://test", None).await.unwrap();
        let mut mgr = RoomManager::new(signaling, 1);
        mgr.set_credential_refresh(Arc::new(FixedRefresh));
        mgr.room_name = Some("room".to_string());
        let result = mgr.toggle_ready().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn slot_change_observer_fires_on_update_slot() {
        let signaling = Arc::new(SignalingTransport::new(Arc::new(OkBackend)));
        signaling.connect("ws://test", None).await.unwrap();
        let mut mgr = RoomManager::new(signaling, 1);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        mgr.on_slot_change(Box::new(move |id, slot| {
            seen_clone.lock().push((id, slot));
        }));
        mgr.update_slot(Some(3)).await.unwrap();
        assert_eq!(seen.lock().as_slice(), [(1, Some(3))]);
    }

    struct NoopBackend;
    impl crate::signaling::SignalingBackend for NoopBackend {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
            _token: Option<&'a str>,
        ) -> crate::signaling::BoxFuture<'a, Result<(), NetplayError>> {
            Box::pin(async { Ok(()) })
        }
        fn request<'a>(
            &'a self,
            _event: &'a str,
            _payload: Vec<u8>,
        ) -> crate::signaling::BoxFuture<'a, Result<Vec<u8>, NetplayError>> {
            Box::pin(async { Ok(vec![]) })
        }
    }

    struct OkBackend;
    impl crate::signaling::SignalingBackend for OkBackend {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
            _token: Option<&'a str>,
        ) -> crate::signaling::BoxFuture<'a, Result<(), NetplayError>> {
            Box::pin(async { Ok(()) })
        }
        fn request<'a>(
            &'a self,
            _event: &'a str,
            _payload: Vec<u8>,
        ) -> crate::signaling::BoxFuture<'a, Result<Vec<u8>, NetplayError>> {
            Box::pin(async { Ok(b"{}".to_vec()) })
        }
    }

    struct OpenRoomBackend;
    impl crate::signaling::SignalingBackend for OpenRoomBackend {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
            _token: Option<&'a str>,
        ) -> crate::signaling::BoxFuture<'a, Result<(), NetplayError>> {
            Box::pin(async { Ok(()) })
        }
        fn request<'a>(
            &'a self,
            _event: &'a str,
            _payload: Vec<u8>,
        ) -> crate::signaling::BoxFuture<'a, Result<Vec<u8>, NetplayError>> {
            Box::pin(async { Ok(br#"{"sessionId":"srv-42"}"#.to_vec()) })
        }
    }

    struct JoinRoomBackend;
    impl crate::signaling::SignalingBackend for JoinRoomBackend {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
            _token: Option<&'a str>,
        ) -> crate::signaling::BoxFuture<'a, Result<(), NetplayError>> {
            Box::pin(async { Ok(()) })
        }
        fn request<'a>(
            &'a self,
            _event: &'a str,
            _payload: Vec<u8>,
        ) -> crate::signaling::BoxFuture<'a, Result<Vec<u8>, NetplayError>> {
            Box::pin(async {
                Ok(br#"{"users":[
                    {"id":7,"name":"carol","slot":null,"ready":false,"validated":true,"isHost":true},
                    {"id":1,"name":"alice","slot":0,"ready":true,"validated":true,"isHost":false}
                ]}"#
                .to_vec())
            })
        }
    }

    #[derive(Default)]
    struct AuthThenOkBackend {
        called: std::sync::atomic::AtomicUsize,
    }
    impl crate::signaling::SignalingBackend for AuthThenOkBackend {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
            _token: Option<&'a str>,
        ) -> crate::signaling::BoxFuture<'a, Result<(), NetplayError>> {
            Box::pin(async { Ok(()) })
        }
        fn request<'a>(
            &'a self,
            _event: &'a str,
            _payload: Vec<u8>,
        ) -> crate::signaling::BoxFuture<'a, Result<Vec<u8>, NetplayError>> {
            Box::pin(async move {
                if self.called.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Err(NetplayError::AuthRequired)
                } else {
                    Ok(vec![])
                }
            })
        }
    }

    struct FixedRefresh;
    impl CredentialRefresh for FixedRefresh {
        fn refresh<'a>(&'a self) -> crate::signaling::BoxFuture<'a, Result<String, NetplayError>> {
            Box::pin(async { Ok("new-token".to_string()) })
        }
    }
}
