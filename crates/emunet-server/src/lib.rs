//! Server library - main loop logic extracted for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use emunet_proto::{
    channel::ChannelKind,
    messages::session::{AttachChannel, ErrorCode, ErrorMsg, PlayerLeft},
    msg_id::MsgId,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::net::inbound::{ConnId, InboundEvent};
use crate::net::outbound::{OutboundTx, send_msg, send_msg_tcp};
use crate::net::rate_limit::{ConnRateLimiter, RateLimitConfig};
use crate::proto_dispatch::handlers::dispatch_packet;
use crate::room::state::RoomManager;

// Export modules publicly for testing
pub mod net;
pub mod proto_dispatch;
pub mod room;

/// Monotonically increasing IDs.
static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_SERVER_NONCE: AtomicU32 = AtomicU32::new(1);
/// High bits are a monotonic counter, low bits are random, so session tokens presented over
/// the wire in `AttachChannel` can't be guessed from a connection's own `Welcome`.
static NEXT_SESSION_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A connection's role, set once its first `Hello` is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ConnRole {
    #[default]
    Unidentified,
    Control,
}

/// Idle-room / idle-connection cleanup configuration for [`run_server`].
#[derive(Debug, Clone)]
pub struct RoomCleanupConfig {
    /// How often to scan connections for inactivity.
    pub check_interval: Duration,
    /// A connection (and any secondary channels attached to it) is disconnected once it has
    /// been silent for this long.
    pub max_idle_duration: Duration,
}

/// Per-connection server-side context.
pub(crate) struct ConnCtx {
    /// The connection's own (control) outbound channel.
    pub(crate) outbound: OutboundTx,
    pub(crate) assigned_client_id: u32,
    pub(crate) name: String,
    pub(crate) role: ConnRole,
    /// Opaque token handed out in `Welcome`, used to authenticate `AttachChannel` requests
    /// from secondary streams that want to join this connection's logical session.
    pub(crate) session_token: u64,
    /// Secondary-channel outbounds attached via `AttachChannel`, keyed by channel kind.
    pub(crate) channels: HashMap<ChannelKind, OutboundTx>,
    /// conn_ids of secondary connections that attached to this one, so they can be torn down
    /// together with the primary connection.
    secondary_conns: Vec<ConnId>,
    /// Cancelled to force the connection's read loop (and thus its socket) to close.
    pub(crate) cancel_token: CancellationToken,
    /// Per-connection message rate limiter, if configured.
    rate_limiter: Option<ConnRateLimiter>,
    last_activity: Instant,
}

/// Run the server main loop.
///
/// This is the core server logic, extracted for testability.
pub async fn run_server(
    mut rx: mpsc::Receiver<InboundEvent>,
    rate_limit_config: Option<RateLimitConfig>,
    cleanup_config: Option<RoomCleanupConfig>,
) -> anyhow::Result<()> {
    let mut conns: HashMap<ConnId, ConnCtx> = HashMap::new();
    let mut room_mgr = RoomManager::new();

    let room_idle_timeout_secs = cleanup_config
        .as_ref()
        .map(|c| c.max_idle_duration.as_secs().min(u64::from(u16::MAX)) as u16)
        .unwrap_or(0);

    let mut cleanup_tick = cleanup_config
        .as_ref()
        .map(|c| tokio::time::interval(c.check_interval));
    let max_idle_duration = cleanup_config.map(|c| c.max_idle_duration);

    info!("Server main loop started");

    loop {
        tokio::select! {
            biased;

            _ = async {
                match cleanup_tick.as_mut() {
                    Some(tick) => { tick.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            }, if cleanup_tick.is_some() => {
                let max_idle = max_idle_duration.expect("cleanup_tick implies max_idle_duration");
                reap_idle_connections(&mut conns, &mut room_mgr, max_idle).await;
            }

            ev = rx.recv() => {
                let Some(ev) = ev else { break };
                handle_event(
                    ev,
                    &mut conns,
                    &mut room_mgr,
                    rate_limit_config.as_ref(),
                    room_idle_timeout_secs,
                )
                .await;
            }
        }
    }

    Ok(())
}

async fn handle_event(
    ev: InboundEvent,
    conns: &mut HashMap<ConnId, ConnCtx>,
    room_mgr: &mut RoomManager,
    rate_limit_config: Option<&RateLimitConfig>,
    room_idle_timeout_secs: u16,
) {
    match ev {
        InboundEvent::Connected {
            conn_id,
            peer,
            outbound,
            cancel_token,
            ..
        } => {
            let rate_limiter = rate_limit_config.and_then(ConnRateLimiter::new);
            conns.insert(
                conn_id,
                ConnCtx {
                    outbound,
                    assigned_client_id: 0,
                    name: String::new(),
                    role: ConnRole::default(),
                    session_token: 0,
                    channels: HashMap::new(),
                    secondary_conns: Vec::new(),
                    cancel_token,
                    rate_limiter,
                    last_activity: Instant::now(),
                },
            );
            debug!(conn_id, %peer, "Client connected");
        }

        InboundEvent::Disconnected {
            conn_id,
            peer,
            reason,
            ..
        } => {
            if let Some(ctx) = conns.remove(&conn_id) {
                disconnect_client_from_room(ctx.assigned_client_id, room_mgr).await;
            }
            info!(conn_id, %peer, %reason, "Client disconnected");
        }

        InboundEvent::Packet {
            conn_id,
            peer,
            packet,
            ..
        } => {
            if let Some(ctx) = conns.get_mut(&conn_id) {
                ctx.last_activity = Instant::now();

                if let Some(limiter) = &ctx.rate_limiter
                    && !limiter.check()
                {
                    warn!(conn_id, %peer, "Per-connection message rate limit exceeded");
                    let err = ErrorMsg {
                        code: ErrorCode::RateLimited,
                    };
                    let _ = send_msg_tcp(&ctx.outbound, &err).await;
                    ctx.cancel_token.cancel();
                    return;
                }
            } else {
                return;
            }

            // Secondary-stream channel attachment is handled out-of-band: it mutates the
            // *primary* connection's outbound routing table, not the sending connection's own
            // state, so it bypasses the normal per-message handler registry.
            if packet.msg_id() == MsgId::AttachChannel {
                attach_channel(conn_id, &packet.payload, conns).await;
                return;
            }

            let Some(ctx) = conns.get_mut(&conn_id) else {
                return;
            };
            let keep_alive = dispatch_packet(
                ctx,
                conn_id,
                &peer,
                &packet,
                room_mgr,
                room_idle_timeout_secs,
            )
            .await;
            if !keep_alive {
                ctx.cancel_token.cancel();
            }
        }
    }
}

/// Wire up a secondary stream's outbound to the primary connection identified by
/// `AttachChannel.session_token`.
async fn attach_channel(
    conn_id: ConnId,
    payload: &[u8],
    conns: &mut HashMap<ConnId, ConnCtx>,
) {
    let Ok(attach) = postcard::from_bytes::<AttachChannel>(payload) else {
        warn!(conn_id, "Malformed AttachChannel payload");
        return;
    };

    let Some(secondary_outbound) = conns.get(&conn_id).map(|c| c.outbound.clone()) else {
        return;
    };

    let primary_id = conns
        .iter()
        .find(|(_, c)| c.session_token != 0 && c.session_token == attach.session_token)
        .map(|(id, _)| *id);

    let Some(primary_id) = primary_id else {
        warn!(conn_id, session_token = attach.session_token, "AttachChannel: unknown session token");
        return;
    };

    if let Some(primary) = conns.get_mut(&primary_id) {
        primary
            .channels
            .insert(attach.channel, secondary_outbound);
        primary.secondary_conns.push(conn_id);
        primary.last_activity = Instant::now();
        debug!(
            conn_id,
            primary_conn_id = primary_id,
            channel = ?attach.channel,
            "Attached secondary channel"
        );
    }
}

/// Disconnect connections (primary + attached secondaries) that have been silent for longer
/// than `max_idle_duration`, and clean up any room membership they held.
async fn reap_idle_connections(
    conns: &mut HashMap<ConnId, ConnCtx>,
    room_mgr: &mut RoomManager,
    max_idle_duration: Duration,
) {
    let now = Instant::now();
    let idle: Vec<ConnId> = conns
        .iter()
        .filter(|(_, c)| {
            // Only primary connections (those that completed a handshake) are scanned directly;
            // secondaries are torn down alongside their primary below.
            c.session_token != 0 && now.duration_since(c.last_activity) >= max_idle_duration
        })
        .map(|(id, _)| *id)
        .collect();

    for conn_id in idle {
        let Some(ctx) = conns.remove(&conn_id) else {
            continue;
        };
        ctx.cancel_token.cancel();
        for secondary_id in &ctx.secondary_conns {
            if let Some(secondary) = conns.remove(secondary_id) {
                secondary.cancel_token.cancel();
            }
        }
        info!(
            conn_id,
            client_id = ctx.assigned_client_id,
            "Disconnecting idle connection"
        );
        disconnect_client_from_room(ctx.assigned_client_id, room_mgr).await;
    }
}

/// Remove a client from whatever room it's in (if any) and broadcast `PlayerLeft` when it held
/// a player slot. No-op if the client never completed a `Hello` handshake.
async fn disconnect_client_from_room(client_id: u32, room_mgr: &mut RoomManager) {
    if client_id == 0 {
        return;
    }

    let Some(room_id) = room_mgr.get_client_room(client_id) else {
        return;
    };

    let (player_index, recipients) = {
        let Some(room) = room_mgr.get_room_mut(room_id) else {
            room_mgr.remove_client(client_id);
            return;
        };

        let player_index = if let Some(player) = room.remove_player(client_id) {
            info!(
                client_id,
                room_id,
                player_index = player.player_index,
                "Player left room"
            );
            Some(player.player_index)
        } else if room.remove_spectator(client_id).is_some() {
            info!(client_id, room_id, role = "spectator", "Client left room");
            None
        } else {
            None
        };

        let recipients = if player_index.is_some() {
            room.all_outbounds_msg(MsgId::PlayerLeft)
        } else {
            Vec::new()
        };

        if room.is_empty() {
            room_mgr.remove_room(room_id);
            info!(room_id, "Removed empty room");
        }

        (player_index, recipients)
    };

    if let Some(p_idx) = player_index {
        let msg = PlayerLeft {
            client_id,
            player_index: p_idx,
        };
        for recipient in &recipients {
            let _ = send_msg(recipient, &msg).await;
        }
    }

    room_mgr.remove_client(client_id);
}
