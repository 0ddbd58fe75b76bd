//! MediaTransport: SFU client orchestration — transports, producers, consumers, ICE restart,
//! and the drift monitor. Polymorphic over a [`MediaBackend`] collaborator so this module never
//! embeds a specific WebRTC/SFU library.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::timeout;

use crate::config::HostCodec;
use crate::error::NetplayError;
use crate::signaling::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerStats {
    pub audio_jitter_ms: f64,
    pub packet_loss_pct: f64,
    pub rtt_ms: f64,
}

/// Audio producer parameters fixed by §4.11: stereo Opus with FEC, DTX disabled, 20ms ptime.
pub const AUDIO_PTIME_MS: u32 = 20;
/// Data producer parameters fixed by §4.11.
pub const DATA_PRODUCER_LABEL: &str = "netplay-input";
pub const DATA_PRODUCER_MAX_PACKET_LIFETIME_MS: u32 = 3000;

const ICE_RESTART_COOLDOWN: Duration = Duration::from_secs(3);
const AVAILABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DRIFT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DRIFT_JITTER_WARN_MS: f64 = 100.0;
const DRIFT_LOSS_WARN_PCT: f64 = 5.0;
const DRIFT_RTT_WARN_MS: f64 = 500.0;

/// The native device/transport library collaborator. Implementations own the actual WebRTC
/// stack; this module only sequences calls into it.
pub trait MediaBackend: Send + Sync {
    fn probe_availability(&self) -> BoxFuture<'_, Result<bool, NetplayError>>;
    fn construct_device(&self) -> BoxFuture<'_, Result<(), NetplayError>>;
    /// Router's codec capability list, in router preference order (e.g. `["vp9", "h264", "vp8"]`).
    fn router_video_codecs(&self) -> BoxFuture<'_, Result<Vec<String>, NetplayError>>;
    /// Codecs the local sender capability advertisement supports.
    fn sender_video_codecs(&self) -> BoxFuture<'_, Result<Vec<String>, NetplayError>>;
    fn create_transport(
        &self,
        direction: Direction,
        kind: MediaKind,
    ) -> BoxFuture<'_, Result<String, NetplayError>>;
    fn create_producer(
        &self,
        transport_id: &str,
        kind: MediaKind,
    ) -> BoxFuture<'_, Result<String, NetplayError>>;
    /// Like `create_producer` for `MediaKind::Video`, but pinned to the already-selected codec.
    fn create_video_producer(
        &self,
        transport_id: &str,
        codec: &str,
    ) -> BoxFuture<'_, Result<String, NetplayError>>;
    fn create_consumer(
        &self,
        producer_id: &str,
        transport_id: &str,
    ) -> BoxFuture<'_, Result<String, NetplayError>>;
    fn resume_consumer(&self, consumer_id: &str) -> BoxFuture<'_, Result<(), NetplayError>>;
    fn restart_ice(&self, transport_id: &str) -> BoxFuture<'_, Result<(), NetplayError>>;
    fn consumer_stats(&self, consumer_id: &str) -> BoxFuture<'_, Result<ConsumerStats, NetplayError>>;
}

struct RestartState {
    last_restart: Option<Instant>,
    in_progress: bool,
}

pub struct MediaTransport {
    backend: Arc<dyn MediaBackend>,
    available: Mutex<bool>,
    retry_timer_seconds: u8,
    host_codec: HostCodec,
    router_video_codecs: Mutex<Vec<String>>,
    sender_video_codecs: Mutex<Vec<String>>,
    restart_state: Mutex<HashMap<String, RestartState>>,
}

impl MediaTransport {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        retry_timer_seconds: u8,
        host_codec: HostCodec,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            available: Mutex::new(false),
            retry_timer_seconds: retry_timer_seconds.min(5),
            host_codec,
            router_video_codecs: Mutex::new(Vec::new()),
            sender_video_codecs: Mutex::new(Vec::new()),
            restart_state: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_available(&self) -> bool {
        *self.available.lock()
    }

    fn ensure_available(&self) -> Result<(), NetplayError> {
        if !self.is_available() {
            return Err(NetplayError::TransportUnavailable(
                "media transport not initialized".to_string(),
            ));
        }
        Ok(())
    }

    /// Probes server availability (5s timeout), negotiates router capabilities, and constructs
    /// the local device. Failure leaves `is_available() == false` and short-circuits every other
    /// call.
    pub async fn initialize(&self) -> Result<(), NetplayError> {
        let probed = timeout(AVAILABILITY_PROBE_TIMEOUT, self.backend.probe_availability()).await;
        let available = matches!(probed, Ok(Ok(true)));
        if !available {
            *self.available.lock() = false;
            return Err(NetplayError::TransportUnavailable(
                "sfu not available".to_string(),
            ));
        }
        let router_codecs = self.backend.router_video_codecs().await?;
        let sender_codecs = self.backend.sender_video_codecs().await?;
        self.backend.construct_device().await?;
        *self.router_video_codecs.lock() = router_codecs;
        *self.sender_video_codecs.lock() = sender_codecs;
        *self.available.lock() = true;
        Ok(())
    }

    /// Separate transports per media kind prevent head-of-line blocking; each maintains its own
    /// DTLS state and ICE-restart lifecycle.
    pub async fn create_transport(
        &self,
        direction: Direction,
        kind: MediaKind,
    ) -> Result<String, NetplayError> {
        self.ensure_available()?;
        let id = self.backend.create_transport(direction, kind).await?;
        self.restart_state.lock().insert(
            id.clone(),
            RestartState {
                last_restart: None,
                in_progress: false,
            },
        );
        Ok(id)
    }

    /// Picks a codec per §6 (Codec selection): the host's explicit preference wins if it is both
    /// router-supported and locally supported; otherwise the first router-order codec that is
    /// locally supported wins. Fails with `CodecUnavailable` if no codec satisfies either rule.
    pub async fn create_video_producer(&self, transport_id: &str) -> Result<String, NetplayError> {
        self.ensure_available()?;
        let router_codecs = self.router_video_codecs.lock().clone();
        let sender_codecs = self.sender_video_codecs.lock().clone();
        let codec = select_codec(self.host_codec, &router_codecs, &sender_codecs).ok_or_else(|| {
            NetplayError::CodecUnavailable(format!(
                "no router/sender-eligible codec for preference {:?}",
                self.host_codec
            ))
        })?;
        self.backend.create_video_producer(transport_id, &codec).await
    }

    /// Dedicated audio transport: stereo Opus with FEC, DTX disabled, 20ms ptime.
    pub async fn create_audio_producer(&self, transport_id: &str) -> Result<String, NetplayError> {
        self.ensure_available()?;
        self.backend.create_producer(transport_id, MediaKind::Audio).await
    }

    /// Unordered, `maxPacketLifeTime = 3000ms`, label `netplay-input`.
    pub async fn create_data_producer(&self, transport_id: &str) -> Result<String, NetplayError> {
        self.ensure_available()?;
        self.backend.create_producer(transport_id, MediaKind::Data).await
    }

    /// Data consumers must be explicitly resumed after creation.
    pub async fn create_consumer(
        &self,
        producer_id: &str,
        transport_id: &str,
        kind: MediaKind,
    ) -> Result<String, NetplayError> {
        self.ensure_available()?;
        let consumer_id = self.backend.create_consumer(producer_id, transport_id).await?;
        if kind == MediaKind::Data {
            self.backend.resume_consumer(&consumer_id).await?;
        }
        Ok(consumer_id)
    }

    /// React to a transport's state transition: `Disconnected` schedules a delayed restart
    /// (unless `retry_timer_seconds == 0`), `Failed` restarts immediately.
    pub fn on_transport_state_changed(self: &Arc<Self>, transport_id: String, state: TransportState) {
        match state {
            TransportState::Disconnected => {
                if self.retry_timer_seconds == 0 {
                    return;
                }
                let delay = Duration::from_secs(self.retry_timer_seconds as u64);
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.restart_ice(&transport_id).await;
                });
            }
            TransportState::Failed => {
                let this = self.clone();
                tokio::spawn(async move {
                    this.restart_ice(&transport_id).await;
                });
            }
            _ => {}
        }
    }

    /// Rate-limited to one restart per transport per 3s; concurrent restarts coalesce.
    async fn restart_ice(&self, transport_id: &str) {
        {
            let mut states = self.restart_state.lock();
            let entry = states
                .entry(transport_id.to_string())
                .or_insert(RestartState {
                    last_restart: None,
                    in_progress: false,
                });
            if entry.in_progress {
                return;
            }
            if let Some(last) = entry.last_restart {
                if last.elapsed() < ICE_RESTART_COOLDOWN {
                    return;
                }
            }
            entry.in_progress = true;
        }

        if let Err(err) = self.backend.restart_ice(transport_id).await {
            tracing::warn!(transport_id = %transport_id, %err, "ice restart failed");
        }

        let mut states = self.restart_state.lock();
        if let Some(entry) = states.get_mut(transport_id) {
            entry.in_progress = false;
            entry.last_restart = Some(Instant::now());
        }
    }

    /// Soft, log-only monitor: polls consumer stats every 5s and warns past the jitter/loss/RTT
    /// thresholds. Never restarts, pauses, or reconfigures a transport.
    pub fn spawn_drift_monitor(self: &Arc<Self>, consumer_ids: Vec<String>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DRIFT_POLL_INTERVAL);
            loop {
                interval.tick().await;
                for consumer_id in &consumer_ids {
                    if let Ok(stats) = this.backend.consumer_stats(consumer_id).await {
                        if stats.audio_jitter_ms > DRIFT_JITTER_WARN_MS
                            || stats.packet_loss_pct > DRIFT_LOSS_WARN_PCT
                            || stats.rtt_ms > DRIFT_RTT_WARN_MS
                        {
                            tracing::warn!(
                                consumer_id = %consumer_id,
                                jitter_ms = stats.audio_jitter_ms,
                                loss_pct = stats.packet_loss_pct,
                                rtt_ms = stats.rtt_ms,
                                "media drift threshold exceeded"
                            );
                        }
                    }
                }
            }
        })
    }
}

fn preferred_codec_name(preference: HostCodec) -> Option<&'static str> {
    match preference {
        HostCodec::Auto => None,
        HostCodec::Vp9 => Some("vp9"),
        HostCodec::H264 => Some("h264"),
        HostCodec::Vp8 => Some("vp8"),
    }
}

/// §6 Codec selection: explicit preference wins if router- and sender-eligible; otherwise the
/// first router-order codec that is locally supported wins.
fn select_codec(
    preference: HostCodec,
    router_codecs: &[String],
    sender_codecs: &[String],
) -> Option<String> {
    if let Some(name) = preferred_codec_name(preference) {
        if router_codecs.iter().any(|c| c == name) && sender_codecs.iter().any(|c| c == name) {
            return Some(name.to_string());
        }
    }
    router_codecs
        .iter()
        .find(|c| sender_codecs.iter().any(|s| s == *c))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        available: bool,
        restart_calls: AtomicUsize,
        router_codecs: Vec<String>,
        sender_codecs: Vec<String>,
    }

    impl Default for FakeBackend {
        fn default() -> Self {
            Self {
                available: true,
                restart_calls: AtomicUsize::new(0),
                router_codecs: vec!["vp9".to_string(), "h264".to_string(), "vp8".to_string()],
                sender_codecs: vec!["vp9".to_string(), "h264".to_string(), "vp8".to_string()],
            }
        }
    }

    impl MediaBackend for FakeBackend {
        fn probe_availability(&self) -> BoxFuture<'_, Result<bool, NetplayError>> {
            Box::pin(async move { Ok(self.available) })
        }
        fn construct_device(&self) -> BoxFuture<'_, Result<(), NetplayError>> {
            Box::pin(async { Ok(()) })
        }
        fn router_video_codecs(&self) -> BoxFuture<'_, Result<Vec<String>, NetplayError>> {
            Box::pin(async { Ok(self.router_codecs.clone()) })
        }
        fn sender_video_codecs(&self) -> BoxFuture<'_, Result<Vec<String>, NetplayError>> {
            Box::pin(async { Ok(self.sender_codecs.clone()) })
        }
        fn create_transport(
            &self,
            _direction: Direction,
            _kind: MediaKind,
        ) -> BoxFuture<'_, Result<String, NetplayError>> {
            Box::pin(async { Ok("t1".to_string()) })
        }
        fn create_producer(
            &self,
            _transport_id: &str,
            _kind: MediaKind,
        ) -> BoxFuture<'_, Result<String, NetplayError>> {
            Box::pin(async { Ok("p1".to_string()) })
        }
        fn create_video_producer(
            &self,
            _transport_id: &str,
            codec: &str,
        ) -> BoxFuture<'_, Result<String, NetplayError>> {
            let codec = codec.to_string();
            Box::pin(async move { Ok(format!("p1:{codec}")) })
        }
        fn create_consumer(
            &self,
            _producer_id: &str,
            _transport_id: &str,
        ) -> BoxFuture<'_, Result<String, NetplayError>> {
            Box::pin(async { Ok("c1".to_string()) })
        }
        fn resume_consumer(&self, _consumer_id: &str) -> BoxFuture<'_, Result<(), NetplayError>> {
            Box::pin(async { Ok(()) })
        }
        fn restart_ice(&self, _transport_id: &str) -> BoxFuture<'_, Result<(), NetplayError>> {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
        fn consumer_stats(&self, _consumer_id: &str) -> BoxFuture<'_, Result<ConsumerStats, NetplayError>> {
            Box::pin(async { Ok(ConsumerStats::default()) })
        }
    }

    #[tokio::test]
    async fn initialize_unavailable_short_circuits_further_calls() {
        let backend = Arc::new(FakeBackend {
            available: false,
            ..Default::default()
        });
        let transport = MediaTransport::new(backend, 3, HostCodec::Auto);
        assert!(transport.initialize().await.is_err());
        assert!(!transport.is_available());
        assert!(
            transport
                .create_transport(Direction::Send, MediaKind::Video)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn initialize_available_unlocks_transport_creation() {
        let backend = Arc::new(FakeBackend::default());
        let transport = MediaTransport::new(backend, 3, HostCodec::Auto);
        transport.initialize().await.unwrap();
        let id = transport
            .create_transport(Direction::Send, MediaKind::Video)
            .await
            .unwrap();
        assert_eq!(id, "t1");
    }

    #[tokio::test]
    async fn data_consumer_is_resumed_after_creation() {
        let backend = Arc::new(FakeBackend::default());
        let transport = MediaTransport::new(backend, 3, HostCodec::Auto);
        transport.initialize().await.unwrap();
        let consumer = transport
            .create_consumer("p1", "t1", MediaKind::Data)
            .await
            .unwrap();
        assert_eq!(consumer, "c1");
    }

    #[tokio::test]
    async fn explicit_codec_preference_wins_when_eligible() {
        let backend = Arc::new(FakeBackend::default());
        let transport = MediaTransport::new(backend, 3, HostCodec::H264);
        transport.initialize().await.unwrap();
        let producer = transport.create_video_producer("t1").await.unwrap();
        assert_eq!(producer, "p1:h264");
    }

    #[tokio::test]
    async fn auto_preference_picks_first_router_order_codec_supported_locally() {
        let backend = Arc::new(FakeBackend {
            router_codecs: vec!["av1".to_string(), "vp9".to_string(), "h264".to_string()],
            sender_codecs: vec!["vp9".to_string(), "h264".to_string()],
            ..Default::default()
        });
        let transport = MediaTransport::new(backend, 3, HostCodec::Auto);
        transport.initialize().await.unwrap();
        let producer = transport.create_video_producer("t1").await.unwrap();
        assert_eq!(producer, "p1:vp9");
    }

    #[tokio::test]
    async fn ineligible_explicit_preference_falls_back_to_router_order() {
        let backend = Arc::new(FakeBackend {
            router_codecs: vec!["vp9".to_string(), "vp8".to_string()],
            sender_codecs: vec!["vp8".to_string()],
            ..Default::default()
        });
        let transport = MediaTransport::new(backend, 3, HostCodec::H264);
        transport.initialize().await.unwrap();
        let producer = transport.create_video_producer("t1").await.unwrap();
        assert_eq!(producer, "p1:vp8");
    }

    #[tokio::test]
    async fn no_eligible_codec_yields_codec_unavailable() {
        let backend = Arc::new(FakeBackend {
            router_codecs: vec!["av1".to_string()],
            sender_codecs: vec!["vp9".to_string()],
            ..Default::default()
        });
        let transport = MediaTransport::new(backend, 3, HostCodec::Auto);
        transport.initialize().await.unwrap();
        let result = transport.create_video_producer("t1").await;
        assert!(matches!(result, Err(NetplayError::CodecUnavailable(_))));
    }
}
