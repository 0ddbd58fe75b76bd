//! SignalingTransport: a reconnecting request/response + pub/sub channel to the room/SFU
//! signaling server. Polymorphic over a [`SignalingBackend`] collaborator so this module never
//! has to guess at the concrete wire transport (WebSocket, QUIC datagram, etc).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use crate::error::NetplayError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The actual wire connection. Implementations own the socket; `SignalingTransport` only
/// sequences connect/request calls against it and handles queuing, timeouts, and pub/sub.
pub trait SignalingBackend: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str, token: Option<&'a str>) -> BoxFuture<'a, Result<(), NetplayError>>;
    fn request<'a>(&'a self, event: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<Vec<u8>, NetplayError>>;
}

type EventHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

struct QueuedEmit {
    event: String,
    payload: Vec<u8>,
    expects_reply: bool,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Duplex signaling channel. `connect`/`emit`/`on` match the contracts in §4.10: emits and
/// subscriptions registered before `connect` completes are queued and flushed afterward.
pub struct SignalingTransport {
    backend: Arc<dyn SignalingBackend>,
    connected: Mutex<bool>,
    pending_emits: Mutex<Vec<QueuedEmit>>,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl SignalingTransport {
    pub fn new(backend: Arc<dyn SignalingBackend>) -> Self {
        Self {
            backend,
            connected: Mutex::new(false),
            pending_emits: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns once the handshake completes, or `Timeout` after 10s.
    pub async fn connect(&self, url: &str, token: Option<&str>) -> Result<(), NetplayError> {
        timeout(CONNECT_TIMEOUT, self.backend.connect(url, token))
            .await
            .map_err(|_| NetplayError::Timeout("signaling connect".to_string()))??;
        *self.connected.lock() = true;
        self.flush_pending().await;
        Ok(())
    }

    /// Mark the channel disconnected. Subscriptions survive; queued and future emits wait for
    /// the next `connect`.
    pub fn mark_disconnected(&self) {
        *self.connected.lock() = false;
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn flush_pending(&self) {
        let queued: Vec<QueuedEmit> = std::mem::take(&mut *self.pending_emits.lock());
        for q in queued {
            let _ = self.backend.request(&q.event, q.payload).await;
        }
    }

    /// Emit `event`. When `expects_reply` is set the single response is returned; otherwise this
    /// fires and forgets. Emits issued before `connect` completes are queued.
    pub async fn emit(
        &self,
        event: &str,
        payload: Vec<u8>,
        expects_reply: bool,
    ) -> Option<Result<Vec<u8>, NetplayError>> {
        if !self.is_connected() {
            self.pending_emits.lock().push(QueuedEmit {
                event: event.to_string(),
                payload,
                expects_reply,
            });
            return None;
        }
        if expects_reply {
            Some(self.backend.request(event, payload).await)
        } else {
            let _ = self.backend.request(event, payload).await;
            None
        }
    }

    /// Register a handler for `event`. Survives reconnects; registered handlers fire in
    /// registration order.
    pub fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Deliver a server-pushed event to every registered handler for it.
    pub fn dispatch_event(&self, event: &str, payload: &[u8]) {
        if let Some(handlers) = self.handlers.lock().get(event) {
            for handler in handlers {
                handler(payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        fail_connect: bool,
        requests: Mutex<Vec<String>>,
    }

    impl SignalingBackend for FakeBackend {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
            _token: Option<&'a str>,
        ) -> BoxFuture<'a, Result<(), NetplayError>> {
            Box::pin(async move {
                if self.fail_connect {
                    Err(NetplayError::ConnectionFailed("refused".to_string()))
                } else {
                    Ok(())
                }
            })
        }

        fn request<'a>(
            &'a self,
            event: &'a str,
            _payload: Vec<u8>,
        ) -> BoxFuture<'a, Result<Vec<u8>, NetplayError>> {
            self.requests.lock().push(event.to_string());
            Box::pin(async move { Ok(vec![]) })
        }
    }

    #[tokio::test]
    async fn emits_before_connect_are_queued_then_flushed() {
        let backend = Arc::new(FakeBackend {
            fail_connect: false,
            requests: Mutex::new(vec![]),
        });
        let transport = SignalingTransport::new(backend.clone());

        transport.emit("open-room", vec![], false).await;
        assert!(backend.requests.lock().is_empty());

        transport.connect("ws://localhost", None).await.unwrap();
        assert_eq!(backend.requests.lock().as_slice(), ["open-room"]);
    }

    #[tokio::test]
    async fn connect_failure_propagates_error() {
        let backend = Arc::new(FakeBackend {
            fail_connect: true,
            requests: Mutex::new(vec![]),
        });
        let transport = SignalingTransport::new(backend);
        let result = transport.connect("ws://localhost", None).await;
        assert!(result.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn on_handler_fires_on_dispatch() {
        let backend = Arc::new(FakeBackend {
            fail_connect: false,
            requests: Mutex::new(vec![]),
        });
        let transport = SignalingTransport::new(backend);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        transport.on(
            "users-updated",
            Box::new(move |_payload| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        transport.dispatch_event("users-updated", b"{}");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
