//! Signaling transport: a reconnecting WebSocket carrying [`Signal`] frames.
//!
//! The transport is split in two halves joined by channels:
//! - [`SignalingTransport`]: the cheap, cloneable handle components send through
//! - [`TransportLink`]: the driver side, which owns the socket (or a test harness)
//!
//! Inbound events run through handlers registered with [`SignalingTransport::on`]
//! and are then queued, in arrival order, for the client loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::{SinkExt, StreamExt};
use telecall_common::config::{ClientConfig, ReconnectConfig};
use telecall_common::{CallError, CallResult, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// What the transport reports to the client loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket is up; the server will assign a fresh connection id
    Connected,
    /// Socket went away; every connection id seen so far is now stale
    Disconnected { reason: String },
    Signal(Signal),
}

/// Handler key: lifecycle events or one signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Signal(SignalKind),
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Signal(s) => EventKind::Signal(s.kind()),
        }
    }
}

type Handler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;
type HandlerMap = Arc<RwLock<HashMap<EventKind, Vec<Handler>>>>;

/// Sending half of the signaling channel.
#[derive(Clone)]
pub struct SignalingTransport {
    outbound: mpsc::UnboundedSender<Signal>,
    handlers: HandlerMap,
    connected: Arc<AtomicBool>,
}

/// Driver half: pulls outbound signals, pushes inbound events.
pub struct TransportLink {
    outbound: mpsc::UnboundedReceiver<Signal>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    handlers: HandlerMap,
    connected: Arc<AtomicBool>,
}

impl SignalingTransport {
    /// Unconnected transport plus its driver half and the inbound event queue.
    pub fn channel() -> (Self, TransportLink, mpsc::UnboundedReceiver<TransportEvent>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound: out_tx,
            handlers: Arc::clone(&handlers),
            connected: Arc::clone(&connected),
        };
        let link = TransportLink {
            outbound: out_rx,
            inbound: in_tx,
            handlers,
            connected,
        };
        (transport, link, in_rx)
    }

    /// Spawn the WebSocket driver for `config.signaling_url`.
    /// Returns immediately; connection progress arrives as events.
    pub fn connect(config: &ClientConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport, link, events) = Self::channel();
        let url = config.signaling_url.clone();
        let policy = config.reconnect.clone();
        tokio::spawn(drive(url, policy, link));
        (transport, events)
    }

    /// Fire-and-forget send. No acknowledgement is ever returned.
    pub fn send(&self, signal: Signal) -> CallResult<()> {
        if !self.is_connected() {
            return Err(CallError::TransportDisconnected);
        }
        debug!(event = signal.kind().as_str(), "Signal queued");
        self.outbound
            .send(signal)
            .map_err(|_| CallError::TransportDisconnected)
    }

    /// Register an extra handler. Handlers for one kind run in registration
    /// order, before the event reaches the client loop.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        map.entry(kind).or_default().push(Arc::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl TransportLink {
    /// Push one inbound event. Returns `false` once the client loop is gone.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connected => self.connected.store(true, Ordering::Release),
            TransportEvent::Disconnected { .. } => self.connected.store(false, Ordering::Release),
            TransportEvent::Signal(_) => {}
        }

        let handlers: Vec<Handler> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            map.get(&event.kind()).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(&event);
        }

        self.inbound.send(event).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Next signal the client wants sent; `None` once every handle is dropped.
    pub async fn next_outbound(&mut self) -> Option<Signal> {
        self.outbound.recv().await
    }

    /// Everything queued for sending right now.
    pub fn drain_outbound(&mut self) -> Vec<Signal> {
        let mut drained = Vec::new();
        while let Ok(signal) = self.outbound.try_recv() {
            drained.push(signal);
        }
        drained
    }
}

enum SessionEnd {
    /// Server closed the socket
    Closed,
    /// Every transport handle was dropped
    Shutdown,
}

/// Connection loop with exponential backoff between attempts.
async fn drive(url: String, policy: ReconnectConfig, mut link: TransportLink) {
    let mut attempts = 0u32;
    loop {
        // Anything queued against the old connection carries dead addresses.
        let dropped = link.drain_outbound();
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "Dropping signals queued while disconnected");
        }

        match run_once(&url, &mut link).await {
            Ok(SessionEnd::Shutdown) => {
                debug!("Signaling transport shut down");
                return;
            }
            Ok(SessionEnd::Closed) => {
                attempts = 0;
                info!("Signaling server closed the connection");
                if link.is_connected()
                    && !link.deliver(TransportEvent::Disconnected {
                        reason: "closed by server".into(),
                    })
                {
                    return;
                }
            }
            // A session that reached `Connected` starts a fresh retry budget;
            // only connects that never came up count against it.
            Err(e) if link.is_connected() => {
                attempts = 0;
                warn!("Signaling: connection lost ({e})");
                if !link.deliver(TransportEvent::Disconnected {
                    reason: e.to_string(),
                }) {
                    return;
                }
            }
            Err(e) => {
                attempts += 1;
                warn!("Signaling: connect failed ({e}) (attempt {attempts})");
            }
        }

        if !policy.auto_reconnect {
            info!("Signaling: auto-reconnect disabled, giving up");
            return;
        }
        if attempts >= policy.max_attempts {
            error!("Signaling: max reconnect attempts reached");
            return;
        }
        let delay = policy.delay_for(attempts.max(1));
        debug!("Signaling: reconnecting in {delay:?}");
        sleep(delay).await;
    }
}

async fn run_once(url: &str, link: &mut TransportLink) -> Result<SessionEnd> {
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    info!(%url, "Signaling socket connected");
    if !link.deliver(TransportEvent::Connected) {
        return Ok(SessionEnd::Shutdown);
    }

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(frame) = frame else { return Ok(SessionEnd::Closed) };
                let text = match frame? {
                    Message::Text(t) => t,
                    Message::Close(_) => return Ok(SessionEnd::Closed),
                    _ => continue,
                };
                match Signal::decode(text.as_str()) {
                    Ok(signal) => {
                        if !link.deliver(TransportEvent::Signal(signal)) {
                            let _ = sink.close().await;
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Err(e) => warn!("Signaling: skipping frame: {e}"),
                }
            }
            outbound = link.next_outbound() => {
                let Some(signal) = outbound else {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                };
                match signal.encode() {
                    Ok(json) => sink.send(Message::Text(json.into())).await?,
                    Err(e) => warn!("Signaling: dropping unencodable signal: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use telecall_common::signal::Route;
    use tokio::net::TcpListener;

    #[test]
    fn send_requires_connection() {
        let (transport, link, _events) = SignalingTransport::channel();
        let end = Signal::EndCall(Route {
            to: "b".into(),
            from: "a".into(),
        });
        assert_eq!(transport.send(end.clone()), Err(CallError::TransportDisconnected));

        link.deliver(TransportEvent::Connected);
        assert!(transport.send(end).is_ok());
    }

    #[test]
    fn handlers_run_in_order_before_the_queue() {
        let (transport, link, mut events) = SignalingTransport::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            transport.on(EventKind::Signal(SignalKind::JoinAppointment), move |_| {
                seen.lock().unwrap().push(tag);
            });
        }
        let other = Arc::clone(&seen);
        transport.on(EventKind::Disconnected, move |_| {
            other.lock().unwrap().push("disconnected");
        });

        assert!(link.deliver(TransportEvent::Signal(Signal::JoinAppointment("r".into()))));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(
            events.try_recv().unwrap(),
            TransportEvent::Signal(Signal::JoinAppointment("r".into()))
        );
    }

    #[test]
    fn outbound_is_fifo() {
        let (transport, mut link, _events) = SignalingTransport::channel();
        link.deliver(TransportEvent::Connected);
        for room in ["a", "b", "c"] {
            transport.send(Signal::JoinAppointment(room.into())).unwrap();
        }
        let rooms: Vec<_> = link
            .drain_outbound()
            .into_iter()
            .map(|s| match s {
                Signal::JoinAppointment(r) => r,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(rooms, vec!["a", "b", "c"]);
    }

    #[test]
    fn disconnect_flips_the_send_gate() {
        let (transport, link, _events) = SignalingTransport::channel();
        link.deliver(TransportEvent::Connected);
        assert!(transport.is_connected());
        link.deliver(TransportEvent::Disconnected {
            reason: "test".into(),
        });
        assert!(!transport.is_connected());
    }

    fn fast_retries(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            auto_reconnect: true,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn keeps_reconnecting_while_sessions_come_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // completes every handshake, then hangs up
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    drop(ws);
                }
            }
        });

        let (_transport, link, mut events) = SignalingTransport::channel();
        let driver = tokio::spawn(drive(format!("ws://{addr}"), fast_retries(2), link));

        let mut sessions = 0;
        while sessions < 5 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("transport stopped reconnecting")
                .expect("driver exited");
            if event == TransportEvent::Connected {
                sessions += 1;
            }
        }
        assert!(!driver.is_finished());
        driver.abort();
    }

    #[tokio::test]
    async fn gives_up_after_consecutive_failed_connects() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let (_transport, link, mut events) = SignalingTransport::channel();
        tokio::time::timeout(
            Duration::from_secs(5),
            drive(format!("ws://{addr}"), fast_retries(3), link),
        )
        .await
        .expect("driver should stop after three refused connects");
        // never connected, so nothing was reported
        assert!(events.try_recv().is_err());
    }
}
