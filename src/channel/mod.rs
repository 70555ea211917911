//! Authenticated socket to the inference service.
//!
//! `VisionChannel` walks `Disconnected → Connecting → Authenticating → Ready → Closed`:
//!
//! 1. fetch a short-lived token (`GET /api/auth/token`)
//! 2. open the socket (`/ws/vision`) and send `{type:"auth"}` immediately
//! 3. accept frame sends as soon as the socket is open; a `vision.connected`
//!    ack promotes the state to `Ready`
//! 4. on close or error drop the transport and report a `ChannelFault`
//!
//! The channel never reconnects by itself; `ConnectionSupervisor` decides when the
//! client should call `open()` again. Transports are non-blocking: `poll()` drains
//! whatever is buffered and returns.

mod auth;
mod loopback;
mod ws;

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::protocol::{parse_inbound, InboundMessage, OutboundMessage, VisionResult};

pub use auth::{HttpTokenProvider, StaticToken};
pub use loopback::{loopback, LoopbackConnector, LoopbackPeer, LoopbackServer};
pub use ws::WsConnector;

pub const TOKEN_PATH: &str = "/api/auth/token";
pub const SOCKET_PATH: &str = "/ws/vision";
/// Close code the service uses when the auth message is rejected.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Upper bound on inbound messages handled per `poll()`.
const MAX_MESSAGES_PER_POLL: usize = 64;

/// HTTP base of the service plus the two derived endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerEndpoint {
    base: Url,
}

impl ServerEndpoint {
    /// Parse an `http(s)://host:port` base URL.
    pub fn parse(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("parse server url '{}'", base))?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported server scheme '{}'; expected http or https",
                    other
                ))
            }
        }
        if base.host_str().is_none() {
            return Err(anyhow!("server url '{}' has no host", base));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn token_url(&self) -> Result<Url> {
        self.base.join(TOKEN_PATH).context("build token url")
    }

    /// `ws://` for `http://`, `wss://` for `https://`.
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = self.base.join(SOCKET_PATH).context("build socket url")?;
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot switch '{}' to {}", self.base, scheme))?;
        Ok(url)
    }
}

/// Obtains the socket credential for one session.
pub trait TokenProvider {
    fn fetch_token(&self, endpoint: &ServerEndpoint) -> Result<String>;
}

/// Opens transports to the socket endpoint.
pub trait Connector {
    fn connect(&mut self, endpoint: &ServerEndpoint) -> Result<Box<dyn Transport>>;
}

/// What a non-blocking receive produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Nothing buffered right now.
    Idle,
    Closed { code: Option<u16>, reason: String },
}

/// Bidirectional, message-framed, non-blocking text transport.
pub trait Transport {
    fn send_text(&mut self, text: String) -> Result<()>;
    fn poll_recv(&mut self) -> Result<TransportEvent>;
    fn close(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closed,
}

impl ChannelState {
    /// Frames may be sent in these states.
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Authenticating | ChannelState::Ready)
    }
}

/// Why the channel is not (or no longer) open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelFault {
    /// Token fetch, socket open or auth rejection.
    Handshake(String),
    /// Socket error or unexpected close.
    Transport(String),
    /// A frame request outlived its deadline.
    Deadline,
}

impl std::fmt::Display for ChannelFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelFault::Handshake(reason) => write!(f, "handshake failed: {}", reason),
            ChannelFault::Transport(reason) => write!(f, "transport error: {}", reason),
            ChannelFault::Deadline => f.write_str("frame request deadline expired"),
        }
    }
}

impl std::error::Error for ChannelFault {}

/// What `poll()` observed, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Result(VisionResult),
    /// Unparseable inbound message. Completes the outstanding exchange.
    Malformed(String),
    Connected,
    ServiceError(String),
    Closed(ChannelFault),
}

/// Message counters for one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sessions_opened: u64,
    pub frames_sent: u64,
    pub results: u64,
    pub malformed: u64,
    pub ignored: u64,
}

struct Session {
    token: String,
    transport: Box<dyn Transport>,
    opened_at: Instant,
}

pub struct VisionChannel {
    endpoint: ServerEndpoint,
    tokens: Box<dyn TokenProvider>,
    connector: Box<dyn Connector>,
    state: ChannelState,
    session: Option<Session>,
    auth_rejected: bool,
    stats: ChannelStats,
}

impl VisionChannel {
    pub fn new(
        endpoint: ServerEndpoint,
        tokens: Box<dyn TokenProvider>,
        connector: Box<dyn Connector>,
    ) -> Self {
        Self {
            endpoint,
            tokens,
            connector,
            state: ChannelState::Disconnected,
            session: None,
            auth_rejected: false,
            stats: ChannelStats::default(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open() && self.session.is_some()
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// When the current session's socket opened.
    pub fn opened_at(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.opened_at)
    }

    /// Run the full start sequence. Only valid from `Disconnected` or `Closed`.
    pub fn open(&mut self, now: Instant) -> std::result::Result<(), ChannelFault> {
        if !matches!(
            self.state,
            ChannelState::Disconnected | ChannelState::Closed
        ) {
            return Err(ChannelFault::Handshake(format!(
                "open called in state {:?}",
                self.state
            )));
        }
        self.auth_rejected = false;

        self.state = ChannelState::Connecting;
        let token = match self.tokens.fetch_token(&self.endpoint) {
            Ok(token) => token,
            Err(e) => return Err(self.fail_open(format!("token fetch: {:#}", e))),
        };

        let mut transport = match self.connector.connect(&self.endpoint) {
            Ok(transport) => transport,
            Err(e) => return Err(self.fail_open(format!("socket open: {:#}", e))),
        };

        self.state = ChannelState::Authenticating;
        let auth = OutboundMessage::Auth {
            token: token.clone(),
        };
        let sent = auth
            .to_json()
            .and_then(|json| transport.send_text(json));
        if let Err(e) = sent {
            transport.close();
            return Err(self.fail_open(format!("send auth: {:#}", e)));
        }

        self.session = Some(Session {
            token,
            transport,
            opened_at: now,
        });
        self.stats.sessions_opened += 1;
        log::info!(
            "channel: socket open to {}, authenticating",
            self.endpoint.base()
        );
        Ok(())
    }

    fn fail_open(&mut self, reason: String) -> ChannelFault {
        log::warn!("channel: handshake failed: {}", reason);
        self.session = None;
        self.state = ChannelState::Closed;
        ChannelFault::Handshake(reason)
    }

    /// Send one frame request. A send failure tears the session down.
    pub fn send_frame(&mut self, message: &OutboundMessage) -> std::result::Result<(), ChannelFault> {
        if !self.is_open() {
            return Err(ChannelFault::Transport(format!(
                "send in state {:?}",
                self.state
            )));
        }
        let json = message
            .to_json()
            .map_err(|e| ChannelFault::Transport(e.to_string()))?;
        let sent = match self.session.as_mut() {
            Some(session) => session.transport.send_text(json),
            None => Err(anyhow!("no session")),
        };
        match sent {
            Ok(()) => {
                self.stats.frames_sent += 1;
                Ok(())
            }
            Err(e) => {
                let fault = ChannelFault::Transport(format!("send frame: {:#}", e));
                self.teardown(&fault);
                Err(fault)
            }
        }
    }

    /// Drain inbound messages without blocking.
    pub fn poll(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        for _ in 0..MAX_MESSAGES_PER_POLL {
            let Some(session) = self.session.as_mut() else {
                break;
            };
            let received = session.transport.poll_recv();
            match received {
                Ok(TransportEvent::Idle) => break,
                Ok(TransportEvent::Text(text)) => {
                    if let Some(event) = self.dispatch(&text) {
                        events.push(event);
                    }
                }
                Ok(TransportEvent::Closed { code, reason }) => {
                    let fault = self.close_fault(code, &reason);
                    self.teardown(&fault);
                    events.push(ChannelEvent::Closed(fault));
                    break;
                }
                Err(e) => {
                    let fault = ChannelFault::Transport(format!("{:#}", e));
                    self.teardown(&fault);
                    events.push(ChannelEvent::Closed(fault));
                    break;
                }
            }
        }
        events
    }

    fn dispatch(&mut self, text: &str) -> Option<ChannelEvent> {
        match parse_inbound(text) {
            Ok(InboundMessage::Result(result)) => {
                self.stats.results += 1;
                Some(ChannelEvent::Result(result))
            }
            Ok(InboundMessage::Connected) => {
                if self.state == ChannelState::Authenticating {
                    self.state = ChannelState::Ready;
                    log::info!("channel: authenticated");
                }
                Some(ChannelEvent::Connected)
            }
            Ok(InboundMessage::ServiceError(message)) => {
                log::warn!("channel: service error: {}", message);
                if self.state == ChannelState::Authenticating {
                    self.auth_rejected = true;
                }
                Some(ChannelEvent::ServiceError(message))
            }
            Ok(InboundMessage::Other(kind)) => {
                self.stats.ignored += 1;
                log::debug!("channel: ignoring message type '{}'", kind);
                None
            }
            Err(e) => {
                self.stats.malformed += 1;
                log::debug!("channel: dropping malformed message: {}", e);
                Some(ChannelEvent::Malformed(e.to_string()))
            }
        }
    }

    fn close_fault(&self, code: Option<u16>, reason: &str) -> ChannelFault {
        if code == Some(CLOSE_AUTH_FAILED) || self.auth_rejected {
            return ChannelFault::Handshake(format!("authentication rejected: {}", reason));
        }
        match code {
            Some(code) => ChannelFault::Transport(format!("closed by peer ({}) {}", code, reason)),
            None => ChannelFault::Transport("connection closed".to_string()),
        }
    }

    /// Drop the session after a fault observed locally (deadline, send failure).
    pub fn abort(&mut self, fault: &ChannelFault) {
        if self.session.is_some() {
            self.teardown(fault);
        }
    }

    fn teardown(&mut self, fault: &ChannelFault) {
        if let Some(mut session) = self.session.take() {
            session.transport.close();
            log::warn!(
                "channel: session closed after {} ms: {}",
                session.opened_at.elapsed().as_millis(),
                fault
            );
            session.token.clear();
        }
        self.state = ChannelState::Closed;
    }

    /// Orderly shutdown (client stop). Leaves the channel ready for a fresh `open()`.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.transport.close();
            session.token.clear();
            log::info!("channel: closed");
        }
        self.auth_rejected = false;
        self.state = ChannelState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;

    fn channel_with_loopback() -> (VisionChannel, LoopbackServer) {
        let (connector, server) = loopback();
        let channel = VisionChannel::new(
            ServerEndpoint::parse("http://127.0.0.1:8000").unwrap(),
            Box::new(StaticToken::new("tok-1")),
            Box::new(connector),
        );
        (channel, server)
    }

    struct FailingToken;

    impl TokenProvider for FailingToken {
        fn fetch_token(&self, _endpoint: &ServerEndpoint) -> Result<String> {
            Err(anyhow!("503 service unavailable"))
        }
    }

    #[test]
    fn endpoint_derives_token_and_socket_urls() -> Result<()> {
        let endpoint = ServerEndpoint::parse("https://vision.local:8443")?;
        assert_eq!(
            endpoint.token_url()?.as_str(),
            "https://vision.local:8443/api/auth/token"
        );
        assert_eq!(
            endpoint.socket_url()?.as_str(),
            "wss://vision.local:8443/ws/vision"
        );
        let plain = ServerEndpoint::parse("http://127.0.0.1:8000")?;
        assert_eq!(plain.socket_url()?.as_str(), "ws://127.0.0.1:8000/ws/vision");
        assert!(ServerEndpoint::parse("ftp://host").is_err());
        Ok(())
    }

    #[test]
    fn open_sends_auth_first() -> Result<()> {
        let (mut channel, server) = channel_with_loopback();
        channel.open(Instant::now())?;
        assert_eq!(channel.state(), ChannelState::Authenticating);
        assert!(channel.is_open());

        let peer = server.accept().expect("connection");
        assert_eq!(
            peer.recv().as_deref(),
            Some(r#"{"type":"auth","token":"tok-1"}"#)
        );
        Ok(())
    }

    #[test]
    fn token_failure_closes_without_connecting() {
        let (connector, server) = loopback();
        let mut channel = VisionChannel::new(
            ServerEndpoint::parse("http://127.0.0.1:8000").unwrap(),
            Box::new(FailingToken),
            Box::new(connector),
        );
        let fault = channel.open(Instant::now()).unwrap_err();
        assert!(matches!(fault, ChannelFault::Handshake(_)));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(server.accept().is_none());
    }

    #[test]
    fn connected_ack_promotes_to_ready() -> Result<()> {
        let (mut channel, server) = channel_with_loopback();
        channel.open(Instant::now())?;
        let peer = server.accept().unwrap();
        peer.send_text(r#"{"type":"vision.connected"}"#);

        assert_eq!(channel.poll(), vec![ChannelEvent::Connected]);
        assert_eq!(channel.state(), ChannelState::Ready);
        Ok(())
    }

    #[test]
    fn poll_dispatches_results_malformed_and_ignores_others() -> Result<()> {
        let (mut channel, server) = channel_with_loopback();
        channel.open(Instant::now())?;
        let peer = server.accept().unwrap();
        peer.send_text(r#"{"type":"chat.delta"}"#);
        peer.send_text("{oops");
        peer.send_text(r#"{"type":"vision.result","mode":"detect","inference_ms":9,"detections":[]}"#);

        let events = channel.poll();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ChannelEvent::Malformed(_)));
        assert!(matches!(events[1], ChannelEvent::Result(ref r) if r.inference_ms == 9));
        assert_eq!(channel.stats().ignored, 1);
        assert_eq!(channel.stats().malformed, 1);
        Ok(())
    }

    #[test]
    fn auth_rejection_is_a_handshake_fault() -> Result<()> {
        let (mut channel, server) = channel_with_loopback();
        channel.open(Instant::now())?;
        let peer = server.accept().unwrap();
        peer.send_text(r#"{"type":"error","message":"Authentication required."}"#);
        peer.close(CLOSE_AUTH_FAILED, "Authentication failed");

        let events = channel.poll();
        assert!(matches!(events[0], ChannelEvent::ServiceError(_)));
        assert!(matches!(
            events[1],
            ChannelEvent::Closed(ChannelFault::Handshake(_))
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!channel.is_open());
        Ok(())
    }

    #[test]
    fn send_frame_requires_open_channel() {
        let (mut channel, _server) = channel_with_loopback();
        let frame = OutboundMessage::Frame {
            data: String::new(),
            mode: Mode::Detect,
            confidence: 0.25,
        };
        assert!(channel.send_frame(&frame).is_err());
    }

    #[test]
    fn close_returns_to_disconnected_and_peer_sees_it() -> Result<()> {
        let (mut channel, server) = channel_with_loopback();
        channel.open(Instant::now())?;
        let peer = server.accept().unwrap();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Disconnected);
        let _auth = peer.recv();
        assert!(peer.is_client_closed());

        // A fresh open starts a new session.
        channel.open(Instant::now())?;
        assert!(server.accept().is_some());
        assert_eq!(channel.stats().sessions_opened, 2);
        Ok(())
    }
}
