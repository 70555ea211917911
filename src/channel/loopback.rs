//! In-process transport pair.
//!
//! `loopback()` returns a connector for the client and a server handle for the
//! other side. Each `connect()` yields a fresh `LoopbackPeer` from
//! `LoopbackServer::accept()`. Used by tests and `--loopback` dry runs.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use super::{Connector, ServerEndpoint, Transport, TransportEvent};

/// Create a connected connector/server pair.
pub fn loopback() -> (LoopbackConnector, LoopbackServer) {
    let (accept_tx, accept_rx) = mpsc::channel();
    let refusing = Arc::new(AtomicBool::new(false));
    (
        LoopbackConnector {
            accept_tx,
            refusing: Arc::clone(&refusing),
        },
        LoopbackServer {
            accept_rx,
            refusing,
        },
    )
}

pub struct LoopbackConnector {
    accept_tx: Sender<LoopbackPeer>,
    refusing: Arc<AtomicBool>,
}

impl Connector for LoopbackConnector {
    fn connect(&mut self, _endpoint: &ServerEndpoint) -> Result<Box<dyn Transport>> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let (to_client_tx, to_client_rx) = mpsc::channel();
        let (to_server_tx, to_server_rx) = mpsc::channel();
        self.accept_tx
            .send(LoopbackPeer {
                to_client: to_client_tx,
                from_client: to_server_rx,
            })
            .map_err(|_| anyhow!("loopback server dropped"))?;
        Ok(Box::new(LoopbackTransport {
            inbound: to_client_rx,
            outbound: Some(to_server_tx),
        }))
    }
}

pub struct LoopbackServer {
    accept_rx: Receiver<LoopbackPeer>,
    refusing: Arc<AtomicBool>,
}

impl LoopbackServer {
    /// The next connection the client opened, if any.
    pub fn accept(&self) -> Option<LoopbackPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Make subsequent `connect()` calls fail.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

/// Server side of one loopback connection.
pub struct LoopbackPeer {
    to_client: Sender<TransportEvent>,
    from_client: Receiver<String>,
}

impl LoopbackPeer {
    /// Next message the client sent, if any.
    pub fn recv(&self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Everything the client has sent so far.
    pub fn drain(&self) -> Vec<String> {
        self.from_client.try_iter().collect()
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(TransportEvent::Text(text.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// True once the client dropped its end and every sent message was read.
    pub fn is_client_closed(&self) -> bool {
        matches!(self.from_client.try_recv(), Err(TryRecvError::Disconnected))
    }
}

struct LoopbackTransport {
    inbound: Receiver<TransportEvent>,
    outbound: Option<Sender<String>>,
}

impl Transport for LoopbackTransport {
    fn send_text(&mut self, text: String) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| anyhow!("loopback transport closed"))?;
        outbound
            .send(text)
            .map_err(|_| anyhow!("loopback peer dropped"))
    }

    fn poll_recv(&mut self) -> Result<TransportEvent> {
        match self.inbound.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) => Ok(TransportEvent::Idle),
            Err(TryRecvError::Disconnected) => Ok(TransportEvent::Closed {
                code: None,
                reason: "peer dropped".to_string(),
            }),
        }
    }

    fn close(&mut self) {
        self.outbound = None;
    }
}
