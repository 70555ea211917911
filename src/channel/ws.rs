//! WebSocket transport over `tungstenite`.
//!
//! The TCP connect and the upgrade handshake are blocking and bounded by the
//! connect timeout. Once upgraded, the socket is switched to non-blocking mode so
//! `poll_recv` never stalls the event loop.

use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{Connector, ServerEndpoint, Transport, TransportEvent};

pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, endpoint: &ServerEndpoint) -> Result<Box<dyn Transport>> {
        let url = endpoint.socket_url()?;
        let addr = url
            .socket_addrs(|| None)
            .with_context(|| format!("resolve {}", url))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no address for {}", url))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .with_context(|| format!("connect to {}", addr))?;
        stream
            .set_read_timeout(Some(self.connect_timeout))
            .context("set handshake read timeout")?;
        stream
            .set_write_timeout(Some(self.connect_timeout))
            .context("set handshake write timeout")?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;

        let socket = handshake(url.as_str(), url.scheme(), stream)?;
        set_nonblocking(socket.get_ref()).context("switch socket to non-blocking")?;
        log::debug!("channel: websocket upgraded at {}", url);

        Ok(Box::new(WsTransport {
            socket,
            flush_pending: false,
        }))
    }
}

fn handshake(
    url: &str,
    scheme: &str,
    stream: TcpStream,
) -> Result<WebSocket<MaybeTlsStream<TcpStream>>> {
    match scheme {
        "ws" => {
            let (socket, _response) = tungstenite::client(url, MaybeTlsStream::Plain(stream))
                .map_err(|e| anyhow!("websocket handshake with {} failed: {}", url, e))?;
            Ok(socket)
        }
        #[cfg(feature = "wss")]
        "wss" => {
            let (socket, _response) = tungstenite::client_tls(url, stream)
                .map_err(|e| anyhow!("websocket handshake with {} failed: {}", url, e))?;
            Ok(socket)
        }
        other => Err(anyhow!(
            "socket scheme '{}' not supported by this build (enable the wss feature for TLS)",
            other
        )),
    }
}

fn set_nonblocking(stream: &MaybeTlsStream<TcpStream>) -> std::io::Result<()> {
    match stream {
        MaybeTlsStream::Plain(s) => s.set_nonblocking(true),
        #[cfg(feature = "wss")]
        MaybeTlsStream::Rustls(s) => s.get_ref().set_nonblocking(true),
        _ => Ok(()),
    }
}

fn is_would_block(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(e) if e.kind() == ErrorKind::WouldBlock)
}

struct WsTransport {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    /// A write hit `WouldBlock`; tungstenite holds the bytes until the next flush.
    flush_pending: bool,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> Result<()> {
        match self.socket.send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(e) if is_would_block(&e) => {
                self.flush_pending = true;
                Ok(())
            }
            Err(e) => Err(anyhow!("websocket send: {}", e)),
        }
    }

    fn poll_recv(&mut self) -> Result<TransportEvent> {
        if self.flush_pending {
            match self.socket.flush() {
                Ok(()) => self.flush_pending = false,
                Err(e) if is_would_block(&e) => {}
                Err(e) => return Err(anyhow!("websocket flush: {}", e)),
            }
        }

        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(TransportEvent::Text(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(TransportEvent::Text(text)),
                    Err(_) => return Ok(TransportEvent::Text(String::new())),
                },
                // Pings are answered by tungstenite on the next write/flush.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Ok(TransportEvent::Closed { code, reason });
                }
                Err(e) if is_would_block(&e) => return Ok(TransportEvent::Idle),
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return Ok(TransportEvent::Closed {
                        code: None,
                        reason: "connection closed".to_string(),
                    })
                }
                Err(e) => return Err(anyhow!("websocket read: {}", e)),
            }
        }
    }

    fn close(&mut self) {
        // Best effort: the peer may already be gone.
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}
