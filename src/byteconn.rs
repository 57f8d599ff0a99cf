// SPDX-License-Identifier: Apache-2.0

//! A bidirectional byte stream with TLS-state lookback, as specified for
//! the proxy's `ByteConn` (section 3). Plain TCP and TLS are unified
//! behind boxed `AsyncRead`/`AsyncWrite` trait objects (mirroring the
//! `BoxAsyncRead`/`BoxAsyncWrite` pattern in `g3proxy`'s `inspect/mod.rs`)
//! so a mid-stream upgrade never requires reconstructing the surrounding
//! `Session`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{ProxyError, ProxyResult};
use crate::tls;

type BoxAsyncRead = Box<dyn AsyncRead + Send + Unpin + 'static>;
type BoxAsyncWrite = Box<dyn AsyncWrite + Send + Unpin + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    Plain,
    TlsServer,
    TlsClient,
}

impl TlsState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsState::Plain => "plain",
            TlsState::TlsServer => "tls-server",
            TlsState::TlsClient => "tls-client",
        }
    }
}

/// One endpoint of a `Session`: either the client-facing leg (`inbound`) or
/// the server-facing leg (`outbound`). See invariants in SPEC_FULL.md section 3.
pub struct ByteConn {
    peer: SocketAddr,
    reader: BoxAsyncRead,
    writer: BoxAsyncWrite,
    tls_state: TlsState,
    last_sent: Vec<u8>,
    last_received: Vec<u8>,
}

impl ByteConn {
    fn from_plain(stream: TcpStream, peer: SocketAddr) -> Self {
        let (r, w) = stream.into_split();
        ByteConn {
            peer,
            reader: Box::new(r),
            writer: Box::new(w),
            tls_state: TlsState::Plain,
            last_sent: Vec::new(),
            last_received: Vec::new(),
        }
    }

    /// Builds a `ByteConn` over an arbitrary duplex transport rather than a
    /// `TcpStream` -- used directly by tests (e.g. `tokio::io::duplex`
    /// halves) and available for non-TCP transports generally.
    pub fn from_io<R, W>(reader: R, writer: W, peer: SocketAddr) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        ByteConn {
            peer,
            reader: Box::new(reader),
            writer: Box::new(writer),
            tls_state: TlsState::Plain,
            last_sent: Vec::new(),
            last_received: Vec::new(),
        }
    }

    pub async fn connect(addr: SocketAddr) -> ProxyResult<Self> {
        let stream = TcpStream::connect(addr).await.map_err(ProxyError::Connect)?;
        let peer = stream.peer_addr().map_err(ProxyError::Connect)?;
        Ok(Self::from_plain(stream, peer))
    }

    pub fn from_accepted(stream: TcpStream, peer: SocketAddr) -> Self {
        Self::from_plain(stream, peer)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn tls_state(&self) -> TlsState {
        self.tls_state
    }

    pub fn last_sent(&self) -> &[u8] {
        &self.last_sent
    }

    pub fn last_received(&self) -> &[u8] {
        &self.last_received
    }

    /// Reads up to `n` bytes. Zero-length return means orderly close.
    pub async fn recv(&mut self, n: usize) -> ProxyResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let len = self.reader.read(&mut buf).await?;
        buf.truncate(len);
        self.last_received = buf.clone();
        Ok(buf)
    }

    pub async fn send_all(&mut self, bytes: &[u8]) -> ProxyResult<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        self.last_sent = bytes.to_vec();
        Ok(())
    }

    /// Performs a TLS handshake in server role over the current plain
    /// endpoint. May be called at most once per `ByteConn` (SPEC_FULL.md
    /// invariant: "once upgraded, subsequent reads/writes go through the
    /// TLS layer; the plain endpoint is never touched again").
    pub async fn upgrade_server(&mut self, config: Arc<rustls::ServerConfig>) -> ProxyResult<()> {
        if self.tls_state != TlsState::Plain {
            return Err(ProxyError::Tls("connection already upgraded".into()));
        }
        let stream = tokio::io::join(
            std::mem::replace(&mut self.reader, Box::new(tokio::io::empty())),
            std::mem::replace(&mut self.writer, Box::new(tokio::io::sink())),
        );
        let acceptor = TlsAcceptor::from(config);
        let tls_stream = acceptor
            .accept(stream)
            .await
            .map_err(|e| ProxyError::Tls(format!("server handshake failed: {e}")))?;
        let (r, w) = tokio::io::split(tls_stream);
        self.reader = Box::new(r);
        self.writer = Box::new(w);
        self.tls_state = TlsState::TlsServer;
        Ok(())
    }

    /// Performs a TLS handshake in client role using the proxy's
    /// certificate-blind trust configuration (`tls::build_insecure_client_config`).
    pub async fn upgrade_client(&mut self, connector: TlsConnector, host: &str) -> ProxyResult<()> {
        if self.tls_state != TlsState::Plain {
            return Err(ProxyError::Tls("connection already upgraded".into()));
        }
        let stream = tokio::io::join(
            std::mem::replace(&mut self.reader, Box::new(tokio::io::empty())),
            std::mem::replace(&mut self.writer, Box::new(tokio::io::sink())),
        );
        let server_name = tls::server_name_for(host);
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ProxyError::Tls(format!("client handshake failed: {e}")))?;
        let (r, w) = tokio::io::split(tls_stream);
        self.reader = Box::new(r);
        self.writer = Box::new(w);
        self.tls_state = TlsState::TlsClient;
        Ok(())
    }
}

pub fn io_err_is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
    )
}
