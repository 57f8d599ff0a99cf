// SPDX-License-Identifier: Apache-2.0

//! One client visit: a pair of `ByteConn`s plus protocol-detection state,
//! driving the read->mangle->write loop (spec.md section 3, "Session").
//!
//! Concurrency model (SPEC_FULL.md section 6, section 4.5 *[impl]*): the
//! source drives every session from one single-threaded readiness loop.
//! Here each `Session` is handed to its own `tokio::task` by the
//! `ProxyServer`, and the two directions of one session are raced with
//! `tokio::select!` so bytes are still forwarded in arrival order with no
//! reordering across directions, but a slow `UntrustedIntercept` handshake
//! on one session never blocks any other session's task.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::TlsConnector;
use uuid::Uuid;

use crate::byteconn::ByteConn;
use crate::detect::ProtocolDetector;
use crate::dispatch::Dispatcher;
use crate::error::{ProxyError, ProxyResult};
use crate::result::ResultState;
use crate::vector::{ArcVector, MangleCtx};

/// Size of each `recv` call; not a protocol framing unit, just the chunk
/// granularity the vectors see (spec.md section 3, "buffer-size parameter").
const DEFAULT_CHUNK_SIZE: usize = 8192;

/// The source has no cancellation or timeouts at all (spec.md section 5,
/// "Cancellation & timeouts"); it explicitly invites adding an idle
/// timeout as a non-behavioural addition "if long enough". An hour is
/// well past any plausible STARTTLS negotiation.
const IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct Session {
    pub id: Uuid,
    pub client_ip: IpAddr,
    pub inbound: ByteConn,
    pub outbound: ByteConn,
    detector: ProtocolDetector,
    assigned_vector: Option<ArcVector>,
    dispatcher: Arc<Dispatcher>,
    server_tls: Arc<rustls::ServerConfig>,
    client_connector: TlsConnector,
    chunk_size: usize,
}

impl Session {
    pub fn new(
        inbound: ByteConn,
        outbound: ByteConn,
        target_port: u16,
        dispatcher: Arc<Dispatcher>,
        server_tls: Arc<rustls::ServerConfig>,
        client_connector: TlsConnector,
    ) -> Self {
        let client_ip = inbound.peer_addr().ip();
        Session {
            id: Uuid::new_v4(),
            client_ip,
            inbound,
            outbound,
            detector: ProtocolDetector::new_for_port(target_port),
            assigned_vector: None,
            dispatcher,
            server_tls,
            client_connector,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn outbound_peer(&self) -> SocketAddr {
        self.outbound.peer_addr()
    }

    pub fn set_result(&self, state: ResultState) {
        self.dispatcher.set_result(self.id, state);
    }

    fn ensure_vector_assigned(&mut self) {
        if self.assigned_vector.is_some() {
            return;
        }
        if let Some(protocol) = self.detector.protocol() {
            self.assigned_vector =
                self.dispatcher
                    .get_mangle(self.id, self.client_ip, protocol);
        }
    }

    async fn mangle_client(&mut self, data: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        let Some(vector) = self.assigned_vector.clone() else {
            return Ok(Some(data.to_vec()));
        };
        let server_tls = self.server_tls.clone();
        let connector = self.client_connector.clone();
        let mut ctx = MangleCtx::new(self, server_tls, connector);
        vector.mangle_client_data(&mut ctx, data).await
    }

    async fn mangle_server(&mut self, data: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        let Some(vector) = self.assigned_vector.clone() else {
            return Ok(Some(data.to_vec()));
        };
        let server_tls = self.server_tls.clone();
        let connector = self.client_connector.clone();
        let mut ctx = MangleCtx::new(self, server_tls, connector);
        vector.mangle_server_data(&mut ctx, data).await
    }

    /// Drives the session until either peer closes, a protocol violation
    /// is raised, or an I/O error occurs (spec.md section 3, "Session"
    /// lifecycle).
    pub async fn run(mut self) -> ProxyResult<()> {
        let chunk_size = self.chunk_size;
        loop {
            let turn = tokio::time::timeout(IDLE_TIMEOUT, async {
                tokio::select! {
                    biased;
                    result = self.inbound.recv(chunk_size) => {
                        let data = result?;
                        if data.is_empty() {
                            return Err(ProxyError::SessionTerminated);
                        }
                        self.detector.observe(&data);
                        self.ensure_vector_assigned();
                        if let Some(bytes) = self.mangle_client(&data).await? {
                            self.outbound.send_all(&bytes).await?;
                        }
                        Ok(())
                    }
                    result = self.outbound.recv(chunk_size) => {
                        let data = result?;
                        if data.is_empty() {
                            return Err(ProxyError::SessionTerminated);
                        }
                        self.detector.observe(&data);
                        self.ensure_vector_assigned();
                        if let Some(bytes) = self.mangle_server(&data).await? {
                            self.inbound.send_all(&bytes).await?;
                        }
                        Ok(())
                    }
                }
            })
            .await;

            match turn {
                Ok(result) => result?,
                Err(_) => return Err(ProxyError::SessionTerminated),
            }
        }
    }
}
