// SPDX-License-Identifier: Apache-2.0

//! `ProxyServer`: accepts inbound TCP, opens the paired outbound leg, and
//! spawns one task per session (spec.md section 4.5, section 5 *[impl]*
//! note on relocating the source's single-threaded accept loop to a
//! per-session task model).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use slog::Logger;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;

use crate::byteconn::ByteConn;
use crate::detect::Protocol;
use crate::dispatch::Dispatcher;
use crate::error::ProxyError;
use crate::logging::{self, vector_log};
use crate::opts::VectorSelection;
use crate::result::ResultState;
use crate::session::Session;
use crate::tls;
use crate::vector::all_vectors_for;

const ALL_PROTOCOLS: [Protocol; 8] = [
    Protocol::Smtp,
    Protocol::Pop3,
    Protocol::Imap,
    Protocol::Ftp,
    Protocol::Nntp,
    Protocol::Xmpp,
    Protocol::Acap,
    Protocol::Irc,
];

pub struct ProxyServer {
    listen: SocketAddr,
    remote: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    server_tls: Arc<rustls::ServerConfig>,
    client_connector: TlsConnector,
    vector_log: Logger,
}

impl ProxyServer {
    pub fn new(
        listen: SocketAddr,
        remote: SocketAddr,
        key_path: &Path,
        vectors: &VectorSelection,
    ) -> anyhow::Result<Self> {
        let server_tls = tls::load_server_config(key_path)
            .with_context(|| format!("failed to load key file {}", key_path.display()))?;
        let client_connector = TlsConnector::from(tls::build_insecure_client_config());

        let mut dispatcher = Dispatcher::new();
        register_vectors(&mut dispatcher, vectors);

        Ok(ProxyServer {
            listen,
            remote,
            dispatcher: Arc::new(dispatcher),
            server_tls,
            client_connector,
            vector_log: logging::build_vector_logger(),
        })
    }

    /// Runs the accept loop until interrupted. Returns the process exit
    /// code: `0` is reserved for a future orderly-stop trigger (spec.md
    /// section 6 has none today); an interrupt returns `1` (spec.md
    /// section 6: "incremented on interrupt").
    pub async fn run(self) -> anyhow::Result<u8> {
        let listener = TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.listen))?;
        info!("listening on {}, forwarding to {}", self.listen, self.remote);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_session(stream, peer),
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.print_summary();
        Ok(1)
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let remote = self.remote;
        let dispatcher = self.dispatcher.clone();
        let server_tls = self.server_tls.clone();
        let client_connector = self.client_connector.clone();
        let vector_log = self.vector_log.clone();

        tokio::spawn(async move {
            let inbound = ByteConn::from_accepted(stream, peer);
            let outbound = match ByteConn::connect(remote).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("could not connect to upstream {remote} for {peer}: {e}");
                    return;
                }
            };

            let session = Session::new(
                inbound,
                outbound,
                remote.port(),
                dispatcher.clone(),
                server_tls,
                client_connector,
            );
            let session_id = session.id;
            let outcome = session.run().await;

            if let Some(record) = dispatcher
                .results_snapshot()
                .into_iter()
                .find(|r| r.session_id == session_id)
            {
                vector_log!(
                    vector_log,
                    session_id,
                    peer.ip(),
                    record.protocol.as_str(),
                    record.vector_name.as_str(),
                    "session ended, result: {:?}", record.state
                );
            }

            match outcome {
                Ok(()) => {}
                Err(ProxyError::SessionTerminated) => {
                    info!("session {session_id} from {peer} ended");
                }
                Err(e) => {
                    warn!("session {session_id} from {peer} closed: {e}");
                }
            }
        });
    }

    /// Prints the audit summary at shutdown, grouped by client IP (spec.md
    /// section 6, "Persisted state").
    fn print_summary(&self) {
        let mut grouped: BTreeMap<std::net::IpAddr, Vec<_>> = BTreeMap::new();
        for record in self.dispatcher.results_snapshot() {
            grouped.entry(record.client_ip).or_default().push(record);
        }

        println!("\n=== audit results ===");
        for (ip, records) in grouped {
            println!("{ip}:");
            for record in records {
                let mark = if record.state == ResultState::Vulnerable {
                    "Vulnerable!"
                } else {
                    ""
                };
                println!(
                    "  {} {} {}",
                    record.protocol.as_str(),
                    record.vector_name,
                    mark
                );
            }
        }
    }
}

fn register_vectors(dispatcher: &mut Dispatcher, selection: &VectorSelection) {
    match selection {
        VectorSelection::All => {
            for protocol in ALL_PROTOCOLS {
                for vector in all_vectors_for(protocol) {
                    dispatcher.add(protocol, vector);
                }
            }
        }
        VectorSelection::Named(list) => {
            for (protocol_name, vector_name) in list {
                let Some(protocol) = Protocol::from_name(protocol_name) else {
                    warn!("unknown protocol in --vectors: {protocol_name}");
                    continue;
                };
                match all_vectors_for(protocol)
                    .into_iter()
                    .find(|v| v.name().eq_ignore_ascii_case(vector_name))
                {
                    Some(vector) => dispatcher.add(protocol, vector),
                    None => warn!("unknown vector in --vectors: {protocol_name}.{vector_name}"),
                }
            }
        }
    }
}
