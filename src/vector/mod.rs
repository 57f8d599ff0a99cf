// SPDX-License-Identifier: Apache-2.0

//! The attack-vector catalogue (spec.md section 4.3).
//!
//! Each vector is modeled (spec.md section 9, "Dynamic dispatch on
//! vectors") as a value implementing a small two-method capability
//! carrying a tag. Concretely: one Rust enum per protocol (`SmtpVector`,
//! `Pop3Vector`, ...) whose variants are the strategies named in spec.md,
//! each implementing the shared `AttackVector` trait below via
//! `async_trait` -- the same crate `g3proxy` uses pervasively for its
//! `Server`/`Escaper` trait objects.
//!
//! `MangleCtx` is the side-channel a vector uses to inject synthetic
//! bytes, request a TLS upgrade, or flip the session's result record,
//! instead of any implicit global state (spec.md section 9,
//! "Synthetic-response injection").

pub mod acap;
pub mod ftp;
pub mod imap;
pub mod irc;
pub mod nntp;
pub mod pop3;
pub mod smtp;
pub mod xmpp;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_rustls::TlsConnector;

use crate::detect::Protocol;
use crate::error::ProxyResult;
use crate::result::ResultState;
use crate::session::Session;

/// Context threaded through a vector's mangle call. Borrows the session
/// mutably for its duration, so only one side of the conversation can be
/// acted on at a time -- the same discipline the source's single-threaded
/// event loop gave for free, preserved here through ownership instead.
pub struct MangleCtx<'a> {
    session: &'a mut Session,
    server_tls: Arc<rustls::ServerConfig>,
    client_connector: TlsConnector,
}

impl<'a> MangleCtx<'a> {
    pub fn new(
        session: &'a mut Session,
        server_tls: Arc<rustls::ServerConfig>,
        client_connector: TlsConnector,
    ) -> Self {
        MangleCtx {
            session,
            server_tls,
            client_connector,
        }
    }

    pub fn client_ip(&self) -> std::net::IpAddr {
        self.session.client_ip
    }

    /// Bytes most recently sent *to* the upstream server -- used to
    /// correlate a server response with the client command that provoked
    /// it (e.g. "only strip STARTTLS if the last command was EHLO/HELO").
    pub fn outbound_last_sent(&self) -> &[u8] {
        self.session.outbound.last_sent()
    }

    pub fn inbound_last_sent(&self) -> &[u8] {
        self.session.inbound.last_sent()
    }

    /// Last line received from the upstream server -- used by IRC vectors
    /// to recover the server name and the client's nick for synthetic
    /// numeric replies (spec.md section 4.3, "IRC").
    pub fn outbound_last_received(&self) -> &[u8] {
        self.session.outbound.last_received()
    }

    /// Injects synthetic bytes to the client, bypassing the normal
    /// client<-server forwarding path.
    pub async fn send_to_client(&mut self, bytes: &[u8]) -> ProxyResult<()> {
        self.session.inbound.send_all(bytes).await
    }

    /// Forwards bytes to the upstream server directly, bypassing the
    /// normal forwarding path -- used by `UntrustedIntercept` vectors to
    /// replay the client's original STARTTLS-class command upstream.
    pub async fn send_to_upstream(&mut self, bytes: &[u8]) -> ProxyResult<()> {
        self.session.outbound.send_all(bytes).await
    }

    /// Blocking (within this session's task) read of the upstream's
    /// reply, used by `UntrustedIntercept` to validate the upstream
    /// accepted the forwarded STARTTLS-class command before proceeding
    /// to the client-role handshake (spec.md section 5: "a *synchronous*
    /// sequence within one event turn").
    pub async fn recv_from_upstream(&mut self, n: usize) -> ProxyResult<Vec<u8>> {
        self.session.outbound.recv(n).await
    }

    pub async fn upgrade_inbound_as_server(&mut self) -> ProxyResult<()> {
        self.session
            .inbound
            .upgrade_server(self.server_tls.clone())
            .await
    }

    pub async fn upgrade_outbound_as_client(&mut self) -> ProxyResult<()> {
        let host = self.session.outbound.peer_addr().ip().to_string();
        self.session
            .outbound
            .upgrade_client(self.client_connector.clone(), &host)
            .await
    }

    pub fn mark_vulnerable(&self) {
        self.session.set_result(ResultState::Vulnerable);
    }
}

#[async_trait]
pub trait AttackVector: Send + Sync {
    fn protocol(&self) -> Protocol;
    fn name(&self) -> &'static str;

    /// Called for every chunk the client sends. `Ok(Some(bytes))` forwards
    /// `bytes` upstream; `Ok(None)` suppresses forwarding entirely.
    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>>;

    /// Called for every chunk the server sends. Symmetric to
    /// `mangle_client_data`.
    async fn mangle_server_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>>;
}

pub type ArcVector = Arc<dyn AttackVector>;

/// Builds the full default catalogue for a protocol -- the `ALL` value of
/// `--vectors` (spec.md section 6).
pub fn all_vectors_for(protocol: Protocol) -> Vec<ArcVector> {
    match protocol {
        Protocol::Smtp => smtp::all(),
        Protocol::Pop3 => pop3::all(),
        Protocol::Imap => imap::all(),
        Protocol::Ftp => ftp::all(),
        Protocol::Nntp => nntp::all(),
        Protocol::Xmpp => xmpp::all(),
        Protocol::Acap => acap::all(),
        Protocol::Irc => irc::all(),
    }
}

// --- shared byte-substring helpers (spec.md section 9, "Pattern-matched
// parsing"): these are deliberately *not* real protocol parsers. ---

/// Splits a CRLF-terminated byte buffer into lines, each line retaining
/// its trailing `\r\n` (or whatever trails the final unterminated chunk).
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start < data.len() {
        match memchr::memchr(b'\n', &data[start..]) {
            Some(rel) => {
                let end = start + rel + 1;
                lines.push(&data[start..end]);
                start = end;
            }
            None => {
                lines.push(&data[start..]);
                break;
            }
        }
    }
    lines
}

pub fn join_lines(lines: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        out.extend_from_slice(line);
    }
    out
}

pub fn lower_lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).to_ascii_lowercase()
}

pub fn contains_ci(data: &[u8], needle: &str) -> bool {
    lower_lossy(data).contains(needle)
}

pub fn starts_with_ci(data: &[u8], needle: &str) -> bool {
    lower_lossy(data).starts_with(needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines_preserves_terminators() {
        let data = b"250-a\r\n250-b\r\n250 c\r\n";
        let lines = split_lines(data);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], b"250-a\r\n");
        assert_eq!(lines[2], b"250 c\r\n");
        assert_eq!(join_lines(&lines), data);
    }

    #[test]
    fn split_lines_tolerates_unterminated_tail() {
        let data = b"a\r\nb";
        let lines = split_lines(data);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], b"b");
    }
}
