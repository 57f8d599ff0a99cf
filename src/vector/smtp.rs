// SPDX-License-Identifier: Apache-2.0

//! SMTP attack vectors (spec.md section 4.3, "SMTP"). Line-oriented, CRLF,
//! response codes use the `NNN-` continuation / `NNN ` terminator
//! convention RFC 5321 defines.

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_ci, split_lines, starts_with_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum SmtpVector {
    StripFromCapabilities,
    ProtocolDowngradeToV2,
    StripWithInvalidResponseCode,
    StripWithTemporaryError,
    StripWithError,
    UntrustedIntercept,
    ProtocolDowngradeStripExtendedMode,
    InjectCommand,
}

impl SmtpVector {
    fn name_str(&self) -> &'static str {
        match self {
            SmtpVector::StripFromCapabilities => "StripFromCapabilities",
            SmtpVector::ProtocolDowngradeToV2 => "ProtocolDowngradeToV2",
            SmtpVector::StripWithInvalidResponseCode => "StripWithInvalidResponseCode",
            SmtpVector::StripWithTemporaryError => "StripWithTemporaryError",
            SmtpVector::StripWithError => "StripWithError",
            SmtpVector::UntrustedIntercept => "UntrustedIntercept",
            SmtpVector::ProtocolDowngradeStripExtendedMode => "ProtocolDowngradeStripExtendedMode",
            SmtpVector::InjectCommand => "InjectCommand",
        }
    }
}

fn sent_ehlo_or_helo(ctx: &MangleCtx<'_>) -> bool {
    starts_with_ci(ctx.outbound_last_sent(), "ehlo") || starts_with_ci(ctx.outbound_last_sent(), "helo")
}

/// Every SMTP vector marks the session vulnerable the moment the client
/// sends `MAIL FROM` in cleartext, regardless of which strip strategy is
/// assigned (spec.md section 4.3: "mail from" sentinel).
fn mark_if_mail_from(ctx: &MangleCtx<'_>, data: &[u8]) {
    if contains_ci(data, "mail from") {
        ctx.mark_vulnerable();
    }
}

#[async_trait]
impl AttackVector for SmtpVector {
    fn protocol(&self) -> Protocol {
        Protocol::Smtp
    }

    fn name(&self) -> &'static str {
        self.name_str()
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            // The source has no per-vector state to remember "a strip just
            // happened"; a client that sends STARTTLS at all while this
            // vector is assigned is already behaving inconsistently with
            // the capability list it was shown.
            SmtpVector::StripFromCapabilities => {
                if starts_with_ci(data, "starttls") {
                    return Err(ProxyError::ProtocolViolation(
                        "client sent STARTTLS after capabilities were stripped",
                    ));
                }
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
            SmtpVector::StripWithInvalidResponseCode => {
                if starts_with_ci(data, "starttls") {
                    ctx.send_to_client(b"200 STRIPTLS\r\n").await?;
                    return Ok(None);
                }
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
            SmtpVector::StripWithTemporaryError => {
                if starts_with_ci(data, "starttls") {
                    ctx.send_to_client(b"454 TLS not available due to temporary reason\r\n")
                        .await?;
                    return Ok(None);
                }
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
            SmtpVector::StripWithError => {
                if starts_with_ci(data, "starttls") {
                    ctx.send_to_client(b"501 Syntax error\r\n").await?;
                    return Ok(None);
                }
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
            SmtpVector::UntrustedIntercept => {
                if starts_with_ci(data, "starttls") {
                    untrusted_intercept(ctx, data).await?;
                    return Ok(None);
                }
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
            SmtpVector::ProtocolDowngradeStripExtendedMode => {
                if starts_with_ci(data, "ehlo") {
                    ctx.send_to_client(b"502 Error: command \"EHLO\" not implemented\r\n")
                        .await?;
                    return Ok(None);
                }
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
            SmtpVector::InjectCommand => {
                if starts_with_ci(data, "starttls") {
                    let mut injected = data.to_vec();
                    injected.extend_from_slice(b"INJECTED_INVALID_COMMAND\r\n");
                    match untrusted_intercept(ctx, &injected).await {
                        Ok(()) => {}
                        Err(e) if e.is_tls_eof() => return Err(ProxyError::SessionTerminated),
                        Err(e) => return Err(e),
                    }
                    return Ok(None);
                }
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
            SmtpVector::ProtocolDowngradeToV2 => {
                mark_if_mail_from(ctx, data);
                Ok(Some(data.to_vec()))
            }
        }
    }

    async fn mangle_server_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            SmtpVector::StripFromCapabilities => {
                if sent_ehlo_or_helo(ctx) && contains_ci(data, "250") {
                    return Ok(Some(strip_lines_containing(data, "starttls")));
                }
                Ok(Some(data.to_vec()))
            }
            // Present in the source under the SMTP vector list despite
            // rewriting what looks like an IMAP greeting; kept as-is.
            SmtpVector::ProtocolDowngradeToV2 => {
                if contains_ci(data, "imap4") && contains_ci(data, "* ok ") {
                    return Ok(Some(b"OK IMAP2 Server Ready\r\n".to_vec()));
                }
                Ok(Some(data.to_vec()))
            }
            SmtpVector::StripWithInvalidResponseCode => {
                if sent_ehlo_or_helo(ctx) && contains_ci(data, "250") {
                    return Ok(Some(insert_spurious_starttls(data)));
                }
                Ok(Some(data.to_vec()))
            }
            _ => Ok(Some(data.to_vec())),
        }
    }
}

/// Shared by `UntrustedIntercept` and `InjectCommand`: accept the client's
/// TLS request with a proxy-owned certificate, forward `upstream_bytes`
/// unmodified, and only then open the matching client-role leg toward the
/// real server (spec.md section 5: the ordering is load-bearing).
async fn untrusted_intercept(ctx: &mut MangleCtx<'_>, upstream_bytes: &[u8]) -> ProxyResult<()> {
    ctx.send_to_client(b"220 Go ahead\r\n").await?;
    ctx.upgrade_inbound_as_server().await?;
    ctx.send_to_upstream(upstream_bytes).await?;
    let resp = ctx.recv_from_upstream(4096).await?;
    if !contains_ci(&resp, "220") {
        return Err(ProxyError::ProtocolViolation("upstream rejected forwarded STARTTLS"));
    }
    ctx.upgrade_outbound_as_client().await
}

fn strip_lines_containing(data: &[u8], needle: &str) -> Vec<u8> {
    let mut kept: Vec<Vec<u8>> = split_lines(data)
        .into_iter()
        .filter(|l| !contains_ci(l, needle))
        .map(|l| l.to_vec())
        .collect();
    ensure_terminator(&mut kept);
    kept.concat()
}

/// Flips the separator of the last surviving line from `-` to ` ` so the
/// response still ends in a valid terminator after lines were dropped.
fn ensure_terminator(lines: &mut [Vec<u8>]) {
    if let Some(last) = lines.last_mut() {
        if last.len() > 3 && last[3] == b'-' {
            last[3] = b' ';
        }
    }
}

/// Inserts a spurious `250-STARTTLS` continuation line just before the
/// response's terminating line, re-marking the old terminator as a
/// continuation if needed.
fn insert_spurious_starttls(data: &[u8]) -> Vec<u8> {
    let mut lines: Vec<Vec<u8>> = split_lines(data).into_iter().map(|l| l.to_vec()).collect();
    if lines.is_empty() {
        return data.to_vec();
    }
    let last_idx = lines.len() - 1;
    if lines[last_idx].len() > 3 && lines[last_idx][3] == b' ' {
        lines[last_idx][3] = b'-';
    }
    lines.insert(last_idx, b"250-STARTTLS\r\n".to_vec());
    lines.concat()
}

pub fn all() -> Vec<ArcVector> {
    vec![
        Arc::new(SmtpVector::StripFromCapabilities),
        Arc::new(SmtpVector::ProtocolDowngradeToV2),
        Arc::new(SmtpVector::StripWithInvalidResponseCode),
        Arc::new(SmtpVector::StripWithTemporaryError),
        Arc::new(SmtpVector::StripWithError),
        Arc::new(SmtpVector::UntrustedIntercept),
        Arc::new(SmtpVector::ProtocolDowngradeStripExtendedMode),
        Arc::new(SmtpVector::InjectCommand),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_from_capabilities_removes_starttls_line_and_fixes_terminator() {
        let data = b"250-mail.example\r\n250-PIPELINING\r\n250-STARTTLS\r\n250 HELP\r\n";
        let out = strip_lines_containing(data, "starttls");
        assert_eq!(out, b"250-mail.example\r\n250-PIPELINING\r\n250 HELP\r\n".to_vec());
    }

    #[test]
    fn strip_from_capabilities_fixes_terminator_when_last_line_dropped() {
        let data = b"250-mail.example\r\n250 STARTTLS\r\n";
        let out = strip_lines_containing(data, "starttls");
        assert_eq!(out, b"250 mail.example\r\n".to_vec());
    }

    #[test]
    fn spurious_starttls_inserted_before_terminator() {
        let data = b"250 HELP\r\n";
        let out = insert_spurious_starttls(data);
        assert_eq!(out, b"250-STARTTLS\r\n250 HELP\r\n".to_vec());
    }
}
