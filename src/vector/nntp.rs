// SPDX-License-Identifier: Apache-2.0

//! NNTP attack vectors (spec.md section 4.3, "NNTP"). STARTTLS is defined
//! by RFC 4642; capabilities come from the `CAPABILITIES` command.

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_ci, split_lines, starts_with_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum NntpVector {
    StripFromCapabilities,
    StripWithError,
    UntrustedIntercept,
}

/// Every NNTP vector marks the session vulnerable the moment the client
/// sends `GROUP` in cleartext (spec.md section 4.3: "GROUP " sentinel).
fn mark_if_group(ctx: &MangleCtx<'_>, data: &[u8]) {
    if starts_with_ci(data, "group ") {
        ctx.mark_vulnerable();
    }
}

#[async_trait]
impl AttackVector for NntpVector {
    fn protocol(&self) -> Protocol {
        Protocol::Nntp
    }

    fn name(&self) -> &'static str {
        match self {
            NntpVector::StripFromCapabilities => "StripFromCapabilities",
            NntpVector::StripWithError => "StripWithError",
            NntpVector::UntrustedIntercept => "UntrustedIntercept",
        }
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            NntpVector::StripFromCapabilities => {
                mark_if_group(ctx, data);
                Ok(Some(data.to_vec()))
            }
            NntpVector::StripWithError => {
                if starts_with_ci(data, "starttls") {
                    ctx.send_to_client(b"502 Command unavailable\r\n").await?;
                    return Ok(None);
                }
                mark_if_group(ctx, data);
                Ok(Some(data.to_vec()))
            }
            NntpVector::UntrustedIntercept => {
                if starts_with_ci(data, "starttls") {
                    ctx.send_to_client(b"382 Continue with TLS negotiation\r\n")
                        .await?;
                    ctx.upgrade_inbound_as_server().await?;
                    ctx.send_to_upstream(data).await?;
                    let resp = ctx.recv_from_upstream(4096).await?;
                    if !starts_with_ci(&resp, "382") {
                        return Err(ProxyError::ProtocolViolation(
                            "upstream rejected forwarded STARTTLS",
                        ));
                    }
                    ctx.upgrade_outbound_as_client().await?;
                    return Ok(None);
                }
                mark_if_group(ctx, data);
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
            NntpVector::StripFromCapabilities => {
                if starts_with_ci(ctx.outbound_last_sent(), "capabilities") && contains_ci(data, "starttls") {
                    let kept: Vec<&[u8]> = split_lines(data)
                        .into_iter()
                        .filter(|l| !contains_ci(l, "starttls"))
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
        Arc::new(NntpVector::StripFromCapabilities),
        Arc::new(NntpVector::StripWithError),
        Arc::new(NntpVector::UntrustedIntercept),
    ]
}
