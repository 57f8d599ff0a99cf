// SPDX-License-Identifier: Apache-2.0

//! The one end-to-end scenario from spec.md section 8 that completes a real
//! TLS handshake: XMPP `StripInboundTLS` with a `<required/>` child, where
//! the proxy independently upgrades only the outbound leg while the client
//! leg stays cleartext. The test plays the role of both the XMPP client and
//! the XMPP server on either side of the duplex-backed `Session`.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use starttls_auditor::byteconn::ByteConn;
use starttls_auditor::detect::Protocol;
use starttls_auditor::dispatch::Dispatcher;
use starttls_auditor::session::Session;
use starttls_auditor::tls::build_insecure_client_config;
use starttls_auditor::vector::xmpp::XmppVector;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

async fn read_some(stream: &mut (impl AsyncReadExt + Unpin)) -> Vec<u8> {
    let mut buf = vec![0u8; 8192];
    let n = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("timed out waiting for bytes")
        .expect("read error");
    buf.truncate(n);
    buf
}

#[tokio::test]
async fn xmpp_strip_inbound_tls_upgrades_outbound_leg_only() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add(Protocol::Xmpp, Arc::new(XmppVector::StripInboundTLS));
    let dispatcher = Arc::new(dispatcher);

    let (mut client_side, proxy_inbound_io) = tokio::io::duplex(8192);
    let (proxy_outbound_io, mut upstream_side) = tokio::io::duplex(8192);

    let (inbound_r, inbound_w) = split(proxy_inbound_io);
    let (outbound_r, outbound_w) = split(proxy_outbound_io);

    let client_addr: SocketAddr = "198.51.100.9:52222".parse().unwrap();
    let upstream_addr: SocketAddr = "203.0.113.25:5222".parse().unwrap();

    let inbound = ByteConn::from_io(inbound_r, inbound_w, client_addr);
    let outbound = ByteConn::from_io(outbound_r, outbound_w, upstream_addr);

    let connector = TlsConnector::from(build_insecure_client_config());
    let session = Session::new(
        inbound,
        outbound,
        5222,
        dispatcher,
        common::ephemeral_server_config(),
        connector,
    );
    tokio::spawn(session.run());

    // Server sends stream features advertising a mandatory STARTTLS.
    upstream_side
        .write_all(
            b"<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls></stream:features>",
        )
        .await
        .unwrap();

    // Client sees the same features with the <starttls> element excised.
    let seen_client = read_some(&mut client_side).await;
    assert_eq!(
        seen_client,
        b"<stream:features></stream:features>".to_vec()
    );

    // The proxy independently starts its own STARTTLS toward the upstream.
    let forwarded = read_some(&mut upstream_side).await;
    assert_eq!(
        forwarded,
        b"<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>".to_vec()
    );

    upstream_side
        .write_all(b"<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
        .await
        .unwrap();

    // From here the proxy starts a TLS ClientHello on the same transport;
    // play the TLS server role to complete the handshake.
    let acceptor = TlsAcceptor::from(common::ephemeral_server_config());
    let mut upstream_tls = acceptor
        .accept(upstream_side)
        .await
        .expect("outbound TLS handshake should complete");

    // The inbound (client) leg stayed cleartext: later client bytes arrive
    // at the proxy as plaintext and are forwarded out re-encrypted.
    client_side.write_all(b"<iq/>").await.unwrap();
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(READ_TIMEOUT, upstream_tls.read(&mut buf))
        .await
        .expect("timed out waiting for re-encrypted bytes")
        .expect("tls read error");
    assert_eq!(&buf[..n], b"<iq/>");
}
