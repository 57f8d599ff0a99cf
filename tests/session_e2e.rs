// SPDX-License-Identifier: Apache-2.0

//! End-to-end byte-literal scenarios from spec.md section 8, driven through
//! the real `Session::run` loop over `tokio::io::duplex` transports instead
//! of real sockets. Covers the scenarios that do not require a completed
//! TLS handshake; `tls_intercept.rs` covers the ones that do.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsConnector;

use starttls_auditor::byteconn::ByteConn;
use starttls_auditor::detect::Protocol;
use starttls_auditor::dispatch::Dispatcher;
use starttls_auditor::result::ResultState;
use starttls_auditor::session::Session;
use starttls_auditor::tls::build_insecure_client_config;
use starttls_auditor::vector::pop3::Pop3Vector;
use starttls_auditor::vector::smtp::SmtpVector;

const CLIENT_ADDR: &str = "198.51.100.9:51234";
const UPSTREAM_ADDR: &str = "203.0.113.25:25";
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

async fn expect_no_data(stream: &mut (impl AsyncReadExt + Unpin)) {
    let mut buf = [0u8; 16];
    let result = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
    assert!(result.is_err(), "expected no bytes, but some arrived");
}

fn session_harness(
    port: u16,
    dispatcher: Arc<Dispatcher>,
) -> (
    tokio::io::DuplexStream,
    tokio::io::DuplexStream,
    Session,
) {
    let (client_side, proxy_inbound_io) = tokio::io::duplex(8192);
    let (proxy_outbound_io, upstream_side) = tokio::io::duplex(8192);

    let (inbound_r, inbound_w) = split(proxy_inbound_io);
    let (outbound_r, outbound_w) = split(proxy_outbound_io);

    let client_addr: SocketAddr = CLIENT_ADDR.parse().unwrap();
    let upstream_addr: SocketAddr = UPSTREAM_ADDR.parse().unwrap();

    let inbound = ByteConn::from_io(inbound_r, inbound_w, client_addr);
    let outbound = ByteConn::from_io(outbound_r, outbound_w, upstream_addr);

    let connector = TlsConnector::from(build_insecure_client_config());
    let session = Session::new(
        inbound,
        outbound,
        port,
        dispatcher,
        common::ephemeral_server_config(),
        connector,
    );

    (client_side, upstream_side, session)
}

#[tokio::test]
async fn smtp_strip_from_capabilities_hides_starttls_and_flags_vulnerable() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add(Protocol::Smtp, Arc::new(SmtpVector::StripFromCapabilities));
    let dispatcher = Arc::new(dispatcher);

    let (mut client_side, mut upstream_side, session) = session_harness(25, dispatcher.clone());
    tokio::spawn(session.run());

    client_side.write_all(b"EHLO x\r\n").await.unwrap();
    let seen_upstream = read_some(&mut upstream_side).await;
    assert_eq!(seen_upstream, b"EHLO x\r\n");

    upstream_side
        .write_all(b"250-mail.example\r\n250-PIPELINING\r\n250-STARTTLS\r\n250 HELP\r\n")
        .await
        .unwrap();
    let seen_client = read_some(&mut client_side).await;
    assert_eq!(
        seen_client,
        b"250-mail.example\r\n250-PIPELINING\r\n250 HELP\r\n".to_vec()
    );

    client_side.write_all(b"MAIL FROM:<a@b>\r\n").await.unwrap();
    let forwarded = read_some(&mut upstream_side).await;
    assert_eq!(forwarded, b"MAIL FROM:<a@b>\r\n");

    // give the session task a moment to apply mark_vulnerable before we snapshot
    tokio::time::sleep(Duration::from_millis(50)).await;
    let records = dispatcher.results_snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, ResultState::Vulnerable);
}

#[tokio::test]
async fn smtp_strip_with_error_answers_client_and_forwards_nothing() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add(Protocol::Smtp, Arc::new(SmtpVector::StripWithError));
    let dispatcher = Arc::new(dispatcher);

    let (mut client_side, mut upstream_side, session) = session_harness(25, dispatcher);
    tokio::spawn(session.run());

    client_side.write_all(b"STARTTLS\r\n").await.unwrap();
    let seen_client = read_some(&mut client_side).await;
    assert_eq!(seen_client, b"501 Syntax error\r\n".to_vec());
    expect_no_data(&mut upstream_side).await;
}

#[tokio::test]
async fn pop3_strip_with_error_answers_client_and_flags_vulnerable_on_user() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add(Protocol::Pop3, Arc::new(Pop3Vector::StripWithError));
    let dispatcher = Arc::new(dispatcher);

    let (mut client_side, mut upstream_side, session) = session_harness(110, dispatcher.clone());
    tokio::spawn(session.run());

    client_side.write_all(b"STLS\r\n").await.unwrap();
    let seen_client = read_some(&mut client_side).await;
    assert_eq!(seen_client, b"-ERR unknown command\r\n".to_vec());
    expect_no_data(&mut upstream_side).await;

    client_side.write_all(b"USER alice\r\n").await.unwrap();
    let forwarded = read_some(&mut upstream_side).await;
    assert_eq!(forwarded, b"USER alice\r\n");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let records = dispatcher.results_snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, ResultState::Vulnerable);
}
