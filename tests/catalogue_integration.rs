// SPDX-License-Identifier: Apache-2.0

//! Exercises the real vector catalogue (as opposed to the test doubles in
//! `dispatch.rs`'s own unit tests) through the public `Dispatcher` API, and
//! checks a few cross-module invariants that only show up once every
//! protocol's catalogue is registered together.

use std::net::IpAddr;

use uuid::Uuid;

use starttls_auditor::detect::Protocol;
use starttls_auditor::dispatch::Dispatcher;
use starttls_auditor::vector::all_vectors_for;

const ALL_PROTOCOLS: [Protocol; 8] = [
    Protocol::Smtp,
    Protocol::Pop3,
    Protocol::Imap,
    Protocol::Ftp,
    Protocol::Nntp,
    Protocol::Xmpp,
    Protocol::Acap,
    Protocol::Irc,
];

#[test]
fn every_protocol_has_a_non_empty_catalogue_with_unique_names() {
    for protocol in ALL_PROTOCOLS {
        let vectors = all_vectors_for(protocol);
        assert!(
            !vectors.is_empty(),
            "{} has no registered vectors",
            protocol.as_str()
        );
        let mut names: Vec<&str> = vectors.iter().map(|v| v.name()).collect();
        names.sort_unstable();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(
            names.len(),
            deduped.len(),
            "{} catalogue has duplicate vector names: {:?}",
            protocol.as_str(),
            names
        );
        for v in &vectors {
            assert_eq!(v.protocol(), protocol);
        }
    }
}

#[test]
fn dispatcher_round_robins_across_the_real_catalogue() {
    let mut dispatcher = Dispatcher::new();
    for v in all_vectors_for(Protocol::Smtp) {
        dispatcher.add(Protocol::Smtp, v);
    }
    let count = dispatcher.vector_count(Protocol::Smtp);
    assert!(count >= 2, "expected SMTP to have multiple vectors to rotate");

    let ip: IpAddr = "203.0.113.7".parse().unwrap();
    let mut seen = Vec::new();
    for _ in 0..count {
        let session_id = Uuid::new_v4();
        let vector = dispatcher
            .get_mangle(session_id, ip, Protocol::Smtp)
            .expect("catalogue is non-empty");
        seen.push(vector.name().to_string());
    }
    let mut deduped = seen.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(
        deduped.len(),
        count,
        "expected one full rotation through every vector before any repeats: {seen:?}"
    );

    // one more visit from the same IP should wrap back around to the first vector
    let wrap_session = Uuid::new_v4();
    let wrapped = dispatcher
        .get_mangle(wrap_session, ip, Protocol::Smtp)
        .unwrap();
    assert_eq!(wrapped.name(), seen[0]);
}

#[test]
fn different_client_ips_get_independent_rotation() {
    let mut dispatcher = Dispatcher::new();
    for v in all_vectors_for(Protocol::Pop3) {
        dispatcher.add(Protocol::Pop3, v);
    }
    let ip_a: IpAddr = "198.51.100.1".parse().unwrap();
    let ip_b: IpAddr = "198.51.100.2".parse().unwrap();

    let first_a = dispatcher
        .get_mangle(Uuid::new_v4(), ip_a, Protocol::Pop3)
        .unwrap();
    let first_b = dispatcher
        .get_mangle(Uuid::new_v4(), ip_b, Protocol::Pop3)
        .unwrap();
    // both first-ever visits from their respective IPs land on the same
    // (first-registered) vector, independent of each other's history.
    assert_eq!(first_a.name(), first_b.name());
}

#[test]
fn every_vector_name_is_one_of_the_documented_strategies() {
    // spec.md section 4.3 names the strategy catalogue per protocol; this
    // just guards against a typo'd or accidental duplicate name slipping
    // into a protocol's catalogue under a name that shadows another.
    let known_prefixes = [
        "StripFromCapabilities",
        "ProtocolDowngrade",
        "StripWithInvalidResponseCode",
        "StripWithTemporaryError",
        "StripWithError",
        "StripWithNotRegistered",
        "StripCAPWithNotRegistered",
        "StripWithSilentDrop",
        "StripInboundTLS",
        "UntrustedIntercept",
        "InjectCommand",
    ];
    for protocol in ALL_PROTOCOLS {
        for v in all_vectors_for(protocol) {
            assert!(
                known_prefixes.iter().any(|p| v.name().starts_with(p)),
                "unexpected vector name {:?} for {}",
                v.name(),
                protocol.as_str()
            );
        }
    }
}
