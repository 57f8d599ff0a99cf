// SPDX-License-Identifier: Apache-2.0

//! Assigns attack vectors to sessions, records outcomes, and rotates
//! vectors round-robin across repeated visits from the same client IP
//! (spec.md section 4.4).
//!
//! Modeled after `g3proxy`'s `audit::registry` module (a mutex-guarded
//! map behind `add`/`get`/`get_or_insert_default` functions) except scoped
//! as a value owned by the `ProxyServer` rather than a process-global
//! `static`: there is exactly one dispatcher per proxy run and no
//! hot-reload requirement here. `IndexMap` (already in `g3proxy`'s own
//! dependency tree) backs the protocol -> vector-list table so registration
//! order is preserved for round-robin without a separate ordering structure.

use std::net::IpAddr;
use std::sync::Mutex;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::detect::Protocol;
use crate::result::{ResultRecord, ResultState};
use crate::vector::ArcVector;

pub struct Dispatcher {
    registry: IndexMap<Protocol, Vec<ArcVector>>,
    results: Mutex<Vec<ResultRecord>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            registry: IndexMap::new(),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Registers `vector` for `protocol`, appended to the end of its
    /// ordered vector list (spec.md section 4.4: "add(protocol_id,
    /// vector) appends vector to that protocol's ordered vector list
    /// (deduplicated)").
    pub fn add(&mut self, protocol: Protocol, vector: ArcVector) {
        let list = self.registry.entry(protocol).or_default();
        if !list.iter().any(|v| v.name() == vector.name()) {
            list.push(vector);
        }
    }

    pub fn vector_count(&self, protocol: Protocol) -> usize {
        self.registry.get(&protocol).map_or(0, |l| l.len())
    }

    /// Selects (or returns the already-assigned) vector for `session_id`.
    /// See spec.md section 4.4 for the exact round-robin rule; this is its
    /// direct translation.
    pub fn get_mangle(
        &self,
        session_id: Uuid,
        client_ip: IpAddr,
        protocol: Protocol,
    ) -> Option<ArcVector> {
        let vectors = self.registry.get(&protocol)?;
        if vectors.is_empty() {
            return None;
        }

        let mut results = self.results.lock().unwrap();
        if let Some(existing) = results.iter().find(|r| r.session_id == session_id) {
            return vectors.iter().find(|v| v.name() == existing.vector_name).cloned();
        }

        let previous = results
            .iter()
            .rev()
            .find(|r| r.client_ip == client_ip && r.protocol == protocol);

        let index = match previous {
            None => 0,
            Some(prev) => {
                let prev_index = vectors
                    .iter()
                    .position(|v| v.name() == prev.vector_name)
                    .unwrap_or(0);
                (prev_index + 1) % vectors.len()
            }
        };

        let vector = vectors[index].clone();
        results.push(ResultRecord::new(
            client_ip,
            session_id,
            protocol,
            vector.name().to_string(),
        ));
        Some(vector)
    }

    /// Flips the result record for `session_id` in place (spec.md section
    /// 4.4: "set_result(session, value) updates the session's result
    /// record in place").
    pub fn set_result(&self, session_id: Uuid, state: ResultState) {
        let mut results = self.results.lock().unwrap();
        if let Some(record) = results.iter_mut().find(|r| r.session_id == session_id) {
            record.state = state;
        }
    }

    pub fn results_snapshot(&self) -> Vec<ResultRecord> {
        self.results.lock().unwrap().clone()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{AttackVector, MangleCtx};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NamedVector(&'static str);

    #[async_trait]
    impl AttackVector for NamedVector {
        fn protocol(&self) -> Protocol {
            Protocol::Smtp
        }
        fn name(&self) -> &'static str {
            self.0
        }
        async fn mangle_client_data(
            &self,
            _ctx: &mut MangleCtx<'_>,
            data: &[u8],
        ) -> crate::error::ProxyResult<Option<Vec<u8>>> {
            Ok(Some(data.to_vec()))
        }
        async fn mangle_server_data(
            &self,
            _ctx: &mut MangleCtx<'_>,
            data: &[u8],
        ) -> crate::error::ProxyResult<Option<Vec<u8>>> {
            Ok(Some(data.to_vec()))
        }
    }

    #[test]
    fn round_robin_over_repeated_visits_from_same_ip() {
        let mut d = Dispatcher::new();
        d.add(Protocol::Smtp, Arc::new(NamedVector("A")));
        d.add(Protocol::Smtp, Arc::new(NamedVector("B")));

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let s3 = Uuid::new_v4();

        let v1 = d.get_mangle(s1, ip, Protocol::Smtp).unwrap();
        let v2 = d.get_mangle(s2, ip, Protocol::Smtp).unwrap();
        let v3 = d.get_mangle(s3, ip, Protocol::Smtp).unwrap();

        assert_eq!(v1.name(), "A");
        assert_eq!(v2.name(), "B");
        assert_eq!(v3.name(), "A");
    }

    #[test]
    fn repeated_lookup_for_same_session_is_stable() {
        let mut d = Dispatcher::new();
        d.add(Protocol::Smtp, Arc::new(NamedVector("A")));
        d.add(Protocol::Smtp, Arc::new(NamedVector("B")));
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let s1 = Uuid::new_v4();

        let first = d.get_mangle(s1, ip, Protocol::Smtp).unwrap();
        let second = d.get_mangle(s1, ip, Protocol::Smtp).unwrap();
        assert_eq!(first.name(), second.name());
    }

    #[test]
    fn at_most_one_result_record_per_session() {
        let mut d = Dispatcher::new();
        d.add(Protocol::Smtp, Arc::new(NamedVector("A")));
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let s1 = Uuid::new_v4();
        d.get_mangle(s1, ip, Protocol::Smtp);
        d.get_mangle(s1, ip, Protocol::Smtp);
        let records: Vec<_> = d
            .results_snapshot()
            .into_iter()
            .filter(|r| r.session_id == s1)
            .collect();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn empty_vector_list_yields_none() {
        let d = Dispatcher::new();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert!(d.get_mangle(Uuid::new_v4(), ip, Protocol::Smtp).is_none());
    }
}
