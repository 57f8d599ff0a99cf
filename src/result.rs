// SPDX-License-Identifier: Apache-2.0

//! The audit result ledger. spec.md section 3 specifies a tri-state result
//! rather than a bool: the source never writes `false`, only leaves the
//! field absent, so an explicit `Pending` variant is kept instead of
//! collapsing it into an `Option<bool>` that a reader could misread as
//! "already decided not vulnerable" (spec.md section 9, "Result lifecycle
//! tri-state").

use std::net::IpAddr;

use uuid::Uuid;

use crate::detect::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    Pending,
    Vulnerable,
    NotVulnerable,
}

#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub client_ip: IpAddr,
    pub session_id: Uuid,
    pub protocol: Protocol,
    pub vector_name: String,
    pub state: ResultState,
}

impl ResultRecord {
    pub fn new(
        client_ip: IpAddr,
        session_id: Uuid,
        protocol: Protocol,
        vector_name: String,
    ) -> Self {
        ResultRecord {
            client_ip,
            session_id,
            protocol,
            vector_name,
            state: ResultState::Pending,
        }
    }
}
