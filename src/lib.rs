// SPDX-License-Identifier: Apache-2.0

//! Library half of the audit proxy: everything but argument parsing and
//! the process entry point lives here, mirroring `g3proxy`'s own
//! lib.rs/main.rs split (`g3proxy` the library, a thin `main.rs` binary).
//! Keeping the logic in a library crate is also what lets `tests/` exercise
//! the vector catalogue and the dispatcher directly.

pub mod build;
pub mod byteconn;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod opts;
pub mod result;
pub mod server;
pub mod session;
pub mod tls;
pub mod vector;
