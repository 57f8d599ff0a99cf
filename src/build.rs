// SPDX-License-Identifier: Apache-2.0

//! Version reporting. `g3proxy`'s `build.rs` pulls in rustc/target/profile
//! provenance from a companion `g3-build-env` build script; this crate has
//! no packaging story that needs that provenance, so it carries only the
//! two Cargo-provided constants and drops the rest (noted in DESIGN.md).

pub(crate) const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) fn print_version() {
    println!("{PKG_NAME} {VERSION}");
}
