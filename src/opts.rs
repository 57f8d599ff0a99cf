// SPDX-License-Identifier: Apache-2.0

//! Command-line parsing (spec.md section 6, "CLI"). Built with `clap`'s
//! builder API the same way `g3proxy`'s `opts.rs` is, trimmed to the
//! five flags this proxy actually has -- no daemon mode, no config file,
//! no control socket, since none of those concerns exist here.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{value_parser, Arg, ArgAction, Command};

const ARGS_LISTEN: &str = "listen";
const ARGS_REMOTE: &str = "remote";
const ARGS_KEY: &str = "key";
const ARGS_VECTORS: &str = "vectors";
const ARGS_VERBOSE: &str = "verbose";
const ARGS_VERSION: &str = "version";

/// Parsed `--vectors` selection. `All` is the default and registers the
/// full catalogue for every detected protocol; `Named` restricts
/// registration to exactly the listed `Protocol.VectorName` pairs.
#[derive(Debug, Clone)]
pub enum VectorSelection {
    All,
    Named(Vec<(String, String)>),
}

#[derive(Debug)]
pub struct ProcArgs {
    pub listen: SocketAddr,
    pub remote: SocketAddr,
    pub key_path: PathBuf,
    pub vectors: VectorSelection,
    pub verbose_level: u8,
}

fn build_cli_args() -> Command {
    Command::new(crate::build::PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(ARGS_LISTEN)
                .help("Listen address (default: 0.0.0.0:<remote port>)")
                .num_args(1)
                .value_name("HOST:PORT")
                .long("listen"),
        )
        .arg(
            Arg::new(ARGS_REMOTE)
                .help("Upstream server address")
                .num_args(1)
                .value_name("HOST:PORT")
                .long("remote")
                .required_unless_present(ARGS_VERSION),
        )
        .arg(
            Arg::new(ARGS_KEY)
                .help("PEM file containing the certificate chain and private key")
                .num_args(1)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .default_value("server.pem")
                .long("key"),
        )
        .arg(
            Arg::new(ARGS_VECTORS)
                .help("Comma-separated Protocol.VectorName list, or ALL")
                .num_args(1)
                .value_name("LIST")
                .default_value("ALL")
                .long("vectors"),
        )
        .arg(
            Arg::new(ARGS_VERBOSE)
                .help("Increase log verbosity")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v')
                .long("verbose"),
        )
        .arg(
            Arg::new(ARGS_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long("version"),
        )
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args = build_cli_args().get_matches();

    if args.get_flag(ARGS_VERSION) {
        crate::build::print_version();
        return Ok(None);
    }

    let verbose_level = args.get_one::<u8>(ARGS_VERBOSE).copied().unwrap_or(0);

    let remote_str = args
        .get_one::<String>(ARGS_REMOTE)
        .ok_or_else(|| anyhow!("--remote is required"))?;
    let remote = resolve_one(remote_str).context("invalid --remote address")?;

    let listen = match args.get_one::<String>(ARGS_LISTEN) {
        Some(s) => resolve_one(s).context("invalid --listen address")?,
        None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), remote.port()),
    };

    let key_path = args
        .get_one::<PathBuf>(ARGS_KEY)
        .cloned()
        .unwrap_or_else(|| PathBuf::from("server.pem"));

    let vectors_str = args
        .get_one::<String>(ARGS_VECTORS)
        .map(|s| s.as_str())
        .unwrap_or("ALL");
    let vectors = parse_vectors(vectors_str)?;

    Ok(Some(ProcArgs {
        listen,
        remote,
        key_path,
        vectors,
        verbose_level,
    }))
}

fn resolve_one(s: &str) -> anyhow::Result<SocketAddr> {
    s.to_socket_addrs()
        .context("could not resolve address")?
        .next()
        .ok_or_else(|| anyhow!("address {s} resolved to no candidates"))
}

fn parse_vectors(s: &str) -> anyhow::Result<VectorSelection> {
    if s.eq_ignore_ascii_case("ALL") {
        return Ok(VectorSelection::All);
    }
    let mut named = Vec::new();
    for entry in s.split(',') {
        let entry = entry.trim();
        let (protocol, vector) = entry.split_once('.').ok_or_else(|| {
            anyhow!("invalid --vectors entry {entry:?}, expected Protocol.VectorName")
        })?;
        named.push((protocol.to_string(), vector.to_string()));
    }
    Ok(VectorSelection::Named(named))
}
