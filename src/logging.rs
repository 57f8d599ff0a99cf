// SPDX-License-Identifier: Apache-2.0

//! Dual logging: a process-lifecycle `log` facade (`env_logger`-backed,
//! controlled by `--verbose`) and a structured `slog` logger for
//! per-session audit events, built the same way `g3proxy::log::intercept`
//! is: `slog_term` plus `slog_async` so a slow terminal never blocks a
//! session task.

use slog::{o, slog_info, Drain, Logger};

/// Sets up the `log` facade used for process lifecycle messages (accept,
/// bind, shutdown). `--verbose` escalates `Info` -> `Debug` -> `Trace`,
/// matching the `DaemonArgs::verbose_level` convention.
pub fn init_process_logger(verbose_level: u8) {
    let level = match verbose_level {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

/// Builds the structured per-session audit logger. One instance is built
/// at startup and shared (cheaply cloned) across every session task.
pub fn build_vector_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// Emits one structured audit event for a session's vector activity.
/// Shaped after `intercept_log!` (`inspect/smtp/mod.rs`): a message plus a
/// fixed set of key-value fields identifying the session.
macro_rules! vector_log {
    ($logger:expr, $session_id:expr, $client_ip:expr, $protocol:expr, $vector:expr, $($args:tt)+) => {
        slog_info!($logger, $($args)+;
            "session_id" => $session_id.to_string(),
            "client_ip" => $client_ip.to_string(),
            "protocol" => $protocol,
            "vector" => $vector,
        )
    };
}

pub(crate) use vector_log;
