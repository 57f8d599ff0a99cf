// SPDX-License-Identifier: Apache-2.0

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("connect to upstream failed: {0}")]
    Connect(io::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    #[error("session terminated")]
    SessionTerminated,
}

impl ProxyError {
    pub fn brief(&self) -> &'static str {
        match self {
            ProxyError::Connect(_) => "Connect",
            ProxyError::Io(_) => "Io",
            ProxyError::Tls(_) => "Tls",
            ProxyError::ProtocolViolation(_) => "ProtocolViolation",
            ProxyError::SessionTerminated => "SessionTerminated",
        }
    }

    pub fn is_tls_eof(&self) -> bool {
        match self {
            ProxyError::Tls(msg) => msg.contains("eof") || msg.contains("EOF"),
            ProxyError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
