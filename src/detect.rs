// SPDX-License-Identifier: Apache-2.0

//! Protocol identification, shaped after `g3-dpi`'s `ProtocolInspector`
//! (`check_server_initial_data(&config, port, data)`) but scoped to the
//! eight protocols this proxy audits, and to a simpler two-phase rule: a
//! fixed port table checked first, then keyword sniffing of early traffic
//! (spec.md section 4.2).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Smtp,
    Pop3,
    Imap,
    Ftp,
    Nntp,
    Xmpp,
    Acap,
    Irc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Smtp => "SMTP",
            Protocol::Pop3 => "POP3",
            Protocol::Imap => "IMAP",
            Protocol::Ftp => "FTP",
            Protocol::Nntp => "NNTP",
            Protocol::Xmpp => "XMPP",
            Protocol::Acap => "ACAP",
            Protocol::Irc => "IRC",
        }
    }

    pub fn from_name(s: &str) -> Option<Protocol> {
        match s.to_ascii_uppercase().as_str() {
            "SMTP" => Some(Protocol::Smtp),
            "POP3" => Some(Protocol::Pop3),
            "IMAP" => Some(Protocol::Imap),
            "FTP" => Some(Protocol::Ftp),
            "NNTP" => Some(Protocol::Nntp),
            "XMPP" => Some(Protocol::Xmpp),
            "ACAP" => Some(Protocol::Acap),
            "IRC" => Some(Protocol::Irc),
            _ => None,
        }
    }

    fn from_port(port: u16) -> Option<Protocol> {
        match port {
            25 => Some(Protocol::Smtp),
            110 => Some(Protocol::Pop3),
            143 => Some(Protocol::Imap),
            21 => Some(Protocol::Ftp),
            119 => Some(Protocol::Nntp),
            5222 => Some(Protocol::Xmpp),
            675 => Some(Protocol::Acap),
            6667 => Some(Protocol::Irc),
            _ => None,
        }
    }
}

/// Detection state for one `Session`. Per spec.md section 4.2: once a
/// protocol is fixed (by port or by keyword match), it is never revisited.
///
/// Open question (spec.md section 9, "ProtocolDetector short-circuit"):
/// when port-based detection succeeds, keyword scanning of subsequent
/// chunks never runs. We preserve that as-is rather than guessing that
/// later traffic should still be sniffed.
pub struct ProtocolDetector {
    protocol: Option<Protocol>,
    port_fixed: bool,
}

impl ProtocolDetector {
    pub fn new_for_port(port: u16) -> Self {
        match Protocol::from_port(port) {
            Some(p) => ProtocolDetector {
                protocol: Some(p),
                port_fixed: true,
            },
            None => ProtocolDetector {
                protocol: None,
                port_fixed: false,
            },
        }
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn is_fixed_by_port(&self) -> bool {
        self.port_fixed
    }

    /// Scans one chunk of early traffic for protocol keywords. A no-op
    /// once the protocol is already known (monotonic detection).
    pub fn observe(&mut self, chunk: &[u8]) {
        if self.protocol.is_some() {
            return;
        }
        let lower = String::from_utf8_lossy(chunk).to_ascii_lowercase();
        let protocol = if contains_any(
            &lower,
            &["ehlo", "helo", "starttls", "rcpt to:", "mail from:"],
        ) {
            Some(Protocol::Smtp)
        } else if lower.contains("xmpp") {
            Some(Protocol::Xmpp)
        } else if lower.contains(". capability") {
            Some(Protocol::Imap)
        } else if lower.contains("auth tls") {
            Some(Protocol::Ftp)
        } else {
            None
        };
        if protocol.is_some() {
            self.protocol = protocol;
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
