//! Transport variants and how each one is started
//!
//! A scenario runs once per [`TransportMode`]. The local variant drives the
//! debugger directly against the program; the two socket variants first
//! start a remote debuggee and then drive a debugger that attaches to it.

mod launcher;
mod remote;

pub use launcher::Launcher;
pub use remote::{DebuggeeRequest, DebuggeeSpawner, Endpoint, PtyDebuggee, PtySpawner, RemoteDebuggee};

use std::fmt;

/// How the debugger under test reaches the debuggee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    Local,
    UnixDomainSocket,
    TcpIp,
}

impl TransportMode {
    /// Every variant, in sequential run order
    pub const ALL: [TransportMode; 3] = [
        TransportMode::Local,
        TransportMode::UnixDomainSocket,
        TransportMode::TcpIp,
    ];

    /// Label used in failure reports
    pub fn label(self) -> &'static str {
        match self {
            TransportMode::Local => "LOCAL",
            TransportMode::UnixDomainSocket => "UNIX Domain Socket",
            TransportMode::TcpIp => "TCP/IP",
        }
    }

    pub fn is_remote(self) -> bool {
        self != TransportMode::Local
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
