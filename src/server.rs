//! Listening server role.
//!
//! `FemtoTcpServer` composes a [`FemtoTcpSocket`] and listens for incoming
//! connections; it never exchanges data itself. Each accepted client is
//! injected into a [`FemtoTcpConnection`] that behaves exactly like one
//! that connected out by itself.

use std::fmt;
use std::net::SocketAddr;

use delegate::delegate;

use crate::connection::FemtoTcpConnection;
use crate::report::{FemtoReporter, stderr_report};
use crate::severity::Severity;
use crate::socket::{FemtoTcpSocket, SocketError};

/// TCP server socket: binds a local address, listens, accepts sessions.
pub struct FemtoTcpServer {
    socket: FemtoTcpSocket,
}

impl FemtoTcpServer {
    /// New closed IPv4 server.
    pub fn new() -> Self {
        Self {
            socket: FemtoTcpSocket::new(),
        }
    }

    /// Build the server over a caller-prepared handle, for a different
    /// address family or custom hooks.
    pub fn with_socket(socket: FemtoTcpSocket) -> Self {
        Self { socket }
    }

    /// The managed handle, for operations not forwarded here.
    pub fn socket(&self) -> &FemtoTcpSocket {
        &self.socket
    }

    delegate! {
        to self.socket {
            pub fn open(&self) -> bool;
            pub fn open_with(&self, report: &FemtoReporter) -> bool;
            pub fn close(&self) -> bool;
            pub fn close_with(&self, report: &FemtoReporter) -> bool;
            pub fn is_open(&self) -> bool;
            pub fn reuse_port(&self, active: bool) -> bool;
            pub fn reuse_port_with(&self, active: bool, report: &FemtoReporter) -> bool;
            pub fn bind(&self, addr: SocketAddr) -> bool;
            pub fn bind_with(&self, addr: SocketAddr, report: &FemtoReporter) -> bool;
            pub fn local_address(&self) -> Option<SocketAddr>;
            pub fn local_address_with(&self, report: &FemtoReporter) -> Option<SocketAddr>;
        }
    }

    /// Start listening. See [`listen_with`](Self::listen_with).
    pub fn listen(&self, backlog: i32) -> bool {
        self.listen_with(backlog, stderr_report())
    }

    /// Start listening on the bound address with the given backlog.
    pub fn listen_with(&self, backlog: i32, report: &FemtoReporter) -> bool {
        let result = self
            .socket
            .device_snapshot()
            .and_then(|device| device.listen(backlog).map_err(SocketError::from));
        match result {
            Ok(()) => true,
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error starting to listen: {err}"));
                false
            }
        }
    }

    /// Wait for one client. See [`accept_with`](Self::accept_with).
    pub fn accept(&self) -> Option<(FemtoTcpConnection, SocketAddr)> {
        self.accept_with(stderr_report())
    }

    /// Block until a client connects; return the session and peer address.
    pub fn accept_with(&self, report: &FemtoReporter) -> Option<(FemtoTcpConnection, SocketAddr)> {
        let client = FemtoTcpConnection::new();
        let peer = self.accept_into_with(&client, report)?;
        Some((client, peer))
    }

    /// Wait for one client and inject it into `client`. See
    /// [`accept_into_with`](Self::accept_into_with).
    pub fn accept_into(&self, client: &FemtoTcpConnection) -> Option<SocketAddr> {
        self.accept_into_with(client, stderr_report())
    }

    /// Block until a client connects, injecting the accepted device into a
    /// caller-built session (one carrying custom hooks, say). The session
    /// transitions straight to open and connected.
    ///
    /// A concurrent close of the server aborts the wait; that abort is a
    /// shutdown path, not a failure, and is reported at debug severity.
    pub fn accept_into_with(
        &self,
        client: &FemtoTcpConnection,
        report: &FemtoReporter,
    ) -> Option<SocketAddr> {
        let listener = match self.socket.device_snapshot() {
            Ok(listener) => listener,
            Err(err) => {
                report.log_with(Severity::ERROR, || {
                    format!("error accepting connection: {err}")
                });
                return None;
            }
        };
        match listener.accept() {
            Ok((device, peer)) => {
                let Some(peer) = peer.as_socket() else {
                    report.error("accepted peer has no inet address");
                    return None;
                };
                if !client.socket().declare_opened_with(device, report) {
                    return None;
                }
                client.mark_connected();
                Some(peer)
            }
            Err(err) if !self.is_open() => {
                report.log_with(Severity::DEBUG, || {
                    format!("accept interrupted by close: {err}")
                });
                None
            }
            Err(err) => {
                report.log_with(Severity::ERROR, || {
                    format!("error accepting connection: {err}")
                });
                None
            }
        }
    }
}

impl Default for FemtoTcpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FemtoTcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FemtoTcpServer")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
