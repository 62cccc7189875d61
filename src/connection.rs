//! Connected TCP session role.
//!
//! `FemtoTcpConnection` composes a [`FemtoTcpSocket`] with a connected
//! flag. A session either connects out to a server or is produced by a
//! [`FemtoTcpServer`](crate::FemtoTcpServer) accepting a client; either
//! way it is the only role that exchanges data.

use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use delegate::delegate;
use socket2::{SockAddr, Socket};

use crate::report::{FemtoReporter, stderr_report};
use crate::severity::Severity;
use crate::socket::{AddressFamily, FemtoTcpSocket, SocketError, SocketHooks};

/// Clears the session's connected flag whenever the handle closes, so the
/// bookkeeping also happens when the close comes from `Drop` or from a
/// shared owner of the handle.
struct ConnectedFlagHooks {
    connected: Arc<AtomicBool>,
}

impl SocketHooks for ConnectedFlagHooks {
    fn handle_closed(&self, _report: &FemtoReporter) {
        self.connected.store(false, Ordering::Release);
    }
}

/// TCP session between two peers, exchanging data over a managed handle.
pub struct FemtoTcpConnection {
    socket: FemtoTcpSocket,
    connected: Arc<AtomicBool>,
}

impl FemtoTcpConnection {
    /// New closed IPv4 session.
    pub fn new() -> Self {
        Self::with_family(AddressFamily::Ipv4)
    }

    /// New closed session for the given address family.
    pub fn with_family(family: AddressFamily) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let socket = FemtoTcpSocket::with_family(family).with_hooks(ConnectedFlagHooks {
            connected: Arc::clone(&connected),
        });
        Self { socket, connected }
    }

    /// The managed handle, for operations not forwarded here.
    pub fn socket(&self) -> &FemtoTcpSocket {
        &self.socket
    }

    /// Whether a peer is established and the handle is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.socket.is_open()
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    delegate! {
        to self.socket {
            pub fn open(&self) -> bool;
            pub fn open_with(&self, report: &FemtoReporter) -> bool;
            pub fn close(&self) -> bool;
            pub fn close_with(&self, report: &FemtoReporter) -> bool;
            pub fn is_open(&self) -> bool;
            pub fn set_keep_alive(&self, active: bool) -> bool;
            pub fn set_keep_alive_with(&self, active: bool, report: &FemtoReporter) -> bool;
            pub fn set_no_delay(&self, active: bool) -> bool;
            pub fn set_no_delay_with(&self, active: bool, report: &FemtoReporter) -> bool;
        }
    }

    /// Connect to a server. See [`connect_with`](Self::connect_with).
    pub fn connect(&self, addr: SocketAddr) -> bool {
        self.connect_with(addr, stderr_report())
    }

    /// Connect the open session to a server at `addr`.
    ///
    /// Requires an open, not yet connected session; blocks until the OS
    /// resolves the attempt.
    pub fn connect_with(&self, addr: SocketAddr, report: &FemtoReporter) -> bool {
        if self.is_connected() {
            report.error("socket already connected");
            return false;
        }
        let result = self
            .socket
            .device_snapshot()
            .and_then(|device| device.connect(&SockAddr::from(addr)).map_err(SocketError::from));
        match result {
            Ok(()) => {
                self.mark_connected();
                true
            }
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error connecting to {addr}: {err}"));
                false
            }
        }
    }

    /// Send the whole buffer. See [`send_with`](Self::send_with).
    pub fn send(&self, data: &[u8]) -> bool {
        self.send_with(data, stderr_report())
    }

    /// Send the whole buffer, looping over partial writes.
    pub fn send_with(&self, data: &[u8], report: &FemtoReporter) -> bool {
        let result = self.socket.device_snapshot().and_then(|device| {
            let mut stream: &Socket = &device;
            stream.write_all(data).map_err(SocketError::from)
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error sending data: {err}"));
                false
            }
        }
    }

    /// Receive into the buffer. See [`receive_with`](Self::receive_with).
    pub fn receive(&self, buffer: &mut [u8]) -> Option<usize> {
        self.receive_with(buffer, stderr_report())
    }

    /// One blocking read into `buffer`.
    ///
    /// `Some(0)` means the peer closed its write side; `None` (reported)
    /// means the read failed or the session is not open.
    pub fn receive_with(&self, buffer: &mut [u8], report: &FemtoReporter) -> Option<usize> {
        let result = self.socket.device_snapshot().and_then(|device| {
            let mut stream: &Socket = &device;
            stream.read(buffer).map_err(SocketError::from)
        });
        match result {
            Ok(size) => Some(size),
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error receiving data: {err}"));
                None
            }
        }
    }

    /// Remote endpoint of the session, or `None` (reported) when there is
    /// none to ask about.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.peer_address_with(stderr_report())
    }

    pub fn peer_address_with(&self, report: &FemtoReporter) -> Option<SocketAddr> {
        let result = self.socket.device_snapshot().and_then(|device| {
            let addr = device.peer_addr().map_err(SocketError::from)?;
            addr.as_socket().ok_or_else(|| {
                SocketError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "peer address is not an inet address",
                ))
            })
        });
        match result {
            Ok(addr) => Some(addr),
            Err(err) => {
                report.log_with(Severity::ERROR, || {
                    format!("error getting peer socket address: {err}")
                });
                None
            }
        }
    }

    /// Half-close: shut down the send direction, keep receiving.
    pub fn close_writer(&self) -> bool {
        self.close_writer_with(stderr_report())
    }

    pub fn close_writer_with(&self, report: &FemtoReporter) -> bool {
        self.shutdown_direction(Shutdown::Write, "closing write direction", report)
    }

    /// Shut down both directions, leaving the handle itself open.
    pub fn disconnect(&self) -> bool {
        self.disconnect_with(stderr_report())
    }

    pub fn disconnect_with(&self, report: &FemtoReporter) -> bool {
        let ok = self.shutdown_direction(Shutdown::Both, "disconnecting", report);
        self.connected.store(false, Ordering::Release);
        ok
    }

    fn shutdown_direction(&self, how: Shutdown, what: &str, report: &FemtoReporter) -> bool {
        let result = self
            .socket
            .device_snapshot()
            .and_then(|device| device.shutdown(how).map_err(SocketError::from));
        match result {
            Ok(()) => true,
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error {what}: {err}"));
                false
            }
        }
    }
}

impl Default for FemtoTcpConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FemtoTcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FemtoTcpConnection")
            .field("open", &self.is_open())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    use rstest::rstest;

    use crate::test_utils::CollectingSink;

    fn quiet_report() -> (FemtoReporter, CollectingSink) {
        let sink = CollectingSink::new();
        (FemtoReporter::new(sink.clone(), Severity::INFO), sink)
    }

    fn loopback_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind listener");
        let addr = listener.local_addr().expect("listener address");
        (listener, addr)
    }

    #[rstest]
    fn connect_requires_an_open_handle() {
        let (report, sink) = quiet_report();
        let connection = FemtoTcpConnection::new();
        let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1);
        assert!(!connection.connect_with(addr, &report));
        assert!(!connection.is_connected());
        let lines = sink.collected();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].1.contains("not open"));
    }

    #[rstest]
    fn transfer_requires_an_open_handle() {
        let (report, sink) = quiet_report();
        let connection = FemtoTcpConnection::new();
        assert!(!connection.send_with(b"x", &report));
        assert!(connection.receive_with(&mut [0u8; 4], &report).is_none());
        assert!(connection.peer_address_with(&report).is_none());
        assert_eq!(sink.collected().len(), 3);
    }

    #[rstest]
    fn session_round_trip_with_a_std_peer() {
        let (listener, addr) = loopback_listener();
        let echo = thread::spawn(move || {
            let (mut peer, _) = listener.accept().expect("accept client");
            let mut buf = [0u8; 5];
            peer.read_exact(&mut buf).expect("read request");
            peer.write_all(&buf).expect("write echo");
        });

        let (report, sink) = quiet_report();
        let connection = FemtoTcpConnection::new();
        assert!(connection.open_with(&report));
        assert!(!connection.is_connected());
        assert!(connection.connect_with(addr, &report));
        assert!(connection.is_connected());
        assert_eq!(connection.peer_address_with(&report), Some(addr));

        assert!(connection.send_with(b"hello", &report));
        let mut buf = [0u8; 5];
        let mut received = 0;
        while received < buf.len() {
            let size = connection
                .receive_with(&mut buf[received..], &report)
                .expect("receive echo");
            assert!(size > 0, "peer closed before echoing everything");
            received += size;
        }
        assert_eq!(&buf, b"hello");

        echo.join().expect("echo thread");
        assert!(sink.collected().is_empty());
        assert!(connection.close_with(&report));
        assert!(
            !connection.is_connected(),
            "close must clear the connected flag through the hook"
        );
    }

    #[rstest]
    fn double_connect_is_rejected() {
        let (listener, addr) = loopback_listener();
        let (report, sink) = quiet_report();
        let connection = FemtoTcpConnection::new();
        assert!(connection.open_with(&report));
        assert!(connection.connect_with(addr, &report));
        assert!(!connection.connect_with(addr, &report));
        let lines = sink.collected();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].1.contains("already connected"));
        drop(listener);
    }

    #[rstest]
    fn receive_reports_peer_close_as_zero() {
        let (listener, addr) = loopback_listener();
        let closer = thread::spawn(move || {
            let (peer, _) = listener.accept().expect("accept client");
            drop(peer);
        });

        let (report, _sink) = quiet_report();
        let connection = FemtoTcpConnection::new();
        assert!(connection.open_with(&report));
        assert!(connection.connect_with(addr, &report));
        closer.join().expect("closer thread");

        let mut buf = [0u8; 8];
        assert_eq!(connection.receive_with(&mut buf, &report), Some(0));
    }

    #[rstest]
    fn close_writer_half_closes_the_session() {
        let (listener, addr) = loopback_listener();
        let peer = thread::spawn(move || {
            let (mut peer, _) = listener.accept().expect("accept client");
            let mut request = Vec::new();
            peer.read_to_end(&mut request).expect("read until half-close");
            peer.write_all(b"ok").expect("write reply");
            request
        });

        let (report, sink) = quiet_report();
        let connection = FemtoTcpConnection::new();
        assert!(connection.open_with(&report));
        assert!(connection.connect_with(addr, &report));
        assert!(connection.send_with(b"bye", &report));
        assert!(connection.close_writer_with(&report));

        let mut reply = [0u8; 2];
        let mut received = 0;
        while received < reply.len() {
            let size = connection
                .receive_with(&mut reply[received..], &report)
                .expect("receive reply");
            assert!(size > 0, "peer closed before replying");
            received += size;
        }
        assert_eq!(&reply, b"ok");
        assert_eq!(peer.join().expect("peer thread"), b"bye");
        assert!(sink.collected().is_empty());
    }

    #[rstest]
    fn disconnect_leaves_the_handle_open() {
        let (listener, addr) = loopback_listener();
        let (report, _sink) = quiet_report();
        let connection = FemtoTcpConnection::new();
        assert!(connection.open_with(&report));
        assert!(connection.connect_with(addr, &report));
        assert!(connection.disconnect_with(&report));
        assert!(!connection.is_connected());
        assert!(connection.is_open());
        assert!(connection.close_with(&report));
        drop(listener);
    }
}
