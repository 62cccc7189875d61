//! Managed lifecycle for one TCP socket device.
//!
//! `FemtoTcpSocket` owns at most one OS socket at a time and moves it
//! between exactly two states, closed and open. Open/close transitions are
//! serialised by an internal guard and announced through an optional
//! [`SocketHooks`] capability; tuning operations validate the state, issue
//! one OS call through `socket2`, and report failures through a
//! [`FemtoReporter`](crate::FemtoReporter). The handle itself is never
//! copyable; share it through [`SharedTcpSocket`] or
//! [`LocalSharedTcpSocket`] instead.
//!
//! Tuning and transfer calls run on a snapshot of the device taken under
//! the guard, not under the guard itself. Open/close are therefore never
//! blocked behind a slow OS call, and a concurrent close wakes blocked
//! peers via shutdown before the device is released. The visible cost is
//! that an observed "open" state can be stale by the time a racing call
//! reaches the OS; results are then racy but never unsound.

mod error;


pub(crate) use error::SocketError;

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::report::{FemtoReporter, null_report, stderr_report};
use crate::severity::Severity;

/// Address family used when acquiring the OS device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4.
    #[default]
    Ipv4,
    /// IPv6.
    Ipv6,
}

impl From<AddressFamily> for Domain {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }
}

/// Callbacks observing a socket's open/close transitions.
///
/// The lifecycle operations invoke these themselves once the transition is
/// committed; an implementation never needs to chain to anything else.
/// Hooks run outside the internal guard, so they may call back into the
/// socket (to apply tuning, for example) without deadlocking.
pub trait SocketHooks: Send + Sync {
    /// Called once the socket has transitioned to open.
    fn handle_opened(&self, report: &FemtoReporter) {
        let _ = report;
    }

    /// Called once the socket has transitioned to closed.
    fn handle_closed(&self, report: &FemtoReporter) {
        let _ = report;
    }
}

/// Shared ownership of one socket within a single thread.
pub type LocalSharedTcpSocket = Rc<FemtoTcpSocket>;

/// Thread-safe shared ownership of one socket.
pub type SharedTcpSocket = Arc<FemtoTcpSocket>;

/// One TCP socket device and its open/closed lifecycle.
///
/// Every fallible operation comes in two flavours: the bare form reports
/// failures to [`stderr_report`], the `*_with` form takes an explicit
/// reporter. All of them return a plain success indicator; the reason for
/// a failure only exists in what was reported.
pub struct FemtoTcpSocket {
    family: AddressFamily,
    device: Mutex<Option<Arc<Socket>>>,
    open: AtomicBool,
    hooks: Option<Box<dyn SocketHooks>>,
}

impl FemtoTcpSocket {
    /// New closed IPv4 handle.
    pub fn new() -> Self {
        Self::with_family(AddressFamily::Ipv4)
    }

    /// New closed handle for the given address family.
    pub fn with_family(family: AddressFamily) -> Self {
        Self {
            family,
            device: Mutex::new(None),
            open: AtomicBool::new(false),
            hooks: None,
        }
    }

    /// Install lifecycle hooks. Meant to be called before the first open.
    pub fn with_hooks(mut self, hooks: impl SocketHooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    /// Address family this handle acquires devices for.
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Whether the handle currently owns a device. Lock-free.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Acquire the OS device. See [`open_with`](Self::open_with).
    pub fn open(&self) -> bool {
        self.open_with(stderr_report())
    }

    /// Acquire the OS device and transition to open.
    ///
    /// Fails when the handle is already open or when the OS refuses the
    /// acquisition; the reason is reported at error severity. On success
    /// the opened hook fires.
    pub fn open_with(&self, report: &FemtoReporter) -> bool {
        match self.try_open() {
            Ok(()) => {
                self.notify_opened(report);
                true
            }
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error opening socket: {err}"));
                false
            }
        }
    }

    fn try_open(&self) -> Result<(), SocketError> {
        let mut device = self.device.lock();
        if device.is_some() {
            return Err(SocketError::AlreadyOpen);
        }
        let sock = Socket::new(self.family.into(), Type::STREAM, Some(Protocol::TCP))?;
        *device = Some(Arc::new(sock));
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Release the OS device. See [`close_with`](Self::close_with).
    pub fn close(&self) -> bool {
        self.close_with(stderr_report())
    }

    /// Release the OS device and transition to closed.
    ///
    /// Closing a closed handle is a no-op success. The close is
    /// best-effort: an OS-level failure is reported and makes the call
    /// return `false`, but the transition completes and the closed hook
    /// fires regardless.
    pub fn close_with(&self, report: &FemtoReporter) -> bool {
        let device = {
            let mut slot = self.device.lock();
            match slot.take() {
                None => return true,
                Some(device) => {
                    self.open.store(false, Ordering::Release);
                    device
                }
            }
        };
        // Wake anything blocked on this device, then drop our reference;
        // the descriptor is released once the last in-flight user is done.
        let ok = match device.shutdown(Shutdown::Both) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotConnected => true,
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error closing socket: {err}"));
                false
            }
        };
        drop(device);
        self.notify_closed(report);
        ok
    }

    /// Adopt an already-accepted device, transitioning straight to open.
    ///
    /// This is the injection point the server role uses to turn accepted
    /// connections into full handles without re-running the acquisition in
    /// [`open_with`](Self::open_with).
    pub(crate) fn declare_opened_with(&self, device: Socket, report: &FemtoReporter) -> bool {
        {
            let mut slot = self.device.lock();
            if slot.is_some() {
                report.error("socket already open");
                return false;
            }
            *slot = Some(Arc::new(device));
            self.open.store(true, Ordering::Release);
        }
        self.notify_opened(report);
        true
    }

    /// Set the send buffer size in bytes.
    pub fn set_send_buffer_size(&self, size: usize) -> bool {
        self.set_send_buffer_size_with(size, stderr_report())
    }

    pub fn set_send_buffer_size_with(&self, size: usize, report: &FemtoReporter) -> bool {
        self.apply_option("send buffer size", report, |device| {
            device.set_send_buffer_size(size)
        })
    }

    /// Set the receive buffer size in bytes.
    pub fn set_receive_buffer_size(&self, size: usize) -> bool {
        self.set_receive_buffer_size_with(size, stderr_report())
    }

    pub fn set_receive_buffer_size_with(&self, size: usize, report: &FemtoReporter) -> bool {
        self.apply_option("receive buffer size", report, |device| {
            device.set_recv_buffer_size(size)
        })
    }

    /// Allow rebinding a local port that is already bound.
    ///
    /// Must be applied before [`bind`](Self::bind) to have any effect on
    /// it; that ordering is the caller's contract.
    pub fn reuse_port(&self, active: bool) -> bool {
        self.reuse_port_with(active, stderr_report())
    }

    pub fn reuse_port_with(&self, active: bool, report: &FemtoReporter) -> bool {
        self.apply_option("reuse port", report, |device| {
            device.set_reuse_address(active)?;
            // SO_REUSEADDR is not enough to rebind a bound port there.
            #[cfg(any(target_os = "macos", target_os = "ios"))]
            device.set_reuse_port(active)?;
            Ok(())
        })
    }

    /// Set the time-to-live hop count.
    pub fn set_ttl(&self, ttl: u32) -> bool {
        self.set_ttl_with(ttl, stderr_report())
    }

    pub fn set_ttl_with(&self, ttl: u32, report: &FemtoReporter) -> bool {
        self.apply_option("time to live", report, |device| device.set_ttl(ttl))
    }

    /// Disable lingering on close.
    pub fn set_no_linger(&self) -> bool {
        self.set_no_linger_with(stderr_report())
    }

    pub fn set_no_linger_with(&self, report: &FemtoReporter) -> bool {
        self.apply_option("no linger", report, |device| device.set_linger(None))
    }

    /// Linger for `time` after shutting the socket down.
    pub fn set_linger_time(&self, time: Duration) -> bool {
        self.set_linger_time_with(time, stderr_report())
    }

    pub fn set_linger_time_with(&self, time: Duration, report: &FemtoReporter) -> bool {
        self.apply_option("linger time", report, |device| device.set_linger(Some(time)))
    }

    /// Periodically probe the peer while the connection is idle.
    pub fn set_keep_alive(&self, active: bool) -> bool {
        self.set_keep_alive_with(active, stderr_report())
    }

    pub fn set_keep_alive_with(&self, active: bool, report: &FemtoReporter) -> bool {
        self.apply_option("keep alive", report, |device| device.set_keepalive(active))
    }

    /// Send outgoing packets immediately instead of coalescing them.
    pub fn set_no_delay(&self, active: bool) -> bool {
        self.set_no_delay_with(active, stderr_report())
    }

    pub fn set_no_delay_with(&self, active: bool, report: &FemtoReporter) -> bool {
        self.apply_option("no delay", report, |device| device.set_nodelay(active))
    }

    /// Bind to a local address and port.
    ///
    /// The address may name a specific interface or the unspecified
    /// address, and a specific port or port zero for an arbitrary unused
    /// one. Binding a specific port that is already bound fails unless
    /// [`reuse_port`](Self::reuse_port) was applied first.
    pub fn bind(&self, addr: SocketAddr) -> bool {
        self.bind_with(addr, stderr_report())
    }

    pub fn bind_with(&self, addr: SocketAddr, report: &FemtoReporter) -> bool {
        let result = self
            .device_snapshot()
            .and_then(|device| device.bind(&SockAddr::from(addr)).map_err(SocketError::from));
        match result {
            Ok(()) => true,
            Err(err) => {
                report.log_with(Severity::ERROR, || {
                    format!("error binding socket to {addr}: {err}")
                });
                false
            }
        }
    }

    /// Local endpoint assigned by the OS, or `None` (reported) when the
    /// handle is closed or the query fails.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address_with(stderr_report())
    }

    pub fn local_address_with(&self, report: &FemtoReporter) -> Option<SocketAddr> {
        let result = self.device_snapshot().and_then(|device| {
            let addr = device.local_addr().map_err(SocketError::from)?;
            addr.as_socket().ok_or_else(|| {
                SocketError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "local address is not an inet address",
                ))
            })
        });
        match result {
            Ok(addr) => Some(addr),
            Err(err) => {
                report.log_with(Severity::ERROR, || {
                    format!("error getting local socket address: {err}")
                });
                None
            }
        }
    }

    /// Raw device descriptor, for low-level integrations only. `None` when
    /// the handle is closed.
    #[cfg(unix)]
    pub fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        self.device.lock().as_ref().map(|device| device.as_raw_fd())
    }

    /// Raw device handle, for low-level integrations only. `None` when the
    /// handle is closed.
    #[cfg(windows)]
    pub fn raw_socket(&self) -> Option<std::os::windows::io::RawSocket> {
        use std::os::windows::io::AsRawSocket;
        self.device
            .lock()
            .as_ref()
            .map(|device| device.as_raw_socket())
    }

    /// Snapshot of the current device for one OS call outside the guard.
    pub(crate) fn device_snapshot(&self) -> Result<Arc<Socket>, SocketError> {
        self.device.lock().clone().ok_or(SocketError::NotOpen)
    }

    fn apply_option<F>(&self, what: &str, report: &FemtoReporter, f: F) -> bool
    where
        F: FnOnce(&Socket) -> io::Result<()>,
    {
        let result = self
            .device_snapshot()
            .and_then(|device| f(&device).map_err(SocketError::from));
        match result {
            Ok(()) => true,
            Err(err) => {
                report.log_with(Severity::ERROR, || format!("error setting {what}: {err}"));
                false
            }
        }
    }

    fn notify_opened(&self, report: &FemtoReporter) {
        if let Some(hooks) = &self.hooks {
            hooks.handle_opened(report);
        }
    }

    fn notify_closed(&self, report: &FemtoReporter) {
        if let Some(hooks) = &self.hooks {
            hooks.handle_closed(report);
        }
    }
}

impl Default for FemtoTcpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FemtoTcpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FemtoTcpSocket")
            .field("family", &self.family)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for FemtoTcpSocket {
    fn drop(&mut self) {
        // A destructor must not fail; whatever close has to say goes to
        // the discarding reporter.
        self.close_with(null_report());
    }
}
