//! Synchronous TCP socket lifecycle toolkit with severity-filtered
//! diagnostics.
//!
//! The crate is built from three layers:
//!
//! - [`Severity`] and [`FemtoReporter`]: an ordered severity scale and a
//!   threshold-filtered reporter over a swappable [`LogSink`]. Every
//!   fallible operation in the crate pushes its failure detail through a
//!   reporter instead of returning an error value.
//! - [`FemtoTcpSocket`]: the managed lifecycle of one TCP socket device,
//!   with open/close transitions guarded against each other, a catalogue
//!   of transport tuning operations, and [`SocketHooks`] observing the
//!   transitions.
//! - [`FemtoTcpServer`] and [`FemtoTcpConnection`]: the listening and
//!   data-exchange roles composed over the managed handle.
//!
//! Operations default to reporting through [`stderr_report`]; pass an
//! explicit [`FemtoReporter`] to the `*_with` forms to capture or silence
//! diagnostics. Everything blocks the calling thread; there are no worker
//! threads and no async surface.

mod connection;
mod report;
mod server;
mod severity;
mod socket;

#[cfg(test)]
mod test_utils;

pub use connection::FemtoTcpConnection;
pub use report::{FemtoReporter, LogSink, NullSink, StderrSink, null_report, stderr_report};
pub use server::FemtoTcpServer;
pub use severity::Severity;
pub use socket::{
    AddressFamily, FemtoTcpSocket, LocalSharedTcpSocket, SharedTcpSocket, SocketHooks,
};
