//! Internal error taxonomy for socket operations.

use std::io;

use thiserror::Error;

/// Why a socket operation failed, before the public boundary folds it into
/// a boolean plus a reporter message.
#[derive(Debug, Error)]
pub(crate) enum SocketError {
    /// The handle already owns a device.
    #[error("socket already open")]
    AlreadyOpen,
    /// The operation needs an open device.
    #[error("socket is not open")]
    NotOpen,
    /// The OS call itself failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
