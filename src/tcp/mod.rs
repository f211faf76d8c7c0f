//! Connection-oriented TCP sockets: a single-connection
//! [`client::TcpClient`], and a listening [`server::TcpServer`] that hands
//! off established connections to [`handler::TcpServerConnectionHandler`]
//! (§4.7-§4.10).
//!
//! `TcpClient` (once connected) and `TcpServerConnectionHandler` read and
//! write an established socket identically; [`connected`] holds that shared
//! protocol so neither type reimplements it.

mod connected;
pub mod client;
pub mod handler;
pub mod server;

pub use client::TcpClient;
pub use handler::TcpServerConnectionHandler;
pub use server::TcpServer;

/// An error produced by an established TCP socket's transmit/receive/
/// keepalive operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpError<E> {
    /// The SPI bus reported an error.
    Bus(E),
    /// The connection has already been lost.
    NotConnected,
    /// The operation is not yet satisfiable; retry later.
    WouldBlock,
}

impl<E> From<E> for TcpError<E> {
    fn from(error: E) -> Self {
        TcpError::Bus(error)
    }
}

/// An error produced by [`client::TcpClient::connect`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectError<E> {
    /// The SPI bus reported an error.
    Bus(E),
    /// The three-way handshake has not finished yet; call `connect` again.
    WouldBlock,
    /// The chip observed `SN_SR` return to `CLOSED` mid-handshake. The
    /// socket remains in the `Connecting` state so the caller may retry.
    OperationTimeout,
}

impl<E> From<E> for ConnectError<E> {
    fn from(error: E) -> Self {
        ConnectError::Bus(error)
    }
}
