//! A single outbound TCP connection (§4.7).

use crate::net::port::PortPool;
use crate::net::Endpoint;
use crate::registers::{sn_mr_protocol, sn_sr, SocketCommand};
use crate::socket::SocketId;
use crate::spi::SpiBus;
use crate::stack::{BindError, Error, NetworkStack};

use super::{connected, ConnectError, TcpError};

/// The lifecycle state of a [`TcpClient`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpClientState {
    /// A hardware socket is allocated but not yet bound to a port.
    Initialized,
    /// Bound to a local port, not yet connecting.
    Bound,
    /// `connect` has been issued; the three-way handshake may still be in
    /// progress.
    Connecting,
    /// The handshake completed; `SN_SR` observed `ESTABLISHED`.
    Connected,
}

/// A TCP socket that initiates an outbound connection.
pub struct TcpClient<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    stack: &'a NetworkStack<B, TcpPool, UdpPool>,
    socket_id: SocketId,
    state: TcpClientState,
    transmit_outstanding: bool,
}

impl<'a, B, TcpPool, UdpPool> TcpClient<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    /// Allocates a hardware socket for a new, unbound TCP client.
    pub fn new(stack: &'a NetworkStack<B, TcpPool, UdpPool>) -> Result<Self, Error<B::Error>> {
        let socket_id = stack.allocate_socket()?;
        Ok(Self {
            stack,
            socket_id,
            state: TcpClientState::Initialized,
            transmit_outstanding: false,
        })
    }

    /// The socket's current state.
    pub const fn state(&self) -> TcpClientState {
        self.state
    }

    /// Binds the socket to `desired_port`, opens it in TCP mode, and waits
    /// for `SN_SR` to report `INIT`.
    pub fn bind(&mut self, desired_port: u16) -> Result<(), BindError<B::Error, TcpPool::Error>> {
        let port = self.stack.allocate_tcp_port(desired_port).map_err(BindError::Port)?;

        self.stack.with_registers(|registers| {
            registers.write_sn_port(self.socket_id, port)?;
            registers.set_sn_mr_protocol(self.socket_id, sn_mr_protocol::TCP)?;
            registers.issue_sn_cr(self.socket_id, SocketCommand::Open)?;
            while registers.read_sn_sr(self.socket_id)? != sn_sr::INIT {}
            Ok::<(), B::Error>(())
        })?;

        self.state = TcpClientState::Bound;
        Ok(())
    }

    /// Drives the outbound three-way handshake. Call repeatedly from
    /// [`TcpClientState::Bound`] (issues `CONNECT`, transitions to
    /// `Connecting`, returns [`ConnectError::WouldBlock`]) and then from
    /// [`TcpClientState::Connecting`] until it returns `Ok`, observes a
    /// refusal ([`ConnectError::OperationTimeout`], caller may retry), or
    /// an error.
    pub fn connect(&mut self, destination: Endpoint) -> Result<(), ConnectError<B::Error>> {
        match self.state {
            TcpClientState::Bound => {
                self.stack.with_registers(|registers| {
                    registers.write_sn_dipr(self.socket_id, destination.address().as_byte_array())?;
                    registers.write_sn_dport(self.socket_id, destination.port())?;
                    registers.issue_sn_cr(self.socket_id, SocketCommand::Connect)
                })?;
                self.state = TcpClientState::Connecting;
                Err(ConnectError::WouldBlock)
            }
            TcpClientState::Connecting => {
                let sr = self.stack.with_registers(|registers| registers.read_sn_sr(self.socket_id))?;
                match sr {
                    sn_sr::INIT | sn_sr::SYN_SENT => Err(ConnectError::WouldBlock),
                    sn_sr::ESTABLISHED | sn_sr::CLOSE_WAIT => {
                        self.state = TcpClientState::Connected;
                        Ok(())
                    }
                    sn_sr::CLOSED => Err(ConnectError::OperationTimeout),
                    _ => Err(ConnectError::WouldBlock),
                }
            }
            TcpClientState::Initialized | TcpClientState::Connected => Err(ConnectError::WouldBlock),
        }
    }

    /// `true` only when `SN_SR` is strictly `ESTABLISHED`; `CLOSE_WAIT` is
    /// accepted as a successful `connect` terminator but is not considered
    /// "connected" here, since the remote has already begun tearing the
    /// connection down.
    pub fn is_connected(&self) -> Result<bool, Error<B::Error>> {
        let sr = self.stack.with_registers(|registers| registers.read_sn_sr(self.socket_id))?;
        Ok(sr == sn_sr::ESTABLISHED)
    }

    /// Sends `data`, clamped to the socket's free TX space. Returns the
    /// number of bytes actually submitted.
    pub fn transmit(&mut self, data: &[u8]) -> Result<usize, TcpError<B::Error>> {
        let socket_id = self.socket_id;
        let outstanding = &mut self.transmit_outstanding;
        self.stack
            .with_registers(move |registers| connected::transmit(registers, socket_id, data, outstanding))
    }

    /// Probes the connection with `SEND_KEEP` without sending new data.
    pub fn transmit_keepalive(&mut self) -> Result<(), TcpError<B::Error>> {
        let socket_id = self.socket_id;
        self.stack.with_registers(move |registers| connected::transmit_keepalive(registers, socket_id))
    }

    /// Reads into `buffer`. Returns the number of bytes actually read.
    pub fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TcpError<B::Error>> {
        let socket_id = self.socket_id;
        self.stack.with_registers(move |registers| connected::receive(registers, socket_id, buffer))
    }

    /// Issues `DISCON` unless the connection is already `CLOSED`.
    pub fn shutdown(&mut self) -> Result<(), Error<B::Error>> {
        self.stack.with_registers(|registers| connected::shutdown(registers, self.socket_id))?;
        Ok(())
    }

    /// `SN_RX_RSR`: bytes waiting to be read.
    pub fn available(&self) -> Result<u16, Error<B::Error>> {
        self.stack
            .with_registers(|registers| connected::available(registers, self.socket_id))
            .map_err(Error::from)
    }

    /// Bytes submitted to the chip but not yet confirmed sent.
    pub fn outstanding(&self) -> Result<u16, Error<B::Error>> {
        self.stack
            .with_registers(|registers| connected::outstanding_bytes(registers, self.socket_id))
            .map_err(Error::from)
    }
}

impl<'a, B, TcpPool, UdpPool> Drop for TcpClient<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    fn drop(&mut self) {
        let _ = self.stack.release_tcp_sockets(&[self.socket_id]);
    }
}
