//! A single accepted connection handed out by [`super::server::TcpServer`]
//! (§4.9).

use crate::net::port::PortPool;
use crate::socket::SocketId;
use crate::spi::SpiBus;
use crate::stack::{Error, NetworkStack};

use super::{connected, TcpError};

/// One TCP connection accepted by a [`super::server::TcpServer`]. Always
/// `Connected`; it never passes through `Bound`/`Connecting` itself.
///
/// May outlive the server that produced it — see §4.8's port-accounting
/// discipline, carried out identically whether the handler is dropped
/// before or after its parent.
pub struct TcpServerConnectionHandler<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    stack: &'a NetworkStack<B, TcpPool, UdpPool>,
    socket_id: SocketId,
    transmit_outstanding: bool,
}

impl<'a, B, TcpPool, UdpPool> TcpServerConnectionHandler<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    pub(super) fn new(stack: &'a NetworkStack<B, TcpPool, UdpPool>, socket_id: SocketId) -> Self {
        Self {
            stack,
            socket_id,
            transmit_outstanding: false,
        }
    }

    /// The underlying hardware socket, for diagnostics.
    pub const fn socket_id(&self) -> SocketId {
        self.socket_id
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

    /// Issues `DISCON` unless the connection is already `CLOSED`. Does not
    /// change this handler's own bookkeeping; callers keep observing
    /// `available`/`receive` until the chip reports the connection gone.
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

impl<'a, B, TcpPool, UdpPool> Drop for TcpServerConnectionHandler<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    fn drop(&mut self) {
        let _ = self.stack.release_tcp_sockets(&[self.socket_id]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::sn_sr;
    use crate::test_support::{chip, initialized_stack, BUFFER_SIZE};

    #[test]
    fn transmit_and_receive_delegate_to_the_shared_established_protocol() {
        let (bus, handle) = chip();
        let stack = initialized_stack(bus);
        let socket_id = stack.allocate_socket().unwrap();
        handle.set_sn_sr(socket_id.index(), sn_sr::ESTABLISHED);
        handle.set_tx_state(socket_id.index(), BUFFER_SIZE as u16, 0);

        let mut connection = TcpServerConnectionHandler::new(&stack, socket_id);
        assert_eq!(connection.socket_id(), socket_id);

        let written = connection.transmit(&[1, 2, 3]).unwrap();
        assert_eq!(written, 3);

        handle.set_rx_state(socket_id.index(), 2, 0, &[9, 8]);
        let mut buffer = [0u8; 2];
        let read = connection.receive(&mut buffer).unwrap();
        assert_eq!(read, 2);
        assert_eq!(buffer, [9, 8]);
    }

    #[test]
    fn dropping_a_handler_frees_its_hardware_socket() {
        let (bus, _handle) = chip();
        let stack = initialized_stack(bus);

        // Exhaust every socket but one.
        for _ in 0..7 {
            stack.allocate_socket().unwrap();
        }
        let socket_id = stack.allocate_socket().unwrap();
        assert_eq!(stack.allocate_socket(), Err(crate::stack::Error::SocketsExhausted));

        {
            let _connection = TcpServerConnectionHandler::new(&stack, socket_id);
        }

        // The handler's drop released the socket back to the allocator.
        stack.allocate_socket().unwrap();
    }
}
