//! Connectionless UDP sockets (§4.6).

use byteorder::{BigEndian, ByteOrder};

use crate::buffer::BufferRing;
use crate::net::port::PortPool;
use crate::net::{Endpoint, Ipv4Addr};
use crate::registers::{sn_ir, sn_mr_protocol, sn_sr, SocketCommand};
use crate::socket::SocketId;
use crate::spi::SpiBus;
use crate::stack::{BindError, Error, NetworkStack};

/// `SN_IR` bits cleared together after observing either `SEND_OK` or
/// `TIMEOUT` (§4.6 step 2). The literal value the chip's documented
/// protocol calls for; it does not spell out to `SEND_OK | TIMEOUT | RECV`.
const CLEAR_AFTER_TRANSMIT_OUTCOME: u8 = 0x18;

/// The lifecycle state of a [`UdpSocket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdpState {
    /// Constructed, no hardware socket allocated yet — unreachable from
    /// outside this module; [`UdpSocket::new`] always allocates one.
    Uninitialized,
    /// A hardware socket is allocated but not yet bound to a port.
    Initialized,
    /// Bound to a local port and ready to transmit/receive.
    Bound,
}

/// An error produced by [`UdpSocket::transmit`] or [`UdpSocket::receive`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UdpError<E> {
    /// The SPI bus reported an error.
    Bus(E),
    /// The payload is larger than the socket's TX buffer.
    ExcessiveMessageSize,
    /// The operation is not yet satisfiable; retry later.
    WouldBlock,
}

impl<E> From<E> for UdpError<E> {
    fn from(error: E) -> Self {
        UdpError::Bus(error)
    }
}

/// A connectionless datagram socket over one of the chip's eight hardware
/// sockets.
pub struct UdpSocket<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    stack: &'a NetworkStack<B, TcpPool, UdpPool>,
    socket_id: SocketId,
    state: UdpState,
    port: u16,
    transmit_outstanding: bool,
}

impl<'a, B, TcpPool, UdpPool> UdpSocket<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    /// Allocates a hardware socket for a new, unbound UDP socket.
    pub fn new(stack: &'a NetworkStack<B, TcpPool, UdpPool>) -> Result<Self, Error<B::Error>> {
        let socket_id = stack.allocate_socket()?;
        Ok(Self {
            stack,
            socket_id,
            state: UdpState::Initialized,
            port: 0,
            transmit_outstanding: false,
        })
    }

    /// The socket's current state.
    pub const fn state(&self) -> UdpState {
        self.state
    }

    /// Binds the socket to `desired_port` (the pool's "any port" sentinel
    /// if the caller does not care which one), opens it, and waits for the
    /// chip to report the UDP protocol status.
    pub fn bind(&mut self, desired_port: u16) -> Result<(), BindError<B::Error, UdpPool::Error>> {
        let port = self.stack.allocate_udp_port(desired_port).map_err(BindError::Port)?;

        self.stack.with_registers(|registers| {
            registers.write_sn_port(self.socket_id, port)?;
            registers.set_sn_mr_protocol(self.socket_id, sn_mr_protocol::UDP)?;
            registers.issue_sn_cr(self.socket_id, SocketCommand::Open)?;
            while registers.read_sn_sr(self.socket_id)? != sn_sr::UDP {}
            Ok::<(), B::Error>(())
        })?;

        self.port = port;
        self.state = UdpState::Bound;
        Ok(())
    }

    /// Sends `data` to `destination`. Fails with
    /// [`UdpError::ExcessiveMessageSize`] if `data` exceeds the socket's TX
    /// buffer, or [`UdpError::WouldBlock`] if a previous send has not yet
    /// completed or there is not yet enough free TX space.
    pub fn transmit(&mut self, destination: Endpoint, data: &[u8]) -> Result<(), UdpError<B::Error>> {
        let buffer_size = self.stack.with_registers(|r| r.read_sn_txbuf_size(self.socket_id))? as u16 * 1024;
        if data.len() as u16 > buffer_size {
            return Err(UdpError::ExcessiveMessageSize);
        }

        if self.transmit_outstanding {
            let ir = self.stack.with_registers(|r| r.read_sn_ir(self.socket_id))?;
            if ir & (sn_ir::SEND_OK | sn_ir::TIMEOUT) == 0 {
                return Err(UdpError::WouldBlock);
            }
            self.stack
                .with_registers(|r| r.clear_sn_ir(self.socket_id, CLEAR_AFTER_TRANSMIT_OUTCOME))?;
            self.transmit_outstanding = false;
        }

        let free = self.stack.with_registers(|r| BufferRing::tx_free_size(r, self.socket_id))?;
        if free == 0 || (free as usize) < data.len() {
            return Err(UdpError::WouldBlock);
        }

        self.stack.with_registers(|r| {
            r.write_sn_dipr(self.socket_id, destination.address().as_byte_array())?;
            r.write_sn_dport(self.socket_id, destination.port())
        })?;

        self.stack.with_registers(|r| {
            BufferRing::write(r, self.socket_id, data)?;
            BufferRing::send(r, self.socket_id, false)
        })?;
        self.transmit_outstanding = true;
        Ok(())
    }

    /// Receives one datagram into `buffer`. If the datagram's payload is
    /// larger than `buffer`, the excess is discarded and the read pointer
    /// still advances past the whole datagram, so the next call sees the
    /// next one. Returns the sender's endpoint and the number of bytes
    /// actually written to `buffer`.
    pub fn receive(&mut self, buffer: &mut [u8]) -> Result<(Endpoint, usize), UdpError<B::Error>> {
        let available = self.stack.with_registers(|r| BufferRing::rx_available(r, self.socket_id))?;
        if available == 0 {
            return Err(UdpError::WouldBlock);
        }

        let (source, payload_len) = self.stack.with_registers(|registers| {
            let read_pointer = BufferRing::rx_read_pointer(registers, self.socket_id)?;
            let mut header = [0u8; 8];
            BufferRing::read_at(registers, self.socket_id, read_pointer, &mut header)?;

            let address = Ipv4Addr::from_byte_array([header[0], header[1], header[2], header[3]]);
            let port = BigEndian::read_u16(&header[4..6]);
            let payload_len = BigEndian::read_u16(&header[6..8]);

            BufferRing::advance_rx_read_pointer(registers, self.socket_id, 8)?;
            Ok::<(Endpoint, u16), B::Error>((Endpoint::new(address, port), payload_len))
        })?;

        let to_copy = (buffer.len() as u16).min(payload_len) as usize;
        self.stack.with_registers(|registers| {
            let read_pointer = BufferRing::rx_read_pointer(registers, self.socket_id)?;
            BufferRing::read_at(registers, self.socket_id, read_pointer, &mut buffer[..to_copy])?;
            BufferRing::advance_rx_read_pointer(registers, self.socket_id, payload_len)?;
            BufferRing::recv(registers, self.socket_id)
        })?;

        Ok((source, to_copy))
    }
}

impl<'a, B, TcpPool, UdpPool> Drop for UdpSocket<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    fn drop(&mut self) {
        let bound_port = (self.state == UdpState::Bound).then_some(self.port);
        self.stack.release_udp_socket(self.socket_id, bound_port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::sn_sr;
    use crate::socket::SocketId;
    use crate::test_support::{chip, initialized_stack, BUFFER_SIZE};

    #[test]
    fn bind_opens_in_udp_mode_and_records_the_port() {
        let (bus, _handle) = chip();
        let stack = initialized_stack(bus);
        let mut socket = UdpSocket::new(&stack).unwrap();

        socket.bind(5005).unwrap();

        assert_eq!(socket.state(), UdpState::Bound);
    }

    #[test]
    fn transmit_rejects_a_payload_larger_than_the_tx_buffer() {
        let (bus, handle) = chip();
        let stack = initialized_stack(bus);
        let mut socket = UdpSocket::new(&stack).unwrap();
        socket.bind(5005).unwrap();
        handle.set_tx_state(0, BUFFER_SIZE as u16, 0);

        let oversized = vec![0u8; BUFFER_SIZE + 1];
        let destination = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 9000);
        assert_eq!(
            socket.transmit(destination, &oversized).unwrap_err(),
            UdpError::ExcessiveMessageSize
        );
    }

    #[test]
    fn transmit_writes_destination_and_payload() {
        let (bus, handle) = chip();
        let stack = initialized_stack(bus);
        let mut socket = UdpSocket::new(&stack).unwrap();
        socket.bind(5005).unwrap();
        handle.set_tx_state(0, BUFFER_SIZE as u16, 0);

        let destination = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 9000);
        socket.transmit(destination, &[1, 2, 3, 4]).unwrap();

        assert_eq!(handle.tx_buffer_from(0, 0, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn receive_parses_the_datagram_header_and_clamps_to_the_caller_buffer() {
        let (bus, handle) = chip();
        let stack = initialized_stack(bus);
        let mut socket = UdpSocket::new(&stack).unwrap();
        socket.bind(5005).unwrap();

        let mut datagram = std::vec::Vec::new();
        datagram.extend_from_slice(&[10, 0, 0, 7]); // source address
        datagram.extend_from_slice(&9001u16.to_be_bytes()); // source port
        datagram.extend_from_slice(&5u16.to_be_bytes()); // payload length
        datagram.extend_from_slice(&[1, 2, 3, 4, 5]); // payload
        handle.set_rx_state(0, datagram.len() as u16, 0, &datagram);

        let mut buffer = [0u8; 3];
        let (source, read) = socket.receive(&mut buffer).unwrap();

        assert_eq!(source, Endpoint::new(Ipv4Addr::new(10, 0, 0, 7), 9001));
        assert_eq!(read, 3);
        assert_eq!(&buffer, &[1, 2, 3]);

        // The read pointer must have advanced past the whole datagram, not
        // just the caller's undersized buffer, so the next datagram (if any)
        // starts where this one ended.
        assert_eq!(handle.sn_cr_log().last().map(|(_, c)| *c), Some(crate::registers::SocketCommand::Recv as u8));
    }

    #[test]
    fn drop_releases_the_socket_and_its_port() {
        let (bus, _handle) = chip();
        let stack = initialized_stack(bus);
        {
            let mut socket = UdpSocket::new(&stack).unwrap();
            socket.bind(ANY_PORT_FOR_TEST).unwrap();
        }
        // A second socket can now reuse the hardware slot that was freed.
        let socket = UdpSocket::new(&stack).unwrap();
        assert_eq!(socket.state(), UdpState::Initialized);
    }

    const ANY_PORT_FOR_TEST: u16 = 6000;

    #[test]
    fn bind_reaches_the_udp_status() {
        let (bus, handle) = chip();
        let stack = initialized_stack(bus);
        let mut socket = UdpSocket::new(&stack).unwrap();
        socket.bind(7000).unwrap();
        assert_eq!(handle.sn_sr(SocketId::Socket0.index()), sn_sr::UDP);
    }
}
