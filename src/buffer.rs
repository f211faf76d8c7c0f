//! The circular TX/RX buffer read/write protocol (§4.3).
//!
//! Each socket's TX and RX buffers are addressed by a 16-bit pointer that
//! advances through the full pointer space; the chip masks the low bits
//! against the configured buffer size to compute the physical offset. This
//! module therefore always advances pointers with 16-bit wrapping
//! arithmetic and hands the unmasked result back to the chip — [`BufferRing`]
//! never computes a physical offset itself.
//!
//! [`BufferRing::write`]/[`BufferRing::read`] implement the full protocol
//! (clamp to availability, transfer, advance the pointer) used by TCP
//! sockets. UDP needs finer control — its receive path reads a datagram
//! info header before the payload and may need to discard part of a
//! datagram — so the lower-level pointer primitives are exposed too.

use crate::registers::{Registers, SocketCommand};
use crate::socket::{SocketId, SocketMemoryBlock};
use crate::spi::SpiBus;

/// Namespace for the TX/RX buffer protocol; carries no state of its own.
pub struct BufferRing;

impl BufferRing {
    /// `SN_TX_FSR`: bytes free in the socket's TX buffer.
    pub fn tx_free_size<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<u16, B::Error> {
        registers.sn_tx_fsr(socket_id)
    }

    /// `SN_TX_WR`: the current TX write pointer.
    pub fn tx_write_pointer<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<u16, B::Error> {
        registers.read_sn_tx_wr(socket_id)
    }

    /// Writes `data` into the TX buffer starting at `offset`, without
    /// touching `SN_TX_WR`. The SPI write itself wraps at 16 bits, so a
    /// write that crosses the top of the pointer space wraps correctly.
    pub fn write_at<B: SpiBus>(
        registers: &mut Registers<B>,
        socket_id: SocketId,
        offset: u16,
        data: &[u8],
    ) -> Result<(), B::Error> {
        registers
            .framer_mut()
            .write_socket_block(socket_id, SocketMemoryBlock::TxBuffer, offset, data)
    }

    /// Advances `SN_TX_WR` by `count`, modulo 2^16.
    pub fn advance_tx_write_pointer<B: SpiBus>(
        registers: &mut Registers<B>,
        socket_id: SocketId,
        count: u16,
    ) -> Result<(), B::Error> {
        let pointer = Self::tx_write_pointer(registers, socket_id)?;
        registers.write_sn_tx_wr(socket_id, pointer.wrapping_add(count))
    }

    /// Issues `SEND` (or `SEND_KEEP`, to probe a connection with no new
    /// data) and polls until the chip accepts it.
    pub fn send<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId, keep_alive: bool) -> Result<(), B::Error> {
        let command = if keep_alive {
            SocketCommand::SendKeep
        } else {
            SocketCommand::Send
        };
        registers.issue_sn_cr(socket_id, command)
    }

    /// The full TX write protocol (§4.3, steps 1-4): clamps `data` to the
    /// socket's free size, writes at the current write pointer, and
    /// advances it. Does not issue `SEND`; callers decide whether to
    /// combine with [`BufferRing::send`] immediately or batch further
    /// writes first. Returns the number of bytes actually written.
    pub fn write<B: SpiBus>(
        registers: &mut Registers<B>,
        socket_id: SocketId,
        data: &[u8],
    ) -> Result<u16, B::Error> {
        let free = Self::tx_free_size(registers, socket_id)?;
        let count = (data.len() as u16).min(free);
        if count == 0 {
            return Ok(0);
        }

        let pointer = Self::tx_write_pointer(registers, socket_id)?;
        Self::write_at(registers, socket_id, pointer, &data[..count as usize])?;
        registers.write_sn_tx_wr(socket_id, pointer.wrapping_add(count))?;
        Ok(count)
    }

    /// `SN_RX_RSR`: bytes received and waiting in the socket's RX buffer.
    pub fn rx_available<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<u16, B::Error> {
        registers.sn_rx_rsr(socket_id)
    }

    /// `SN_RX_RD`: the current RX read pointer.
    pub fn rx_read_pointer<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<u16, B::Error> {
        registers.read_sn_rx_rd(socket_id)
    }

    /// Reads `data.len()` bytes from the RX buffer starting at `offset`,
    /// without touching `SN_RX_RD`.
    pub fn read_at<B: SpiBus>(
        registers: &mut Registers<B>,
        socket_id: SocketId,
        offset: u16,
        data: &mut [u8],
    ) -> Result<(), B::Error> {
        registers
            .framer_mut()
            .read_socket_block(socket_id, SocketMemoryBlock::RxBuffer, offset, data)
    }

    /// Advances `SN_RX_RD` by `count`, modulo 2^16, without reading
    /// anything — used to discard the unread remainder of a UDP datagram.
    pub fn advance_rx_read_pointer<B: SpiBus>(
        registers: &mut Registers<B>,
        socket_id: SocketId,
        count: u16,
    ) -> Result<(), B::Error> {
        let pointer = Self::rx_read_pointer(registers, socket_id)?;
        registers.write_sn_rx_rd(socket_id, pointer.wrapping_add(count))
    }

    /// Issues `RECV`, telling the chip the host has consumed up through the
    /// current `SN_RX_RD`, and polls until it accepts the command.
    pub fn recv<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<(), B::Error> {
        registers.issue_sn_cr(socket_id, SocketCommand::Recv)
    }

    /// The full RX read protocol (§4.3, steps 1-4 and the `RECV` in step
    /// 5): clamps `data` to the socket's available bytes, reads at the
    /// current read pointer, advances it, and issues `RECV`. Returns the
    /// number of bytes actually read.
    pub fn read<B: SpiBus>(
        registers: &mut Registers<B>,
        socket_id: SocketId,
        data: &mut [u8],
    ) -> Result<u16, B::Error> {
        let available = Self::rx_available(registers, socket_id)?;
        let count = (data.len() as u16).min(available);
        if count == 0 {
            return Ok(0);
        }

        let pointer = Self::rx_read_pointer(registers, socket_id)?;
        Self::read_at(registers, socket_id, pointer, &mut data[..count as usize])?;
        registers.write_sn_rx_rd(socket_id, pointer.wrapping_add(count))?;
        Self::recv(registers, socket_id)?;
        Ok(count)
    }
}
