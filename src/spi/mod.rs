//! The SPI framing layer of the W5500 driver.
//!
//! The W5500 multiplexes four independent memory spaces (common registers,
//! and per-socket registers / TX buffer / RX buffer) onto a single SPI bus.
//! Every transaction is prefixed with a three byte frame header that
//! selects the memory space, the offset within it, and the direction of
//! the transfer. This module owns the encoding of that header and the
//! [`SpiBus`] trait that abstracts driving the physical bus; nothing above
//! this layer ever builds a frame header itself.

pub mod blocking;

use crate::socket::{SocketId, SocketMemoryBlock};

const BSB_COMMON: u8 = 0;
const RWB_WRITE: u8 = 1 << 2;
const OM_VDM: u8 = 0;

/// A single three byte header that precedes every register or buffer
/// transaction: the 16-bit memory offset, high byte first, followed by the
/// control byte (`OM[1:0] | RWB[2] | BSB[7:3]`).
pub type FrameHeader = [u8; 3];

fn control_byte(bsb: u8, write: bool) -> u8 {
    // `bsb` already carries its final bit position: `BSB_COMMON` is 0 and
    // `socket_bsb` composes `SocketId::encode() | SocketMemoryBlock::encode()`,
    // both of which are pre-shifted into bits [7:3].
    let rwb = if write { RWB_WRITE } else { 0 };
    bsb | rwb | OM_VDM
}

fn frame_header(offset: u16, bsb: u8, write: bool) -> FrameHeader {
    [(offset >> 8) as u8, offset as u8, control_byte(bsb, write)]
}

fn socket_bsb(socket_id: SocketId, block: SocketMemoryBlock) -> u8 {
    socket_id.encode() | block.encode()
}

/// Abstraction over a chip-select-guarded SPI transaction.
///
/// `SpiBus` is the core's only contact with the physical world: a single
/// call asserts the device select, clocks the header and data out (and, for
/// reads, in), and releases the device select on every exit path, including
/// failure. Implementors decide how the chip select is driven; the core
/// never touches a GPIO pin directly. See [`blocking::W5500Bus`] for a
/// ready-made implementation over `embedded-hal` 0.2's blocking SPI and
/// digital traits.
pub trait SpiBus {
    /// The error produced by a failed transaction.
    type Error;

    /// Write `header` followed by `data` in a single chip-select-guarded
    /// transaction.
    fn write_frame(&mut self, header: &FrameHeader, data: &[u8]) -> Result<(), Self::Error>;

    /// Write `header`, then read `data.len()` bytes into `data`, in a
    /// single chip-select-guarded transaction.
    fn read_frame(&mut self, header: &FrameHeader, data: &mut [u8]) -> Result<(), Self::Error>;
}

/// Drives [`SpiBus`] transactions against the W5500's common register block
/// and the eight per-socket register/buffer blocks.
///
/// `SpiFramer` is a thin wrapper: it knows how to build a [`FrameHeader`]
/// for a given address and never retries or inspects the data it moves. Any
/// SPI error is propagated unchanged; the chip's state is undefined after a
/// failed transaction.
pub struct SpiFramer<B> {
    bus: B,
}

impl<B: SpiBus> SpiFramer<B> {
    /// Wraps a bus implementation in a framer.
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Releases the underlying bus.
    pub fn free(self) -> B {
        self.bus
    }

    /// Reads a single byte of common register memory.
    pub fn read_common_byte(&mut self, offset: u16) -> Result<u8, B::Error> {
        let mut byte = [0u8];
        self.read_common_block(offset, &mut byte)?;
        Ok(byte[0])
    }

    /// Reads a block of common register memory.
    pub fn read_common_block(&mut self, offset: u16, data: &mut [u8]) -> Result<(), B::Error> {
        let header = frame_header(offset, BSB_COMMON, false);
        self.bus.read_frame(&header, data)
    }

    /// Writes a single byte of common register memory.
    pub fn write_common_byte(&mut self, offset: u16, data: u8) -> Result<(), B::Error> {
        self.write_common_block(offset, &[data])
    }

    /// Writes a block of common register memory.
    pub fn write_common_block(&mut self, offset: u16, data: &[u8]) -> Result<(), B::Error> {
        let header = frame_header(offset, BSB_COMMON, true);
        self.bus.write_frame(&header, data)
    }

    /// Reads a single byte of socket register or buffer memory.
    pub fn read_socket_byte(
        &mut self,
        socket_id: SocketId,
        block: SocketMemoryBlock,
        offset: u16,
    ) -> Result<u8, B::Error> {
        let mut byte = [0u8];
        self.read_socket_block(socket_id, block, offset, &mut byte)?;
        Ok(byte[0])
    }

    /// Reads a block of socket register or buffer memory.
    pub fn read_socket_block(
        &mut self,
        socket_id: SocketId,
        block: SocketMemoryBlock,
        offset: u16,
        data: &mut [u8],
    ) -> Result<(), B::Error> {
        let header = frame_header(offset, socket_bsb(socket_id, block), false);
        self.bus.read_frame(&header, data)
    }

    /// Writes a single byte of socket register or buffer memory.
    pub fn write_socket_byte(
        &mut self,
        socket_id: SocketId,
        block: SocketMemoryBlock,
        offset: u16,
        data: u8,
    ) -> Result<(), B::Error> {
        self.write_socket_block(socket_id, block, offset, &[data])
    }

    /// Writes a block of socket register or buffer memory.
    pub fn write_socket_block(
        &mut self,
        socket_id: SocketId,
        block: SocketMemoryBlock,
        offset: u16,
        data: &[u8],
    ) -> Result<(), B::Error> {
        let header = frame_header(offset, socket_bsb(socket_id, block), true);
        self.bus.write_frame(&header, data)
    }
}
