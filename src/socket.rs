//! Identifiers for the W5500's eight hardware sockets and the memory
//! blocks within each of them.

/// The number of hardware sockets the W5500 provides.
pub const SOCKET_COUNT: usize = 8;

enum_from_primitive! {
/// One of the W5500's eight hardware sockets.
///
/// The discriminants are the socket index (0..=7); use [`SocketId::encode`]
/// to get the 8-bit `SOCKET` field used in an SPI control byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketId {
    Socket0 = 0,
    Socket1 = 1,
    Socket2 = 2,
    Socket3 = 3,
    Socket4 = 4,
    Socket5 = 5,
    Socket6 = 6,
    Socket7 = 7,
}
}

/// All eight socket identifiers, in order.
pub const SOCKETS: [SocketId; SOCKET_COUNT] = [
    SocketId::Socket0,
    SocketId::Socket1,
    SocketId::Socket2,
    SocketId::Socket3,
    SocketId::Socket4,
    SocketId::Socket5,
    SocketId::Socket6,
    SocketId::Socket7,
];

static_assertions::const_assert_eq!(SOCKETS.len(), SOCKET_COUNT);

impl SocketId {
    /// The socket's index, 0..=7.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The `SOCKET` field of the SPI control byte: `n << 5`.
    pub const fn encode(self) -> u8 {
        (self as u8) << 5
    }
}

/// One of the three memory blocks within a hardware socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketMemoryBlock {
    /// Socket registers (`SN_MR`, `SN_CR`, `SN_SR`, ...).
    Registers,
    /// Socket transmit buffer.
    TxBuffer,
    /// Socket receive buffer.
    RxBuffer,
}

impl SocketMemoryBlock {
    /// The `BLOCK` field of the SPI control byte's `BSB`.
    pub const fn encode(self) -> u8 {
        match self {
            SocketMemoryBlock::Registers => 0b01 << 3,
            SocketMemoryBlock::TxBuffer => 0b10 << 3,
            SocketMemoryBlock::RxBuffer => 0b11 << 3,
        }
    }
}

/// The size, in bytes, of a socket's TX or RX buffer, one of
/// `{0, 2, 4, 8, 16} KiB`.
///
/// The W5500 distributes a fixed 16 KiB of TX memory and 16 KiB of RX
/// memory across its eight sockets; a larger per-socket buffer leaves fewer
/// sockets usable. See [`SocketBufferSize::usable_sockets`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketBufferSize {
    /// No socket memory; the chip is initialised but no sockets are usable.
    None,
    /// 2 KiB per socket (8 sockets usable).
    Kb2,
    /// 4 KiB per socket (4 sockets usable).
    Kb4,
    /// 8 KiB per socket (2 sockets usable).
    Kb8,
    /// 16 KiB per socket (1 socket usable).
    Kb16,
}

impl SocketBufferSize {
    /// The value written to `SN_RXBUF_SIZE`/`SN_TXBUF_SIZE` for a socket
    /// that is assigned this buffer size, in KiB.
    pub const fn register_value(self) -> u8 {
        match self {
            SocketBufferSize::None => 0,
            SocketBufferSize::Kb2 => 2,
            SocketBufferSize::Kb4 => 4,
            SocketBufferSize::Kb8 => 8,
            SocketBufferSize::Kb16 => 16,
        }
    }

    /// How many of the eight hardware sockets are usable at this buffer
    /// size: `16 / size`, capped at 8 (and 0 when `size` is
    /// [`SocketBufferSize::None`]).
    pub const fn usable_sockets(self) -> usize {
        match self {
            SocketBufferSize::None => 0,
            SocketBufferSize::Kb2 => 8,
            SocketBufferSize::Kb4 => 4,
            SocketBufferSize::Kb8 => 2,
            SocketBufferSize::Kb16 => 1,
        }
    }

    /// The size of the buffer in bytes.
    pub const fn bytes(self) -> u16 {
        (self.register_value() as u16) * 1024
    }
}
