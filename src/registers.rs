//! Typed accessors for every register in the W5500's catalogue.
//!
//! [`Registers`] is the only thing above the SPI framing layer
//! ([`crate::spi`]) that is allowed to know register addresses. Every
//! method here is a direct, one-shot mapping onto one or more
//! [`SpiFramer`](crate::spi::SpiFramer) calls, except for two protocols the
//! chip itself requires:
//!
//! - **Stable reads** ([`Registers::sn_tx_fsr`], [`Registers::sn_rx_rsr`]):
//!   these 16-bit counters are updated by the chip concurrently with the
//!   host reading them. The register is read twice; if the two reads
//!   differ, it is read a third time and that value is returned. Two
//!   consecutive equal reads sandwich a point in time at which the value
//!   was valid.
//! - **Command issue** ([`Registers::issue_sn_cr`]): `SN_CR` is written
//!   with a command byte, then polled until the chip clears it back to
//!   zero, confirming the command was accepted.

use byteorder::{BigEndian, ByteOrder};
use paste::paste;

use crate::socket::{SocketId, SocketMemoryBlock};
use crate::spi::{SpiBus, SpiFramer};

/// `SN_CR` command values (§6.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketCommand {
    Open = 0x01,
    Listen = 0x02,
    Connect = 0x04,
    Discon = 0x08,
    Close = 0x10,
    Send = 0x20,
    SendKeep = 0x22,
    Recv = 0x40,
}

/// `SN_IR` bits (§6.4).
pub mod sn_ir {
    pub const CON: u8 = 0x01;
    pub const DISCON: u8 = 0x02;
    pub const RECV: u8 = 0x04;
    pub const TIMEOUT: u8 = 0x08;
    pub const SEND_OK: u8 = 0x10;
}

/// `SN_SR` status codes (§6.2).
pub mod sn_sr {
    pub const CLOSED: u8 = 0x00;
    pub const INIT: u8 = 0x13;
    pub const LISTEN: u8 = 0x13;
    pub const SYN_SENT: u8 = 0x15;
    pub const SYN_RECV: u8 = 0x17;
    pub const ESTABLISHED: u8 = 0x17;
    pub const FIN_WAIT: u8 = 0x18;
    pub const CLOSING: u8 = 0x1A;
    pub const TIME_WAIT: u8 = 0x1B;
    pub const CLOSE_WAIT: u8 = 0x1C;
    pub const LAST_ACK: u8 = 0x1D;
    pub const UDP: u8 = 0x22;
}

/// `SN_MR` protocol field values, the low 4 bits of `SN_MR`.
pub mod sn_mr_protocol {
    pub const CLOSED: u8 = 0b0000;
    pub const TCP: u8 = 0b0001;
    pub const UDP: u8 = 0b0010;
    pub const MASK: u8 = 0b0000_1111;
}

/// `MR` bit positions used by this crate.
mod mr_bits {
    pub const PING_BLOCK: u8 = 1 << 4;
    pub const ARP_FORCE: u8 = 1 << 1;
}

/// `SN_MR` bit positions outside the protocol field, meaningful only when
/// the socket is in TCP mode.
pub mod sn_mr_bits {
    /// No Delayed ACK: disables the chip's default delayed-ACK behaviour.
    pub const ND: u8 = 1 << 5;
}

/// `PHYCFGR` bit positions.
mod phycfgr_bits {
    pub const RESET: u8 = 1 << 7;
    pub const BYPASS: u8 = 1 << 6;
}

const VERSIONR_EXPECTED: u8 = 0x04;

// Common register offsets (§6.1).
mod common_offset {
    pub const MR: u16 = 0x0000;
    pub const GAR: u16 = 0x0001;
    pub const SUBR: u16 = 0x0005;
    pub const SHAR: u16 = 0x0009;
    pub const SIPR: u16 = 0x000F;
    pub const INTLEVEL: u16 = 0x0013;
    pub const IR: u16 = 0x0015;
    pub const IMR: u16 = 0x0016;
    pub const SIR: u16 = 0x0017;
    pub const SIMR: u16 = 0x0018;
    pub const RTR: u16 = 0x0019;
    pub const RCR: u16 = 0x001B;
    pub const PTIMER: u16 = 0x001C;
    pub const PMAGIC: u16 = 0x001D;
    pub const PHAR: u16 = 0x001E;
    pub const PSID: u16 = 0x0024;
    pub const PMRU: u16 = 0x0026;
    pub const UIPR: u16 = 0x0028;
    pub const UPORTR: u16 = 0x002C;
    pub const PHYCFGR: u16 = 0x002E;
    pub const VERSIONR: u16 = 0x0039;
}

// Per-socket register offsets (§6.1).
mod socket_offset {
    pub const SN_MR: u16 = 0x0000;
    pub const SN_CR: u16 = 0x0001;
    pub const SN_IR: u16 = 0x0002;
    pub const SN_SR: u16 = 0x0003;
    pub const SN_PORT: u16 = 0x0004;
    pub const SN_DHAR: u16 = 0x0006;
    pub const SN_DIPR: u16 = 0x000C;
    pub const SN_DPORT: u16 = 0x0010;
    pub const SN_MSSR: u16 = 0x0012;
    pub const SN_TOS: u16 = 0x0015;
    pub const SN_TTL: u16 = 0x0016;
    pub const SN_RXBUF_SIZE: u16 = 0x001E;
    pub const SN_TXBUF_SIZE: u16 = 0x001F;
    pub const SN_TX_FSR: u16 = 0x0020;
    pub const SN_TX_RD: u16 = 0x0022;
    pub const SN_TX_WR: u16 = 0x0024;
    pub const SN_RX_RSR: u16 = 0x0026;
    pub const SN_RX_RD: u16 = 0x0028;
    pub const SN_RX_WR: u16 = 0x002A;
    pub const SN_IMR: u16 = 0x002C;
    pub const SN_FRAG: u16 = 0x002D;
    pub const SN_KPALVTR: u16 = 0x002F;
}

/// Generates a `read_<name>`/`write_<name>` pair for a single-byte common
/// register.
macro_rules! common_reg_u8 {
    ($name:ident, $offset:expr) => {
        paste! {
            #[doc = "Reads `" $name "`."]
            pub fn [<read_ $name>](&mut self) -> Result<u8, B::Error> {
                self.framer.read_common_byte($offset)
            }

            #[doc = "Writes `" $name "`."]
            pub fn [<write_ $name>](&mut self, value: u8) -> Result<(), B::Error> {
                self.framer.write_common_byte($offset, value)
            }
        }
    };
}

/// Generates a `read_<name>`/`write_<name>` pair for a 16-bit common
/// register, preserved in network byte order on the wire.
macro_rules! common_reg_u16 {
    ($name:ident, $offset:expr) => {
        paste! {
            #[doc = "Reads `" $name "`."]
            pub fn [<read_ $name>](&mut self) -> Result<u16, B::Error> {
                let mut bytes = [0u8; 2];
                self.framer.read_common_block($offset, &mut bytes)?;
                Ok(BigEndian::read_u16(&bytes))
            }

            #[doc = "Writes `" $name "`."]
            pub fn [<write_ $name>](&mut self, value: u16) -> Result<(), B::Error> {
                let mut bytes = [0u8; 2];
                BigEndian::write_u16(&mut bytes, value);
                self.framer.write_common_block($offset, &bytes)
            }
        }
    };
}

/// Generates a `read_<name>`/`write_<name>` pair for a fixed-size
/// byte-array common register (MAC/IP addresses), preserved exactly in the
/// order the chip uses on the wire.
macro_rules! common_reg_bytes {
    ($name:ident, $offset:expr, $width:expr) => {
        paste! {
            #[doc = "Reads `" $name "`."]
            pub fn [<read_ $name>](&mut self) -> Result<[u8; $width], B::Error> {
                let mut bytes = [0u8; $width];
                self.framer.read_common_block($offset, &mut bytes)?;
                Ok(bytes)
            }

            #[doc = "Writes `" $name "`."]
            pub fn [<write_ $name>](&mut self, value: [u8; $width]) -> Result<(), B::Error> {
                self.framer.write_common_block($offset, &value)
            }
        }
    };
}

/// Generates a `read_<name>`/`write_<name>` pair for a single-byte
/// per-socket register.
macro_rules! socket_reg_u8 {
    ($name:ident, $offset:expr) => {
        paste! {
            #[doc = "Reads `" $name "`."]
            pub fn [<read_ $name>](&mut self, socket_id: SocketId) -> Result<u8, B::Error> {
                self.framer.read_socket_byte(socket_id, SocketMemoryBlock::Registers, $offset)
            }

            #[doc = "Writes `" $name "`."]
            pub fn [<write_ $name>](&mut self, socket_id: SocketId, value: u8) -> Result<(), B::Error> {
                self.framer.write_socket_byte(socket_id, SocketMemoryBlock::Registers, $offset, value)
            }
        }
    };
}

/// Generates a `read_<name>`/`write_<name>` pair for a 16-bit per-socket
/// register, preserved in network byte order on the wire.
macro_rules! socket_reg_u16 {
    ($name:ident, $offset:expr) => {
        paste! {
            #[doc = "Reads `" $name "`."]
            pub fn [<read_ $name>](&mut self, socket_id: SocketId) -> Result<u16, B::Error> {
                let mut bytes = [0u8; 2];
                self.framer.read_socket_block(socket_id, SocketMemoryBlock::Registers, $offset, &mut bytes)?;
                Ok(BigEndian::read_u16(&bytes))
            }

            #[doc = "Writes `" $name "`."]
            pub fn [<write_ $name>](&mut self, socket_id: SocketId, value: u16) -> Result<(), B::Error> {
                let mut bytes = [0u8; 2];
                BigEndian::write_u16(&mut bytes, value);
                self.framer.write_socket_block(socket_id, SocketMemoryBlock::Registers, $offset, &bytes)
            }
        }
    };
}

/// Generates a `read_<name>`/`write_<name>` pair for a fixed-size
/// byte-array per-socket register.
macro_rules! socket_reg_bytes {
    ($name:ident, $offset:expr, $width:expr) => {
        paste! {
            #[doc = "Reads `" $name "`."]
            pub fn [<read_ $name>](&mut self, socket_id: SocketId) -> Result<[u8; $width], B::Error> {
                let mut bytes = [0u8; $width];
                self.framer.read_socket_block(socket_id, SocketMemoryBlock::Registers, $offset, &mut bytes)?;
                Ok(bytes)
            }

            #[doc = "Writes `" $name "`."]
            pub fn [<write_ $name>](&mut self, socket_id: SocketId, value: [u8; $width]) -> Result<(), B::Error> {
                self.framer.write_socket_block(socket_id, SocketMemoryBlock::Registers, $offset, &value)
            }
        }
    };
}

/// Typed register access built atop [`SpiFramer`].
///
/// Owns the only `SpiFramer` in a stack; every higher layer
/// ([`crate::buffer`], [`crate::stack`], the socket types) goes through
/// this to touch the chip.
pub struct Registers<B> {
    framer: SpiFramer<B>,
}

impl<B: SpiBus> Registers<B> {
    /// Wraps a framer in a typed register file.
    pub const fn new(framer: SpiFramer<B>) -> Self {
        Self { framer }
    }

    /// Releases the underlying framer.
    pub fn free(self) -> SpiFramer<B> {
        self.framer
    }

    /// Direct access to the underlying framer, for buffer I/O
    /// ([`crate::buffer`]) which bypasses the register catalogue.
    pub(crate) fn framer_mut(&mut self) -> &mut SpiFramer<B> {
        &mut self.framer
    }

    common_reg_u8!(mr, common_offset::MR);
    common_reg_bytes!(gar, common_offset::GAR, 4);
    common_reg_bytes!(subr, common_offset::SUBR, 4);
    common_reg_bytes!(shar, common_offset::SHAR, 6);
    common_reg_bytes!(sipr, common_offset::SIPR, 4);
    common_reg_u16!(intlevel, common_offset::INTLEVEL);
    common_reg_u8!(ir, common_offset::IR);
    common_reg_u8!(imr, common_offset::IMR);
    common_reg_u8!(simr, common_offset::SIMR);
    common_reg_u16!(rtr, common_offset::RTR);
    common_reg_u8!(rcr, common_offset::RCR);
    common_reg_u16!(psid, common_offset::PSID);
    common_reg_u16!(pmru, common_offset::PMRU);
    common_reg_bytes!(uipr, common_offset::UIPR, 4);
    common_reg_u16!(uportr, common_offset::UPORTR);
    common_reg_u8!(phycfgr, common_offset::PHYCFGR);

    /// Reads `SIR` (socket interrupt context). Read-only.
    pub fn read_sir(&mut self) -> Result<u8, B::Error> {
        self.framer.read_common_byte(common_offset::SIR)
    }

    /// Reads `VERSIONR`. Read-only; expected to always equal `0x04`.
    pub fn read_versionr(&mut self) -> Result<u8, B::Error> {
        self.framer.read_common_byte(common_offset::VERSIONR)
    }

    /// `true` if `VERSIONR` reads back the one value the W5500 ever
    /// reports (`0x04`); any other value, including neighbours like
    /// `0x03`/`0x05`, means the device did not respond as expected.
    pub fn device_version_is_valid(&mut self) -> Result<bool, B::Error> {
        Ok(self.read_versionr()? == VERSIONR_EXPECTED)
    }

    socket_reg_u8!(sn_mr, socket_offset::SN_MR);
    socket_reg_u8!(sn_cr, socket_offset::SN_CR);
    socket_reg_u8!(sn_ir, socket_offset::SN_IR);
    socket_reg_u8!(sn_sr, socket_offset::SN_SR);
    socket_reg_u16!(sn_port, socket_offset::SN_PORT);
    socket_reg_bytes!(sn_dhar, socket_offset::SN_DHAR, 6);
    socket_reg_bytes!(sn_dipr, socket_offset::SN_DIPR, 4);
    socket_reg_u16!(sn_dport, socket_offset::SN_DPORT);
    socket_reg_u16!(sn_mssr, socket_offset::SN_MSSR);
    socket_reg_u8!(sn_tos, socket_offset::SN_TOS);
    socket_reg_u8!(sn_ttl, socket_offset::SN_TTL);
    socket_reg_u8!(sn_rxbuf_size, socket_offset::SN_RXBUF_SIZE);
    socket_reg_u8!(sn_txbuf_size, socket_offset::SN_TXBUF_SIZE);
    socket_reg_u16!(sn_tx_rd, socket_offset::SN_TX_RD);
    socket_reg_u16!(sn_tx_wr, socket_offset::SN_TX_WR);
    socket_reg_u16!(sn_rx_rd, socket_offset::SN_RX_RD);
    socket_reg_u16!(sn_rx_wr, socket_offset::SN_RX_WR);
    socket_reg_u8!(sn_imr, socket_offset::SN_IMR);
    socket_reg_u16!(sn_frag, socket_offset::SN_FRAG);
    socket_reg_u8!(sn_kpalvtr, socket_offset::SN_KPALVTR);

    fn read_sn_tx_fsr_once(&mut self, socket_id: SocketId) -> Result<u16, B::Error> {
        let mut bytes = [0u8; 2];
        self.framer.read_socket_block(
            socket_id,
            SocketMemoryBlock::Registers,
            socket_offset::SN_TX_FSR,
            &mut bytes,
        )?;
        Ok(BigEndian::read_u16(&bytes))
    }

    /// Reads `SN_TX_FSR` (free size of the socket's TX buffer) using the
    /// read-until-stable protocol: read twice, and if the two reads
    /// differ, read a third time and return that value.
    pub fn sn_tx_fsr(&mut self, socket_id: SocketId) -> Result<u16, B::Error> {
        stable_read(|| self.read_sn_tx_fsr_once(socket_id))
    }

    fn read_sn_rx_rsr_once(&mut self, socket_id: SocketId) -> Result<u16, B::Error> {
        let mut bytes = [0u8; 2];
        self.framer.read_socket_block(
            socket_id,
            SocketMemoryBlock::Registers,
            socket_offset::SN_RX_RSR,
            &mut bytes,
        )?;
        Ok(BigEndian::read_u16(&bytes))
    }

    /// Reads `SN_RX_RSR` (bytes received into the socket's RX buffer)
    /// using the read-until-stable protocol (see [`Registers::sn_tx_fsr`]).
    pub fn sn_rx_rsr(&mut self, socket_id: SocketId) -> Result<u16, B::Error> {
        stable_read(|| self.read_sn_rx_rsr_once(socket_id))
    }

    /// Writes `command` to `SN_CR`, then polls until the chip clears it
    /// back to zero, confirming the command was accepted. This is the
    /// chip's only synchronisation primitive for commands; every socket
    /// command in this crate goes through it.
    pub fn issue_sn_cr(&mut self, socket_id: SocketId, command: SocketCommand) -> Result<(), B::Error> {
        self.write_sn_cr(socket_id, command as u8)?;
        while self.read_sn_cr(socket_id)? != 0 {}
        Ok(())
    }

    /// Sets the `PING_BLOCK` and `ARP_FORCE` bits of `MR` and writes it
    /// through, leaving all other bits as given by `base`.
    pub fn write_mr_flags(&mut self, base: u8, ping_blocking: bool, arp_forcing: bool) -> Result<(), B::Error> {
        let mut value = base;
        if ping_blocking {
            value |= mr_bits::PING_BLOCK;
        }
        if arp_forcing {
            value |= mr_bits::ARP_FORCE;
        }
        self.write_mr(value)
    }

    /// Runs the chip's documented `PHYCFGR` reset-to-opmode sequence:
    /// write with reset and bypass asserted, write with reset de-asserted,
    /// write with reset re-asserted. Omitting a step silently fails on
    /// some silicon revisions.
    pub fn sequence_phycfgr(&mut self, opmdc: u8) -> Result<(), B::Error> {
        let asserted = opmdc | phycfgr_bits::RESET | phycfgr_bits::BYPASS;
        let reset_deasserted = opmdc | phycfgr_bits::BYPASS;
        self.write_phycfgr(asserted)?;
        self.write_phycfgr(reset_deasserted)?;
        self.write_phycfgr(asserted)
    }

    /// Read-modify-writes `SN_MR`, replacing only the low 4-bit protocol
    /// field with `protocol` (one of the `sn_mr_protocol` constants).
    pub fn set_sn_mr_protocol(&mut self, socket_id: SocketId, protocol: u8) -> Result<(), B::Error> {
        let current = self.read_sn_mr(socket_id)?;
        let cleared = current & !sn_mr_protocol::MASK;
        self.write_sn_mr(socket_id, cleared | protocol)
    }

    /// Read-modify-writes `SN_MR`'s `ND` (No Delayed ACK) bit, meaningful
    /// only in TCP mode, leaving the protocol field and other bits as-is.
    pub fn set_sn_mr_no_delayed_ack(&mut self, socket_id: SocketId, enabled: bool) -> Result<(), B::Error> {
        let current = self.read_sn_mr(socket_id)?;
        let value = if enabled { current | sn_mr_bits::ND } else { current & !sn_mr_bits::ND };
        self.write_sn_mr(socket_id, value)
    }

    /// Clears the given bits of `SN_IR` by writing them back (the chip's
    /// interrupt flags clear on a write of 1, not on a read-modify-write).
    pub fn clear_sn_ir(&mut self, socket_id: SocketId, bits: u8) -> Result<(), B::Error> {
        self.write_sn_ir(socket_id, bits)
    }

    /// Writes `IR` to clear the given interrupt bits (write-1-to-clear).
    pub fn clear_interrupts(&mut self, mask: u8) -> Result<(), B::Error> {
        self.write_ir(mask)
    }
}

/// Read-until-stable: read twice, and if the two reads differ, read a
/// third time and return that value. Used for the chip's two
/// asynchronously updated 16-bit counters, `SN_TX_FSR` and `SN_RX_RSR`.
fn stable_read<E>(mut read_once: impl FnMut() -> Result<u16, E>) -> Result<u16, E> {
    let first = read_once()?;
    let second = read_once()?;
    if first == second {
        return Ok(second);
    }
    read_once()
}
