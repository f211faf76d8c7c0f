//! Top-level lifecycle and shared state: PHY configuration, MAC/IP
//! addresses, per-socket buffer sizing, interrupt routing, and the two port
//! allocators.
//!
//! `NetworkStack` is the single owner of the chip: the [`SpiFramer`]-backed
//! [`Registers`], the [`SocketAllocator`], and both [`PortPool`]s live
//! behind one `RefCell` so that [`UdpSocket`](crate::udp::UdpSocket),
//! [`TcpClient`](crate::tcp::TcpClient), and the server types
//! ([`crate::tcp::server`]) can each hold a shared `&NetworkStack`
//! reference rather than sole ownership — the chip itself is the resource
//! being shared, not any one socket's state.

use core::cell::RefCell;

use crate::allocator::{Exhausted, SocketAllocator};
use crate::net::port::PortPool;
use crate::net::{Endpoint, Ipv4Addr, MacAddress};
use crate::phy::PhyMode;
use crate::registers::{sn_mr_protocol, Registers};
use crate::socket::{SocketBufferSize, SocketId, SOCKETS};
use crate::spi::{SpiBus, SpiFramer};

/// Configuration applied by [`NetworkStack::initialize`].
///
/// A plain data struct rather than a fluent builder: every field is an
/// independent knob with its own observable effect on the chip, so there is
/// no meaningful partially-configured intermediate state to build up.
#[derive(Clone, Copy, Debug)]
pub struct StackConfig {
    pub phy_mode: PhyMode,
    pub ping_blocking: bool,
    pub arp_forcing: bool,
    /// Retransmission timeout (`RTR`), in units of 100 us.
    pub retransmission_timeout: u16,
    /// Retransmission retry count (`RCR`).
    pub retransmission_retry_count: u8,
    pub mac_address: MacAddress,
    pub ip_address: Ipv4Addr,
    pub gateway_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    /// Interrupt assert low level time (`INTLEVEL`).
    pub interrupt_assert_level: u16,
    pub socket_buffer_size: SocketBufferSize,
}

/// An error produced by a [`NetworkStack`] operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The SPI bus reported an error.
    Bus(E),
    /// `VERSIONR` did not read back `0x04`.
    NonresponsiveDevice,
    /// No hardware socket is available.
    SocketsExhausted,
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::Bus(error)
    }
}

/// An error produced while binding a socket to a local port: either the
/// bus failed, or the port pool had nothing to give out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindError<E, P> {
    /// The SPI bus reported an error.
    Bus(E),
    /// The port pool could not satisfy the request.
    Port(P),
}

impl<E, P> From<E> for BindError<E, P> {
    fn from(error: E) -> Self {
        BindError::Bus(error)
    }
}

const MR_RESET: u8 = 1 << 7;

mod mr_bits {
    pub const PING_BLOCK: u8 = 1 << 4;
    pub const ARP_FORCE: u8 = 1 << 1;
}

struct Inner<B, TcpPool, UdpPool> {
    registers: Registers<B>,
    allocator: SocketAllocator,
    tcp_ports: TcpPool,
    udp_ports: UdpPool,
    sockets_count: usize,
}

/// Owns the W5500 and virtualises its eight hardware sockets into the
/// socket types in [`crate::udp`] and [`crate::tcp`].
pub struct NetworkStack<B, TcpPool, UdpPool> {
    inner: RefCell<Inner<B, TcpPool, UdpPool>>,
}

impl<B, TcpPool, UdpPool> NetworkStack<B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    /// Constructs a stack around an SPI framer and a port pool for each of
    /// TCP and UDP. No hardware socket is usable until
    /// [`NetworkStack::initialize`] succeeds.
    pub fn new(framer: SpiFramer<B>, tcp_ports: TcpPool, udp_ports: UdpPool) -> Self {
        Self {
            inner: RefCell::new(Inner {
                registers: Registers::new(framer),
                allocator: SocketAllocator::new(),
                tcp_ports,
                udp_ports,
                sockets_count: 0,
            }),
        }
    }

    /// Resets the chip and applies `config` (§4.5): software reset, PHY
    /// reset/bypass sequencing, `MR` flags, network identity registers, and
    /// per-socket buffer sizing, then enables the allocator for the number
    /// of sockets the configured buffer size makes usable.
    pub fn initialize(&self, config: &StackConfig) -> Result<(), Error<B::Error>> {
        let mut inner = self.inner.borrow_mut();
        let registers = &mut inner.registers;

        registers.write_mr(MR_RESET)?;
        while registers.read_mr()? & MR_RESET != 0 {}

        registers.sequence_phycfgr(config.phy_mode.opmdc())?;

        let mut mr = 0;
        if config.ping_blocking {
            mr |= mr_bits::PING_BLOCK;
        }
        if config.arp_forcing {
            mr |= mr_bits::ARP_FORCE;
        }
        registers.write_mr(mr)?;

        registers.write_rtr(config.retransmission_timeout)?;
        registers.write_rcr(config.retransmission_retry_count)?;
        registers.write_shar(config.mac_address.as_bytes())?;
        registers.write_sipr(config.ip_address.as_byte_array())?;
        registers.write_gar(config.gateway_address.as_byte_array())?;
        registers.write_subr(config.subnet_mask.as_byte_array())?;
        registers.write_intlevel(config.interrupt_assert_level)?;

        let usable = config.socket_buffer_size.usable_sockets();
        let kib = config.socket_buffer_size.register_value();
        for (index, socket_id) in SOCKETS.iter().copied().enumerate() {
            let size = if index < usable { kib } else { 0 };
            registers.write_sn_rxbuf_size(socket_id, size)?;
            registers.write_sn_txbuf_size(socket_id, size)?;
        }

        inner.sockets_count = usable;
        inner.allocator.enable(usable);

        Ok(())
    }

    /// `true` only if `VERSIONR` reads back exactly `0x04`.
    pub fn is_device_responsive(&self) -> Result<bool, Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.device_version_is_valid()?)
    }

    /// ORs `mask` into `IMR`.
    pub fn enable_interrupts(&self, mask: u8) -> Result<(), Error<B::Error>> {
        let mut inner = self.inner.borrow_mut();
        let current = inner.registers.read_imr()?;
        inner.registers.write_imr(current | mask)?;
        Ok(())
    }

    /// ANDs the complement of `mask` out of `IMR`.
    pub fn disable_interrupts(&self, mask: u8) -> Result<(), Error<B::Error>> {
        let mut inner = self.inner.borrow_mut();
        let current = inner.registers.read_imr()?;
        inner.registers.write_imr(current & !mask)?;
        Ok(())
    }

    /// Writes `IMR = 0`, disabling every common interrupt.
    pub fn disable_all_interrupts(&self) -> Result<(), Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.write_imr(0)?)
    }

    /// The currently enabled interrupt mask (`IMR`).
    pub fn enabled_interrupts(&self) -> Result<u8, Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.read_imr()?)
    }

    /// The pending interrupt flags (`IR`).
    pub fn interrupt_context(&self) -> Result<u8, Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.read_ir()?)
    }

    /// Clears `mask`'s bits of `IR` (write-1-to-clear).
    pub fn clear_interrupts(&self, mask: u8) -> Result<(), Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.clear_interrupts(mask)?)
    }

    /// Writes `SIMR = 0xFF`, enabling interrupts for every socket.
    pub fn enable_socket_interrupts(&self) -> Result<(), Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.write_simr(0xFF)?)
    }

    /// Writes `SIMR = 0x00`, disabling interrupts for every socket.
    pub fn disable_socket_interrupts(&self) -> Result<(), Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.write_simr(0x00)?)
    }

    /// `true` if any socket has interrupts enabled (`SIMR != 0`).
    pub fn socket_interrupts_are_enabled(&self) -> Result<bool, Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.read_simr()? != 0)
    }

    /// The pending per-socket interrupt flags (`SIR`).
    pub fn socket_interrupt_context(&self) -> Result<u8, Error<B::Error>> {
        Ok(self.inner.borrow_mut().registers.read_sir()?)
    }

    /// The endpoint that most recently sent this chip an unreachable
    /// (ICMP) message, read from `UIPR`/`UPORTR`.
    pub fn unreachable_endpoint(&self) -> Result<Endpoint, Error<B::Error>> {
        let mut inner = self.inner.borrow_mut();
        let address = inner.registers.read_uipr()?;
        let port = inner.registers.read_uportr()?;
        Ok(Endpoint::new(Ipv4Addr::from_byte_array(address), port))
    }

    pub(crate) fn with_registers<R, E>(&self, f: impl FnOnce(&mut Registers<B>) -> Result<R, E>) -> Result<R, E> {
        f(&mut self.inner.borrow_mut().registers)
    }

    pub(crate) fn allocate_socket(&self) -> Result<SocketId, Error<B::Error>> {
        self.inner.borrow_mut().allocator.allocate_one().map_err(|Exhausted| Error::SocketsExhausted)
    }

    pub(crate) fn allocate_sockets(&self, count: usize) -> Result<[Option<SocketId>; crate::socket::SOCKET_COUNT], Error<B::Error>> {
        self.inner.borrow_mut().allocator.allocate_many(count).map_err(|Exhausted| Error::SocketsExhausted)
    }

    pub(crate) fn mark_detached(&self, id: SocketId) {
        self.inner.borrow_mut().allocator.mark_detached(id);
    }

    pub(crate) fn allocate_tcp_port(&self, desired: u16) -> Result<u16, TcpPool::Error> {
        self.inner.borrow_mut().tcp_ports.allocate(desired)
    }

    pub(crate) fn allocate_udp_port(&self, desired: u16) -> Result<u16, UdpPool::Error> {
        self.inner.borrow_mut().udp_ports.allocate(desired)
    }

    /// Releases a UDP socket: frees its hardware slot and, if `bound_port`
    /// is `Some`, its port. UDP sockets never share a port across multiple
    /// slots in this crate, so no hardware scan is needed before releasing
    /// the port.
    pub(crate) fn release_udp_socket(&self, id: SocketId, bound_port: Option<u16>) {
        let mut inner = self.inner.borrow_mut();
        inner.allocator.deallocate(id, || {});
        if let Some(port) = bound_port {
            inner.udp_ports.deallocate(port);
        }
    }

    /// Implements the §4.8 port-accounting algorithm: reads the port from
    /// `owned[0]`, scans every other hardware socket for a still-live TCP
    /// binding to that port, and releases the port from the pool only if
    /// none is found. Then unconditionally frees every id in `owned` back
    /// to the allocator. Called once per drop of a `TcpClient`, `TcpServer`
    /// (with all of its owned ids), or `TcpServerConnectionHandler` — never
    /// once per socket — so the port pool's `deallocate` fires at most once
    /// per port release regardless of how many sockets shared it.
    pub(crate) fn release_tcp_sockets(&self, owned: &[SocketId]) -> Result<(), B::Error> {
        if owned.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.borrow_mut();
        let port = inner.registers.read_sn_port(owned[0])?;

        let mut still_in_use = false;
        for socket_id in SOCKETS.iter().copied() {
            if owned.contains(&socket_id) {
                continue;
            }
            let protocol = inner.registers.read_sn_mr(socket_id)? & sn_mr_protocol::MASK;
            if protocol != sn_mr_protocol::TCP {
                continue;
            }
            if inner.registers.read_sn_port(socket_id)? == port {
                still_in_use = true;
                break;
            }
        }

        if !still_in_use {
            inner.tcp_ports.deallocate(port);
        }

        for socket_id in owned {
            inner.allocator.deallocate(*socket_id, || {});
        }

        Ok(())
    }
}
