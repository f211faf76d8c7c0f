//! A software model of the W5500's register and buffer memory, shared by
//! the `stack`, `tcp`, and `udp` test suites. Everything above [`buffer`],
//! [`registers`], and [`spi`] is wired together through [`NetworkStack`]
//! rather than talking to [`SpiBus`] directly, so those suites need a
//! fuller chip model than the single-protocol fakes in `buffer.rs` and
//! `registers.rs`.

#![cfg(test)]

use std::cell::RefCell;
use std::rc::Rc;

use crate::registers::{sn_sr, sn_mr_protocol, SocketCommand};
use crate::socket::SOCKET_COUNT;
use crate::spi::{FrameHeader, SpiBus, SpiFramer};

const COMMON_SPACE: usize = 0x40;
const SOCKET_REG_SPACE: usize = 0x30;
pub const BUFFER_SIZE: usize = 2048;

const SN_MR: usize = 0x00;
const SN_CR: usize = 0x01;
const SN_IR: usize = 0x02;
const SN_SR: usize = 0x03;

struct Sim {
    common: [u8; COMMON_SPACE],
    socket_regs: [[u8; SOCKET_REG_SPACE]; SOCKET_COUNT],
    tx_buffer: [[u8; BUFFER_SIZE]; SOCKET_COUNT],
    rx_buffer: [[u8; BUFFER_SIZE]; SOCKET_COUNT],
    sn_cr_log: std::vec::Vec<(usize, u8)>,
}

impl Default for Sim {
    fn default() -> Self {
        let mut common = [0u8; COMMON_SPACE];
        common[0x39] = 0x04; // VERSIONR
        Self {
            common,
            socket_regs: [[0u8; SOCKET_REG_SPACE]; SOCKET_COUNT],
            tx_buffer: [[0u8; BUFFER_SIZE]; SOCKET_COUNT],
            rx_buffer: [[0u8; BUFFER_SIZE]; SOCKET_COUNT],
            sn_cr_log: std::vec::Vec::new(),
        }
    }
}

impl Sim {
    fn process_command(&mut self, socket: usize, command: u8) {
        self.sn_cr_log.push((socket, command));

        let protocol = self.socket_regs[socket][SN_MR] & sn_mr_protocol::MASK;
        if command == SocketCommand::Open as u8 {
            self.socket_regs[socket][SN_SR] = match protocol {
                sn_mr_protocol::TCP => sn_sr::INIT,
                sn_mr_protocol::UDP => sn_sr::UDP,
                _ => sn_sr::CLOSED,
            };
        } else if command == SocketCommand::Listen as u8 {
            self.socket_regs[socket][SN_SR] = sn_sr::LISTEN;
        } else if command == SocketCommand::Close as u8 {
            self.socket_regs[socket][SN_SR] = sn_sr::CLOSED;
        }
        // CONNECT, DISCON, SEND, SEND_KEEP and RECV leave SN_SR for the
        // test to drive by hand through `ChipHandle`, matching how the
        // real chip would only change it asynchronously.

        // The real chip clears SN_CR once the command is accepted; this
        // model has no latency to simulate, so it clears immediately.
        self.socket_regs[socket][SN_CR] = 0;
    }
}

/// A handle a test keeps alongside the `Registers<ChipBus>` it drives, to
/// directly inspect or poke chip state the way real hardware — or a human
/// at the other end of the link — would.
#[derive(Clone)]
pub struct ChipHandle(Rc<RefCell<Sim>>);

impl ChipHandle {
    pub fn set_sn_sr(&self, socket: usize, value: u8) {
        self.0.borrow_mut().socket_regs[socket][SN_SR] = value;
    }

    pub fn sn_sr(&self, socket: usize) -> u8 {
        self.0.borrow().socket_regs[socket][SN_SR]
    }

    pub fn set_sn_ir(&self, socket: usize, value: u8) {
        self.0.borrow_mut().socket_regs[socket][SN_IR] = value;
    }

    pub fn sn_ir(&self, socket: usize) -> u8 {
        self.0.borrow().socket_regs[socket][SN_IR]
    }

    /// Sets `SN_TX_FSR` (free TX size) and `SN_TX_WR` together, as real
    /// hardware would keep them consistent.
    pub fn set_tx_state(&self, socket: usize, free_size: u16, write_pointer: u16) {
        let mut sim = self.0.borrow_mut();
        sim.socket_regs[socket][0x20..0x22].copy_from_slice(&free_size.to_be_bytes());
        sim.socket_regs[socket][0x24..0x26].copy_from_slice(&write_pointer.to_be_bytes());
    }

    /// Sets `SN_RX_RSR` (bytes available) and `SN_RX_RD` together, and
    /// seeds the RX buffer contents starting at `read_pointer`, wrapping
    /// modulo [`BUFFER_SIZE`] exactly as the chip's physical buffer would.
    pub fn set_rx_state(&self, socket: usize, available: u16, read_pointer: u16, data: &[u8]) {
        let mut sim = self.0.borrow_mut();
        sim.socket_regs[socket][0x26..0x28].copy_from_slice(&available.to_be_bytes());
        sim.socket_regs[socket][0x28..0x2A].copy_from_slice(&read_pointer.to_be_bytes());
        for (i, byte) in data.iter().enumerate() {
            let physical = (read_pointer as usize).wrapping_add(i) % BUFFER_SIZE;
            sim.rx_buffer[socket][physical] = *byte;
        }
    }

    pub fn tx_buffer_from(&self, socket: usize, pointer: u16, len: usize) -> std::vec::Vec<u8> {
        let sim = self.0.borrow();
        (0..len)
            .map(|i| sim.tx_buffer[socket][(pointer as usize).wrapping_add(i) % BUFFER_SIZE])
            .collect()
    }

    pub fn sn_cr_log(&self) -> std::vec::Vec<(usize, u8)> {
        self.0.borrow().sn_cr_log.clone()
    }

    pub fn set_sn_mr(&self, socket: usize, value: u8) {
        self.0.borrow_mut().socket_regs[socket][SN_MR] = value;
    }

    pub fn common_byte(&self, offset: usize) -> u8 {
        self.0.borrow().common[offset % COMMON_SPACE]
    }

    pub fn set_common_byte(&self, offset: usize, value: u8) {
        self.0.borrow_mut().common[offset % COMMON_SPACE] = value;
    }

    pub fn common_bytes(&self, offset: usize, len: usize) -> std::vec::Vec<u8> {
        let sim = self.0.borrow();
        (0..len).map(|i| sim.common[(offset + i) % COMMON_SPACE]).collect()
    }

    pub fn socket_reg_byte(&self, socket: usize, offset: usize) -> u8 {
        self.0.borrow().socket_regs[socket][offset % SOCKET_REG_SPACE]
    }
}

#[derive(Clone)]
pub struct ChipBus(Rc<RefCell<Sim>>);

impl ChipBus {
    fn decode(header: &FrameHeader) -> (u16, Option<(usize, u8)>) {
        let offset = u16::from_be_bytes([header[0], header[1]]);
        let bsb = header[2] >> 3;
        if bsb == 0 {
            (offset, None)
        } else {
            let socket = (header[2] >> 5) as usize;
            let block = (header[2] >> 3) & 0b11;
            (offset, Some((socket, block)))
        }
    }
}

impl SpiBus for ChipBus {
    type Error = ();

    fn write_frame(&mut self, header: &FrameHeader, data: &[u8]) -> Result<(), Self::Error> {
        let (offset, target) = Self::decode(header);
        let mut sim = self.0.borrow_mut();
        match target {
            None => {
                let base = offset as usize % COMMON_SPACE;
                for (i, byte) in data.iter().enumerate() {
                    sim.common[(base + i) % COMMON_SPACE] = *byte;
                }
                // The model has no reset latency to simulate: a software
                // reset (MR's top bit) is reported complete immediately,
                // the same way SN_CR commands clear immediately below.
                if base == 0x00 {
                    sim.common[0x00] &= !(1 << 7);
                }
            }
            Some((socket, 0b01)) => {
                let base = offset as usize % SOCKET_REG_SPACE;
                if base == SN_IR {
                    sim.socket_regs[socket][SN_IR] &= !data[0];
                } else {
                    for (i, byte) in data.iter().enumerate() {
                        sim.socket_regs[socket][(base + i) % SOCKET_REG_SPACE] = *byte;
                    }
                    if base == SN_CR && data[0] != 0 {
                        let command = data[0];
                        sim.process_command(socket, command);
                    }
                }
            }
            Some((socket, 0b10)) => {
                for (i, byte) in data.iter().enumerate() {
                    let physical = (offset as usize).wrapping_add(i) % BUFFER_SIZE;
                    sim.tx_buffer[socket][physical] = *byte;
                }
            }
            Some((socket, _)) => {
                for (i, byte) in data.iter().enumerate() {
                    let physical = (offset as usize).wrapping_add(i) % BUFFER_SIZE;
                    sim.rx_buffer[socket][physical] = *byte;
                }
            }
        }
        Ok(())
    }

    fn read_frame(&mut self, header: &FrameHeader, data: &mut [u8]) -> Result<(), Self::Error> {
        let (offset, target) = Self::decode(header);
        let sim = self.0.borrow();
        match target {
            None => {
                let base = offset as usize % COMMON_SPACE;
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = sim.common[(base + i) % COMMON_SPACE];
                }
            }
            Some((socket, 0b01)) => {
                let base = offset as usize % SOCKET_REG_SPACE;
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = sim.socket_regs[socket][(base + i) % SOCKET_REG_SPACE];
                }
            }
            Some((socket, 0b10)) => {
                for (i, byte) in data.iter_mut().enumerate() {
                    let physical = (offset as usize).wrapping_add(i) % BUFFER_SIZE;
                    *byte = sim.tx_buffer[socket][physical];
                }
            }
            Some((socket, _)) => {
                for (i, byte) in data.iter_mut().enumerate() {
                    let physical = (offset as usize).wrapping_add(i) % BUFFER_SIZE;
                    *byte = sim.rx_buffer[socket][physical];
                }
            }
        }
        Ok(())
    }
}

/// Builds a fresh chip model and the bus handle a test drives it with.
pub fn chip() -> (ChipBus, ChipHandle) {
    let sim = Rc::new(RefCell::new(Sim::default()));
    (ChipBus(sim.clone()), ChipHandle(sim))
}

/// A [`NetworkStack`](crate::stack::NetworkStack) already taken through
/// [`NetworkStack::initialize`](crate::stack::NetworkStack::initialize)
/// with an arbitrary, otherwise-unremarkable configuration, for tests of
/// the socket types layered on top that do not care about initialization
/// itself.
pub fn initialized_stack(
    bus: ChipBus,
) -> crate::stack::NetworkStack<ChipBus, crate::net::port::SequentialPortPool, crate::net::port::SequentialPortPool> {
    let stack = crate::stack::NetworkStack::new(
        SpiFramer::new(bus),
        crate::net::port::SequentialPortPool::new(49152),
        crate::net::port::SequentialPortPool::new(50000),
    );
    stack
        .initialize(&crate::stack::StackConfig {
            phy_mode: crate::phy::PhyMode::AllCapableAutoNegotiation,
            ping_blocking: false,
            arp_forcing: false,
            retransmission_timeout: 2000,
            retransmission_retry_count: 8,
            mac_address: crate::net::MacAddress::new([0x02, 0, 0, 0, 0, 1]),
            ip_address: crate::net::Ipv4Addr::new(10, 0, 0, 1),
            gateway_address: crate::net::Ipv4Addr::new(10, 0, 0, 254),
            subnet_mask: crate::net::Ipv4Addr::new(255, 255, 255, 0),
            interrupt_assert_level: 0x07D0,
            socket_buffer_size: crate::socket::SocketBufferSize::Kb2,
        })
        .unwrap();
    stack
}
