//! Driver and protocol stack for the WIZnet W5500 hardwired TCP/IP
//! controller.
//!
//! The W5500 is an SPI-attached chip that implements the TCP/IP stack in
//! hardware across eight independent sockets, each with its own transmit
//! and receive buffer. This crate talks the chip's SPI framing and register
//! protocol ([`spi`], [`registers`], [`buffer`]), tracks which of its eight
//! sockets are free ([`allocator`]), and exposes that as connectionless
//! ([`udp`]) and connection-oriented ([`tcp`]) socket types built on a
//! single [`stack::NetworkStack`].
//!
//! Callers drive everything from a single-threaded polling loop: every
//! operation is synchronous with the SPI bus and returns promptly,
//! surfacing `WouldBlock` rather than waiting on the network.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate enum_primitive;

extern crate paste;

#[macro_use]
extern crate static_assertions;

pub mod allocator;
pub mod buffer;
pub mod net;
pub mod phy;
pub mod registers;
pub mod socket;
pub mod spi;
pub mod stack;
#[cfg(test)]
mod test_support;
pub mod tcp;
pub mod udp;

pub use net::{Endpoint, Ipv4Addr, MacAddress};
pub use phy::PhyMode;
pub use socket::{SocketBufferSize, SocketId};
pub use stack::{NetworkStack, StackConfig};
pub use tcp::{TcpClient, TcpServer, TcpServerConnectionHandler};
pub use udp::UdpSocket;
