//! A listening TCP endpoint, and the connections it accepts (§4.8).

use crate::net::port::PortPool;
use crate::registers::{sn_mr_protocol, sn_sr, SocketCommand};
use crate::socket::{SocketId, SOCKET_COUNT};
use crate::spi::SpiBus;
use crate::stack::{BindError, Error, NetworkStack};

use super::handler::TcpServerConnectionHandler;

/// The lifecycle state of a [`TcpServer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpServerState {
    /// A hardware socket is allocated but not yet bound to a port.
    Initialized,
    /// Bound to a local port, not yet listening.
    Bound,
    /// Every owned socket is in the `LISTEN` state.
    Listening,
}

/// A server-side TCP endpoint listening on 1..=8 sockets at once
/// (`backlog` concurrent pending connections).
pub struct TcpServer<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    stack: &'a NetworkStack<B, TcpPool, UdpPool>,
    sockets: [Option<SocketId>; SOCKET_COUNT],
    count: usize,
    backlog: usize,
    state: TcpServerState,
}

impl<'a, B, TcpPool, UdpPool> TcpServer<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    /// Allocates one hardware socket for a new, unbound server.
    pub fn new(stack: &'a NetworkStack<B, TcpPool, UdpPool>) -> Result<Self, Error<B::Error>> {
        let socket_id = stack.allocate_socket()?;
        let mut sockets = [None; SOCKET_COUNT];
        sockets[0] = Some(socket_id);
        Ok(Self {
            stack,
            sockets,
            count: 1,
            backlog: 1,
            state: TcpServerState::Initialized,
        })
    }

    /// The server's current state.
    pub const fn state(&self) -> TcpServerState {
        self.state
    }

    /// The sockets currently owned by this server (listening, or about to
    /// be).
    pub fn owned_sockets(&self) -> &[Option<SocketId>] {
        &self.sockets[..self.count]
    }

    /// Copies the currently owned socket ids into a fixed-size buffer,
    /// since the server never owns more than [`SOCKET_COUNT`] of them and
    /// this crate does not depend on `alloc`.
    fn collect_owned(&self) -> ([SocketId; SOCKET_COUNT], usize) {
        let mut buf = [SocketId::Socket0; SOCKET_COUNT];
        let mut len = 0;
        for socket_id in self.sockets[..self.count].iter().filter_map(|s| *s) {
            buf[len] = socket_id;
            len += 1;
        }
        (buf, len)
    }

    fn first_owned(&self) -> SocketId {
        self.sockets[0].expect("a server always owns at least one socket")
    }

    /// Binds every owned socket (initially just one) to `desired_port`,
    /// opens each in TCP mode, and waits for `SN_SR` to report `INIT`.
    pub fn bind(&mut self, desired_port: u16) -> Result<(), BindError<B::Error, TcpPool::Error>> {
        let port = self.stack.allocate_tcp_port(desired_port).map_err(BindError::Port)?;

        let (owned, len) = self.collect_owned();
        for &socket_id in &owned[..len] {
            self.stack.with_registers(|registers| {
                registers.write_sn_port(socket_id, port)?;
                registers.set_sn_mr_protocol(socket_id, sn_mr_protocol::TCP)?;
                registers.issue_sn_cr(socket_id, SocketCommand::Open)?;
                while registers.read_sn_sr(socket_id)? != sn_sr::INIT {}
                Ok::<(), B::Error>(())
            })?;
        }

        self.state = TcpServerState::Bound;
        Ok(())
    }

    /// Opens `socket_id` with the same `SN_MR`/`SN_PORT`/`SN_MSSR`/
    /// `SN_TTL`/`SN_IMR`/`SN_KPALVTR` as the server's first owned socket,
    /// waits for `INIT`, then issues `LISTEN`.
    fn configure_and_listen(&self, socket_id: SocketId) -> Result<(), B::Error> {
        let template = self.first_owned();
        self.stack.with_registers(|registers| {
            let sn_mr = registers.read_sn_mr(template)?;
            let sn_port = registers.read_sn_port(template)?;
            let sn_mssr = registers.read_sn_mssr(template)?;
            let sn_ttl = registers.read_sn_ttl(template)?;
            let sn_imr = registers.read_sn_imr(template)?;
            let sn_kpalvtr = registers.read_sn_kpalvtr(template)?;

            registers.write_sn_mr(socket_id, sn_mr)?;
            registers.write_sn_port(socket_id, sn_port)?;
            registers.write_sn_mssr(socket_id, sn_mssr)?;
            registers.write_sn_ttl(socket_id, sn_ttl)?;
            registers.write_sn_imr(socket_id, sn_imr)?;
            registers.write_sn_kpalvtr(socket_id, sn_kpalvtr)?;
            registers.issue_sn_cr(socket_id, SocketCommand::Open)?;
            while registers.read_sn_sr(socket_id)? != sn_sr::INIT {}
            registers.issue_sn_cr(socket_id, SocketCommand::Listen)
        })
    }

    /// Grows the owned socket set to `backlog` (a no-op if it is already at
    /// least that large), then issues `LISTEN` on every owned socket.
    pub fn listen(&mut self, backlog: usize) -> Result<(), Error<B::Error>> {
        if backlog > self.count {
            let additional = backlog - self.count;
            let allocated = self.stack.allocate_sockets(additional)?;

            for slot in allocated {
                if let Some(socket_id) = slot {
                    self.configure_and_listen(socket_id)?;
                    self.sockets[self.count] = Some(socket_id);
                    self.count += 1;
                }
            }
        } else {
            let (owned, len) = self.collect_owned();
            for &socket_id in &owned[..len] {
                self.stack.with_registers(|registers| registers.issue_sn_cr(socket_id, SocketCommand::Listen))?;
            }
        }

        self.backlog = backlog.max(self.count);
        self.state = TcpServerState::Listening;
        Ok(())
    }

    fn remove_owned(&mut self, index: usize) {
        for i in index..self.count - 1 {
            self.sockets[i] = self.sockets[i + 1];
        }
        self.sockets[self.count - 1] = None;
        self.count -= 1;
    }

    /// Polls every owned socket for a `LISTEN` → `ESTABLISHED` transition.
    /// The first one found is detached from this server (marked in the
    /// allocator, removed from the owned list) and handed back wrapped in a
    /// [`TcpServerConnectionHandler`]; a replacement socket is then
    /// allocated, configured like its siblings, and put into `LISTEN` so
    /// the server keeps its configured backlog. Returns `None` if no owned
    /// socket has a pending connection.
    pub fn accept(&mut self) -> Result<Option<TcpServerConnectionHandler<'a, B, TcpPool, UdpPool>>, Error<B::Error>> {
        let (owned, len) = self.collect_owned();
        let mut established = None;
        for (index, &socket_id) in owned[..len].iter().enumerate() {
            if self.stack.with_registers(|registers| registers.read_sn_sr(socket_id))? == sn_sr::ESTABLISHED {
                established = Some((index, socket_id));
                break;
            }
        }

        let (index, socket_id) = match established {
            Some(found) => found,
            None => return Ok(None),
        };

        self.remove_owned(index);
        self.stack.mark_detached(socket_id);

        // Replenishment keeps the server at its configured backlog, but it
        // is not load-bearing for handing back the connection we already
        // found: the socket is detached either way, so a replenishment
        // failure (no sockets left, or a bus error configuring the new
        // one) just leaves the server temporarily under backlog rather than
        // stranding the already-detached socket or a half-allocated
        // replacement.
        if self.count < self.backlog {
            if let Ok(replacement) = self.stack.allocate_socket() {
                if self.configure_and_listen(replacement).is_ok() {
                    self.sockets[self.count] = Some(replacement);
                    self.count += 1;
                } else {
                    let _ = self.stack.release_tcp_sockets(&[replacement]);
                }
            }
        }

        Ok(Some(TcpServerConnectionHandler::new(self.stack, socket_id)))
    }

    /// Fans `SN_MR`'s `ND` (No Delayed ACK) bit out to every owned socket.
    pub fn set_no_delayed_ack(&mut self, enabled: bool) -> Result<(), Error<B::Error>> {
        let (owned, len) = self.collect_owned();
        for &socket_id in &owned[..len] {
            self.stack.with_registers(|registers| registers.set_sn_mr_no_delayed_ack(socket_id, enabled))?;
        }
        Ok(())
    }

    /// Fans `SN_MSSR` out to every owned socket.
    pub fn set_max_segment_size(&mut self, mss: u16) -> Result<(), Error<B::Error>> {
        let (owned, len) = self.collect_owned();
        for &socket_id in &owned[..len] {
            self.stack.with_registers(|registers| registers.write_sn_mssr(socket_id, mss))?;
        }
        Ok(())
    }

    /// Fans `SN_TTL` out to every owned socket.
    pub fn set_time_to_live(&mut self, ttl: u8) -> Result<(), Error<B::Error>> {
        let (owned, len) = self.collect_owned();
        for &socket_id in &owned[..len] {
            self.stack.with_registers(|registers| registers.write_sn_ttl(socket_id, ttl))?;
        }
        Ok(())
    }

    /// Fans `SN_KPALVTR` out to every owned socket.
    pub fn set_keepalive_period(&mut self, period: u8) -> Result<(), Error<B::Error>> {
        let (owned, len) = self.collect_owned();
        for &socket_id in &owned[..len] {
            self.stack.with_registers(|registers| registers.write_sn_kpalvtr(socket_id, period))?;
        }
        Ok(())
    }

    /// Fans `SN_IMR` out to every owned socket.
    pub fn set_socket_interrupt_mask(&mut self, mask: u8) -> Result<(), Error<B::Error>> {
        let (owned, len) = self.collect_owned();
        for &socket_id in &owned[..len] {
            self.stack.with_registers(|registers| registers.write_sn_imr(socket_id, mask))?;
        }
        Ok(())
    }

    /// The bitwise OR of every owned socket's `SN_IMR`.
    pub fn socket_interrupt_mask(&self) -> Result<u8, Error<B::Error>> {
        let (owned, len) = self.collect_owned();
        let mut mask = 0;
        for &socket_id in &owned[..len] {
            mask |= self.stack.with_registers(|registers| registers.read_sn_imr(socket_id))?;
        }
        Ok(mask)
    }
}

impl<'a, B, TcpPool, UdpPool> Drop for TcpServer<'a, B, TcpPool, UdpPool>
where
    B: SpiBus,
    TcpPool: PortPool,
    UdpPool: PortPool,
{
    fn drop(&mut self) {
        let (owned, len) = self.collect_owned();
        let _ = self.stack.release_tcp_sockets(&owned[..len]);
    }
}
