//! The transmit/receive/shutdown protocol of an established TCP socket
//! (§4.9), shared verbatim by [`super::client::TcpClient`] once connected
//! and by [`super::handler::TcpServerConnectionHandler`].

use crate::buffer::BufferRing;
use crate::registers::{sn_ir, sn_sr, Registers, SocketCommand};
use crate::socket::SocketId;
use crate::spi::SpiBus;

use super::TcpError;

/// `SN_IR` bits cleared together once a transmit's outcome (`SEND_OK` or
/// `TIMEOUT`) has been observed.
const CLEAR_SEND_OUTCOME: u8 = 0x18;

fn connection_is_lost(sr: u8) -> bool {
    matches!(
        sr,
        sn_sr::CLOSED | sn_sr::CLOSE_WAIT | sn_sr::FIN_WAIT | sn_sr::CLOSING | sn_sr::TIME_WAIT | sn_sr::LAST_ACK
    )
}

pub(super) fn transmit<B: SpiBus>(
    registers: &mut Registers<B>,
    socket_id: SocketId,
    data: &[u8],
    outstanding: &mut bool,
) -> Result<usize, TcpError<B::Error>> {
    let sr = registers.read_sn_sr(socket_id)?;
    if connection_is_lost(sr) {
        return Err(TcpError::NotConnected);
    }

    if *outstanding {
        let ir = registers.read_sn_ir(socket_id)?;
        if ir & (sn_ir::SEND_OK | sn_ir::TIMEOUT) == 0 {
            return Err(TcpError::WouldBlock);
        }
        registers.clear_sn_ir(socket_id, CLEAR_SEND_OUTCOME)?;
        *outstanding = false;
    }

    if data.is_empty() {
        return Ok(0);
    }

    let free = BufferRing::tx_free_size(registers, socket_id)?;
    if free == 0 {
        return Err(TcpError::WouldBlock);
    }

    let written = BufferRing::write(registers, socket_id, data)?;
    BufferRing::send(registers, socket_id, false)?;
    *outstanding = true;
    Ok(written as usize)
}

pub(super) fn transmit_keepalive<B: SpiBus>(
    registers: &mut Registers<B>,
    socket_id: SocketId,
) -> Result<(), TcpError<B::Error>> {
    let sr = registers.read_sn_sr(socket_id)?;
    if connection_is_lost(sr) {
        return Err(TcpError::NotConnected);
    }
    BufferRing::send(registers, socket_id, true)?;
    Ok(())
}

pub(super) fn receive<B: SpiBus>(
    registers: &mut Registers<B>,
    socket_id: SocketId,
    buffer: &mut [u8],
) -> Result<usize, TcpError<B::Error>> {
    let sr = registers.read_sn_sr(socket_id)?;
    if sr == sn_sr::CLOSED {
        return Err(TcpError::NotConnected);
    }
    if matches!(sr, sn_sr::FIN_WAIT | sn_sr::CLOSING | sn_sr::TIME_WAIT | sn_sr::LAST_ACK) {
        return Err(TcpError::WouldBlock);
    }

    let available = BufferRing::rx_available(registers, socket_id)?;
    if available == 0 {
        return if sr == sn_sr::CLOSE_WAIT {
            Err(TcpError::NotConnected)
        } else {
            Err(TcpError::WouldBlock)
        };
    }

    if buffer.is_empty() {
        return Ok(0);
    }

    let read = BufferRing::read(registers, socket_id, buffer)?;
    Ok(read as usize)
}

pub(super) fn shutdown<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<(), B::Error> {
    if registers.read_sn_sr(socket_id)? == sn_sr::CLOSED {
        return Ok(());
    }
    registers.issue_sn_cr(socket_id, SocketCommand::Discon)
}

pub(super) fn available<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<u16, B::Error> {
    BufferRing::rx_available(registers, socket_id)
}

pub(super) fn outstanding_bytes<B: SpiBus>(registers: &mut Registers<B>, socket_id: SocketId) -> Result<u16, B::Error> {
    let buffer_size = registers.read_sn_txbuf_size(socket_id)? as u16 * 1024;
    let free = BufferRing::tx_free_size(registers, socket_id)?;
    Ok(buffer_size - free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::SpiFramer;
    use crate::test_support::{chip, BUFFER_SIZE};

    fn established() -> (Registers<crate::test_support::ChipBus>, crate::test_support::ChipHandle) {
        let (bus, handle) = chip();
        handle.set_sn_sr(0, sn_sr::ESTABLISHED);
        (Registers::new(SpiFramer::new(bus)), handle)
    }

    #[test]
    fn transmit_writes_and_sends_then_marks_outstanding() {
        let (mut registers, handle) = established();
        handle.set_tx_state(0, BUFFER_SIZE as u16, 0);

        let mut outstanding = false;
        let written = transmit(&mut registers, SocketId::Socket0, &[1, 2, 3], &mut outstanding).unwrap();

        assert_eq!(written, 3);
        assert!(outstanding);
        assert_eq!(handle.tx_buffer_from(0, 0, 3), vec![1, 2, 3]);
    }

    #[test]
    fn transmit_blocks_while_previous_send_is_unconfirmed() {
        let (mut registers, handle) = established();
        handle.set_tx_state(0, BUFFER_SIZE as u16, 0);

        let mut outstanding = true;
        let err = transmit(&mut registers, SocketId::Socket0, &[1], &mut outstanding).unwrap_err();

        assert_eq!(err, TcpError::WouldBlock);
        assert!(outstanding);
    }

    #[test]
    fn transmit_clears_outstanding_once_send_ok_is_observed() {
        let (mut registers, handle) = established();
        handle.set_tx_state(0, BUFFER_SIZE as u16, 0);
        handle.set_sn_ir(0, sn_ir::SEND_OK);

        let mut outstanding = true;
        transmit(&mut registers, SocketId::Socket0, &[], &mut outstanding).unwrap();

        assert!(!outstanding);
        assert_eq!(handle.sn_ir(0) & (sn_ir::SEND_OK | sn_ir::TIMEOUT), 0);
    }

    #[test]
    fn transmit_reports_not_connected_once_the_peer_has_torn_down() {
        let (mut registers, handle) = established();
        handle.set_sn_sr(0, sn_sr::FIN_WAIT);
        let mut outstanding = false;
        assert_eq!(
            transmit(&mut registers, SocketId::Socket0, &[1], &mut outstanding).unwrap_err(),
            TcpError::NotConnected
        );
    }

    #[test]
    fn receive_reads_available_bytes() {
        let (mut registers, handle) = established();
        handle.set_rx_state(0, 3, 0, &[9, 8, 7]);

        let mut buffer = [0u8; 8];
        let read = receive(&mut registers, SocketId::Socket0, &mut buffer).unwrap();

        assert_eq!(read, 3);
        assert_eq!(&buffer[..3], &[9, 8, 7]);
    }

    #[test]
    fn receive_reports_would_block_on_empty_fin_wait() {
        let (mut registers, handle) = established();
        handle.set_sn_sr(0, sn_sr::FIN_WAIT);
        handle.set_rx_state(0, 0, 0, &[]);

        let mut buffer = [0u8; 8];
        assert_eq!(
            receive(&mut registers, SocketId::Socket0, &mut buffer).unwrap_err(),
            TcpError::WouldBlock
        );
    }

    #[test]
    fn receive_reports_not_connected_on_empty_close_wait() {
        let (mut registers, handle) = established();
        handle.set_sn_sr(0, sn_sr::CLOSE_WAIT);
        handle.set_rx_state(0, 0, 0, &[]);

        let mut buffer = [0u8; 8];
        assert_eq!(
            receive(&mut registers, SocketId::Socket0, &mut buffer).unwrap_err(),
            TcpError::NotConnected
        );
    }

    #[test]
    fn receive_still_drains_available_bytes_during_close_wait() {
        let (mut registers, handle) = established();
        handle.set_sn_sr(0, sn_sr::CLOSE_WAIT);
        handle.set_rx_state(0, 2, 0, &[5, 6]);

        let mut buffer = [0u8; 8];
        let read = receive(&mut registers, SocketId::Socket0, &mut buffer).unwrap();
        assert_eq!(read, 2);
    }

    #[test]
    fn shutdown_is_a_no_op_once_already_closed() {
        let (mut registers, handle) = established();
        handle.set_sn_sr(0, sn_sr::CLOSED);

        shutdown(&mut registers, SocketId::Socket0).unwrap();
        assert!(handle.sn_cr_log().is_empty());
    }

    #[test]
    fn shutdown_issues_discon_otherwise() {
        let (mut registers, handle) = established();

        shutdown(&mut registers, SocketId::Socket0).unwrap();
        assert_eq!(handle.sn_cr_log(), vec![(0, SocketCommand::Discon as u8)]);
    }
}
