use crate::errors::{FrameError, FrameFormatKind};

use super::{Backend, Sft};

/// TCP/MBAP framing: `tid(2 BE) | protocol=0x0000(2) | length(2 BE) | unit-id(1) | function(1) | data(N)`.
/// `length` counts everything from `unit-id` to the end of the PDU, so it
/// never includes itself or the two leading header fields.
#[derive(Debug, Clone)]
pub struct TcpBackend {
    slave: Option<u8>,
    next_tid: u16,
}

impl Default for TcpBackend {
    fn default() -> Self {
        Self {
            slave: None,
            next_tid: 0,
        }
    }
}

impl TcpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The transaction id the next outgoing request will carry, without
    /// consuming it. Exposed for tests that want to assert ordering.
    pub fn peek_next_tid(&self) -> u16 {
        self.next_tid
    }

    fn take_tid(&mut self) -> u16 {
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        tid
    }
}

impl Backend for TcpBackend {
    const HEADER_LENGTH: usize = 7;
    const CHECKSUM_LENGTH: usize = 0;
    const MAX_ADU_LENGTH: usize = 260;

    fn set_slave(&mut self, slave: u8) {
        self.slave = Some(slave);
    }

    fn slave(&self) -> Option<u8> {
        self.slave
    }

    fn is_broadcast(&self, _slave: u8) -> bool {
        // TCP has no wire-level broadcast concept; every unit id gets a reply.
        false
    }

    fn build_request_header(&mut self, function: u8, out: &mut [u8]) -> usize {
        let tid = self.take_tid();
        let slave = self.slave.unwrap_or(0xFF);
        out[0..2].copy_from_slice(&tid.to_be_bytes());
        out[2..4].copy_from_slice(&[0x00, 0x00]);
        out[4..6].copy_from_slice(&[0x00, 0x00]); // length placeholder, filled by send_msg_pre
        out[6] = slave;
        out[7] = function;
        8
    }

    fn build_response_basis(&self, sft: &Sft, out: &mut [u8]) -> usize {
        out[0..2].copy_from_slice(&sft.tid.to_be_bytes());
        out[2..4].copy_from_slice(&[0x00, 0x00]);
        out[4..6].copy_from_slice(&[0x00, 0x00]);
        out[6] = sft.slave;
        out[7] = sft.function;
        8
    }

    fn prepare_response_tid(&self, req: &[u8]) -> u16 {
        u16::from_be_bytes([req[0], req[1]])
    }

    fn send_msg_pre(&self, buf: &mut [u8], len: usize) -> usize {
        let mbap_length = (len - 6) as u16;
        buf[4..6].copy_from_slice(&mbap_length.to_be_bytes());
        len
    }

    fn check_integrity(&self, _buf: &[u8], len: usize) -> Result<usize, FrameError> {
        Ok(len)
    }

    fn pre_check_confirmation(&self, req: &[u8], rsp: &[u8]) -> Result<(), FrameError> {
        if rsp.len() < 4 || req.len() < 4 {
            return Err(FrameError::too_short(
                "MBAP header truncated before protocol id",
                rsp,
            ));
        }
        if rsp[0] != req[0] || rsp[1] != req[1] {
            return Err(FrameError::format(
                FrameFormatKind::MismatchedTransactionId,
                format!(
                    "response tid {:02x}{:02x} does not match request tid {:02x}{:02x}",
                    rsp[0], rsp[1], req[0], req[1]
                ),
                rsp,
            ));
        }
        if rsp[2] != 0x00 || rsp[3] != 0x00 {
            return Err(FrameError::format(
                FrameFormatKind::InvalidMbapProtocolId,
                "MBAP protocol id must be 0x0000",
                rsp,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_increments_and_wraps_modulo_65536() {
        let mut backend = TcpBackend::new();
        backend.set_slave(0xFF);
        let mut buf = [0u8; 16];
        assert_eq!(backend.peek_next_tid(), 0);
        backend.build_request_basis(0x03, 0, 1, &mut buf);
        assert_eq!(backend.peek_next_tid(), 1);
        backend.next_tid = u16::MAX;
        backend.build_request_basis(0x03, 0, 1, &mut buf);
        assert_eq!(backend.peek_next_tid(), 0);
    }

    #[test]
    fn send_msg_pre_backfills_length_excluding_mbap_header() {
        let backend = TcpBackend::new();
        let mut buf = [0u8; 16];
        buf[6] = 0xFF;
        buf[7] = 0x03;
        let len = backend.send_msg_pre(&mut buf, 12);
        assert_eq!(len, 12);
        assert_eq!(&buf[4..6], &[0x00, 0x06]);
    }

    #[test]
    fn pre_check_confirmation_rejects_tid_mismatch() {
        let backend = TcpBackend::new();
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03];
        let rsp = [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03];
        assert!(backend.pre_check_confirmation(&req, &rsp).is_err());
        let rsp_ok = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03];
        assert!(backend.pre_check_confirmation(&req, &rsp_ok).is_ok());
    }
}
