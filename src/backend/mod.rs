//! The backend abstraction: header layout, checksum/MBAP framing, and the
//! handful of per-direction hooks that differ between RTU and TCP. Two
//! concrete types implement [`Backend`]; [`crate::client::ModbusClient`] and
//! [`crate::server::ModbusServer`] are generic over it so the choice is
//! resolved at construction and dispatched statically, never through a
//! vtable.

mod rtu;
mod tcp;

pub use rtu::{crc16, RtuBackend};
pub use tcp::TcpBackend;

use crate::errors::FrameError;

/// Which way a message is travelling relative to the engine instance doing
/// the parsing. The length resolver and the response-matching rules in the
/// client codec both key off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A request arriving at a server.
    Indication,
    /// A response arriving at a client.
    Confirmation,
}

/// Slave / Function / Transaction-id triple threaded through the server
/// dispatcher and into the response basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sft {
    pub slave: u8,
    pub function: u8,
    pub tid: u16,
}

/// A fixed capability bundle: constants plus the hooks needed to frame a
/// request/response and check a received frame's integrity. Implemented by
/// [`RtuBackend`] and [`TcpBackend`]; user code cannot implement new
/// backends without also extending the length resolver, so the trait is
/// deliberately not part of the public extension surface.
pub trait Backend {
    /// Bytes that precede the function code (1 for RTU, 7 for TCP's MBAP).
    const HEADER_LENGTH: usize;
    /// Bytes appended after the PDU (2 for RTU's CRC-16, 0 for TCP).
    const CHECKSUM_LENGTH: usize;
    /// Largest complete ADU this backend will ever produce or accept.
    const MAX_ADU_LENGTH: usize;

    fn set_slave(&mut self, slave: u8);
    fn slave(&self) -> Option<u8>;

    /// RTU frames addressed to the broadcast address never get a reply.
    fn is_broadcast(&self, slave: u8) -> bool;

    /// Write the request header (slave/MBAP + function code, assigning a
    /// fresh transaction id for TCP). Returns the number of bytes written
    /// (`HEADER_LENGTH + 1`).
    fn build_request_header(&mut self, function: u8, out: &mut [u8]) -> usize;

    /// Write the fixed request header, function code, address and quantity.
    /// Returns the number of bytes written (`HEADER_LENGTH + 5`).
    fn build_request_basis(&mut self, function: u8, addr: u16, nb: u16, out: &mut [u8]) -> usize {
        let header_len = self.build_request_header(function, out);
        out[header_len..header_len + 2].copy_from_slice(&addr.to_be_bytes());
        out[header_len + 2..header_len + 4].copy_from_slice(&nb.to_be_bytes());
        header_len + 4
    }

    /// Write the fixed response header and function code. Returns the number
    /// of bytes written (`HEADER_LENGTH + 1`).
    fn build_response_basis(&self, sft: &Sft, out: &mut [u8]) -> usize;

    /// Derive the transaction id a response to `req` must carry (TCP only;
    /// RTU returns 0).
    fn prepare_response_tid(&self, req: &[u8]) -> u16;

    /// Finalize a fully-written ADU of `len` bytes: append the CRC (RTU) or
    /// backfill the MBAP length field (TCP). Returns the final length.
    fn send_msg_pre(&self, buf: &mut [u8], len: usize) -> usize;

    /// Verify the framed message's integrity (CRC for RTU; a no-op returning
    /// `len` for TCP, since TCP carries no checksum of its own).
    fn check_integrity(&self, buf: &[u8], len: usize) -> Result<usize, FrameError>;

    /// Cross-check response framing fields that have no PDU-level
    /// counterpart (TCP: transaction id and protocol id; RTU: nothing).
    fn pre_check_confirmation(&self, req: &[u8], rsp: &[u8]) -> Result<(), FrameError>;
}
