//! Wire-level limits shared by the client codec and the server dispatcher.

/// Largest PDU (function code + data, excluding framing) a standard request
/// or response may carry.
pub const MAX_PDU_LENGTH: usize = 253;

/// Maximum number of coils a single read-coils/read-discrete-inputs request
/// may ask for.
pub const MAX_READ_BITS: u16 = 2000;

/// Maximum number of coils a single write-multiple-coils request may carry.
pub const MAX_WRITE_BITS: u16 = 1968;

/// Maximum number of registers a single read-registers request may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of registers a single write-multiple-registers request may
/// carry.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum number of registers the read half of a read/write-multiple-
/// registers (fc 23) request may ask for.
pub const MAX_WR_READ_REGISTERS: u16 = 125;

/// Maximum number of registers the write half of a read/write-multiple-
/// registers (fc 23) request may carry.
pub const MAX_WR_WRITE_REGISTERS: u16 = 121;

/// RTU/TCP slave address reserved for "no particular unit, and no reply
/// expected" (RTU) requests.
pub const BROADCAST_ADDRESS: u8 = 0;

/// Version string embedded in the synthesized Report Slave ID (fc 17)
/// response when the caller does not supply one of their own.
pub const DEFAULT_VERSION_STRING: &str = concat!("agile-modbus-rs ", env!("CARGO_PKG_VERSION"));

/// Standard Modbus function codes this engine understands natively.
pub mod function {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const READ_EXCEPTION_STATUS: u8 = 0x07;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const REPORT_SLAVE_ID: u8 = 0x11;
    pub const MASK_WRITE_REGISTER: u8 = 0x16;
    pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

    /// Marker OR'd into a request's function code to signal an exception
    /// response.
    pub const EXCEPTION_BIT: u8 = 0x80;
}
