//! A transport-agnostic Modbus RTU/TCP protocol engine.
//!
//! This crate performs no I/O: callers own the send/receive byte buffers and
//! are responsible for reading, writing, and framing them over an actual
//! serial port or socket. What's here is the wire-protocol machinery —
//! length resolution, frame validation, request/response codecs, and the
//! server dispatcher — parameterized over an RTU or TCP [`backend::Backend`]
//! chosen once at construction and never switched.
//!
//! ```
//! use agile_modbus::client::ModbusClient;
//!
//! let mut client = ModbusClient::rtu();
//! client.set_slave(17);
//! let mut send_buf = [0u8; 16];
//! let len = client.serialize_read_holding_registers(0x006B, 3, &mut send_buf).unwrap();
//! assert_eq!(&send_buf[..len], &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
//! ```

pub mod backend;
pub mod bits;
pub mod client;
pub mod consts;
pub mod errors;
pub mod frame;
pub mod length;
pub mod server;
pub mod slave;

pub use backend::{Backend, Direction, RtuBackend, Sft, TcpBackend};
pub use client::ModbusClient;
pub use errors::{ClientError, ExceptionCode, FrameError, FrameFormatKind, FrameSizeKind, ServerError};
pub use frame::{check, validate, FrameCheck};
pub use length::{resolve_length, LengthResolution, MetaLengthHooks, NoExtensions};
pub use server::{HandlerResult, ModbusServer, SlaveCallback, SlaveInfo};
pub use slave::SlaveDevice;
