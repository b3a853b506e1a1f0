use thiserror::Error;

use super::FrameError;

/// Hard failures from [`crate::server::ModbusServer::slave_handle`].
///
/// A syntactically valid frame that fails a semantic check (bad address
/// range, unsupported function, …) is *not* an error here: the dispatcher
/// instead formats a Modbus exception response and returns its length as
/// `Ok`. This type only covers frames the dispatcher cannot even parse, or
/// buffers too small to hold a reply.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("malformed indication: {0}")]
    Frame(#[from] FrameError),
}
