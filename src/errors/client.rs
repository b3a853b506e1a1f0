use thiserror::Error;

use super::{ExceptionCode, FrameError};

/// The error half of every `deserialize_*` / [`crate::client::ModbusClient`] response.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("malformed response: {0}")]
    Frame(#[from] FrameError),

    #[error("device returned exception: {0}")]
    Exception(ExceptionCode),
}

impl ClientError {
    /// Recover the original C API's single-signed-int return convention,
    /// `-128 - exception_code`. Kept for parity with the protocol
    /// specification's scenarios; new code should match on the enum instead.
    pub fn to_legacy_code(&self) -> Option<i32> {
        match self {
            ClientError::Exception(code) => Some(-128 - code.to_wire_code() as i32),
            ClientError::Frame(_) => None,
        }
    }
}
