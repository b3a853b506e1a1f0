use thiserror::Error;

use super::{FrameFormatKind, FrameSizeKind};

/// A malformed or undersized frame. Returned by the length resolver, the
/// frame validator, and `check_confirmation` — this crate never distinguishes
/// "malformed" from "not yet fully received" through this type, matching the
/// legacy validator contract (see [`crate::frame::FrameCheck`] for the richer
/// variant that does make the distinction).
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame size error: {kind} - {details}")]
    Size {
        kind: FrameSizeKind,
        details: String,
        frame_hex: Option<String>,
    },

    #[error("frame format error: {kind} - {details}")]
    Format {
        kind: FrameFormatKind,
        details: String,
        frame_hex: Option<String>,
    },

    #[error("CRC mismatch: calculated={calculated:04X}, received={received:04X}, frame={frame_hex}")]
    Crc {
        calculated: u16,
        received: u16,
        frame_hex: String,
    },

    #[error("send buffer too small: need at least {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("{field} quantity {value} exceeds the Modbus limit of {max}")]
    InvalidQuantity {
        field: &'static str,
        value: u16,
        max: u16,
    },
}

impl FrameError {
    pub fn too_short(details: impl Into<String>, frame: &[u8]) -> Self {
        FrameError::Size {
            kind: FrameSizeKind::TooShort,
            details: details.into(),
            frame_hex: Some(hex::encode(frame)),
        }
    }

    pub fn too_long(details: impl Into<String>, frame: &[u8]) -> Self {
        FrameError::Size {
            kind: FrameSizeKind::TooLong,
            details: details.into(),
            frame_hex: Some(hex::encode(frame)),
        }
    }

    pub fn format(kind: FrameFormatKind, details: impl Into<String>, frame: &[u8]) -> Self {
        FrameError::Format {
            kind,
            details: details.into(),
            frame_hex: Some(hex::encode(frame)),
        }
    }

    pub fn crc(calculated: u16, received: u16, frame: &[u8]) -> Self {
        FrameError::Crc {
            calculated,
            received,
            frame_hex: hex::encode(frame),
        }
    }

    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        FrameError::BufferTooSmall { needed, available }
    }

    pub fn invalid_quantity(field: &'static str, value: u16, max: u16) -> Self {
        FrameError::InvalidQuantity { field, value, max }
    }
}
