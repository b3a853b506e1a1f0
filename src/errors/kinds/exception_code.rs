/// A standard Modbus exception code, returned by a server in place of a
/// normal response payload when a request cannot be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    NotDefined,
    GatewayPathUnavailable,
    GatewayTargetDeviceFailedToRespond,
    /// Internal sentinel used by user callbacks to request a silent drop of
    /// the response (the frame was well-formed but not meant for us).
    /// [`crate::server::ModbusServer::slave_handle`] intercepts this variant
    /// before formatting a reply, so it never actually appears on the wire.
    Unknown,
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "Illegal function"),
            Self::IllegalDataAddress => write!(f, "Illegal data address"),
            Self::IllegalDataValue => write!(f, "Illegal data value"),
            Self::ServerDeviceFailure => write!(f, "Server device failure"),
            Self::Acknowledge => write!(f, "Acknowledge"),
            Self::ServerDeviceBusy => write!(f, "Server device busy"),
            Self::NegativeAcknowledge => write!(f, "Negative acknowledge"),
            Self::MemoryParityError => write!(f, "Memory parity error"),
            Self::NotDefined => write!(f, "Not defined"),
            Self::GatewayPathUnavailable => write!(f, "Gateway path unavailable"),
            Self::GatewayTargetDeviceFailedToRespond => {
                write!(f, "Gateway target device failed to respond")
            }
            Self::Unknown => write!(f, "Unknown (internal drop sentinel)"),
        }
    }
}

impl ExceptionCode {
    /// The byte that follows the `function | 0x80` marker on the wire.
    pub fn to_wire_code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::NegativeAcknowledge => 0x07,
            Self::MemoryParityError => 0x08,
            Self::NotDefined => 0x09,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetDeviceFailedToRespond => 0x0B,
            Self::Unknown => 0xFF,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::ServerDeviceBusy),
            0x07 => Some(Self::NegativeAcknowledge),
            0x08 => Some(Self::MemoryParityError),
            0x09 => Some(Self::NotDefined),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetDeviceFailedToRespond),
            0xFF => Some(Self::Unknown),
            _ => None,
        }
    }

    /// The legacy `-AGILE_MODBUS_EXCEPTION_*` encoding a user callback may
    /// return from `slave_handle` (`-1..=-11`, or `-255` for [`Self::Unknown`]).
    pub fn from_legacy_callback_code(code: i32) -> Option<Self> {
        if code == -255 {
            return Some(Self::Unknown);
        }
        if !(-11..0).contains(&code) {
            return None;
        }
        Self::from_wire_code((-code) as u8)
    }

    /// Recover the exception code from the legacy `-128 - code` client return
    /// convention (see [`crate::errors::ClientError::to_legacy_code`]).
    pub fn from_legacy_client_code(ret: i32) -> Option<Self> {
        if ret > -128 {
            return None;
        }
        Self::from_wire_code((-128 - ret) as u8)
    }
}
