#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormatKind {
    InvalidHeader,
    InvalidMbapProtocolId,
    MismatchedTransactionId,
    UnexpectedFunction,
    UnsupportedFunction,
}

impl std::fmt::Display for FrameFormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHeader => write!(f, "Invalid frame header"),
            Self::InvalidMbapProtocolId => write!(f, "MBAP protocol identifier is not zero"),
            Self::MismatchedTransactionId => {
                write!(f, "Response transaction id does not match request")
            }
            Self::UnexpectedFunction => write!(f, "Response function code does not match request"),
            Self::UnsupportedFunction => write!(f, "Function code has no registered handler"),
        }
    }
}
