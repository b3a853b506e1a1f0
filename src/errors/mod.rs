mod client;
mod frame;
mod kinds;
mod server;

pub use kinds::ExceptionCode;
pub use kinds::FrameFormatKind;
pub use kinds::FrameSizeKind;

pub use client::ClientError;
pub use frame::FrameError;
pub use server::ServerError;
