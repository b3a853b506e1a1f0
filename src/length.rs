//! The two-stage length resolver: how many bytes does a PDU need before it
//! can be parsed, function-code by function-code, separately for each
//! [`Direction`].

use crate::backend::Direction;
use crate::consts::function::*;

/// Result of trying to resolve a message's total framed length from a
/// possibly-partial buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthResolution {
    /// The buffer holds enough bytes to know the full framed length.
    Ready(usize),
    /// At least `needed` more bytes must be read before the length (or even
    /// the next resolution step) can be determined.
    NeedMore(usize),
}

/// Extension point for function codes outside the canonical set (§4.2 of the
/// protocol specification). The default implementations return the "other"
/// fallback the tables specify; callers needing a private function code
/// implement this trait and pass it to [`resolve_length`].
pub trait MetaLengthHooks {
    fn compute_meta_length_after_function(&self, _function: u8, direction: Direction) -> usize {
        match direction {
            Direction::Indication => 0,
            Direction::Confirmation => 1,
        }
    }

    fn compute_data_length_after_meta(
        &self,
        _buf: &[u8],
        _function: u8,
        _direction: Direction,
    ) -> usize {
        0
    }
}

/// The hooks used when the caller installs none of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtensions;

impl MetaLengthHooks for NoExtensions {}

fn meta_length_after_function(function: u8, direction: Direction, hooks: &impl MetaLengthHooks) -> usize {
    use Direction::{Confirmation, Indication};
    match (function, direction) {
        (READ_COILS..=WRITE_SINGLE_REGISTER, Indication) => 4,
        (READ_COILS..=READ_INPUT_REGISTERS, Confirmation) => 1,
        (WRITE_SINGLE_COIL, Confirmation) | (WRITE_SINGLE_REGISTER, Confirmation) => 4,
        (WRITE_MULTIPLE_COILS, Indication) | (WRITE_MULTIPLE_REGISTERS, Indication) => 5,
        (WRITE_MULTIPLE_COILS, Confirmation) | (WRITE_MULTIPLE_REGISTERS, Confirmation) => 4,
        (MASK_WRITE_REGISTER, Indication) | (MASK_WRITE_REGISTER, Confirmation) => 6,
        (READ_WRITE_MULTIPLE_REGISTERS, Indication) => 9,
        (READ_WRITE_MULTIPLE_REGISTERS, Confirmation) => 1,
        (READ_EXCEPTION_STATUS, Indication) => 0,
        (READ_EXCEPTION_STATUS, Confirmation) => 1,
        (REPORT_SLAVE_ID, Indication) => 0,
        (REPORT_SLAVE_ID, Confirmation) => 1,
        _ => hooks.compute_meta_length_after_function(function, direction),
    }
}

fn data_length_after_meta(
    buf: &[u8],
    header_length: usize,
    function: u8,
    direction: Direction,
    hooks: &impl MetaLengthHooks,
) -> usize {
    use Direction::{Confirmation, Indication};
    match (function, direction) {
        (WRITE_MULTIPLE_COILS, Indication) | (WRITE_MULTIPLE_REGISTERS, Indication) => {
            buf[header_length + 5] as usize
        }
        (READ_WRITE_MULTIPLE_REGISTERS, Indication) => buf[header_length + 9] as usize,
        (READ_COILS, Confirmation)
        | (READ_DISCRETE_INPUTS, Confirmation)
        | (READ_HOLDING_REGISTERS, Confirmation)
        | (READ_INPUT_REGISTERS, Confirmation)
        | (REPORT_SLAVE_ID, Confirmation)
        | (READ_WRITE_MULTIPLE_REGISTERS, Confirmation) => buf[header_length + 1] as usize,
        _ => hooks.compute_data_length_after_meta(buf, function, direction),
    }
}

/// Resolve the total framed length (header + function + meta + data +
/// checksum) of the message starting at `buf[0]`, given how many bytes have
/// actually been read so far (`observed_len`).
///
/// Returns [`LengthResolution::NeedMore`] rather than an error when the
/// buffer is merely incomplete; the caller (client or server codec) is
/// responsible for collapsing that into its own "malformed" error if it only
/// exposes the legacy two-outcome contract.
pub fn resolve_length(
    buf: &[u8],
    observed_len: usize,
    header_length: usize,
    checksum_length: usize,
    direction: Direction,
    hooks: &impl MetaLengthHooks,
) -> LengthResolution {
    let after_function = header_length + 1;
    if observed_len < after_function {
        return LengthResolution::NeedMore(after_function - observed_len);
    }

    let function = buf[header_length];
    let meta = meta_length_after_function(function, direction, hooks);
    let after_meta = after_function + meta;
    if observed_len < after_meta {
        return LengthResolution::NeedMore(after_meta - observed_len);
    }

    let data = data_length_after_meta(buf, header_length, function, direction, hooks);
    let total = after_meta + data + checksum_length;
    if observed_len < total {
        return LengthResolution::NeedMore(total - observed_len);
    }

    LengthResolution::Ready(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_holding_registers_confirmation_needs_byte_count_then_payload() {
        // slave fc bytecount d0 d1 d2 d3 d4 d5
        let buf = [0x11, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64];
        assert_eq!(
            resolve_length(&buf, 2, 1, 2, Direction::Confirmation, &NoExtensions),
            LengthResolution::NeedMore(1)
        );
        assert_eq!(
            resolve_length(&buf, 9, 1, 2, Direction::Confirmation, &NoExtensions),
            LengthResolution::Ready(11)
        );
    }

    #[test]
    fn write_multiple_registers_indication_reads_byte_count_at_header_plus_5() {
        let buf = [0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0, 0, 0, 0];
        assert_eq!(
            resolve_length(&buf, 11, 1, 2, Direction::Indication, &NoExtensions),
            LengthResolution::Ready(13)
        );
    }

    #[test]
    fn unknown_function_without_hooks_falls_back_to_default() {
        let buf = [0x11, 0x41, 0x00];
        assert_eq!(
            resolve_length(&buf, 3, 1, 2, Direction::Indication, &NoExtensions),
            LengthResolution::Ready(4)
        );
        assert_eq!(
            resolve_length(&buf, 3, 1, 2, Direction::Confirmation, &NoExtensions),
            LengthResolution::Ready(5)
        );
    }

    struct TransferFileHooks;
    impl MetaLengthHooks for TransferFileHooks {
        fn compute_meta_length_after_function(&self, function: u8, direction: Direction) -> usize {
            if function == 0x50 {
                1
            } else {
                NoExtensions.compute_meta_length_after_function(function, direction)
            }
        }

        fn compute_data_length_after_meta(
            &self,
            buf: &[u8],
            function: u8,
            _direction: Direction,
        ) -> usize {
            if function == 0x50 {
                buf[2] as usize
            } else {
                0
            }
        }
    }

    #[test]
    fn custom_hook_fires_only_for_its_own_function_code() {
        let buf = [0x11, 0x50, 0x03, 0, 0, 0];
        assert_eq!(
            resolve_length(&buf, 6, 1, 2, Direction::Indication, &TransferFileHooks),
            LengthResolution::Ready(8)
        );
    }
}
